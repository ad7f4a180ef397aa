// goals.rs — Goals: composing goals into an acyclic execution graph.
//
//   goals("Lein Build")
//       .plan(autofix)
//       .plan(version).after(&autofix)
//       .plan(build).after(&version)
//       .build()?
//
// `plan` adds goals (or a whole sub-graph) to the graph; `after` adds an
// ordering edge from each prerequisite to every goal of the preceding
// `plan`. Mistakes (a cycle, two different goals under one name) are
// recorded by the builder and returned from `build()`, so a chain of
// calls reads straight through and configuration still fails before any
// push is evaluated.

use std::collections::{BTreeSet, HashMap, HashSet};

use sdm_core::ConfigurationError;

use crate::goal::Goal;

/// Something that can be planned into a graph or named as a prerequisite.
#[derive(Debug, Clone)]
pub enum Plannable {
    Goal(Goal),
    Goals(Goals),
}

impl From<Goal> for Plannable {
    fn from(goal: Goal) -> Self {
        Plannable::Goal(goal)
    }
}

impl From<&Goal> for Plannable {
    fn from(goal: &Goal) -> Self {
        Plannable::Goal(goal.clone())
    }
}

impl From<Goals> for Plannable {
    fn from(goals: Goals) -> Self {
        Plannable::Goals(goals)
    }
}

impl From<&Goals> for Plannable {
    fn from(goals: &Goals) -> Self {
        Plannable::Goals(goals.clone())
    }
}

impl Plannable {
    fn goals(&self) -> Vec<Goal> {
        match self {
            Plannable::Goal(goal) => vec![goal.clone()],
            Plannable::Goals(goals) => goals.goals.clone(),
        }
    }
}

/// An immutable, validated goal graph.
#[derive(Debug, Clone)]
pub struct Goals {
    name: String,
    /// In first-planned order.
    goals: Vec<Goal>,
    /// `(prerequisite, dependent)` by unique name.
    edges: BTreeSet<(String, String)>,
}

/// Start building a named graph.
pub fn goals(name: impl Into<String>) -> GoalsBuilder {
    GoalsBuilder {
        name: name.into(),
        goals: Vec::new(),
        edges: BTreeSet::new(),
        last_planned: Vec::new(),
        error: None,
    }
}

pub struct GoalsBuilder {
    name: String,
    goals: Vec<Goal>,
    edges: BTreeSet<(String, String)>,
    last_planned: Vec<String>,
    error: Option<ConfigurationError>,
}

impl GoalsBuilder {
    /// Add a goal or sub-graph. Planning a goal that is already present is
    /// a no-op; a sub-graph brings its edges along.
    pub fn plan(mut self, item: impl Into<Plannable>) -> Self {
        let item = item.into();
        self.last_planned.clear();
        for goal in item.goals() {
            self.add_goal(goal);
        }
        if let Plannable::Goals(sub) = &item {
            self.edges.extend(sub.edges.iter().cloned());
            self.check_acyclic();
        }
        self
    }

    /// Plan several items as one group (no order among them).
    pub fn plan_all<I, P>(mut self, items: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Plannable>,
    {
        self.last_planned.clear();
        let mut group = Vec::new();
        for item in items {
            self = self.plan(item);
            group.append(&mut self.last_planned);
        }
        self.last_planned = group;
        self
    }

    /// Order the goals of the preceding `plan` after `prerequisite`.
    pub fn after(mut self, prerequisite: impl Into<Plannable>) -> Self {
        let prerequisite = prerequisite.into();
        for prereq in prerequisite.goals() {
            for dependent in &self.last_planned {
                self.edges
                    .insert((prereq.unique_name().to_string(), dependent.clone()));
            }
        }
        self.check_acyclic();
        self
    }

    /// Several prerequisites at once.
    pub fn after_all<I, P>(mut self, prerequisites: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Plannable>,
    {
        for p in prerequisites {
            self = self.after(p);
        }
        self
    }

    pub fn build(self) -> Result<Goals, ConfigurationError> {
        if let Some(error) = self.error {
            return Err(error);
        }
        Ok(Goals {
            name: self.name,
            goals: self.goals,
            edges: self.edges,
        })
    }

    fn fail(&mut self, error: ConfigurationError) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    fn add_goal(&mut self, goal: Goal) {
        let name = goal.unique_name().to_string();
        match self.goals.iter().find(|g| g.unique_name() == name) {
            Some(existing) if existing.same_as(&goal) => {}
            Some(_) => self.fail(ConfigurationError::DuplicateGoal {
                graph: self.name.clone(),
                name: name.clone(),
            }),
            None => self.goals.push(goal),
        }
        if !self.last_planned.contains(&name) {
            self.last_planned.push(name);
        }
    }

    fn check_acyclic(&mut self) {
        if let Some(cycle) = find_cycle(&self.edges) {
            self.fail(ConfigurationError::CyclicGraph {
                graph: self.name.clone(),
                cycle,
            });
        }
    }
}

/// A cycle in the edge relation, as the node path that closes it.
fn find_cycle(edges: &BTreeSet<(String, String)>) -> Option<Vec<String>> {
    let mut adjacency: HashMap<&str, Vec<&str>> = HashMap::new();
    let mut nodes: BTreeSet<&str> = BTreeSet::new();
    for (from, to) in edges {
        adjacency.entry(from.as_str()).or_default().push(to.as_str());
        nodes.insert(from.as_str());
        nodes.insert(to.as_str());
    }

    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit<'a>(
        node: &'a str,
        adjacency: &HashMap<&'a str, Vec<&'a str>>,
        marks: &mut HashMap<&'a str, Mark>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        match marks.get(node) {
            Some(Mark::Done) => return None,
            Some(Mark::Visiting) => {
                let start = path.iter().position(|n| *n == node).unwrap_or(0);
                let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
                cycle.push(node.to_string());
                return Some(cycle);
            }
            None => {}
        }
        marks.insert(node, Mark::Visiting);
        path.push(node);
        for next in adjacency.get(node).into_iter().flatten() {
            if let Some(cycle) = visit(next, adjacency, marks, path) {
                return Some(cycle);
            }
        }
        path.pop();
        marks.insert(node, Mark::Done);
        None
    }

    let mut marks = HashMap::new();
    for node in nodes {
        let mut path = Vec::new();
        if let Some(cycle) = visit(node, &adjacency, &mut marks, &mut path) {
            return Some(cycle);
        }
    }
    None
}

impl Goals {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Goals in the order they were first planned.
    pub fn goals(&self) -> &[Goal] {
        &self.goals
    }

    pub fn len(&self) -> usize {
        self.goals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.goals.is_empty()
    }

    pub fn get(&self, unique_name: &str) -> Option<&Goal> {
        self.goals.iter().find(|g| g.unique_name() == unique_name)
    }

    pub fn contains(&self, unique_name: &str) -> bool {
        self.get(unique_name).is_some()
    }

    /// Every `after` edge, including ones whose prerequisite was never planned.
    pub fn edges(&self) -> impl Iterator<Item = (&str, &str)> {
        self.edges.iter().map(|(a, b)| (a.as_str(), b.as_str()))
    }

    /// Planned direct prerequisites of a goal. Prerequisites that are not
    /// part of this graph impose no constraint.
    pub fn prerequisites_of(&self, unique_name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(from, to)| to == unique_name && self.contains(from))
            .map(|(from, _)| from.as_str())
            .collect()
    }

    /// Planned goals that list `unique_name` as a direct prerequisite.
    pub fn dependents_of(&self, unique_name: &str) -> Vec<&str> {
        self.edges
            .iter()
            .filter(|(from, to)| from == unique_name && self.contains(to))
            .map(|(_, to)| to.as_str())
            .collect()
    }

    /// Deterministic topological order. Goals with no relative order are
    /// sorted by ordered name, then unique name.
    pub fn flatten(&self) -> Vec<Goal> {
        let by_name: HashMap<&str, &Goal> =
            self.goals.iter().map(|g| (g.unique_name(), g)).collect();

        let mut in_degree: HashMap<&str, usize> = by_name.keys().map(|n| (*n, 0)).collect();
        let mut outgoing: HashMap<&str, Vec<&str>> = HashMap::new();
        let mut dropped = HashSet::new();
        for (from, to) in &self.edges {
            if !by_name.contains_key(from.as_str()) || !by_name.contains_key(to.as_str()) {
                dropped.insert((from.as_str(), to.as_str()));
                continue;
            }
            outgoing.entry(from.as_str()).or_default().push(to.as_str());
            if let Some(d) = in_degree.get_mut(to.as_str()) {
                *d += 1;
            }
        }
        for (from, to) in &dropped {
            tracing::debug!(graph = %self.name, prerequisite = %from, goal = %to, "prerequisite not planned; edge ignored");
        }

        let key = |name: &str| -> (String, String) {
            let goal = by_name[name];
            (goal.ordered_name().to_string(), goal.unique_name().to_string())
        };
        let mut ready: BTreeSet<(String, String)> = in_degree
            .iter()
            .filter(|(_, d)| **d == 0)
            .map(|(n, _)| key(*n))
            .collect();

        let mut order = Vec::with_capacity(self.goals.len());
        while let Some(next) = ready.pop_first() {
            let name = next.1;
            for dependent in outgoing.get(name.as_str()).into_iter().flatten() {
                if let Some(d) = in_degree.get_mut(dependent) {
                    *d -= 1;
                    if *d == 0 {
                        ready.insert(key(*dependent));
                    }
                }
            }
            if let Some(goal) = by_name.get(name.as_str()) {
                order.push((*goal).clone());
            }
        }
        order
    }
}
