// machine.rs — The default delivery machine for Leiningen projects.
//
// Goals:
//   autofix      formatter commands (default branch, no Travis file)
//   inspect      review commands, planned only when some are configured
//   version      stamp a unique version into project.clj
//   build        build commands
//   fingerprint  extract aspects, diff against targets, report drift
//   publish      deploy with SDM_VERSION set
//   tag          mark the release, optionally running tag commands
//
// Rules, first match wins:
//   lein ∧ material change ∧ default branch → "Lein Build"
//   lein ∧ material change                  → "Check"
//
// Goals that write to the project share the `project` lock token.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use regex::Regex;
use sdm_core::{ConfigurationError, Project, PushEvent};
use sdm_fingerprint::builtin::clojure_registry;
use sdm_fingerprint::builtin::dependencies::LEIN_DEPENDENCY_PATTERN;
use sdm_fingerprint::{AspectRegistry, DiffWorkflow, FingerprintStore, JsonFileFingerprintStore};
use sdm_goal::push_test::{
    all_satisfied, has_file, has_file_with_extension, material_change, not, push_test,
    to_default_branch, MaterialChangeOptions,
};
use sdm_goal::{
    goals, CancellationFlag, Goal, GoalDescriptions, GoalScheduler, Goals, JsonlReportSink,
    PushEvaluation, PushRule, PushTest, ReportDispatcher,
};

use crate::autofix::{AutofixFulfillment, CommandTransform, Transform};
use crate::config::DeliveryConfig;
use crate::env::EnvLayers;
use crate::exec::{Executor, ProcessExecutor};
use crate::fingerprint_goal::FingerprintFulfillment;
use crate::inspection::InspectionFulfillment;
use crate::spawn::SpawnFulfillment;
use crate::version::{VersionFile, VersionFulfillment, VersionRegistry};

/// Lock token held by goals that edit the project.
pub const PROJECT_LOCK: &str = "project";

pub fn is_lein() -> Arc<dyn PushTest> {
    has_file("project.clj")
}

pub fn is_clojure() -> Arc<dyn PushTest> {
    has_file_with_extension("clj")
}

/// project.clj lists `symbol` in its `:plugins` vector.
pub fn has_lein_plugin(symbol: impl Into<String>) -> Arc<dyn PushTest> {
    let symbol = symbol.into();
    push_test(format!("hasLeinPlugin({})", symbol), move |ctx| {
        match ctx.project.read_optional("project.clj") {
            Ok(Some(content)) => lein_plugins(&content).iter().any(|p| p == &symbol),
            Ok(None) => false,
            Err(e) => {
                tracing::debug!(error = %e, "project.clj unreadable; push test not satisfied");
                false
            }
        }
    })
}

/// Artifact names in the `:plugins` vector of a project.clj.
fn lein_plugins(project_clj: &str) -> Vec<String> {
    let Some(vector) = plugins_vector(project_clj) else {
        return Vec::new();
    };
    let Ok(pattern) = Regex::new(LEIN_DEPENDENCY_PATTERN) else {
        return Vec::new();
    };
    pattern
        .captures_iter(vector)
        .map(|c| c[1].to_string())
        .collect()
}

/// The bracketed form following `:plugins`, brackets included.
fn plugins_vector(project_clj: &str) -> Option<&str> {
    let after = project_clj.find(":plugins")? + ":plugins".len();
    let open = after + project_clj[after..].find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (i, ch) in project_clj[open..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&project_clj[open..=open + i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// The goals of the default machine, for composing custom graphs.
#[derive(Debug, Clone)]
pub struct DeliveryGoals {
    pub autofix: Goal,
    pub inspect: Option<Goal>,
    pub version: Goal,
    pub build: Goal,
    pub fingerprint: Goal,
    pub publish: Goal,
    pub tag: Goal,
}

impl DeliveryGoals {
    /// autofix → (inspect) → version → { build, fingerprint }
    pub fn check(&self) -> Result<Goals, ConfigurationError> {
        let mut graph = goals("Check").plan(&self.autofix);
        if let Some(inspect) = &self.inspect {
            graph = graph.plan(inspect).after(&self.autofix);
        }
        graph
            .plan(&self.version)
            .after(&self.autofix)
            .plan(&self.build)
            .after(&self.version)
            .plan(&self.fingerprint)
            .after(&self.version)
            .build()
    }

    /// Check, then publish after build and tag after publish.
    pub fn lein_build(&self) -> Result<Goals, ConfigurationError> {
        goals("Lein Build")
            .plan(self.check()?)
            .plan(&self.publish)
            .after(&self.build)
            .plan(&self.tag)
            .after(&self.publish)
            .build()
    }
}

/// Assembles a [`DeliveryMachine`].
pub struct MachineBuilder {
    config: DeliveryConfig,
    root: PathBuf,
    executor: Arc<dyn Executor>,
    registry: Option<AspectRegistry>,
    targets: Option<Arc<dyn FingerprintStore>>,
    previous: Option<Arc<dyn FingerprintStore>>,
    reports: Option<Arc<ReportDispatcher>>,
    transforms: Vec<(Arc<dyn Transform>, Option<Arc<dyn PushTest>>)>,
}

impl MachineBuilder {
    pub fn with_executor(mut self, executor: Arc<dyn Executor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_registry(mut self, registry: AspectRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_target_store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.targets = Some(store);
        self
    }

    pub fn with_previous_store(mut self, store: Arc<dyn FingerprintStore>) -> Self {
        self.previous = Some(store);
        self
    }

    pub fn with_reports(mut self, reports: Arc<ReportDispatcher>) -> Self {
        self.reports = Some(reports);
        self
    }

    /// Register an extra autofix transform.
    pub fn with_autofix(mut self, transform: Arc<dyn Transform>, push_test: Option<Arc<dyn PushTest>>) -> Self {
        self.transforms.push((transform, push_test));
        self
    }

    pub fn build(self) -> Result<DeliveryMachine, ConfigurationError> {
        let config = self.config;
        let storage = config.storage_under(&self.root);
        let env = Arc::new(EnvLayers::new(config.env.clone()));
        let versions = Arc::new(VersionRegistry::new());

        let registry = match self.registry {
            Some(registry) => registry,
            None => clojure_registry()?,
        };
        let registry = Arc::new(registry);
        let targets = self
            .targets
            .unwrap_or_else(|| Arc::new(JsonFileFingerprintStore::new(&storage.targets_dir)));
        let previous = self
            .previous
            .unwrap_or_else(|| Arc::new(JsonFileFingerprintStore::new(&storage.previous_dir)));
        let reports = self.reports.unwrap_or_else(|| {
            Arc::new(ReportDispatcher::new().with_sink(Arc::new(JsonlReportSink::new(&storage.report_log))))
        });

        let mut autofix = AutofixFulfillment::new();
        for command in &config.autofix.commands {
            let formatter = CommandTransform::new(command.clone(), self.executor.clone(), env.clone());
            let applies = all_satisfied(vec![is_lein(), not(has_file(".travis.yml")), to_default_branch()]);
            autofix.add(Arc::new(formatter), Some(applies));
        }
        for (transform, push_test) in self.transforms {
            autofix.add(transform, push_test);
        }

        let workflow = Arc::new(DiffWorkflow::new(registry.clone(), config.diff.clone()));
        let fingerprint = FingerprintFulfillment::new(workflow, targets.clone(), previous.clone());
        let mut fingerprint_goal = Goal::new("fingerprint").with_rank(1);
        if fingerprint.mutates_project() {
            fingerprint_goal = fingerprint_goal.with_lock(PROJECT_LOCK);
        }

        let inspect = if config.inspect.commands.is_empty() {
            None
        } else {
            Some(Goal::new("inspect").with_rank(1).with_fulfillment(Arc::new(
                InspectionFulfillment::new(config.inspect.commands.clone(), self.executor.clone(), env.clone()),
            )))
        };

        let tag = if config.tag.commands.is_empty() {
            Goal::new("tag").with_rank(3)
        } else {
            Goal::new("tag").with_rank(3).with_fulfillment(Arc::new(
                SpawnFulfillment::new("tag", config.tag.commands.clone(), self.executor.clone(), env.clone())
                    .with_version(versions.clone()),
            ))
        };

        let goals = DeliveryGoals {
            autofix: Goal::new("autofix")
                .with_rank(0)
                .with_lock(PROJECT_LOCK)
                .with_fulfillment(Arc::new(autofix)),
            inspect,
            version: Goal::new("version")
                .with_rank(0)
                .with_push_test(is_lein())
                .with_lock(PROJECT_LOCK)
                .with_fulfillment(Arc::new(VersionFulfillment::new(
                    VersionFile::from_config(&config.version)?,
                    versions.clone(),
                ))),
            build: Goal::new("build").with_rank(1).with_fulfillment(Arc::new(SpawnFulfillment::new(
                "build",
                config.build.commands.clone(),
                self.executor.clone(),
                env.clone(),
            ))),
            fingerprint: fingerprint_goal.with_fulfillment(Arc::new(fingerprint)),
            publish: Goal::new("publish")
                .with_rank(2)
                .with_descriptions(publish_descriptions())
                .with_fulfillment(Arc::new(
                    SpawnFulfillment::new("publish", config.publish.commands.clone(), self.executor.clone(), env)
                        .with_version(versions.clone()),
                )),
            tag,
        };

        let material = material_change(MaterialChangeOptions::default());
        let rules = vec![
            PushRule::when(all_satisfied(vec![is_lein(), material.clone(), to_default_branch()]))
                .it_means("Lein build")
                .set_goals(goals.lein_build()?),
            PushRule::when(all_satisfied(vec![is_lein(), material]))
                .it_means("Lein check")
                .set_goals(goals.check()?),
        ];
        let scheduler = GoalScheduler::new(rules, config.scheduler.clone()).with_reports(reports);

        Ok(DeliveryMachine {
            config,
            scheduler,
            registry,
            targets,
            previous,
            versions,
            goals,
        })
    }
}

fn publish_descriptions() -> GoalDescriptions {
    GoalDescriptions {
        in_process: "Publishing...".to_string(),
        completed: "Published".to_string(),
        failed: "Publish failed".to_string(),
        ..GoalDescriptions::for_name("publish")
    }
}

/// Rules, goals and stores for delivering Leiningen projects.
pub struct DeliveryMachine {
    config: DeliveryConfig,
    scheduler: GoalScheduler,
    registry: Arc<AspectRegistry>,
    targets: Arc<dyn FingerprintStore>,
    previous: Arc<dyn FingerprintStore>,
    versions: Arc<VersionRegistry>,
    goals: DeliveryGoals,
}

impl DeliveryMachine {
    /// Start assembling a machine; storage paths resolve against `root`.
    pub fn builder(config: DeliveryConfig, root: impl AsRef<Path>) -> MachineBuilder {
        MachineBuilder {
            config,
            root: root.as_ref().to_path_buf(),
            executor: Arc::new(ProcessExecutor::new()),
            registry: None,
            targets: None,
            previous: None,
            reports: None,
            transforms: Vec::new(),
        }
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &GoalScheduler {
        &self.scheduler
    }

    pub fn registry(&self) -> &Arc<AspectRegistry> {
        &self.registry
    }

    pub fn targets(&self) -> &Arc<dyn FingerprintStore> {
        &self.targets
    }

    pub fn previous(&self) -> &Arc<dyn FingerprintStore> {
        &self.previous
    }

    pub fn versions(&self) -> &Arc<VersionRegistry> {
        &self.versions
    }

    pub fn goals(&self) -> &DeliveryGoals {
        &self.goals
    }

    pub async fn evaluate(
        &self,
        push: PushEvent,
        project: Arc<dyn Project>,
        cancel: &CancellationFlag,
    ) -> PushEvaluation {
        self.scheduler.evaluate(push, project, cancel).await
    }
}
