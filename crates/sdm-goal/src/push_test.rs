// push_test.rs — Push tests: predicates deciding whether a rule or goal applies.
//
// A push test sees the push metadata and the project snapshot at the
// pushed revision. Tests are cheap, synchronous and side-effect free;
// project read errors count as "not satisfied" and are logged.

use std::fmt;
use std::sync::Arc;

use sdm_core::{Project, PushEvent};

/// What a push test can look at.
#[derive(Clone, Copy)]
pub struct PushContext<'a> {
    pub push: &'a PushEvent,
    pub project: &'a dyn Project,
}

impl<'a> PushContext<'a> {
    pub fn new(push: &'a PushEvent, project: &'a dyn Project) -> Self {
        Self { push, project }
    }
}

pub trait PushTest: Send + Sync {
    fn name(&self) -> &str;

    fn test(&self, ctx: &PushContext<'_>) -> bool;
}

type Predicate = dyn Fn(&PushContext<'_>) -> bool + Send + Sync;

struct PredicatePushTest {
    name: String,
    predicate: Box<Predicate>,
}

impl PushTest for PredicatePushTest {
    fn name(&self) -> &str {
        &self.name
    }

    fn test(&self, ctx: &PushContext<'_>) -> bool {
        (self.predicate)(ctx)
    }
}

impl fmt::Debug for dyn PushTest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PushTest({})", self.name())
    }
}

/// A named push test from a closure.
pub fn push_test<F>(name: impl Into<String>, predicate: F) -> Arc<dyn PushTest>
where
    F: Fn(&PushContext<'_>) -> bool + Send + Sync + 'static,
{
    Arc::new(PredicatePushTest {
        name: name.into(),
        predicate: Box::new(predicate),
    })
}

/// Always satisfied.
pub fn always() -> Arc<dyn PushTest> {
    push_test("always", |_| true)
}

/// The project contains a file at `path`.
pub fn has_file(path: impl Into<String>) -> Arc<dyn PushTest> {
    let path = path.into();
    push_test(format!("hasFile({})", path), move |ctx| ctx.project.exists(&path))
}

/// The project contains at least one file with the given extension.
pub fn has_file_with_extension(extension: impl Into<String>) -> Arc<dyn PushTest> {
    let extension = extension.into();
    push_test(
        format!("hasFileWithExtension({})", extension),
        move |ctx| match ctx.project.has_file_with_extension(&extension) {
            Ok(found) => found,
            Err(e) => {
                tracing::debug!(extension = %extension, error = %e, "project scan failed; push test not satisfied");
                false
            }
        },
    )
}

/// The push is to the repository's default branch.
pub fn to_default_branch() -> Arc<dyn PushTest> {
    push_test("toDefaultBranch", |ctx| ctx.push.is_default_branch())
}

/// The push is to the named branch.
pub fn to_branch(branch: impl Into<String>) -> Arc<dyn PushTest> {
    let branch = branch.into();
    push_test(format!("toBranch({})", branch), move |ctx| ctx.push.branch == branch)
}

fn joined(tests: &[Arc<dyn PushTest>], sep: &str) -> String {
    tests
        .iter()
        .map(|t| t.name())
        .collect::<Vec<_>>()
        .join(sep)
}

/// Every test is satisfied. Empty is satisfied.
pub fn all_satisfied(tests: Vec<Arc<dyn PushTest>>) -> Arc<dyn PushTest> {
    let name = format!("all({})", joined(&tests, ", "));
    push_test(name, move |ctx| tests.iter().all(|t| t.test(ctx)))
}

/// At least one test is satisfied. Empty is not satisfied.
pub fn any_satisfied(tests: Vec<Arc<dyn PushTest>>) -> Arc<dyn PushTest> {
    let name = format!("any({})", joined(&tests, ", "));
    push_test(name, move |ctx| tests.iter().any(|t| t.test(ctx)))
}

pub fn not(test: Arc<dyn PushTest>) -> Arc<dyn PushTest> {
    let name = format!("not({})", test.name());
    push_test(name, move |ctx| !test.test(ctx))
}

/// Files whose changes do not count as material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MaterialChangeOptions {
    pub ignored_suffixes: Vec<String>,
}

impl Default for MaterialChangeOptions {
    fn default() -> Self {
        Self {
            ignored_suffixes: vec!["README.md".to_string()],
        }
    }
}

/// Satisfied when any changed file is not ignored.
///
/// When the push carries no changed-file list the change is assumed
/// material.
pub fn material_change(options: MaterialChangeOptions) -> Arc<dyn PushTest> {
    push_test("materialChange", move |ctx| {
        let Some(files) = &ctx.push.changed_files else {
            tracing::debug!(push = %ctx.push.label(), "changed files unknown; treating push as material");
            return true;
        };
        let material: Vec<&String> = files
            .iter()
            .filter(|f| {
                !options
                    .ignored_suffixes
                    .iter()
                    .any(|suffix| f.ends_with(suffix.as_str()))
            })
            .collect();
        tracing::debug!(push = %ctx.push.label(), changed = files.len(), material = material.len(), "material change check");
        !material.is_empty()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdm_core::{InMemoryProject, RepoId};

    fn push(branch: &str) -> PushEvent {
        PushEvent::new(RepoId::parse("acme/app"), branch, "abc1234def", "main")
    }

    fn lein_project() -> InMemoryProject {
        InMemoryProject::of(
            RepoId::parse("acme/app"),
            [("project.clj", "(defproject x)"), ("src/x/core.clj", "(ns x.core)")],
        )
    }

    #[test]
    fn file_tests() {
        let p = lein_project();
        let push = push("main");
        let ctx = PushContext::new(&push, &p);
        assert!(has_file("project.clj").test(&ctx));
        assert!(!has_file("pom.xml").test(&ctx));
        assert!(has_file_with_extension("clj").test(&ctx));
        assert!(!has_file_with_extension("java").test(&ctx));
    }

    #[test]
    fn branch_tests() {
        let p = lein_project();
        let main = push("main");
        let feature = push("feature/x");
        assert!(to_default_branch().test(&PushContext::new(&main, &p)));
        assert!(!to_default_branch().test(&PushContext::new(&feature, &p)));
        assert!(to_branch("feature/x").test(&PushContext::new(&feature, &p)));
    }

    #[test]
    fn combinators() {
        let p = lein_project();
        let push = push("feature/x");
        let ctx = PushContext::new(&push, &p);

        let both = all_satisfied(vec![has_file("project.clj"), not(to_default_branch())]);
        assert!(both.test(&ctx));
        assert_eq!(both.name(), "all(hasFile(project.clj), not(toDefaultBranch))");

        assert!(!all_satisfied(vec![has_file("project.clj"), to_default_branch()]).test(&ctx));
        assert!(any_satisfied(vec![has_file("pom.xml"), always()]).test(&ctx));
        assert!(!any_satisfied(vec![]).test(&ctx));
        assert!(all_satisfied(vec![]).test(&ctx));
    }

    #[test]
    fn material_change_ignores_readme_only_pushes() {
        let p = lein_project();
        let test = material_change(MaterialChangeOptions::default());

        let docs = push("main").with_changed_files(vec!["README.md".into(), "docs/README.md".into()]);
        assert!(!test.test(&PushContext::new(&docs, &p)));

        let code = push("main").with_changed_files(vec!["README.md".into(), "src/x/core.clj".into()]);
        assert!(test.test(&PushContext::new(&code, &p)));

        let unknown = push("main");
        assert!(test.test(&PushContext::new(&unknown, &p)));
    }
}
