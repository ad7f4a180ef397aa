// functions.rs — One fingerprint per public top-level function definition.
//
// Source files are scanned for balanced top-level forms. Strings, comments
// and character literals are skipped so parentheses inside them do not
// count. A form whose head is the public definition keyword becomes one
// fingerprint named `<prefix>-<namespace>/<function>`.

use serde::{Deserialize, Serialize};

use sdm_core::{Deadline, Project};

use crate::aspect::{Apply, Aspect, Extract};
use crate::error::{ApplyError, ExtractionError};
use crate::fingerprint::Fingerprint;
use crate::hasher::{hash_str, normalize_whitespace};

/// Payload of a function body fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FunctionData {
    pub file: String,
    /// SHA-256 of the whitespace-normalized body.
    pub digest: String,
    /// The whitespace-normalized definition form.
    pub body: String,
}

#[derive(Debug, Clone)]
pub struct FunctionBodyAspect {
    prefix: String,
    extension: String,
    keyword: String,
}

impl FunctionBodyAspect {
    pub fn new(
        prefix: impl Into<String>,
        extension: impl Into<String>,
        keyword: impl Into<String>,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            extension: extension.into(),
            keyword: keyword.into(),
        }
    }

    /// Public `defn` forms in `.clj` files.
    pub fn clojure() -> Self {
        Self::new("public-defn-bodies", "clj", "defn")
    }

    pub fn into_aspect(self, display_name: &str) -> Aspect {
        let prefix = self.prefix.clone();
        let applier = self.clone();
        Aspect::new(prefix.clone(), self)
            .owning_prefix(prefix)
            .with_display_name(display_name)
            .with_apply(applier)
            .with_renderer_fn(|fp: &Fingerprint| fp.name.clone())
    }

    /// Name of the function a form defines, if the form is a public definition.
    fn defined_name<'a>(&self, form: &'a str) -> Option<&'a str> {
        let rest = form.strip_prefix('(')?.trim_start();
        let rest = rest.strip_prefix(self.keyword.as_str())?;
        if !rest.starts_with(char::is_whitespace) {
            return None;
        }
        rest.split(|c: char| c.is_whitespace() || c == '(' || c == '[' || c == ')')
            .find(|token| !token.is_empty() && !token.starts_with('^'))
    }

    fn namespace_of(&self, path: &str, forms: &[Form<'_>]) -> String {
        forms
            .iter()
            .find_map(|form| {
                let rest = form.text.strip_prefix('(')?.trim_start().strip_prefix("ns")?;
                if !rest.starts_with(char::is_whitespace) {
                    return None;
                }
                rest.split_whitespace()
                    .next()
                    .map(|ns| ns.trim_end_matches(')').to_string())
            })
            .unwrap_or_else(|| {
                let file = path.rsplit('/').next().unwrap_or(path);
                file.strip_suffix(&format!(".{}", self.extension))
                    .unwrap_or(file)
                    .to_string()
            })
    }

    fn fingerprint_name(&self, namespace: &str, function: &str) -> String {
        format!("{}-{}/{}", self.prefix, namespace, function)
    }
}

/// A balanced top-level form and its byte span in the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Form<'a> {
    start: usize,
    end: usize,
    text: &'a str,
}

/// Split source into top-level parenthesized forms.
fn top_level_forms(source: &str) -> Result<Vec<Form<'_>>, String> {
    let mut forms = Vec::new();
    let mut depth = 0usize;
    let mut start = 0usize;
    let mut in_string = false;
    let mut chars = source.char_indices().peekable();

    while let Some((i, c)) = chars.next() {
        if in_string {
            match c {
                '\\' => {
                    chars.next();
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            ';' => {
                while let Some((_, next)) = chars.peek() {
                    if *next == '\n' {
                        break;
                    }
                    chars.next();
                }
            }
            '\\' => {
                chars.next();
            }
            '(' | '[' | '{' => {
                if depth == 0 && c == '(' {
                    start = i;
                }
                depth += 1;
            }
            ')' | ']' | '}' => {
                depth = depth
                    .checked_sub(1)
                    .ok_or_else(|| format!("unmatched '{}' at byte {}", c, i))?;
                if depth == 0 && c == ')' {
                    let end = i + 1;
                    forms.push(Form {
                        start,
                        end,
                        text: &source[start..end],
                    });
                }
            }
            _ => {}
        }
    }

    if in_string {
        return Err("unterminated string".to_string());
    }
    if depth != 0 {
        return Err(format!("{} unclosed form(s)", depth));
    }
    Ok(forms)
}

impl Extract for FunctionBodyAspect {
    fn extract(
        &self,
        project: &dyn Project,
        deadline: Deadline,
    ) -> Result<Vec<Fingerprint>, ExtractionError> {
        let mut fingerprints: Vec<Fingerprint> = Vec::new();
        for path in project.files()? {
            if !path.ends_with(&format!(".{}", self.extension)) {
                continue;
            }
            if deadline.expired() {
                return Err(ExtractionError::DeadlineExceeded {
                    aspect: self.prefix.clone(),
                });
            }
            let source = project.read(&path)?;
            let forms = top_level_forms(&source).map_err(|reason| ExtractionError::Malformed {
                path: path.clone(),
                reason,
            })?;
            let namespace = self.namespace_of(&path, &forms);

            for form in &forms {
                let Some(function) = self.defined_name(form.text) else {
                    continue;
                };
                let name = self.fingerprint_name(&namespace, function);
                if fingerprints.iter().any(|fp| fp.name == name) {
                    tracing::debug!(fingerprint = %name, file = %path, "redefinition ignored; first definition wins");
                    continue;
                }
                let body = normalize_whitespace(form.text);
                let data = FunctionData {
                    file: path.clone(),
                    digest: hash_str(&body),
                    body,
                };
                let value = serde_json::to_value(&data).map_err(|e| ExtractionError::Malformed {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
                fingerprints.push(Fingerprint::new(name, &self.prefix, value));
            }
        }
        Ok(fingerprints)
    }
}

impl Apply for FunctionBodyAspect {
    fn apply(
        &self,
        project: &dyn Project,
        target: &Fingerprint,
        deadline: Deadline,
    ) -> Result<(), ApplyError> {
        if deadline.expired() {
            return Err(ApplyError::DeadlineExceeded {
                name: target.name.clone(),
            });
        }
        let data: FunctionData = target.data_as().map_err(|e| ApplyError::InvalidTarget {
            name: target.name.clone(),
            reason: e.to_string(),
        })?;
        let function = self
            .defined_name(&data.body)
            .ok_or_else(|| ApplyError::InvalidTarget {
                name: target.name.clone(),
                reason: "body is not a public definition".to_string(),
            })?;

        let Some(source) = project.read_optional(&data.file)? else {
            return Err(ApplyError::Unsupported {
                name: target.name.clone(),
                reason: format!("{} does not exist", data.file),
            });
        };
        let forms = top_level_forms(&source).map_err(|reason| ApplyError::Unsupported {
            name: target.name.clone(),
            reason: format!("cannot parse {}: {}", data.file, reason),
        })?;

        let updated = match forms
            .iter()
            .find(|form| self.defined_name(form.text) == Some(function))
        {
            Some(form) => format!(
                "{}{}{}",
                &source[..form.start],
                data.body,
                &source[form.end..]
            ),
            None => format!("{}\n\n{}\n", source.trim_end(), data.body),
        };
        project.write(&data.file, &updated)?;
        tracing::info!(file = %data.file, function = %function, "function body replaced with target");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdm_core::{InMemoryProject, RepoId};

    const CORE_CLJ: &str = r#"(ns acme.core
  (:require [clojure.string :as str]))

;; (defn commented-out [] nil)
(defn greet
  "Says hello (politely)."
  [name]
  (str "Hello, " name "!"))

(defn- private-helper [x] x)

(defn shout [s] (str/upper-case s))
"#;

    fn project(source: &str) -> InMemoryProject {
        InMemoryProject::of(RepoId::parse("acme/app"), [("src/acme/core.clj", source)])
    }

    #[test]
    fn splits_top_level_forms() {
        let forms = top_level_forms(CORE_CLJ).unwrap();
        assert_eq!(forms.len(), 4);
        assert!(forms[1].text.starts_with("(defn greet"));
        assert!(top_level_forms("(defn broken [x]").is_err());
        assert!(top_level_forms("(a))").is_err());
    }

    #[test]
    fn extracts_public_definitions_only() {
        let aspect = FunctionBodyAspect::clojure();
        let fps = aspect.extract(&project(CORE_CLJ), Deadline::none()).unwrap();
        let names: Vec<_> = fps.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(
            names,
            vec!["public-defn-bodies-acme.core/greet", "public-defn-bodies-acme.core/shout"]
        );
    }

    #[test]
    fn reformatting_is_not_a_change() {
        let aspect = FunctionBodyAspect::clojure();
        let reformatted = CORE_CLJ.replace("(defn shout [s] (str/upper-case s))", "(defn shout\n  [s]\n  (str/upper-case s))");
        let a = aspect.extract(&project(CORE_CLJ), Deadline::none()).unwrap();
        let b = aspect.extract(&project(&reformatted), Deadline::none()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn apply_replaces_definition() {
        let aspect = FunctionBodyAspect::clojure();
        let changed = CORE_CLJ.replace("(str/upper-case s)", "(str (str/upper-case s) \"!\")");
        let target = aspect
            .extract(&project(&changed), Deadline::none())
            .unwrap()
            .into_iter()
            .find(|f| f.name.ends_with("/shout"))
            .unwrap();

        let p = project(CORE_CLJ);
        aspect.apply(&p, &target, Deadline::none()).unwrap();
        let after = aspect.extract(&p, Deadline::none()).unwrap();
        let shout = after.iter().find(|f| f.name == target.name).unwrap();
        assert!(shout.matches(&target));
        assert!(p.read("src/acme/core.clj").unwrap().contains("defn- private-helper"));
    }

    #[test]
    fn apply_appends_missing_definition() {
        let aspect = FunctionBodyAspect::clojure();
        let extra = format!("{}\n(defn wave [] :wave)\n", CORE_CLJ);
        let target = aspect
            .extract(&project(&extra), Deadline::none())
            .unwrap()
            .into_iter()
            .find(|f| f.name.ends_with("/wave"))
            .unwrap();

        let p = project(CORE_CLJ);
        aspect.apply(&p, &target, Deadline::none()).unwrap();
        assert!(aspect
            .extract(&p, Deadline::none())
            .unwrap()
            .iter()
            .any(|f| f.matches(&target)));
    }

    #[test]
    fn namespace_falls_back_to_file_stem() {
        let aspect = FunctionBodyAspect::clojure();
        let p = InMemoryProject::of(RepoId::parse("acme/app"), [("scripts/tool.clj", "(defn run [] 1)")]);
        let fps = aspect.extract(&p, Deadline::none()).unwrap();
        assert_eq!(fps[0].name, "public-defn-bodies-tool/run");
    }
}
