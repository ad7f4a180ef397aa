//! Built-in aspects for Clojure/Leiningen projects.
//!
//! Each aspect type implements [`Extract`](crate::Extract) and
//! [`Apply`](crate::Apply) directly and converts into a registrable
//! [`Aspect`] with `into_aspect`.

pub mod config_file;
pub mod dependencies;
pub mod functions;

pub use config_file::ConfigFileAspect;
pub use dependencies::DependencyAspect;
pub use functions::FunctionBodyAspect;

use sdm_core::ConfigurationError;

use crate::aspect::Aspect;
use crate::registry::AspectRegistry;

/// Logback config, Leiningen dependencies and public function bodies.
pub fn clojure_aspects() -> Result<Vec<Aspect>, ConfigurationError> {
    Ok(vec![
        ConfigFileAspect::logback().into_aspect("Logback"),
        DependencyAspect::lein()?.into_aspect("Lein dependencies"),
        FunctionBodyAspect::clojure().into_aspect("Clojure Functions"),
    ])
}

/// A registry holding [`clojure_aspects`].
pub fn clojure_registry() -> Result<AspectRegistry, ConfigurationError> {
    let mut registry = AspectRegistry::new();
    for aspect in clojure_aspects()? {
        registry.register(aspect)?;
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_aspects_do_not_overlap() {
        let registry = clojure_registry().unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.owner_of_name("clojure-project-deps").unwrap().display_name(),
            "Lein dependencies"
        );
        assert_eq!(registry.owner_of_name("elk-logback").unwrap().name(), "elk-logback");
        assert_eq!(
            registry
                .owner_of_name("public-defn-bodies-acme.core/greet")
                .unwrap()
                .name(),
            "public-defn-bodies"
        );
    }
}
