//! Named predicates that rules refer to by string.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use scraper::ElementRef;

/// A check that could not produce an answer for an element.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{0}")]
pub struct CheckError(pub String);

impl CheckError {
    pub fn new(reason: impl Into<String>) -> Self {
        Self(reason.into())
    }
}

/// Predicate signature: `Ok(true)` when the element satisfies the check.
pub type CheckFn = dyn for<'a> Fn(ElementRef<'a>) -> Result<bool, CheckError> + Send + Sync;

/// Registry of checks keyed by name. Re-registering a name replaces it.
#[derive(Clone, Default)]
pub struct CheckRegistry {
    checks: HashMap<String, Arc<CheckFn>>,
}

impl CheckRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, name: &str, check: F)
    where
        F: for<'a> Fn(ElementRef<'a>) -> Result<bool, CheckError> + Send + Sync + 'static,
    {
        self.checks.insert(name.to_string(), Arc::new(check));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.checks.contains_key(name)
    }

    /// Run a check by name. `None` when the name is not registered.
    pub fn run(&self, name: &str, element: ElementRef<'_>) -> Option<Result<bool, CheckError>> {
        self.checks.get(name).map(|check| check(element))
    }

    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.checks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for CheckRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CheckRegistry")
            .field("checks", &self.names())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::Document;

    #[test]
    fn registered_check_runs() {
        let mut registry = CheckRegistry::new();
        registry.register("is-paragraph", |el| Ok(el.value().name() == "p"));

        let doc = Document::parse("<p>x</p>");
        let p = doc.select("p").unwrap()[0];
        assert_eq!(registry.run("is-paragraph", p), Some(Ok(true)));
        assert!(registry.run("missing", p).is_none());
    }

    #[test]
    fn reregistration_replaces() {
        let mut registry = CheckRegistry::new();
        registry.register("c", |_| Ok(false));
        registry.register("c", |_| Err(CheckError::new("boom")));

        let doc = Document::parse("<p>x</p>");
        let p = doc.select("p").unwrap()[0];
        assert_eq!(registry.run("c", p), Some(Err(CheckError::new("boom"))));
        assert_eq!(registry.names(), vec!["c"]);
    }
}
