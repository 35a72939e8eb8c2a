use crate::algorithms::{HtmlTokenDiff, IdenticalBytesDiff, LengthDiff, LinksDiff, TextDiff};
use diffproxy_core::{DecodedBody, DiffAlgorithm, DiffOutcome, Error, Result};
use std::collections::BTreeMap;

/// Name -> implementation lookup for the five built-in diffing types
/// named in spec.md §1. Shared by the orchestrator (to validate the
/// `:algorithm` path segment before dispatching a fetch) and by the
/// worker process (to actually run the diff).
pub struct Registry {
    algorithms: Vec<Box<dyn DiffAlgorithm>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            algorithms: vec![
                Box::new(IdenticalBytesDiff),
                Box::new(LengthDiff),
                Box::new(TextDiff),
                Box::new(HtmlTokenDiff),
                Box::new(LinksDiff),
            ],
        }
    }

    pub fn get(&self, name: &str) -> Option<&dyn DiffAlgorithm> {
        self.algorithms
            .iter()
            .find(|a| a.name() == name)
            .map(|a| a.as_ref())
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.algorithms.iter().map(|a| a.name()).collect()
    }

    pub fn run(
        &self,
        name: &str,
        a: &DecodedBody,
        b: &DecodedBody,
        options: &BTreeMap<String, String>,
    ) -> Result<DiffOutcome> {
        let algo = self
            .get(name)
            .ok_or_else(|| Error::UnknownAlgorithm(name.to_string()))?;
        algo.run(a, b, options)
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn body(s: &str) -> DecodedBody {
        DecodedBody {
            bytes: s.as_bytes().to_vec(),
            text: Some(s.to_string()),
            encoding: "utf-8".to_string(),
        }
    }

    #[test]
    fn all_five_algorithms_are_registered() {
        let reg = Registry::new();
        for name in ["identical_bytes", "length", "text", "html_token", "links"] {
            assert!(reg.get(name).is_some(), "missing algorithm {name}");
        }
    }

    #[test]
    fn unknown_algorithm_is_rejected() {
        let reg = Registry::new();
        let a = body("x");
        let err = reg.run("not_real", &a, &a, &BTreeMap::new()).unwrap_err();
        assert!(matches!(err, Error::UnknownAlgorithm(_)));
    }
}
