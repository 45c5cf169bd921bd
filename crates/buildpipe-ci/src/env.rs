//! Inherited process environment and per-step overrides.

use std::collections::BTreeMap;
use std::ffi::{OsStr, OsString};

/// Environment handed to a step's process.
///
/// Keys and values are raw OS strings so inherited variables that are not
/// valid unicode reach the child unchanged.
pub type StepEnv = BTreeMap<OsString, OsString>;

/// Immutable snapshot of the environment a pipeline inherits.
///
/// Each step gets a fresh merge of this base with its own overrides, so an
/// override set by one step is never visible to the next.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BaseEnvironment {
    vars: StepEnv,
}

impl BaseEnvironment {
    /// Capture the current process environment, byte for byte.
    pub fn capture() -> Self {
        Self {
            vars: std::env::vars_os().collect(),
        }
    }

    /// Build a base environment from explicit pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<OsString>,
        V: Into<OsString>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    pub fn get(&self, key: &str) -> Option<&OsStr> {
        self.vars.get(OsStr::new(key)).map(OsString::as_os_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Merge `overrides` on top of the base. Overrides win on key collision.
    pub fn merged(&self, overrides: &BTreeMap<String, String>) -> StepEnv {
        let mut env = self.vars.clone();
        env.extend(
            overrides
                .iter()
                .map(|(k, v)| (OsString::from(k), OsString::from(v))),
        );
        env
    }
}
