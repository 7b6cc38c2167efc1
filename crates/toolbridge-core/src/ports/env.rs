//! Environment provider port.
//!
//! Settings and launcher resolution read the process environment through
//! this trait so tests can supply a fixed map instead of mutating globals.

use std::collections::HashMap;
use std::ffi::OsString;

/// Read access to environment variables.
pub trait EnvProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<OsString>;

    /// The variable as UTF-8, or `None` when unset or not valid UTF-8.
    fn get_string(&self, key: &str) -> Option<String> {
        self.get(key).and_then(|v| v.into_string().ok())
    }
}

/// Reads from the real process environment.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemEnv;

impl EnvProvider for SystemEnv {
    fn get(&self, key: &str) -> Option<OsString> {
        std::env::var_os(key)
    }
}

/// Fixed set of variables, for tests and embedding.
#[derive(Debug, Clone, Default)]
pub struct MapEnv {
    vars: HashMap<String, OsString>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<OsString>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

impl EnvProvider for MapEnv {
    fn get(&self, key: &str) -> Option<OsString> {
        self.vars.get(key).cloned()
    }
}
