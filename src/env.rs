use std::collections::HashMap;

use parking_lot::Mutex;

/// Access to environment variables. The reader interpolates `$VAR` through
/// this trait and `option env=` writes through it, so loads can run against
/// the process environment or a supplied map.
pub trait EnvProvider: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: &str);
}

/// The process environment.
#[derive(Debug, Default)]
pub struct ProcessEnv;

impl EnvProvider for ProcessEnv {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(key).ok()
    }

    fn set(&self, key: &str, value: &str) {
        // Safety contract of `set_var` (no concurrent getenv in other
        // threads) is owned by the caller holding the load mutex.
        unsafe { std::env::set_var(key, value) };
    }
}

/// In-memory environment used by tests and embedders that must not touch
/// process state.
#[derive(Debug, Default)]
pub struct MapEnv {
    vars: Mutex<HashMap<String, String>>,
}

impl MapEnv {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(vars: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            vars: Mutex::new(vars.into_iter().collect()),
        }
    }
}

impl EnvProvider for MapEnv {
    fn get(&self, key: &str) -> Option<String> {
        self.vars.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: &str) {
        self.vars.lock().insert(key.to_string(), value.to_string());
    }
}
