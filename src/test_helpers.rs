//! Shared test utilities for serialising environment mutation.

use std::env;

use tokio::sync::{Mutex, MutexGuard};

/// Serialises tests that touch process environment variables.
pub static ENV_LOCK: Mutex<()> = Mutex::const_new(());

/// Guard that holds the env mutex and removes the variable on drop.
pub struct EnvGuard {
    key: String,
    _guard: MutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets an environment variable while holding a global mutex.
    pub async fn set_var(key: &str, value: &str) -> Self {
        let guard = ENV_LOCK.lock().await;
        // SAFETY: every test mutating the environment holds `ENV_LOCK`.
        unsafe { env::set_var(key, value) };
        Self {
            key: key.to_owned(),
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        // SAFETY: the guard still holds `ENV_LOCK`.
        unsafe { env::remove_var(&self.key) };
    }
}
