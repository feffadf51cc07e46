use std::sync::{Mutex, OnceLock};

fn env_lock() -> &'static Mutex<()> {
    static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
    LOCK.get_or_init(|| Mutex::new(()))
}

/// Runs `run` with the given variables set (`Some`) or removed (`None`).
///
/// Holds a process-wide lock for the whole body and restores the previous
/// values afterwards, so config tests never see each other's overrides.
pub(crate) fn with_env<R>(vars: &[(&str, Option<&str>)], run: impl FnOnce() -> R) -> R {
    let _guard = env_lock().lock().unwrap_or_else(|e| e.into_inner());
    let saved: Vec<(String, Option<String>)> = vars
        .iter()
        .map(|(key, _)| (key.to_string(), std::env::var(key).ok()))
        .collect();

    for (key, value) in vars {
        apply(key, *value);
    }
    let out = run();
    for (key, value) in &saved {
        apply(key, value.as_deref());
    }
    out
}

fn apply(key: &str, value: Option<&str>) {
    // SAFETY: env mutation is serialized by `env_lock`.
    unsafe {
        match value {
            Some(value) => std::env::set_var(key, value),
            None => std::env::remove_var(key),
        }
    }
}
