//! Role detection via re-exec and the generation counter (component A,
//! spec.md §4.A), grounded in the Go source's `attachContext`/`EnvName`.

use std::env;
use std::sync::atomic::{AtomicU32, Ordering};

/// Environment variable carrying the monotone generation counter.
pub const GENERATION_ENV_KEY: &str = "_DAEMON";

// Per-process call counter. Starts at 0 in every freshly exec'd process;
// each crossing of a role boundary advances it by one.
static GENERATION: AtomicU32 = AtomicU32::new(0);

/// The outcome of crossing one role-detection boundary.
#[derive(Debug)]
pub enum Role {
    /// This process is already the target generation; the caller should
    /// not spawn and should proceed as this role.
    Child,
    /// This process is behind the target generation; the caller should
    /// spawn the next one, carrying `env`/`args` forward.
    Parent {
        /// Captured environment, with the generation counter advanced.
        env: Vec<(String, String)>,
        /// Captured argv, unchanged from the current process.
        args: Vec<String>,
    },
}

/// Advances the in-memory generation counter and classifies the current
/// process as [`Role::Child`] or [`Role::Parent`] by comparing it against
/// `_DAEMON` (missing or unparsable ⇒ 0), per spec.md §4.A.
pub fn detect_role() -> Role {
    let run_idx = GENERATION.fetch_add(1, Ordering::SeqCst) + 1;
    let env_idx = env::var(GENERATION_ENV_KEY)
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(0);

    if run_idx <= env_idx {
        return Role::Child;
    }

    let mut env: Vec<(String, String)> = env::vars().collect();
    env.retain(|(k, _)| k != GENERATION_ENV_KEY);
    env.push((GENERATION_ENV_KEY.to_string(), run_idx.to_string()));
    let args: Vec<String> = env::args().collect();
    Role::Parent { env, args }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_idx_defaults_to_zero_when_missing() {
        env::remove_var(GENERATION_ENV_KEY);
        assert_eq!(
            env::var(GENERATION_ENV_KEY)
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(0),
            0
        );
    }

    #[test]
    fn malformed_env_idx_defaults_to_zero() {
        env::set_var(GENERATION_ENV_KEY, "not-a-number");
        assert_eq!(
            env::var(GENERATION_ENV_KEY)
                .ok()
                .and_then(|v| v.parse::<u32>().ok())
                .unwrap_or(0),
            0
        );
        env::remove_var(GENERATION_ENV_KEY);
    }
}
