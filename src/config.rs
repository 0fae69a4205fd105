use std::env;
use std::path::PathBuf;
use tracing::info;

pub const DEFAULT_MAX_STEPS: usize = 100;
pub const DEFAULT_TOOL_TIMEOUT_MS: u64 = 30_000;

/// Runtime knobs picked up from the environment.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeConfig {
    /// Upper bound on handler invocations per run-loop call.
    pub max_steps: usize,
    /// Deadline handed to the tool service when a node does not set one.
    pub default_tool_timeout_ms: u64,
    pub debug: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_steps: DEFAULT_MAX_STEPS,
            default_tool_timeout_ms: DEFAULT_TOOL_TIMEOUT_MS,
            debug: false,
        }
    }
}

impl RuntimeConfig {
    /// Reads `MAX_STEPS`, `DEFAULT_TOOL_TIMEOUT_MS` and `DEBUG`, falling back
    /// to the defaults on anything missing or unparseable.
    pub fn from_env() -> Self {
        let max_steps = env::var("MAX_STEPS")
            .ok()
            .and_then(|v| v.parse().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_MAX_STEPS);
        let default_tool_timeout_ms = env::var("DEFAULT_TOOL_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TOOL_TIMEOUT_MS);
        let debug = env::var("DEBUG")
            .map(|v| matches!(v.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
            .unwrap_or(false);
        Self {
            max_steps,
            default_tool_timeout_ms,
            debug,
        }
    }

    /// Loads a `.env` file if present, then reads the environment.
    pub fn load(env_file: Option<PathBuf>) -> Self {
        match env_file {
            Some(path) if path.exists() => {
                dotenvy::from_path(&path).ok();
                info!("loaded environment from {}", path.display());
            }
            Some(_) | None => {
                dotenvy::dotenv().ok();
            }
        }
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.max_steps, 100);
        assert_eq!(cfg.default_tool_timeout_ms, 30_000);
        assert!(!cfg.debug);
    }
}
