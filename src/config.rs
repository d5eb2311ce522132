//! Application-level configuration (ambient stack, not part of the core
//! protocol — §6 is explicit that the core itself takes no environment
//! variables or config files; this is the CLI binary's concern only).

use serde::{Deserialize, Serialize};

/// Settings for the `meshtalk` binary: identity defaults and log
/// verbosity. Loaded from an optional TOML file, then overridden by
/// environment variables, then by CLI flags (in that order of increasing
/// priority — mirrors the teacher's own `from_env` override pattern).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_nickname")]
    pub nickname: String,

    #[serde(default = "default_verbosity")]
    pub verbosity: String,
}

fn default_nickname() -> String {
    "anon".to_string()
}

fn default_verbosity() -> String {
    "info".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            nickname: default_nickname(),
            verbosity: default_verbosity(),
        }
    }
}

impl Config {
    /// Load from `path` if it exists, falling back to defaults; then
    /// apply `MESHTALK_NICKNAME` / `MESHTALK_VERBOSITY` overrides.
    pub fn load(path: Option<&str>) -> Self {
        let mut config = path
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|contents| toml::from_str(&contents).ok())
            .unwrap_or_default();

        Self::apply_env_overrides(&mut config);
        config
    }

    fn apply_env_overrides(config: &mut Config) {
        if let Ok(nickname) = std::env::var("MESHTALK_NICKNAME") {
            config.nickname = nickname;
        }
        if let Ok(verbosity) = std::env::var("MESHTALK_VERBOSITY") {
            config.verbosity = verbosity;
        }
    }
}
