use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

// =============================================================================
// File config (figment-deserialized from defaults / dispatch.toml / env vars)
// =============================================================================
//
//   dispatch.toml:   [dispatcher]
//                    submit_policy = "queue"
//
//   env var:         DISPATCH_DISPATCHER__SUBMIT_POLICY=queue
//                    (double underscore = nesting)

/// What to do when a turn is submitted while another is running on the same thread.
#[derive(Clone, Copy, Debug, Default, Serialize, Deserialize, PartialEq, Eq, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum SubmitPolicy {
    /// Fail the second submission with `TurnInProgress`
    #[default]
    Reject,
    /// Wait for the running turn to finish
    Queue,
}

/// Top-level tunable configuration, deserialized by figment.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct FileConfig {
    #[serde(default)]
    pub dispatcher: DispatcherFileConfig,
}

/// Dispatcher tunables (lives under `[dispatcher]` in dispatch.toml).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DispatcherFileConfig {
    #[serde(default)]
    pub submit_policy: SubmitPolicy,
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,
    /// 0 disables the per-sink delivery timeout
    #[serde(default)]
    pub delivery_timeout_ms: u64,
}

impl Default for DispatcherFileConfig {
    fn default() -> Self {
        Self {
            submit_policy: SubmitPolicy::default(),
            channel_capacity: default_channel_capacity(),
            delivery_timeout_ms: 0,
        }
    }
}

fn default_channel_capacity() -> usize {
    64
}

/// Name of the config file inside the config directory
pub const CONFIG_FILE_NAME: &str = "dispatch.toml";

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "DISPATCH_";

/// `~/.session-dispatch`, if a home directory can be found
pub fn default_config_dir() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".session-dispatch"))
}

/// Build the layered configuration.
///
/// Struct defaults, then `<config_dir>/dispatch.toml`, then `DISPATCH_*` env vars:
///   `DISPATCH_DISPATCHER__CHANNEL_CAPACITY=8`  →  `dispatcher.channel_capacity = 8`
pub fn load_config(config_dir: &Path) -> figment::Figment {
    use figment::{
        Figment,
        providers::{Env, Format, Serialized, Toml},
    };

    Figment::from(Serialized::defaults(FileConfig::default()))
        .merge(Toml::file(config_dir.join(CONFIG_FILE_NAME)))
        .merge(Env::prefixed(ENV_PREFIX).split("__"))
}

// =============================================================================
// Runtime config (derived from FileConfig)
// =============================================================================

#[derive(Clone, Debug)]
pub struct DispatcherConfig {
    pub submit_policy: SubmitPolicy,
    /// Buffer size for channels handed out by `subscribe_channel`
    pub channel_capacity: usize,
    /// Abandon a single sink delivery after this long (None = wait forever)
    pub delivery_timeout: Option<Duration>,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self::from_file(&DispatcherFileConfig::default())
    }
}

impl DispatcherConfig {
    pub fn from_file(fc: &DispatcherFileConfig) -> Self {
        Self {
            submit_policy: fc.submit_policy,
            channel_capacity: fc.channel_capacity.max(1),
            delivery_timeout: if fc.delivery_timeout_ms == 0 {
                None
            } else {
                Some(Duration::from_millis(fc.delivery_timeout_ms))
            },
        }
    }

    pub fn with_submit_policy(mut self, policy: SubmitPolicy) -> Self {
        self.submit_policy = policy;
        self
    }

    pub fn with_delivery_timeout(mut self, timeout: Duration) -> Self {
        self.delivery_timeout = Some(timeout);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatcher_file_config_defaults() {
        let fc = DispatcherFileConfig::default();
        assert_eq!(fc.submit_policy, SubmitPolicy::Reject);
        assert_eq!(fc.channel_capacity, 64);
        assert_eq!(fc.delivery_timeout_ms, 0);
    }

    #[test]
    fn test_runtime_config_timeout_zero_disables() {
        let config = DispatcherConfig::from_file(&DispatcherFileConfig::default());
        assert!(config.delivery_timeout.is_none());
    }

    #[test]
    fn test_runtime_config_custom_values() {
        let fc = DispatcherFileConfig {
            submit_policy: SubmitPolicy::Queue,
            channel_capacity: 0,
            delivery_timeout_ms: 250,
        };
        let config = DispatcherConfig::from_file(&fc);
        assert_eq!(config.submit_policy, SubmitPolicy::Queue);
        // Zero-capacity channels are not allowed by tokio
        assert_eq!(config.channel_capacity, 1);
        assert_eq!(config.delivery_timeout, Some(Duration::from_millis(250)));
    }

    #[test]
    fn test_load_config_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let fc: FileConfig = load_config(dir.path()).extract().unwrap();
        assert_eq!(fc.dispatcher.submit_policy, SubmitPolicy::Reject);
        assert_eq!(fc.dispatcher.channel_capacity, 64);
    }

    #[test]
    fn test_load_config_toml_sets_values() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[dispatcher]\nsubmit_policy = \"queue\"\ndelivery_timeout_ms = 500\n",
        )
        .unwrap();
        let fc: FileConfig = load_config(dir.path()).extract().unwrap();
        assert_eq!(fc.dispatcher.submit_policy, SubmitPolicy::Queue);
        assert_eq!(fc.dispatcher.delivery_timeout_ms, 500);
        assert_eq!(fc.dispatcher.channel_capacity, 64);
    }
}
