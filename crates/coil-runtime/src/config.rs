#![forbid(unsafe_code)]

//! Runtime configuration.
//!
//! All fields have working defaults; most programs use
//! `RuntimeConfig::default()` and override single fields with the `with_*`
//! builders. With the `config-file` feature a config can also be read from
//! TOML:
//!
//! ```toml
//! drain_task_name = "coil.drain"
//! tail_task_id = "coil.tail"
//! reverse_tail_task_id = "coil.reverse-tail"
//! abort_on_drop = true
//!
//! [tail_options]
//! on_source_deleted = "propagate"
//! ```

use coil_core::TailOptions;

/// Configuration for a [`Runtime`](crate::Runtime).
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "config-file", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "config-file", serde(default))]
pub struct RuntimeConfig {
    /// Name given to the internal drain task.
    pub drain_task_name: String,
    /// Registry id of the forward forwarder installed by bound assignment.
    pub tail_task_id: String,
    /// Registry id of the reverse forwarder installed for two-way sources.
    pub reverse_tail_task_id: String,
    /// Options used by bound assignment when it installs forwarders.
    pub tail_options: TailOptions,
    /// Cancel every registered task when a scope is dropped without `exit`.
    pub abort_on_drop: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            drain_task_name: "coil.drain".to_string(),
            tail_task_id: "coil.tail".to_string(),
            reverse_tail_task_id: "coil.reverse-tail".to_string(),
            tail_options: TailOptions::default(),
            abort_on_drop: true,
        }
    }
}

impl RuntimeConfig {
    /// Set the drain task name.
    #[must_use]
    pub fn with_drain_task_name(mut self, name: impl Into<String>) -> Self {
        self.drain_task_name = name.into();
        self
    }

    /// Set the forward and reverse forwarder ids.
    #[must_use]
    pub fn with_tail_task_ids(
        mut self,
        forward: impl Into<String>,
        reverse: impl Into<String>,
    ) -> Self {
        self.tail_task_id = forward.into();
        self.reverse_tail_task_id = reverse.into();
        self
    }

    #[must_use]
    pub fn with_tail_options(mut self, options: TailOptions) -> Self {
        self.tail_options = options;
        self
    }

    #[must_use]
    pub fn with_abort_on_drop(mut self, abort: bool) -> Self {
        self.abort_on_drop = abort;
        self
    }
}

#[cfg(feature = "config-file")]
mod file {
    use super::RuntimeConfig;

    /// Error loading a [`RuntimeConfig`] from TOML.
    #[derive(Debug)]
    pub enum ConfigError {
        /// The document is not valid TOML or does not match the schema.
        Parse(toml::de::Error),
        /// Forward and reverse forwarders must use distinct ids.
        DuplicateTailId(String),
    }

    impl std::fmt::Display for ConfigError {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            match self {
                Self::Parse(err) => write!(f, "invalid runtime config: {err}"),
                Self::DuplicateTailId(id) => {
                    write!(f, "forward and reverse tail ids are both `{id}`")
                }
            }
        }
    }

    impl std::error::Error for ConfigError {
        fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
            match self {
                Self::Parse(err) => Some(err),
                Self::DuplicateTailId(_) => None,
            }
        }
    }

    impl From<toml::de::Error> for ConfigError {
        fn from(err: toml::de::Error) -> Self {
            Self::Parse(err)
        }
    }

    impl RuntimeConfig {
        /// Parse a config from a TOML document. Missing keys keep their
        /// defaults.
        pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
            let config: Self = toml::from_str(text)?;
            if config.tail_task_id == config.reverse_tail_task_id {
                return Err(ConfigError::DuplicateTailId(config.tail_task_id));
            }
            Ok(config)
        }
    }
}

#[cfg(feature = "config-file")]
pub use file::ConfigError;
