//! Runtime configuration.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Io(io::Error),
    #[error(transparent)]
    Toml(toml::de::Error),
    #[error("invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub context: ContextConfig,
    pub descriptors: DescriptorsConfig,
    pub queue: QueueConfig,
}

impl Config {
    pub fn from_file<P>(path: P) -> Result<Self, ConfigError>
    where
        P: AsRef<Path>,
    {
        let mut file = File::open(path).map_err(ConfigError::Io)?;

        let mut buf = String::new();
        file.read_to_string(&mut buf).map_err(ConfigError::Io)?;

        buf.parse()
    }

    fn validate(self) -> Result<Self, ConfigError> {
        if self.context.frames_in_flight == 0 {
            return Err(ConfigError::Invalid {
                field: "context.frames_in_flight",
                reason: "at least one frame must be in flight",
            });
        }

        if self.queue.completion_wait_interval_ms == 0 {
            return Err(ConfigError::Invalid {
                field: "queue.completion_wait_interval_ms",
                reason: "wait interval must not be zero",
            });
        }

        Ok(self)
    }
}

impl FromStr for Config {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let config: Self = toml::from_str(s).map_err(ConfigError::Toml)?;
        config.validate()
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ContextConfig {
    /// Number of frames whose GPU work may overlap with recording of the next frames.
    ///
    /// Defaults to `3`.
    pub frames_in_flight: u32,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            frames_in_flight: 3,
        }
    }
}

/// Capacity of the default descriptor heap of each type.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DescriptorsConfig {
    pub shader_resources: u32,
    pub samplers: u32,
    pub render_targets: u32,
    pub depth_stencil: u32,
}

impl Default for DescriptorsConfig {
    fn default() -> Self {
        Self {
            shader_resources: 4096,
            samplers: 256,
            render_targets: 256,
            depth_stencil: 64,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Period in which the execution tracking thread wakes up when no work is pending.
    pub completion_wait_interval_ms: u64,
    /// Period of the CPU/GPU timestamp recalibration.
    pub calibration_interval_ms: u64,
    /// Number of timestamp queries of the queue. `0` disables timestamp queries.
    pub timestamp_queries: u32,
}

impl QueueConfig {
    pub fn completion_wait_interval(&self) -> Duration {
        Duration::from_millis(self.completion_wait_interval_ms)
    }

    pub fn calibration_interval(&self) -> Duration {
        Duration::from_millis(self.calibration_interval_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            completion_wait_interval_ms: 32,
            calibration_interval_ms: 1000,
            timestamp_queries: 1000,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Config, ConfigError};

    #[test]
    fn config_partial_toml() {
        let config: Config = r#"
            [context]
            frames_in_flight = 2

            [queue]
            timestamp_queries = 0
        "#
        .parse()
        .unwrap();

        assert_eq!(config.context.frames_in_flight, 2);
        assert_eq!(config.queue.timestamp_queries, 0);
        assert_eq!(config.queue.completion_wait_interval_ms, 32);
        assert_eq!(config.descriptors.shader_resources, 4096);
    }

    #[test]
    fn config_empty_is_default() {
        let config: Config = "".parse().unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn config_unknown_field() {
        let res = "[context]\nframes = 2\n".parse::<Config>();
        assert!(matches!(res, Err(ConfigError::Toml(_))));
    }

    #[test]
    fn config_zero_frames() {
        let res = "[context]\nframes_in_flight = 0\n".parse::<Config>();
        assert!(matches!(res, Err(ConfigError::Invalid { .. })));
    }
}
