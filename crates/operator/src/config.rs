//! Runtime configuration read from the environment

use std::{env, time::Duration};

use crate::{Error, Result};

/// Field manager identity used when the environment does not override it
pub const DEFAULT_FIELD_MANAGER: &str = "labelkeeper";

const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";
const DEFAULT_LEASE_NAME: &str = "labelkeeper-lease";
const DEFAULT_REQUEUE_SECS: u64 = 300;

/// Output format of the log subscriber
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// Human readable lines
    #[default]
    Text,
    /// One JSON object per event
    Json,
}

/// Operator settings
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Settings {
    /// Identity attached to every label patch (`FIELD_MANAGER`)
    pub field_manager: String,
    /// Diagnostics server address (`BIND_ADDRESS`)
    pub bind_address: String,
    /// Delay between drift reads of a healthy `LabelSet` (`REQUEUE_INTERVAL_SECS`)
    pub requeue_interval: Duration,
    /// Only watch `LabelSet`s in this namespace (`WATCH_NAMESPACE`)
    pub watch_namespace: Option<String>,
    /// Lease used for leader election (`LEASE_NAME`)
    pub lease_name: String,
    /// Log output format (`LOG_FORMAT`)
    pub log_format: LogFormat,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            field_manager: DEFAULT_FIELD_MANAGER.to_string(),
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
            requeue_interval: Duration::from_secs(DEFAULT_REQUEUE_SECS),
            watch_namespace: None,
            lease_name: DEFAULT_LEASE_NAME.to_string(),
            log_format: LogFormat::Text,
        }
    }
}

impl Settings {
    /// Reads the settings from environment variables, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidSetting`] for values that cannot be parsed.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let requeue_interval = match non_empty("REQUEUE_INTERVAL_SECS") {
            Some(raw) => match raw.parse::<u64>() {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    return Err(Error::InvalidSetting {
                        key: "REQUEUE_INTERVAL_SECS",
                        value: raw,
                    });
                }
            },
            None => defaults.requeue_interval,
        };

        let log_format = match non_empty("LOG_FORMAT").as_deref() {
            None | Some("text") => LogFormat::Text,
            Some("json") => LogFormat::Json,
            Some(other) => {
                return Err(Error::InvalidSetting {
                    key: "LOG_FORMAT",
                    value: other.to_string(),
                });
            }
        };

        Ok(Self {
            field_manager: non_empty("FIELD_MANAGER").unwrap_or(defaults.field_manager),
            bind_address: non_empty("BIND_ADDRESS").unwrap_or(defaults.bind_address),
            requeue_interval,
            watch_namespace: non_empty("WATCH_NAMESPACE"),
            lease_name: non_empty("LEASE_NAME").unwrap_or(defaults.lease_name),
            log_format,
        })
    }
}

fn non_empty(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.is_empty())
}
