//! Optional TOML config file supplying defaults for the retry policy.
//!
//! ```toml
//! attempts = 10
//! delay_secs = 0.5
//! backoff = 1.5
//! max_delay_secs = 20.0
//! jitter_secs = 0.25
//! timeout_secs = 60.0
//! condition = "exit_code == 0 and not (stderr contains 'WARN')"
//! output_limit_bytes = 65536
//! ```
//!
//! Every key is optional. Command-line flags take precedence over file values.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::core::policy::PolicyInput;

/// Contents of a config file. `None` means "not set here".
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub attempts: Option<u32>,
    pub delay_secs: Option<f64>,
    pub backoff: Option<f64>,
    pub max_delay_secs: Option<f64>,
    pub jitter_secs: Option<f64>,
    pub timeout_secs: Option<f64>,
    pub condition: Option<String>,
    pub output_limit_bytes: Option<usize>,
}

impl FileConfig {
    /// Overwrite fields of `input` that this file sets.
    pub fn apply_to(&self, input: &mut PolicyInput) {
        if let Some(v) = self.attempts {
            input.attempts = v;
        }
        if let Some(v) = self.delay_secs {
            input.delay_secs = v;
        }
        if let Some(v) = self.backoff {
            input.backoff = v;
        }
        if let Some(v) = self.max_delay_secs {
            input.max_delay_secs = v;
        }
        if let Some(v) = self.jitter_secs {
            input.jitter_secs = v;
        }
        if let Some(v) = self.timeout_secs {
            input.timeout_secs = v;
        }
        if let Some(v) = &self.condition {
            input.condition = v.clone();
        }
        if let Some(v) = self.output_limit_bytes {
            input.output_limit_bytes = v;
        }
    }
}

/// Load config from a TOML file. The file must exist.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: FileConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    Ok(cfg)
}
