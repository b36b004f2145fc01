//! Preview configuration, loadable from `preview.yaml`.

use std::path::Path;
use std::time::Duration;

use htmlpreview_markup::ScriptPolicy;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::script::{ScriptLimits, SCRIPT_MEMORY_LIMIT_BYTES, SCRIPT_TIMEOUT_MS};

pub const DEFAULT_CANDIDATE_SELECTORS: &[&str] = &["pre", "pre code", ".highlight", ".code-block"];

pub const DEFAULT_TRIGGER_LABEL: &str = "Preview";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PreviewConfig {
    /// Elements treated as code-block candidates.
    pub candidate_selectors: Vec<String>,
    pub trigger_label: String,
    pub zoom_in_factor: f64,
    pub zoom_out_factor: f64,
    /// Lower bound, in px, for both dimensions while resizing.
    pub min_resize_px: f64,
    /// How often startup checks whether the sanitizer engine has arrived.
    pub sanitizer_poll_interval_ms: u64,
    pub script_policy: ScriptPolicy,
    pub script_timeout_ms: u64,
    pub script_memory_limit_bytes: usize,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            candidate_selectors: DEFAULT_CANDIDATE_SELECTORS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            trigger_label: DEFAULT_TRIGGER_LABEL.to_string(),
            zoom_in_factor: 1.2,
            zoom_out_factor: 0.8,
            min_resize_px: 200.0,
            sanitizer_poll_interval_ms: 100,
            script_policy: ScriptPolicy::Execute,
            script_timeout_ms: SCRIPT_TIMEOUT_MS,
            script_memory_limit_bytes: SCRIPT_MEMORY_LIMIT_BYTES,
        }
    }
}

impl PreviewConfig {
    /// Parse YAML; missing keys fall back to defaults.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigError> {
        let config: PreviewConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_yaml_str(&text)?;
        tracing::debug!(path = %path.display(), "loaded preview config");
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.candidate_selectors.iter().all(|s| s.trim().is_empty()) {
            return Err(invalid("candidate_selectors", "at least one selector is required"));
        }
        if self.trigger_label.trim().is_empty() {
            return Err(invalid("trigger_label", "must not be empty"));
        }
        for (field, value) in [
            ("zoom_in_factor", self.zoom_in_factor),
            ("zoom_out_factor", self.zoom_out_factor),
            ("min_resize_px", self.min_resize_px),
        ] {
            if !(value.is_finite() && value > 0.0) {
                return Err(invalid(field, "must be a positive number"));
            }
        }
        if self.sanitizer_poll_interval_ms == 0 {
            return Err(invalid("sanitizer_poll_interval_ms", "must be positive"));
        }
        if self.script_timeout_ms == 0 {
            return Err(invalid("script_timeout_ms", "must be positive"));
        }
        if self.script_memory_limit_bytes == 0 {
            return Err(invalid("script_memory_limit_bytes", "must be positive"));
        }
        Ok(())
    }

    /// Selector list joined for a single document query.
    pub fn candidate_selector(&self) -> String {
        self.candidate_selectors
            .iter()
            .map(|s| s.trim())
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.sanitizer_poll_interval_ms)
    }

    pub fn script_limits(&self) -> ScriptLimits {
        ScriptLimits {
            memory_limit_bytes: self.script_memory_limit_bytes,
            timeout_ms: self.script_timeout_ms,
        }
    }
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid {
        field: field.to_string(),
        reason: reason.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let config = PreviewConfig::default();
        assert_eq!(config.candidate_selector(), "pre, pre code, .highlight, .code-block");
        assert_eq!(config.trigger_label, "Preview");
        assert_eq!(config.poll_interval(), Duration::from_millis(100));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let config = PreviewConfig::from_yaml_str(
            "trigger_label: Render\nscript_policy: strip\ncandidate_selectors: [\"pre\"]\n",
        )
        .unwrap();
        assert_eq!(config.trigger_label, "Render");
        assert_eq!(config.script_policy, ScriptPolicy::Strip);
        assert_eq!(config.candidate_selector(), "pre");
        assert_eq!(config.zoom_in_factor, 1.2);
    }

    #[test]
    fn test_invalid_values() {
        let err = PreviewConfig::from_yaml_str("zoom_out_factor: 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "zoom_out_factor"));

        let err = PreviewConfig::from_yaml_str("trigger_label: \"  \"").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "trigger_label"));

        let err = PreviewConfig::from_yaml_str("script_memory_limit_bytes: 0").unwrap_err();
        assert!(
            matches!(err, ConfigError::Invalid { ref field, .. } if field == "script_memory_limit_bytes")
        );

        let err = PreviewConfig::from_yaml_str("candidate_selectors: []").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { ref field, .. } if field == "candidate_selectors"));

        assert!(matches!(
            PreviewConfig::from_yaml_str("zoom_in_factor: [1]"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
