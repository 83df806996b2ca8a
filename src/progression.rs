//! Auto-progression configuration.
//!
//! The transition map is validated at construction: every entry must move
//! strictly forward in the stage order. Invalid maps are rejected outright
//! rather than silently ignored, so a bad config can never reach the
//! controller.

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::stage::Stage;

/// Process-wide configuration for automatic stage advancement.
///
/// Loaded once at startup, replaceable atomically at runtime. Construction
/// is the validation boundary; a value of this type always holds a
/// forward-only transition map.
#[derive(Debug, Clone, Default)]
pub struct AutoProgressionConfig {
    enabled: bool,
    transitions: HashMap<Stage, Stage>,
    default_order: i64,
}

impl AutoProgressionConfig {
    /// Creates a validated configuration.
    ///
    /// Fails closed if any `from -> to` entry does not move strictly
    /// forward in the stage order.
    pub fn new(
        enabled: bool,
        transitions: HashMap<Stage, Stage>,
        default_order: i64,
    ) -> Result<Self> {
        for (from, to) in &transitions {
            if to.order_index() <= from.order_index() {
                return Err(Error::Config(format!(
                    "auto-progression transition {} -> {} does not move forward",
                    from, to
                )));
            }
        }
        Ok(Self {
            enabled,
            transitions,
            default_order,
        })
    }

    /// A configuration with auto-progression switched off.
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Parses a configuration from TOML.
    ///
    /// ```toml
    /// enabled = true
    /// default_order = 0
    ///
    /// [transitions]
    /// research = "planning"
    /// implementation = "review"
    /// ```
    pub fn from_toml_str(content: &str) -> Result<Self> {
        #[derive(Deserialize)]
        struct Raw {
            #[serde(default)]
            enabled: bool,
            #[serde(default)]
            transitions: HashMap<Stage, Stage>,
            #[serde(default)]
            default_order: i64,
        }

        let raw: Raw = toml::from_str(content)
            .map_err(|e| Error::Config(format!("invalid auto-progression config: {}", e)))?;
        Self::new(raw.enabled, raw.transitions, raw.default_order)
    }

    /// Loads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    /// Whether automatic progression is enabled globally.
    pub fn enabled(&self) -> bool {
        self.enabled
    }

    /// The configured target stage for `from`, if any.
    pub fn next_stage(&self, from: Stage) -> Option<Stage> {
        self.transitions.get(&from).copied()
    }

    /// Column position assigned to tasks arriving in the target stage.
    pub fn default_order(&self) -> i64 {
        self.default_order
    }

    /// The full transition map.
    pub fn transitions(&self) -> &HashMap<Stage, Stage> {
        &self.transitions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn forward_transitions_are_accepted() {
        let transitions = HashMap::from([
            (Stage::Research, Stage::Planning),
            (Stage::Implementation, Stage::Review),
            (Stage::Backlog, Stage::Merge),
        ]);

        let config = AutoProgressionConfig::new(true, transitions, 0).unwrap();
        assert!(config.enabled());
        assert_eq!(config.next_stage(Stage::Research), Some(Stage::Planning));
        assert_eq!(config.next_stage(Stage::Review), None);
    }

    #[test]
    fn backward_transition_is_rejected_at_construction() {
        let transitions = HashMap::from([(Stage::Review, Stage::Planning)]);
        let err = AutoProgressionConfig::new(true, transitions, 0).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn self_transition_is_rejected() {
        let transitions = HashMap::from([(Stage::Review, Stage::Review)]);
        assert!(AutoProgressionConfig::new(true, transitions, 0).is_err());
    }

    #[test]
    fn one_bad_entry_rejects_the_whole_map() {
        let transitions = HashMap::from([
            (Stage::Research, Stage::Planning),
            (Stage::Merge, Stage::Backlog),
        ]);
        assert!(AutoProgressionConfig::new(true, transitions, 0).is_err());
    }

    #[test]
    fn disabled_config_maps_nothing() {
        let config = AutoProgressionConfig::disabled();
        assert!(!config.enabled());
        for stage in Stage::ALL {
            assert_eq!(config.next_stage(stage), None);
        }
    }

    #[test]
    fn parses_from_toml() {
        let config = AutoProgressionConfig::from_toml_str(
            r#"
            enabled = true
            default_order = 100

            [transitions]
            research = "planning"
            implementation = "review"
            "#,
        )
        .unwrap();

        assert!(config.enabled());
        assert_eq!(config.default_order(), 100);
        assert_eq!(
            config.next_stage(Stage::Implementation),
            Some(Stage::Review)
        );
    }

    #[test]
    fn toml_with_backward_entry_fails_validation() {
        let err = AutoProgressionConfig::from_toml_str(
            r#"
            enabled = true

            [transitions]
            done = "backlog"
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
