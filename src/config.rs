use serde::{Deserialize, Serialize};
use std::time::Duration;
use crate::error::{GateError, Result};

/// A single admission rule, keyed by country code
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub country_code: String,
    pub max_requests: u32,
    pub window_seconds: u64,
}

impl Rule {
    /// The rolling admission window as a duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds)
    }
}

/// On-disk rules file format
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RulesConfig {
    #[serde(default)]
    pub rules: Vec<Rule>,
}

/// Validated, ordered rule collection with first-match lookup
///
/// An empty rule set means no request is ever rate limited.
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    rules: Vec<Rule>,
}

impl RuleSet {
    /// Validate a parsed configuration into a rule set
    ///
    /// Rule order is preserved: when two rules name the same country code,
    /// the first one in file order is authoritative.
    pub fn compile(config: RulesConfig) -> Result<Self> {
        for rule in &config.rules {
            if rule.country_code.trim().is_empty() {
                return Err(GateError::Config(
                    "Rule country_code must not be empty".to_string(),
                ));
            }
            if rule.max_requests == 0 {
                return Err(GateError::Config(format!(
                    "Rule for {} has max_requests = 0",
                    rule.country_code
                )));
            }
            if rule.window_seconds == 0 {
                return Err(GateError::Config(format!(
                    "Rule for {} has window_seconds = 0",
                    rule.country_code
                )));
            }
        }

        Ok(Self {
            rules: config.rules,
        })
    }

    /// Find the rule for a country code, case-insensitively
    ///
    /// Returns the first matching rule in configured order, or `None` when
    /// the country is not rate limited.
    pub fn find_rule(&self, country_code: &str) -> Option<&Rule> {
        self.rules
            .iter()
            .find(|rule| rule.country_code.eq_ignore_ascii_case(country_code))
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }
}

/// Load a rules configuration from a YAML string
pub fn load_rules_from_yaml(yaml: &str) -> Result<RulesConfig> {
    serde_yaml::from_str(yaml)
        .map_err(|e| GateError::Config(format!("Failed to parse YAML: {}", e)))
}

/// Load a rules configuration from a YAML file
pub fn load_rules_from_file(path: &str) -> Result<RulesConfig> {
    let content = std::fs::read_to_string(path)?;
    load_rules_from_yaml(&content)
}
