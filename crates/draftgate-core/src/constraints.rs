//! Soft constraints
//!
//! Recognized rule keys:
//! - `maxLength`: number, characters per field
//! - `forbiddenPhrases`: list of strings, matched case-insensitively
//! - `requiredPrefix` / `prefix`: string every field must start with
//!
//! Violations become [`Warning`]s on the draft item; they never fail it.

use draftgate_fingerprint::{RuleConfiguration, RuleValue};

use crate::types::{FieldMap, Warning};

pub const MAX_LENGTH: &str = "maxLength";
pub const FORBIDDEN_PHRASES: &str = "forbiddenPhrases";
pub const REQUIRED_PREFIX: &str = "requiredPrefix";
pub const PREFIX: &str = "prefix";

/// Constraints extracted from a rule configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SoftConstraints {
    max_length: Option<usize>,
    forbidden: Vec<String>,
    prefix: Option<String>,
}

impl SoftConstraints {
    /// Read the recognized keys; unrecognized or mistyped values are ignored
    #[must_use]
    pub fn from_rules(rules: &RuleConfiguration) -> Self {
        let max_length = rules
            .get(MAX_LENGTH)
            .and_then(RuleValue::as_f64)
            .filter(|n| n.is_finite() && *n >= 0.0)
            .map(|n| n.floor() as usize);

        let forbidden = rules
            .get(FORBIDDEN_PHRASES)
            .and_then(RuleValue::as_list)
            .map(|phrases| {
                phrases
                    .iter()
                    .filter_map(RuleValue::as_str)
                    .filter(|p| !p.is_empty())
                    .map(str::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        let prefix = rules
            .get(REQUIRED_PREFIX)
            .or_else(|| rules.get(PREFIX))
            .and_then(RuleValue::as_str)
            .filter(|p| !p.is_empty())
            .map(str::to_owned);

        Self {
            max_length,
            forbidden,
            prefix,
        }
    }

    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.max_length.is_none() && self.forbidden.is_empty() && self.prefix.is_none()
    }

    /// Warnings for one set of proposed fields, in field order
    #[must_use]
    pub fn check(&self, fields: &FieldMap) -> Vec<Warning> {
        let mut warnings = Vec::new();
        for (field, value) in fields {
            if let Some(max) = self.max_length {
                let length = value.chars().count();
                if length > max {
                    warnings.push(Warning::TooLong {
                        field: field.clone(),
                        length,
                        max,
                    });
                }
            }

            let lowered = value.to_lowercase();
            for phrase in &self.forbidden {
                if lowered.contains(&phrase.to_lowercase()) {
                    warnings.push(Warning::ForbiddenPhrase {
                        field: field.clone(),
                        phrase: phrase.clone(),
                    });
                }
            }

            if let Some(prefix) = &self.prefix {
                if !value.starts_with(prefix.as_str()) {
                    warnings.push(Warning::MissingPrefix {
                        field: field.clone(),
                        prefix: prefix.clone(),
                    });
                }
            }
        }
        warnings
    }
}
