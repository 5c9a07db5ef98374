//! Rule configuration and its canonical fingerprint
//!
//! A [`RuleConfiguration`] is a tagged-union tree ([`RuleValue`]) keyed by
//! `BTreeMap`, so key order is canonical by construction. List order is
//! normalized at encoding time. Numbers carry canonical decimal text.
//!
//! The canonical encoding is a compact JSON dialect:
//! - objects: keys sorted, JSON-escaped
//! - lists: elements encoded, then sorted
//! - numbers: shortest decimal text, no exponent, `-0` folded to `0`

use std::collections::BTreeMap;
use std::fmt;

use serde_json::Value as JsonValue;

use crate::digest::{Fingerprint, RulesFingerprint};

const RULES_DOMAIN: &str = "draftgate.rules.v1";

/// A number held as canonical decimal text
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct CanonicalNumber(String);

impl CanonicalNumber {
    /// From a signed integer
    #[inline]
    #[must_use]
    pub fn from_i64(value: i64) -> Self {
        Self(value.to_string())
    }

    /// From an unsigned integer
    #[inline]
    #[must_use]
    pub fn from_u64(value: u64) -> Self {
        Self(value.to_string())
    }

    /// From a float
    ///
    /// # Errors
    /// Returns error for NaN and infinities
    pub fn from_f64(value: f64) -> Result<Self, ConfigurationError> {
        if !value.is_finite() {
            return Err(ConfigurationError::NonFiniteNumber(value.to_string()));
        }
        // f64 Display is the shortest round-trip form and never uses exponents
        let text = value.to_string();
        if text == "-0" {
            return Ok(Self("0".to_string()));
        }
        Ok(Self(text))
    }

    /// Canonical decimal text
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value as f64 (may lose precision for very large integers)
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        self.0.parse().ok()
    }

    fn to_json(&self) -> JsonValue {
        if let Ok(i) = self.0.parse::<i64>() {
            return JsonValue::from(i);
        }
        if let Ok(u) = self.0.parse::<u64>() {
            return JsonValue::from(u);
        }
        self.as_f64()
            .and_then(serde_json::Number::from_f64)
            .map_or(JsonValue::Null, JsonValue::Number)
    }
}

impl fmt::Display for CanonicalNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A rule parameter value
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleValue {
    /// Text
    String(String),
    /// Number (canonical decimal text)
    Number(CanonicalNumber),
    /// Boolean flag
    Bool(bool),
    /// List of scalars; order-independent for fingerprinting
    List(Vec<RuleValue>),
    /// Nested mapping
    Map(BTreeMap<String, RuleValue>),
}

impl RuleValue {
    /// String content, if this is a string
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Boolean content, if this is a bool
    #[inline]
    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Numeric content, if this is a number
    #[inline]
    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => n.as_f64(),
            _ => None,
        }
    }

    /// List elements, if this is a list
    #[inline]
    #[must_use]
    pub fn as_list(&self) -> Option<&[RuleValue]> {
        match self {
            Self::List(items) => Some(items),
            _ => None,
        }
    }

    /// Convert from an untyped JSON value
    ///
    /// # Errors
    /// `null`, non-finite numbers, and lists holding lists or maps are not
    /// canonicalizable.
    pub fn from_json(value: &JsonValue) -> Result<Self, ConfigurationError> {
        Self::from_json_at(value, "$")
    }

    fn from_json_at(value: &JsonValue, path: &str) -> Result<Self, ConfigurationError> {
        match value {
            JsonValue::Null => Err(ConfigurationError::NullValue(path.to_string())),
            JsonValue::Bool(b) => Ok(Self::Bool(*b)),
            JsonValue::String(s) => Ok(Self::String(s.clone())),
            JsonValue::Number(n) => number_from_json(n, path).map(Self::Number),
            JsonValue::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for (i, item) in items.iter().enumerate() {
                    let item_path = format!("{path}[{i}]");
                    if item.is_array() || item.is_object() {
                        return Err(ConfigurationError::NestedCollection(item_path));
                    }
                    out.push(Self::from_json_at(item, &item_path)?);
                }
                Ok(Self::List(out))
            }
            JsonValue::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, item) in map {
                    let item_path = format!("{path}.{key}");
                    out.insert(key.clone(), Self::from_json_at(item, &item_path)?);
                }
                Ok(Self::Map(out))
            }
        }
    }

    /// Convert back to an untyped JSON value (lists keep their given order)
    #[must_use]
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Number(n) => n.to_json(),
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::List(items) => JsonValue::Array(items.iter().map(Self::to_json).collect()),
            Self::Map(map) => JsonValue::Object(
                map.iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    fn write_canonical(&self, out: &mut String) {
        match self {
            Self::String(s) => write_json_string(s, out),
            Self::Number(n) => out.push_str(n.as_str()),
            Self::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            Self::List(items) => {
                let mut encoded: Vec<String> = items
                    .iter()
                    .map(|item| {
                        let mut buf = String::new();
                        item.write_canonical(&mut buf);
                        buf
                    })
                    .collect();
                encoded.sort();
                out.push('[');
                out.push_str(&encoded.join(","));
                out.push(']');
            }
            Self::Map(map) => write_canonical_map(map, out),
        }
    }
}

impl From<&str> for RuleValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for RuleValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<bool> for RuleValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for RuleValue {
    fn from(value: i64) -> Self {
        Self::Number(CanonicalNumber::from_i64(value))
    }
}

impl From<u64> for RuleValue {
    fn from(value: u64) -> Self {
        Self::Number(CanonicalNumber::from_u64(value))
    }
}

impl From<Vec<&str>> for RuleValue {
    fn from(value: Vec<&str>) -> Self {
        Self::List(value.into_iter().map(Self::from).collect())
    }
}

impl From<Vec<String>> for RuleValue {
    fn from(value: Vec<String>) -> Self {
        Self::List(value.into_iter().map(Self::from).collect())
    }
}

/// Named parameters controlling how proposed edits are produced
///
/// Owned by the caller; the engine only reads and hashes it.
///
/// # Examples
/// ```
/// # use draftgate_fingerprint::RuleConfiguration;
/// let a = RuleConfiguration::new().with("enabled", true).with("prefix", "X | ");
/// let b = RuleConfiguration::new().with("prefix", "X | ").with("enabled", true);
/// assert_eq!(a.fingerprint(), b.fingerprint());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(try_from = "JsonValue", into = "JsonValue")]
pub struct RuleConfiguration {
    params: BTreeMap<String, RuleValue>,
}

impl RuleConfiguration {
    /// Empty configuration
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// With a parameter set (replaces any existing value)
    #[inline]
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<RuleValue>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Look up a top-level parameter
    #[inline]
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&RuleValue> {
        self.params.get(key)
    }

    /// Iterate parameters in key order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &RuleValue)> {
        self.params.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Number of top-level parameters
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.params.len()
    }

    /// True when no parameters are set
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }

    /// Build from an untyped JSON value; the top level must be an object
    ///
    /// # Errors
    /// Returns [`ConfigurationError`] for anything not canonicalizable
    pub fn from_json_value(value: &JsonValue) -> Result<Self, ConfigurationError> {
        match RuleValue::from_json(value)? {
            RuleValue::Map(params) => Ok(Self { params }),
            _ => Err(ConfigurationError::NotAnObject),
        }
    }

    /// Parse from JSON text
    ///
    /// # Errors
    /// Returns error if the text is not JSON or not canonicalizable
    pub fn from_json_str(json: &str) -> Result<Self, ConfigurationError> {
        let value: JsonValue =
            serde_json::from_str(json).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        Self::from_json_value(&value)
    }

    /// Parse from YAML text
    ///
    /// # Errors
    /// Returns error if the text is not YAML or not canonicalizable
    pub fn from_yaml_str(yaml: &str) -> Result<Self, ConfigurationError> {
        let value: JsonValue =
            serde_yaml::from_str(yaml).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        Self::from_json_value(&value)
    }

    /// Parse from TOML text
    ///
    /// # Errors
    /// Returns error if the text is not TOML or not canonicalizable
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigurationError> {
        let value: JsonValue =
            toml::from_str(text).map_err(|e| ConfigurationError::Parse(e.to_string()))?;
        Self::from_json_value(&value)
    }

    /// Untyped JSON view
    #[must_use]
    pub fn to_json_value(&self) -> JsonValue {
        RuleValue::Map(self.params.clone()).to_json()
    }

    /// Canonical encoding: equal for semantically equal configurations
    #[must_use]
    pub fn to_canonical_string(&self) -> String {
        let mut out = String::new();
        write_canonical_map(&self.params, &mut out);
        out
    }

    /// Rules version token
    #[must_use]
    pub fn fingerprint(&self) -> RulesFingerprint {
        let canonical = self.to_canonical_string();
        RulesFingerprint::from_fingerprint(Fingerprint::compute(RULES_DOMAIN, canonical.as_bytes()))
    }
}

impl TryFrom<JsonValue> for RuleConfiguration {
    type Error = ConfigurationError;

    fn try_from(value: JsonValue) -> Result<Self, Self::Error> {
        Self::from_json_value(&value)
    }
}

impl From<RuleConfiguration> for JsonValue {
    fn from(config: RuleConfiguration) -> Self {
        config.to_json_value()
    }
}

/// Fingerprint an untyped configuration in one step
///
/// # Errors
/// Returns [`ConfigurationError`] if the value cannot be canonicalized
pub fn fingerprint_json(value: &JsonValue) -> Result<RulesFingerprint, ConfigurationError> {
    RuleConfiguration::from_json_value(value).map(|c| c.fingerprint())
}

/// Rule configuration rejected before fingerprinting
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigurationError {
    #[error("rule configuration must be an object at the top level")]
    NotAnObject,

    #[error("null value at {0}")]
    NullValue(String),

    #[error("non-finite number: {0}")]
    NonFiniteNumber(String),

    #[error("unsupported number at {0}")]
    UnsupportedNumber(String),

    #[error("lists may only hold scalars; found a collection at {0}")]
    NestedCollection(String),

    #[error("could not parse rule configuration: {0}")]
    Parse(String),
}

fn number_from_json(n: &serde_json::Number, path: &str) -> Result<CanonicalNumber, ConfigurationError> {
    if let Some(i) = n.as_i64() {
        return Ok(CanonicalNumber::from_i64(i));
    }
    if let Some(u) = n.as_u64() {
        return Ok(CanonicalNumber::from_u64(u));
    }
    match n.as_f64() {
        Some(f) => CanonicalNumber::from_f64(f),
        None => Err(ConfigurationError::UnsupportedNumber(path.to_string())),
    }
}

fn write_canonical_map(map: &BTreeMap<String, RuleValue>, out: &mut String) {
    out.push('{');
    for (i, (key, value)) in map.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_json_string(key, out);
        out.push(':');
        value.write_canonical(out);
    }
    out.push('}');
}

fn write_json_string(s: &str, out: &mut String) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn same_config_twice_same_token() {
        let config = RuleConfiguration::new()
            .with("enabled", true)
            .with("prefix", "X | ");
        assert_eq!(config.fingerprint(), config.clone().fingerprint());
    }

    #[test]
    fn typed_accessors_match_variant() {
        let config = RuleConfiguration::from_json_str(
            r#"{"enabled": true, "prefix": "X | ", "maxLength": 60, "tags": ["a"]}"#,
        )
        .unwrap();

        let enabled = config.get("enabled").unwrap();
        assert_eq!(enabled.as_bool(), Some(true));
        assert_eq!(enabled.as_str(), None);

        let prefix = config.get("prefix").unwrap();
        assert_eq!(prefix.as_str(), Some("X | "));
        assert_eq!(prefix.as_bool(), None);

        assert_eq!(config.get("maxLength").and_then(RuleValue::as_f64), Some(60.0));
        assert_eq!(config.get("tags").and_then(RuleValue::as_list).map(<[RuleValue]>::len), Some(1));
    }

    #[test]
    fn key_order_is_irrelevant() {
        let a = RuleConfiguration::from_json_str(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b = RuleConfiguration::from_json_str(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn list_order_is_irrelevant() {
        let a = RuleConfiguration::new().with("forbiddenPhrases", vec!["click here", "buy now"]);
        let b = RuleConfiguration::new().with("forbiddenPhrases", vec!["buy now", "click here"]);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn changed_prefix_changes_token() {
        let a = RuleConfiguration::new().with("prefix", "A | ");
        let b = RuleConfiguration::new().with("prefix", "B | ");
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn list_membership_changes_token() {
        let base = RuleConfiguration::new().with("prefix", "X | ");
        let one = base.clone().with("forbiddenPhrases", vec!["click here"]);
        let two = base
            .clone()
            .with("forbiddenPhrases", vec!["click here", "learn more"]);

        assert_ne!(base.fingerprint(), one.fingerprint());
        assert_ne!(one.fingerprint(), two.fingerprint());
    }

    #[test]
    fn duplicate_list_entries_count() {
        let a = RuleConfiguration::new().with("tags", vec!["a"]);
        let b = RuleConfiguration::new().with("tags", vec!["a", "a"]);
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn numbers_hash_as_canonical_decimal() {
        let int = RuleConfiguration::from_json_str(r#"{"maxLength": 60}"#).unwrap();
        let float = RuleConfiguration::from_json_str(r#"{"maxLength": 60.0}"#).unwrap();
        assert_eq!(int.fingerprint(), float.fingerprint());

        let other = RuleConfiguration::from_json_str(r#"{"maxLength": 61}"#).unwrap();
        assert_ne!(int.fingerprint(), other.fingerprint());
    }

    #[test]
    fn negative_zero_folds_to_zero() {
        assert_eq!(CanonicalNumber::from_f64(-0.0).unwrap().as_str(), "0");
        assert_eq!(CanonicalNumber::from_f64(0.25).unwrap().as_str(), "0.25");
    }

    #[test]
    fn string_and_number_are_distinct() {
        let a = RuleConfiguration::from_json_str(r#"{"v": "1"}"#).unwrap();
        let b = RuleConfiguration::from_json_str(r#"{"v": 1}"#).unwrap();
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn escaping_prevents_ambiguity() {
        let a = RuleConfiguration::new().with("a", "x\",\"b\":\"y");
        let b = RuleConfiguration::new().with("a", "x").with("b", "y");
        assert_ne!(a.to_canonical_string(), b.to_canonical_string());
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn canonical_string_shape() {
        let config = RuleConfiguration::from_json_value(&json!({
            "prefix": "X | ",
            "enabled": true,
            "phrases": ["b", "a"],
            "limits": {"max": 1.5}
        }))
        .unwrap();
        assert_eq!(
            config.to_canonical_string(),
            r#"{"enabled":true,"limits":{"max":1.5},"phrases":["a","b"],"prefix":"X | "}"#
        );
    }

    #[test]
    fn rejects_non_canonicalizable_input() {
        assert_eq!(
            RuleConfiguration::from_json_value(&json!([1, 2])),
            Err(ConfigurationError::NotAnObject)
        );
        assert!(matches!(
            RuleConfiguration::from_json_value(&json!({"a": null})),
            Err(ConfigurationError::NullValue(p)) if p == "$.a"
        ));
        assert!(matches!(
            RuleConfiguration::from_json_value(&json!({"a": [["x"]]})),
            Err(ConfigurationError::NestedCollection(_))
        ));
        assert!(CanonicalNumber::from_f64(f64::NAN).is_err());
        assert!(RuleConfiguration::from_json_str("not json").is_err());
    }

    #[test]
    fn formats_agree() {
        let json = RuleConfiguration::from_json_str(
            r#"{"prefix": "X | ", "maxLength": 60, "forbiddenPhrases": ["click here"]}"#,
        )
        .unwrap();
        let yaml = RuleConfiguration::from_yaml_str(
            "prefix: \"X | \"\nmaxLength: 60\nforbiddenPhrases:\n  - click here\n",
        )
        .unwrap();
        let toml = RuleConfiguration::from_toml_str(
            "prefix = \"X | \"\nmaxLength = 60\nforbiddenPhrases = [\"click here\"]\n",
        )
        .unwrap();
        assert_eq!(json.fingerprint(), yaml.fingerprint());
        assert_eq!(json.fingerprint(), toml.fingerprint());
    }

    #[test]
    fn serde_round_trip_preserves_fingerprint() {
        let config = RuleConfiguration::new()
            .with("prefix", "X | ")
            .with("maxLength", 60_i64)
            .with("forbiddenPhrases", vec!["b", "a"]);
        let text = serde_json::to_string(&config).unwrap();
        let decoded: RuleConfiguration = serde_json::from_str(&text).unwrap();
        assert_eq!(config, decoded);
        assert_eq!(config.fingerprint(), decoded.fingerprint());
    }
}
