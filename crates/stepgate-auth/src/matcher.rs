//! Attribute matching shared by triggers, bypass rules and service policies

use regex::Regex;
use std::collections::HashMap;

use stepgate_common::config::compile_pattern;

/// Matches a named attribute, optionally constraining its values by regex.
///
/// Without a value pattern, the presence of the attribute is enough.
#[derive(Debug, Clone)]
pub struct AttributeMatcher {
    name: String,
    value: Option<Regex>,
}

impl AttributeMatcher {
    /// Match on attribute presence only
    pub fn present(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: None,
        }
    }

    /// Match when any value of the attribute matches `pattern`
    pub fn with_value(name: impl Into<String>, pattern: Regex) -> Self {
        Self {
            name: name.into(),
            value: Some(pattern),
        }
    }

    /// Build from configuration strings
    pub fn from_config(
        field: &str,
        name: &str,
        value: Option<&str>,
    ) -> stepgate_common::Result<Self> {
        match value {
            Some(pattern) => Ok(Self::with_value(name, compile_pattern(field, pattern)?)),
            None => Ok(Self::present(name)),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Check an attribute map
    pub fn matches(&self, attributes: &HashMap<String, Vec<String>>) -> bool {
        attributes
            .get(&self.name)
            .is_some_and(|values| self.matches_values(values))
    }

    /// Check a list of values already extracted for this attribute
    pub fn matches_values(&self, values: &[String]) -> bool {
        match &self.value {
            Some(pattern) => values.iter().any(|v| pattern.is_match(v)),
            None => !values.is_empty(),
        }
    }
}

/// Matches attribute names and values by regex and yields the matching values
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    name: Regex,
    value: Regex,
}

impl PatternMatcher {
    pub fn new(name: Regex, value: Regex) -> Self {
        Self { name, value }
    }

    /// All values whose attribute name and value both match, in name order
    pub fn matching_values<'a>(
        &self,
        attributes: &'a HashMap<String, Vec<String>>,
    ) -> Vec<&'a str> {
        let mut names: Vec<&String> = attributes
            .keys()
            .filter(|name| self.name.is_match(name))
            .collect();
        names.sort();

        names
            .into_iter()
            .flat_map(|name| attributes[name].iter())
            .filter(|value| self.value.is_match(value))
            .map(String::as_str)
            .collect()
    }
}
