//! Filters built from `[[handlers.filters]]` entries.

use crate::config::file::FilterConfig;
use async_trait::async_trait;
use pollcast_core::entities::Event;
use pollcast_core::processors::{Filter, FilterError};
use rust_decimal::Decimal;
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Comparison applied to the value found at a filter's JSON pointer.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldCondition {
    Equals(Value),
    OneOf(Vec<Value>),
    AtLeast(Decimal),
    AtMost(Decimal),
    /// Substring of a string value, or element of an array of strings.
    Contains(String),
}

/// A filter entry in the config file is not usable.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum FilterConfigError {
    #[error("filter on {0:?} needs exactly one of equals, one_of, at_least, at_most, contains")]
    OperatorCount(String),

    #[error("filter field {0:?} is not a JSON pointer (must start with '/')")]
    InvalidPointer(String),
}

/// Matches events whose field at `pointer` satisfies `condition`.
///
/// A missing field never matches. A numeric comparison against a value
/// that is not a number (or numeric string) is a [`FilterError`].
#[derive(Debug, Clone)]
pub struct FieldFilter {
    pointer: String,
    condition: FieldCondition,
}

impl FieldFilter {
    pub fn new(pointer: impl Into<String>, condition: FieldCondition) -> Self {
        Self {
            pointer: pointer.into(),
            condition,
        }
    }

    pub fn from_config(config: &FilterConfig) -> Result<Self, FilterConfigError> {
        if !config.field.starts_with('/') {
            return Err(FilterConfigError::InvalidPointer(config.field.clone()));
        }

        let mut conditions = Vec::with_capacity(1);
        if let Some(v) = &config.equals {
            conditions.push(FieldCondition::Equals(v.clone()));
        }
        if let Some(v) = &config.one_of {
            conditions.push(FieldCondition::OneOf(v.clone()));
        }
        if let Some(v) = config.at_least {
            conditions.push(FieldCondition::AtLeast(v));
        }
        if let Some(v) = config.at_most {
            conditions.push(FieldCondition::AtMost(v));
        }
        if let Some(v) = &config.contains {
            conditions.push(FieldCondition::Contains(v.clone()));
        }

        match conditions.pop() {
            Some(condition) if conditions.is_empty() => Ok(Self::new(&config.field, condition)),
            _ => Err(FilterConfigError::OperatorCount(config.field.clone())),
        }
    }

    pub fn evaluate(&self, event: &Event) -> Result<bool, FilterError> {
        let Some(value) = event.field(&self.pointer) else {
            return Ok(false);
        };

        match &self.condition {
            FieldCondition::Equals(expected) => Ok(value == expected),
            FieldCondition::OneOf(options) => Ok(options.iter().any(|o| o == value)),
            FieldCondition::AtLeast(bound) => Ok(self.numeric(value)? >= *bound),
            FieldCondition::AtMost(bound) => Ok(self.numeric(value)? <= *bound),
            FieldCondition::Contains(needle) => Ok(match value {
                Value::String(s) => s.contains(needle.as_str()),
                Value::Array(items) => items.iter().any(|i| i.as_str() == Some(needle.as_str())),
                _ => false,
            }),
        }
    }

    fn numeric(&self, value: &Value) -> Result<Decimal, FilterError> {
        as_decimal(value).ok_or_else(|| {
            FilterError::new(format!("{} is not numeric: {value}", self.pointer))
        })
    }
}

#[async_trait]
impl Filter for FieldFilter {
    async fn matches(&self, event: &Event) -> Result<bool, FilterError> {
        self.evaluate(event)
    }
}

fn as_decimal(value: &Value) -> Option<Decimal> {
    let text = match value {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        _ => return None,
    };
    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .ok()
}
