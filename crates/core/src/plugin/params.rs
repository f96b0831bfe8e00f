use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::{BeatSyncError, Result};

pub type ConfigMap = BTreeMap<String, ParamValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParamValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ParamValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(value) => Some(*value),
            Self::Int(value) => Some(*value as f64),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Text(value) => Some(value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ParamKind {
    Float { min: f64, max: f64 },
    Int { min: i64, max: i64 },
    Bool,
    Choice { options: Vec<String> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,
    pub label: String,
    pub kind: ParamKind,
    pub default: ParamValue,
}

impl ParamSpec {
    pub fn float(name: &str, min: f64, max: f64, default: f64) -> Self {
        Self::new(name, ParamKind::Float { min, max }, ParamValue::Float(default))
    }

    pub fn int(name: &str, min: i64, max: i64, default: i64) -> Self {
        Self::new(name, ParamKind::Int { min, max }, ParamValue::Int(default))
    }

    pub fn boolean(name: &str, default: bool) -> Self {
        Self::new(name, ParamKind::Bool, ParamValue::Bool(default))
    }

    pub fn choice(name: &str, options: &[&str], default: &str) -> Self {
        Self::new(
            name,
            ParamKind::Choice {
                options: options.iter().map(|o| o.to_string()).collect(),
            },
            ParamValue::Text(default.to_string()),
        )
    }

    fn new(name: &str, kind: ParamKind, default: ParamValue) -> Self {
        Self {
            name: name.to_string(),
            label: name.to_string(),
            kind,
            default,
        }
    }

    pub fn with_label(mut self, label: &str) -> Self {
        self.label = label.to_string();
        self
    }

    /// Converts `value` into this parameter's type, clamping numbers into
    /// range.
    pub fn coerce(&self, value: &ParamValue) -> Result<ParamValue> {
        let mismatch = |expected: &str| {
            BeatSyncError::parameter(&self.name, format!("expected {expected}, got {value:?}"))
        };
        match (&self.kind, value) {
            (ParamKind::Float { min, max }, _) => {
                let number = value.as_f64().ok_or_else(|| mismatch("a number"))?;
                if number.is_nan() {
                    return Err(mismatch("a number"));
                }
                Ok(ParamValue::Float(number.clamp(*min, *max)))
            }
            (ParamKind::Int { min, max }, ParamValue::Int(number)) => {
                Ok(ParamValue::Int((*number).clamp(*min, *max)))
            }
            (ParamKind::Int { min, max }, ParamValue::Float(number)) if number.is_finite() => {
                let rounded = number.round().clamp(*min as f64, *max as f64);
                Ok(ParamValue::Int(rounded as i64))
            }
            (ParamKind::Int { .. }, _) => Err(mismatch("an integer")),
            (ParamKind::Bool, ParamValue::Bool(flag)) => Ok(ParamValue::Bool(*flag)),
            (ParamKind::Bool, _) => Err(mismatch("a boolean")),
            (ParamKind::Choice { options }, ParamValue::Text(choice)) => {
                if options.iter().any(|option| option == choice) {
                    Ok(value.clone())
                } else {
                    Err(BeatSyncError::parameter(
                        &self.name,
                        format!("`{choice}` is not one of {options:?}"),
                    ))
                }
            }
            (ParamKind::Choice { .. }, _) => Err(mismatch("a string")),
        }
    }

    fn check(&self) -> std::result::Result<(), String> {
        match &self.kind {
            ParamKind::Float { min, max } if !(min.is_finite() && max.is_finite() && min <= max) => {
                return Err(format!("`{}` has an invalid range {min}..{max}", self.name));
            }
            ParamKind::Int { min, max } if min > max => {
                return Err(format!("`{}` has an invalid range {min}..{max}", self.name));
            }
            ParamKind::Choice { options } if options.is_empty() => {
                return Err(format!("`{}` offers no choices", self.name));
            }
            _ => {}
        }

        match self.coerce(&self.default) {
            Ok(coerced) if coerced == self.default => Ok(()),
            Ok(_) => Err(format!("default of `{}` is out of range", self.name)),
            Err(err) => Err(err.to_string()),
        }
    }
}

/// Declared schema plus current values of one plugin instance.
#[derive(Debug, Clone, PartialEq)]
pub struct ParameterSet {
    specs: Vec<ParamSpec>,
    values: ConfigMap,
}

impl ParameterSet {
    pub fn new(specs: Vec<ParamSpec>) -> Self {
        let values = specs
            .iter()
            .map(|spec| (spec.name.clone(), spec.default.clone()))
            .collect();
        Self { specs, values }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    pub fn specs(&self) -> &[ParamSpec] {
        &self.specs
    }

    pub fn values(&self) -> &ConfigMap {
        &self.values
    }

    pub fn spec(&self, name: &str) -> Option<&ParamSpec> {
        self.specs.iter().find(|spec| spec.name == name)
    }

    pub fn validate_schema(&self) -> std::result::Result<(), String> {
        let mut seen = HashSet::new();
        for spec in &self.specs {
            if spec.name.trim().is_empty() {
                return Err("parameter with an empty name".to_string());
            }
            if !seen.insert(spec.name.as_str()) {
                return Err(format!("parameter `{}` declared twice", spec.name));
            }
            spec.check()?;
        }
        Ok(())
    }

    /// Applies a partial update atomically: either every entry is accepted
    /// (after clamping) or nothing changes.
    pub fn merge(&mut self, patch: &ConfigMap) -> Result<()> {
        let mut accepted = Vec::with_capacity(patch.len());
        for (name, value) in patch {
            let spec = self
                .spec(name)
                .ok_or_else(|| BeatSyncError::parameter(name, "unknown parameter"))?;
            accepted.push((name.clone(), spec.coerce(value)?));
        }
        self.values.extend(accepted);
        Ok(())
    }

    pub fn float(&self, name: &str) -> f64 {
        self.values.get(name).and_then(ParamValue::as_f64).unwrap_or(0.0)
    }

    pub fn int(&self, name: &str) -> i64 {
        self.values.get(name).and_then(ParamValue::as_i64).unwrap_or(0)
    }

    pub fn flag(&self, name: &str) -> bool {
        self.values.get(name).and_then(ParamValue::as_bool).unwrap_or(false)
    }

    pub fn text(&self, name: &str) -> &str {
        self.values.get(name).and_then(ParamValue::as_str).unwrap_or("")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set() -> ParameterSet {
        ParameterSet::new(vec![
            ParamSpec::float("smoothing", 0.0, 1.0, 0.7),
            ParamSpec::int("bars", 8, 256, 64),
            ParamSpec::boolean("mirror", false),
            ParamSpec::choice("palette", &["neon", "mono"], "neon"),
        ])
    }

    #[test]
    fn defaults_populate_values() {
        let params = set();
        assert_eq!(params.float("smoothing"), 0.7);
        assert_eq!(params.int("bars"), 64);
        assert!(!params.flag("mirror"));
        assert_eq!(params.text("palette"), "neon");
    }

    #[test]
    fn merge_clamps_and_converts() {
        let mut params = set();
        let patch = ConfigMap::from([
            ("smoothing".to_string(), ParamValue::Int(5)),
            ("bars".to_string(), ParamValue::Float(3.6)),
        ]);
        params.merge(&patch).unwrap();
        assert_eq!(params.float("smoothing"), 1.0);
        assert_eq!(params.int("bars"), 8);
    }

    #[test]
    fn rejected_patch_changes_nothing() {
        let mut params = set();
        let patch = ConfigMap::from([
            ("smoothing".to_string(), ParamValue::Float(0.1)),
            ("palette".to_string(), ParamValue::Text("sepia".to_string())),
        ]);
        assert!(params.merge(&patch).is_err());
        assert_eq!(params.float("smoothing"), 0.7);

        let unknown = ConfigMap::from([("glow".to_string(), ParamValue::Bool(true))]);
        assert!(params.merge(&unknown).is_err());
    }

    #[test]
    fn schema_validation_catches_bad_declarations() {
        assert!(set().validate_schema().is_ok());

        let inverted = ParameterSet::new(vec![ParamSpec::float("gain", 2.0, 1.0, 1.5)]);
        assert!(inverted.validate_schema().is_err());

        let out_of_range = ParameterSet::new(vec![ParamSpec::int("bars", 1, 4, 9)]);
        assert!(out_of_range.validate_schema().is_err());

        let duplicate = ParameterSet::new(vec![
            ParamSpec::boolean("mirror", true),
            ParamSpec::boolean("mirror", false),
        ]);
        assert!(duplicate.validate_schema().is_err());
    }

    #[test]
    fn values_deserialize_from_json() {
        let patch: ConfigMap =
            serde_json::from_str(r#"{ "smoothing": 0.25, "bars": 32, "mirror": true }"#).unwrap();
        assert_eq!(patch["smoothing"], ParamValue::Float(0.25));
        assert_eq!(patch["bars"], ParamValue::Int(32));
        assert_eq!(patch["mirror"], ParamValue::Bool(true));
    }
}
