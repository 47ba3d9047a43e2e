//! Schema-aware argument shaping.
//!
//! Coerces a loosely typed argument map into the shape declared by a tool's
//! input schema, and builds the corrected arguments for the single repair
//! retry after a validation failure.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use tracing::debug;

/// Canonical field and the synonyms callers commonly send instead.
const ALIASES: &[(&str, &[&str])] = &[("instruction", &["query", "text", "prompt", "message"])];

static UNRECOGNIZED_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)unrecognized keys?[^:\n]*:\s*([^\n]+)").unwrap());

static QUOTED_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r#"["'`]([^"'`]+)["'`]"#).unwrap());

/// Read-only view over the parts of a JSON schema the normalizer uses.
#[derive(Debug, Clone, Copy)]
pub struct SchemaView<'a> {
    properties: Option<&'a Map<String, Value>>,
    required: Option<&'a Vec<Value>>,
    closed: bool,
}

impl<'a> SchemaView<'a> {
    pub fn new(schema: &'a Map<String, Value>) -> Self {
        Self {
            properties: schema.get("properties").and_then(Value::as_object),
            required: schema.get("required").and_then(Value::as_array),
            closed: matches!(schema.get("additionalProperties"), Some(Value::Bool(false))),
        }
    }

    pub fn declares(&self, key: &str) -> bool {
        self.properties.is_some_and(|p| p.contains_key(key))
    }

    pub fn property_names(&self) -> impl Iterator<Item = &'a str> {
        self.properties
            .into_iter()
            .flat_map(|p| p.keys().map(String::as_str))
    }

    pub fn required_names(&self) -> impl Iterator<Item = &'a str> {
        self.required
            .into_iter()
            .flat_map(|r| r.iter().filter_map(Value::as_str))
    }

    fn declared_type(&self, key: &str) -> Option<&'a str> {
        let prop = self.properties?.get(key)?;
        match prop.get("type")? {
            Value::String(t) => Some(t.as_str()),
            Value::Array(types) => types
                .iter()
                .filter_map(Value::as_str)
                .find(|t| *t != "null"),
            _ => None,
        }
    }
}

/// Shape `raw` against `schema`.
///
/// Steps run in order: synonym aliasing, per-property type coercion,
/// `additionalProperties: false` stripping, empty-string placeholders for
/// missing required fields.
pub fn normalize_arguments(schema: &Map<String, Value>, raw: &Map<String, Value>) -> Map<String, Value> {
    let view = SchemaView::new(schema);
    let mut args = raw.clone();

    apply_aliases(&view, &mut args);

    for (key, value) in args.iter_mut() {
        if let Some(ty) = view.declared_type(key) {
            let coerced = coerce_value(value.take(), ty);
            *value = coerced;
        }
    }

    if view.closed {
        args.retain(|key, _| {
            let keep = view.declares(key);
            if !keep {
                debug!(key = %key, "Dropping undeclared argument");
            }
            keep
        });
    }

    fill_required(&view, &mut args);
    args
}

/// Arguments for the single repair retry after a validation failure.
///
/// Re-normalizes from the caller's raw arguments, promotes loosely matching
/// undeclared keys onto missing required fields, and drops undeclared keys
/// the error text names as unrecognized.
pub fn corrected_arguments(
    schema: &Map<String, Value>,
    raw: &Map<String, Value>,
    error_text: &str,
) -> Map<String, Value> {
    let view = SchemaView::new(schema);
    let mut args = raw.clone();

    for name in unrecognized_keys(error_text) {
        if !view.declares(&name) && args.remove(&name).is_some() {
            debug!(key = %name, "Removed argument rejected by remote");
        }
    }

    let missing: Vec<&str> = view
        .required_names()
        .filter(|name| !args.contains_key(*name))
        .collect();
    for name in missing {
        let loose = args
            .keys()
            .find(|k| !view.declares(k) && loose_eq(k, name))
            .cloned();
        if let Some(from) = loose {
            if let Some(value) = args.remove(&from) {
                debug!(from = %from, to = %name, "Promoted argument onto required field");
                args.insert(name.to_string(), value);
            }
        }
    }

    normalize_arguments(schema, &args)
}

/// Human-readable property list appended to a failed retry.
pub fn schema_hint(schema: &Map<String, Value>) -> String {
    let view = SchemaView::new(schema);
    let props: Vec<&str> = view.property_names().collect();
    let required: Vec<&str> = view.required_names().collect();
    format!(
        "Expected properties: {}. Required: {}.",
        if props.is_empty() { "(none)".to_string() } else { props.join(", ") },
        if required.is_empty() { "(none)".to_string() } else { required.join(", ") },
    )
}

fn apply_aliases(view: &SchemaView<'_>, args: &mut Map<String, Value>) {
    for (canonical, synonyms) in ALIASES {
        if !view.declares(canonical) || args.contains_key(*canonical) {
            continue;
        }
        let found = synonyms
            .iter()
            .filter_map(|alias| args.get(*alias))
            .find(|v| !is_blank(v))
            .cloned();
        if let Some(value) = found {
            debug!(field = %canonical, "Aliased synonym onto canonical field");
            args.insert(canonical.to_string(), value);
        }
    }
}

fn fill_required(view: &SchemaView<'_>, args: &mut Map<String, Value>) {
    for name in view.required_names() {
        if !args.contains_key(name) {
            debug!(field = %name, "Inserting placeholder for missing required field");
            args.insert(name.to_string(), Value::String(String::new()));
        }
    }
}

fn coerce_value(value: Value, ty: &str) -> Value {
    match ty {
        "string" => match value {
            Value::Bool(b) => Value::String(b.to_string()),
            Value::Number(n) => Value::String(n.to_string()),
            Value::Array(_) | Value::Object(_) => {
                Value::String(serde_json::to_string(&value).unwrap_or_default())
            }
            other => other,
        },
        "integer" => match &value {
            Value::String(s) => parse_integer(s.trim()).map(Value::from).unwrap_or(value),
            _ => value,
        },
        "number" => match &value {
            Value::String(s) => parse_number(s.trim()).unwrap_or(value),
            _ => value,
        },
        "boolean" => match &value {
            Value::String(s) => parse_bool(s).map(Value::Bool).unwrap_or(value),
            _ => value,
        },
        "array" => match value {
            Value::Array(_) | Value::Null => value,
            Value::String(s) => match serde_json::from_str::<Value>(&s) {
                Ok(parsed @ Value::Array(_)) => parsed,
                _ => Value::Array(vec![Value::String(s)]),
            },
            scalar => Value::Array(vec![scalar]),
        },
        "object" => match &value {
            Value::String(s) => match serde_json::from_str::<Value>(s) {
                Ok(parsed @ Value::Object(_)) => parsed,
                _ => value,
            },
            _ => value,
        },
        _ => value,
    }
}

fn parse_integer(s: &str) -> Option<i64> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(i);
    }
    let f = s.parse::<f64>().ok()?;
    if f.is_finite() && f.fract() == 0.0 && f.abs() < i64::MAX as f64 {
        Some(f as i64)
    } else {
        None
    }
}

fn parse_number(s: &str) -> Option<Value> {
    if let Ok(i) = s.parse::<i64>() {
        return Some(Value::from(i));
    }
    let f = s.parse::<f64>().ok()?;
    serde_json::Number::from_f64(f).map(Value::Number)
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" | "on" => Some(true),
        "false" | "0" | "no" | "n" | "off" => Some(false),
        _ => None,
    }
}

fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        _ => false,
    }
}

/// Case, hyphen and underscore insensitive key comparison.
fn loose_eq(a: &str, b: &str) -> bool {
    let norm = |s: &str| {
        s.chars()
            .filter(|c| *c != '-' && *c != '_')
            .map(|c| c.to_ascii_lowercase())
            .collect::<String>()
    };
    norm(a) == norm(b)
}

fn unrecognized_keys(error_text: &str) -> Vec<String> {
    UNRECOGNIZED_RE
        .captures_iter(error_text)
        .filter_map(|c| c.get(1))
        .flat_map(|m| {
            QUOTED_RE
                .captures_iter(m.as_str())
                .filter_map(|q| q.get(1).map(|k| k.as_str().to_string()))
                .collect::<Vec<_>>()
        })
        .collect()
}
