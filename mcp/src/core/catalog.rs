//! Tool catalog with discovery caps.
//!
//! Flattens descriptors from every source into a bounded listing: at most
//! `max_tools` entries, at most `max_properties` summarized properties per
//! tool, and property descriptions cut to `max_description_chars`.

use serde::Serialize;
use serde_json::{Map, Value};

use super::config::{DiscoveryLimits, Tool};

const ELLIPSIS: &str = "...";

#[derive(Debug, Clone, Serialize)]
pub struct Catalog {
    pub tools: Vec<CatalogEntry>,
    /// Every tool available before the cap.
    pub total_tools: usize,
    pub returned_tools: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CatalogEntry {
    pub name: String,
    /// Owning connection, or `custom:<provider>` for custom tools.
    pub server: String,
    pub description: String,
    #[serde(rename = "inputSchema_summary")]
    pub input_schema_summary: SchemaSummary,
}

#[derive(Debug, Clone, Serialize)]
pub struct SchemaSummary {
    pub properties: Vec<PropertySummary>,
    pub required: Vec<String>,
    #[serde(skip_serializing_if = "is_zero")]
    pub omitted_properties: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct PropertySummary {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub ty: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

fn is_zero(n: &usize) -> bool {
    *n == 0
}

/// Build the bounded catalog from `(server, tool)` pairs, keeping input order.
pub fn build_catalog(entries: Vec<(String, Tool)>, limits: &DiscoveryLimits) -> Catalog {
    let total_tools = entries.len();

    let tools: Vec<CatalogEntry> = entries
        .into_iter()
        .take(limits.max_tools)
        .map(|(server, tool)| CatalogEntry {
            name: tool.name.to_string(),
            server,
            description: tool.description.as_deref().unwrap_or_default().to_string(),
            input_schema_summary: summarize_schema(&tool.input_schema, limits),
        })
        .collect();

    let returned_tools = tools.len();
    let note = (total_tools > returned_tools).then(|| {
        let omitted = total_tools - returned_tools;
        format!(
            "Showing {returned_tools} of {total_tools} tools; {omitted} tools omitted. \
             Request a tool by name to use one that is not listed."
        )
    });

    Catalog {
        tools,
        total_tools,
        returned_tools,
        note,
    }
}

/// Summarize an input schema. Required properties are listed first.
pub fn summarize_schema(schema: &Map<String, Value>, limits: &DiscoveryLimits) -> SchemaSummary {
    let required: Vec<String> = schema
        .get("required")
        .and_then(Value::as_array)
        .map(|r| r.iter().filter_map(Value::as_str).map(String::from).collect())
        .unwrap_or_default();

    let Some(props) = schema.get("properties").and_then(Value::as_object) else {
        return SchemaSummary {
            properties: Vec::new(),
            required,
            omitted_properties: 0,
        };
    };

    let ordered = props
        .iter()
        .filter(|(name, _)| required.contains(name))
        .chain(props.iter().filter(|(name, _)| !required.contains(name)));

    let properties: Vec<PropertySummary> = ordered
        .take(limits.max_properties)
        .map(|(name, prop)| PropertySummary {
            name: name.clone(),
            ty: property_type(prop),
            description: prop
                .get("description")
                .and_then(Value::as_str)
                .map(|d| truncate_chars(d, limits.max_description_chars)),
        })
        .collect();

    SchemaSummary {
        omitted_properties: props.len() - properties.len(),
        properties,
        required,
    }
}

fn property_type(prop: &Value) -> Option<String> {
    match prop.get("type")? {
        Value::String(t) => Some(t.clone()),
        Value::Array(types) => {
            let names: Vec<&str> = types.iter().filter_map(Value::as_str).collect();
            (!names.is_empty()).then(|| names.join("|"))
        }
        _ => None,
    }
}

/// Cut `text` to at most `max` characters, ending in an ellipsis when cut.
pub fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let keep = max.saturating_sub(ELLIPSIS.len());
    let mut out: String = text.chars().take(keep).collect();
    out.push_str(ELLIPSIS);
    out
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::testing::tool;

    fn tools(n: usize) -> Vec<(String, Tool)> {
        (0..n)
            .map(|i| {
                (
                    "srv".to_string(),
                    tool(&format!("tool_{i}"), "d", json!({"type": "object"})),
                )
            })
            .collect()
    }

    #[test]
    fn test_catalog_caps_tool_count() {
        let catalog = build_catalog(tools(100), &DiscoveryLimits::default());
        assert_eq!(catalog.total_tools, 100);
        assert_eq!(catalog.returned_tools, 40);
        assert_eq!(catalog.tools.len(), 40);
        assert!(catalog.note.as_deref().unwrap().contains("60 tools omitted"));
        assert_eq!(catalog.tools[0].name, "tool_0");
    }

    #[test]
    fn test_catalog_without_overflow_has_no_note() {
        let catalog = build_catalog(tools(40), &DiscoveryLimits::default());
        assert_eq!(catalog.returned_tools, 40);
        assert!(catalog.note.is_none());

        let rendered = serde_json::to_value(&catalog).unwrap();
        assert!(rendered.get("note").is_none());
    }

    #[test]
    fn test_summary_caps_properties_required_first() {
        let mut props = Map::new();
        for i in 0..10 {
            props.insert(format!("p{i}"), json!({"type": "string"}));
        }
        let schema = json!({"type": "object", "properties": props, "required": ["p9"]});
        let schema = schema.as_object().unwrap().clone();

        let summary = summarize_schema(&schema, &DiscoveryLimits::default());
        assert_eq!(summary.properties.len(), 6);
        assert_eq!(summary.properties[0].name, "p9");
        assert_eq!(summary.properties[1].name, "p0");
        assert_eq!(summary.omitted_properties, 4);
        assert_eq!(summary.required, vec!["p9"]);
    }

    #[test]
    fn test_summary_truncates_descriptions() {
        let long = "x".repeat(500);
        let schema = json!({"properties": {
            "a": {"type": ["string", "null"], "description": long},
            "b": {"description": "short"}
        }});
        let summary =
            summarize_schema(schema.as_object().unwrap(), &DiscoveryLimits::default());

        let a = &summary.properties[0];
        let desc = a.description.as_deref().unwrap();
        assert_eq!(desc.chars().count(), 160);
        assert!(desc.ends_with("..."));
        assert_eq!(a.ty.as_deref(), Some("string|null"));

        let b = &summary.properties[1];
        assert_eq!(b.description.as_deref(), Some("short"));
        assert!(b.ty.is_none());
    }

    #[test]
    fn test_truncate_multibyte() {
        let text = "héllo wörld ".repeat(30);
        let cut = truncate_chars(&text, 20);
        assert_eq!(cut.chars().count(), 20);
        assert_eq!(truncate_chars("abc", 20), "abc");
    }
}
