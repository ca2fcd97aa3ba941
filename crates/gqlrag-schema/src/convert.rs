//! Conversions from `graphql-parser` AST nodes.

use gqlrag_core::{SchemaError, TypeRef};
use graphql_parser::schema::{Type, Value};
use serde_json::{Map, Number};

/// Convert a parsed type reference.
pub(crate) fn type_ref(ty: &Type<'_, String>) -> TypeRef {
    match ty {
        Type::NamedType(name) => TypeRef::Named(name.clone()),
        Type::ListType(inner) => TypeRef::List(Box::new(type_ref(inner))),
        Type::NonNullType(inner) => TypeRef::NonNull(Box::new(type_ref(inner))),
    }
}

/// Render a constant value as GraphQL literal text.
pub(crate) fn format_value(value: &Value<'_, String>) -> String {
    match value {
        Value::Variable(name) => format!("${name}"),
        Value::Int(n) => n.as_i64().unwrap_or_default().to_string(),
        Value::Float(f) => float_literal(*f),
        Value::String(s) => quote(s),
        Value::Boolean(b) => b.to_string(),
        Value::Null => "null".to_string(),
        Value::Enum(name) => name.clone(),
        Value::List(items) => {
            let items: Vec<String> = items.iter().map(format_value).collect();
            format!("[{}]", items.join(", "))
        }
        Value::Object(fields) => {
            let fields: Vec<String> = fields
                .iter()
                .map(|(k, v)| format!("{k}: {}", format_value(v)))
                .collect();
            format!("{{{}}}", fields.join(", "))
        }
    }
}

/// Convert a constant value to JSON. Enum values become strings.
pub(crate) fn value_to_json(value: &Value<'_, String>) -> Result<serde_json::Value, SchemaError> {
    Ok(match value {
        Value::Variable(name) => {
            return Err(SchemaError::Invalid(format!(
                "variable ${name} is not allowed in a constant value"
            )));
        }
        Value::Int(n) => n
            .as_i64()
            .map_or(serde_json::Value::Null, serde_json::Value::from),
        Value::Float(f) => Number::from_f64(*f).map_or(serde_json::Value::Null, serde_json::Value::Number),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Boolean(b) => serde_json::Value::Bool(*b),
        Value::Null => serde_json::Value::Null,
        Value::Enum(name) => serde_json::Value::String(name.clone()),
        Value::List(items) => serde_json::Value::Array(
            items
                .iter()
                .map(value_to_json)
                .collect::<Result<Vec<_>, _>>()?,
        ),
        Value::Object(fields) => {
            let mut map = Map::new();
            for (key, field) in fields {
                map.insert(key.clone(), value_to_json(field)?);
            }
            serde_json::Value::Object(map)
        }
    })
}

/// Float literal text that never reads back as an Int: `1e30`, `2.0`.
fn float_literal(f: f64) -> String {
    let text = format!("{f:?}");
    if text.contains(['.', 'e', 'E']) || !f.is_finite() {
        text
    } else {
        format!("{text}.0")
    }
}

fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c => out.push(c),
        }
    }
    out.push('"');
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    #[test]
    fn test_format_nested_value() {
        let mut object = BTreeMap::new();
        object.insert("field".to_string(), Value::Enum("NAME".to_string()));
        object.insert("value".to_string(), Value::String("a \"b\"".to_string()));
        let value = Value::List(vec![Value::Object(object), Value::Null]);

        assert_eq!(
            format_value(&value),
            r#"[{field: NAME, value: "a \"b\""}, null]"#
        );
    }

    #[test]
    fn test_format_float_keeps_float_syntax() {
        assert_eq!(format_value(&Value::Float(1e30)), "1e30");
        assert_eq!(format_value(&Value::Float(2.0)), "2.0");
        assert_eq!(format_value(&Value::Float(-0.25)), "-0.25");
        assert_eq!(format_value(&Value::Float(1e-7)), "1e-7");

        let query_src = format!(
            "query Q($max: Float = {}) {{ deals(max: $max) {{ id }} }}",
            format_value(&Value::Float(1e30))
        );
        let parsed = graphql_parser::parse_query::<String>(&query_src);
        assert!(parsed.is_ok());
    }

    #[test]
    fn test_value_to_json_rejects_variables() {
        let value = Value::List(vec![Value::Variable("x".to_string())]);
        assert!(value_to_json(&value).is_err());
    }

    #[test]
    fn test_value_to_json_enum_is_string() {
        let json = value_to_json(&Value::Enum("ASC".to_string())).unwrap();
        assert_eq!(json, serde_json::json!("ASC"));
    }
}
