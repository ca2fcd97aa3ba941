//! Variable value extraction from request text.

use gqlrag_core::{DslRecord, TypeRef, ValueExtractor, VariableSpec};
use serde_json::{Number, Value};
use std::sync::Arc;
use tracing::debug;

use crate::parser::{split_tokens, unquote};

/// Picks up `name:value` and `name=value` tokens from the request text.
///
/// Names match case-insensitively and ignore `_` and `-`, so `firstName:Ada`,
/// `first_name=Ada` and `FIRSTNAME:Ada` all bind `$firstName`. Values are
/// coerced by the variable's declared type; a value that cannot be coerced is
/// treated as absent.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineValueExtractor;

impl InlineValueExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl ValueExtractor for InlineValueExtractor {
    fn name(&self) -> &str {
        "inline"
    }

    fn extract(&self, text: &str, variable: &VariableSpec, record: &DslRecord) -> Option<Value> {
        let wanted = normalize_name(&variable.name);

        for token in split_tokens(text) {
            let Some(split) = token.find([':', '=']) else {
                continue;
            };
            let (key, raw) = (&token[..split], &token[split + 1..]);
            if raw.is_empty() || normalize_name(key) != wanted {
                continue;
            }

            let value = coerce(raw, &variable.type_ref, record);
            debug!(
                "Inline value for ${} from {:?}: {:?}",
                variable.name, token, value
            );
            if value.is_some() {
                return value;
            }
        }
        None
    }
}

/// Tries each extractor in order and keeps the first value found.
#[derive(Default)]
pub struct ChainExtractor {
    extractors: Vec<Arc<dyn ValueExtractor>>,
}

impl ChainExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with(mut self, extractor: Arc<dyn ValueExtractor>) -> Self {
        self.extractors.push(extractor);
        self
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.extractors.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.extractors.is_empty()
    }
}

impl ValueExtractor for ChainExtractor {
    fn name(&self) -> &str {
        "chain"
    }

    fn extract(&self, text: &str, variable: &VariableSpec, record: &DslRecord) -> Option<Value> {
        self.extractors.iter().find_map(|extractor| {
            let value = extractor.extract(text, variable, record);
            if value.is_some() {
                debug!("{} supplied ${}", extractor.name(), variable.name);
            }
            value
        })
    }
}

fn normalize_name(name: &str) -> String {
    name.chars()
        .filter(|c| *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// Coerce raw text to a value of type `type_ref`.
fn coerce(raw: &str, type_ref: &TypeRef, record: &DslRecord) -> Option<Value> {
    let raw = unquote(raw.trim());
    if raw == "null" {
        return (!type_ref.is_non_null()).then_some(Value::Null);
    }

    if let Some(item) = type_ref.list_item() {
        if raw.starts_with('[') {
            let Ok(Value::Array(items)) = serde_json::from_str::<Value>(raw) else {
                return None;
            };
            return Some(Value::Array(items));
        }
        let items = raw
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| coerce(s, item, record))
            .collect::<Option<Vec<_>>>()?;
        return Some(Value::Array(items));
    }

    match type_ref.named() {
        "Int" => raw.parse::<i32>().ok().map(Value::from),
        "Float" => raw
            .parse::<f64>()
            .ok()
            .and_then(Number::from_f64)
            .map(Value::Number),
        "Boolean" => match raw.to_lowercase().as_str() {
            "true" | "yes" | "on" => Some(Value::Bool(true)),
            "false" | "no" | "off" => Some(Value::Bool(false)),
            _ => None,
        },
        "String" | "ID" => Some(Value::String(raw.to_string())),
        named if record.type_definitions.contains_key(named) => {
            // Input object: only a JSON object will do
            match serde_json::from_str::<Value>(raw) {
                Ok(object @ Value::Object(_)) => Some(object),
                _ => None,
            }
        }
        // Enum or custom scalar
        _ => Some(serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlrag_core::OperationKind;
    use serde_json::json;
    use std::collections::BTreeMap;

    fn record() -> DslRecord {
        let mut filter = BTreeMap::new();
        filter.insert("field".to_string(), "String!".to_string());
        filter.insert("value".to_string(), "String".to_string());
        let mut type_definitions = BTreeMap::new();
        type_definitions.insert("Filter".to_string(), filter);

        DslRecord {
            dsl_name: "query_appliances".to_string(),
            kind: OperationKind::Query,
            description: "List appliances".to_string(),
            query_template: "query QueryAppliances($filters: [Filter!], $first: Int) {\n  appliances(filters: $filters, first: $first) {\n    id\n  }\n}\n".to_string(),
            variables: vec!["filters".to_string(), "first".to_string()],
            related_types: vec!["Appliance".to_string(), "Filter".to_string()],
            return_type: "Appliance".to_string(),
            keywords: Vec::new(),
            type_definitions,
        }
    }

    fn var(name: &str, type_ref: TypeRef) -> VariableSpec {
        VariableSpec {
            name: name.to_string(),
            type_ref,
            default_value: None,
        }
    }

    fn extract(text: &str, variable: &VariableSpec) -> Option<Value> {
        InlineValueExtractor::new().extract(text, variable, &record())
    }

    #[test]
    fn test_scalars() {
        let first = var("first", TypeRef::named_type("Int"));
        assert_eq!(extract("appliances first:10", &first), Some(json!(10)));
        assert_eq!(extract("appliances first=3", &first), Some(json!(3)));
        assert_eq!(extract("appliances first:ten", &first), None);
        assert_eq!(extract("appliances", &first), None);
        // Int is 32-bit signed
        assert_eq!(extract("first:2147483647", &first), Some(json!(2_147_483_647)));
        assert_eq!(extract("first:-2147483648", &first), Some(json!(-2_147_483_648)));
        assert_eq!(extract("first:5000000000", &first), None);

        let ratio = var("ratio", TypeRef::named_type("Float"));
        assert_eq!(extract("ratio:0.5", &ratio), Some(json!(0.5)));

        let active = var("active", TypeRef::named_type("Boolean"));
        assert_eq!(extract("active:yes", &active), Some(json!(true)));
        assert_eq!(extract("active=False", &active), Some(json!(false)));
        assert_eq!(extract("active:maybe", &active), None);

        let id = var("id", TypeRef::non_null(TypeRef::named_type("ID")));
        assert_eq!(extract("user id:42", &id), Some(json!("42")));
    }

    #[test]
    fn test_name_matching() {
        let name = var("firstName", TypeRef::named_type("String"));
        assert_eq!(extract("first_name:Ada", &name), Some(json!("Ada")));
        assert_eq!(extract("FIRSTNAME=Ada", &name), Some(json!("Ada")));
        assert_eq!(extract("first-name:\"Ada Lovelace\"", &name), Some(json!("Ada Lovelace")));
        assert_eq!(extract("lastName:Byron", &name), None);
    }

    #[test]
    fn test_lists() {
        let ids = var("ids", TypeRef::list_of(TypeRef::non_null(TypeRef::named_type("Int"))));
        assert_eq!(extract("ids:1,2,3", &ids), Some(json!([1, 2, 3])));
        assert_eq!(extract("ids:[4,5]", &ids), Some(json!([4, 5])));
        assert_eq!(extract("ids:1,x", &ids), None);
    }

    #[test]
    fn test_input_objects() {
        let filters = var(
            "filters",
            TypeRef::list_of(TypeRef::non_null(TypeRef::named_type("Filter"))),
        );
        assert_eq!(
            extract(r#"filters:[{"field":"kind","value":"ac"}]"#, &filters),
            Some(json!([{"field": "kind", "value": "ac"}]))
        );

        let filter = var("filter", TypeRef::named_type("Filter"));
        assert_eq!(
            extract(r#"filter:{"field":"kind"}"#, &filter),
            Some(json!({"field": "kind"}))
        );
        assert_eq!(extract("filter:kind", &filter), None);
    }

    #[test]
    fn test_enums_and_null() {
        let status = var("status", TypeRef::named_type("OrderStatus"));
        assert_eq!(extract("status:SHIPPED", &status), Some(json!("SHIPPED")));
        assert_eq!(extract("status:null", &status), Some(Value::Null));

        let required = var("status", TypeRef::non_null(TypeRef::named_type("OrderStatus")));
        assert_eq!(extract("status:null", &required), None);
    }

    #[test]
    fn test_no_entity_inference() {
        let filters = var(
            "filters",
            TypeRef::list_of(TypeRef::non_null(TypeRef::named_type("Filter"))),
        );
        assert_eq!(extract("show me all air conditioners", &filters), None);
    }

    struct Fixed(Value);

    impl ValueExtractor for Fixed {
        fn name(&self) -> &str {
            "fixed"
        }

        fn extract(&self, _: &str, _: &VariableSpec, _: &DslRecord) -> Option<Value> {
            Some(self.0.clone())
        }
    }

    #[test]
    fn test_chain_order() {
        let first = var("first", TypeRef::named_type("Int"));
        let chain = ChainExtractor::new()
            .with(Arc::new(InlineValueExtractor::new()))
            .with(Arc::new(Fixed(json!(99))));
        assert_eq!(chain.len(), 2);

        assert_eq!(chain.extract("first:1", &first, &record()), Some(json!(1)));
        assert_eq!(chain.extract("appliances", &first, &record()), Some(json!(99)));
        assert!(ChainExtractor::new().extract("first:1", &first, &record()).is_none());
    }
}
