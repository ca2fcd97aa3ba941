//! Operation template analysis.
//!
//! Parses a DSL `query_template` and reports its operation kind, variable
//! declarations and the variables its selection actually uses.

use std::collections::BTreeSet;

use gqlrag_core::{DslRecord, OperationKind, SchemaError, VariableSpec};
use graphql_parser::parse_query;
use graphql_parser::query::{
    Definition, Directive, OperationDefinition, Selection, SelectionSet, Value, VariableDefinition,
};

use crate::convert::{type_ref, value_to_json};

/// What a template declares and uses.
#[derive(Debug, Clone, PartialEq)]
pub struct TemplateInfo {
    pub kind: OperationKind,
    pub operation_name: Option<String>,
    /// First top-level field of the operation
    pub root_field: Option<String>,
    /// Declared variables, in declaration order
    pub variables: Vec<VariableSpec>,
    /// Variables referenced in the selection
    pub used_variables: BTreeSet<String>,
}

impl TemplateInfo {
    /// Look up a declared variable.
    #[must_use]
    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|v| v.name == name)
    }

    /// Names of declared variables.
    #[must_use]
    pub fn declared(&self) -> BTreeSet<String> {
        self.variables.iter().map(|v| v.name.clone()).collect()
    }

    /// Check that declared and used variables agree.
    pub fn check_consistency(&self) -> Result<(), String> {
        let declared = self.declared();
        if let Some(name) = self.used_variables.difference(&declared).next() {
            return Err(format!("${name} is used but not declared"));
        }
        if let Some(name) = declared.difference(&self.used_variables).next() {
            return Err(format!("${name} is declared but never used"));
        }
        Ok(())
    }
}

/// Parse a template into a [`TemplateInfo`].
///
/// The template must contain exactly one query or mutation operation.
pub fn analyze(template: &str) -> Result<TemplateInfo, SchemaError> {
    let document =
        parse_query::<String>(template).map_err(|e| SchemaError::Parse(e.to_string()))?;

    let mut info: Option<TemplateInfo> = None;
    let mut fragment_variables = BTreeSet::new();

    for definition in &document.definitions {
        match definition {
            Definition::Operation(operation) => {
                if info.is_some() {
                    return Err(SchemaError::Invalid(
                        "template contains more than one operation".to_string(),
                    ));
                }
                info = Some(analyze_operation(operation)?);
            }
            Definition::Fragment(fragment) => {
                collect_selection_set(&fragment.selection_set, &mut fragment_variables);
            }
        }
    }

    let mut info = info.ok_or_else(|| {
        SchemaError::Invalid("template contains no operation".to_string())
    })?;
    info.used_variables.extend(fragment_variables);
    Ok(info)
}

/// Deep check of a record: the template parses, its kind matches, and the
/// declared, used and listed variables all agree.
pub fn validate_record(record: &DslRecord) -> Result<TemplateInfo, SchemaError> {
    let malformed = |reason: String| SchemaError::MalformedRecord {
        name: record.dsl_name.clone(),
        reason,
    };

    record.validate()?;
    let info = analyze(&record.query_template).map_err(|e| malformed(e.to_string()))?;

    if info.kind != record.kind {
        return Err(malformed(format!(
            "type is {} but the template is a {}",
            record.kind, info.kind
        )));
    }
    info.check_consistency().map_err(malformed)?;

    let listed: BTreeSet<String> = record.variables.iter().cloned().collect();
    if listed != info.declared() {
        return Err(malformed(
            "variables do not match the template's variable definitions".to_string(),
        ));
    }

    Ok(info)
}

fn analyze_operation(
    operation: &OperationDefinition<'_, String>,
) -> Result<TemplateInfo, SchemaError> {
    let (kind, name, definitions, directives, selection_set) = match operation {
        OperationDefinition::SelectionSet(set) => (OperationKind::Query, None, &[][..], &[][..], set),
        OperationDefinition::Query(q) => (
            OperationKind::Query,
            q.name.clone(),
            q.variable_definitions.as_slice(),
            q.directives.as_slice(),
            &q.selection_set,
        ),
        OperationDefinition::Mutation(m) => (
            OperationKind::Mutation,
            m.name.clone(),
            m.variable_definitions.as_slice(),
            m.directives.as_slice(),
            &m.selection_set,
        ),
        OperationDefinition::Subscription(_) => {
            return Err(SchemaError::Invalid(
                "subscriptions are not supported".to_string(),
            ));
        }
    };

    let variables = definitions
        .iter()
        .map(variable_spec)
        .collect::<Result<Vec<_>, _>>()?;

    let mut seen = BTreeSet::new();
    for variable in &variables {
        if !seen.insert(variable.name.as_str()) {
            return Err(SchemaError::Invalid(format!(
                "variable ${} is declared more than once",
                variable.name
            )));
        }
    }

    let mut used = BTreeSet::new();
    collect_directives(directives, &mut used);
    collect_selection_set(selection_set, &mut used);

    let root_field = selection_set.items.iter().find_map(|item| match item {
        Selection::Field(field) => Some(field.name.clone()),
        _ => None,
    });

    Ok(TemplateInfo {
        kind,
        operation_name: name,
        root_field,
        variables,
        used_variables: used,
    })
}

fn variable_spec(definition: &VariableDefinition<'_, String>) -> Result<VariableSpec, SchemaError> {
    Ok(VariableSpec {
        name: definition.name.clone(),
        type_ref: type_ref(&definition.var_type),
        default_value: definition
            .default_value
            .as_ref()
            .map(value_to_json)
            .transpose()?,
    })
}

fn collect_selection_set(set: &SelectionSet<'_, String>, used: &mut BTreeSet<String>) {
    for item in &set.items {
        match item {
            Selection::Field(field) => {
                for (_, value) in &field.arguments {
                    collect_value(value, used);
                }
                collect_directives(&field.directives, used);
                collect_selection_set(&field.selection_set, used);
            }
            Selection::InlineFragment(fragment) => {
                collect_directives(&fragment.directives, used);
                collect_selection_set(&fragment.selection_set, used);
            }
            Selection::FragmentSpread(spread) => collect_directives(&spread.directives, used),
        }
    }
}

fn collect_directives(directives: &[Directive<'_, String>], used: &mut BTreeSet<String>) {
    for directive in directives {
        for (_, value) in &directive.arguments {
            collect_value(value, used);
        }
    }
}

fn collect_value(value: &Value<'_, String>, used: &mut BTreeSet<String>) {
    match value {
        Value::Variable(name) => {
            used.insert(name.clone());
        }
        Value::List(items) => {
            for item in items {
                collect_value(item, used);
            }
        }
        Value::Object(fields) => {
            for field in fields.values() {
                collect_value(field, used);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_analyze_query() {
        let info = analyze(
            "query QueryAppliances($filters: [Filter!], $limit: Int = 10) {
                appliances(filters: $filters, limit: $limit) { id name }
            }",
        )
        .unwrap();

        assert_eq!(info.kind, OperationKind::Query);
        assert_eq!(info.operation_name.as_deref(), Some("QueryAppliances"));
        assert_eq!(info.root_field.as_deref(), Some("appliances"));
        assert_eq!(info.variables.len(), 2);
        assert_eq!(info.variables[0].type_ref.to_string(), "[Filter!]");
        assert!(info.variables[0].is_list());
        assert_eq!(info.variables[1].default_value, Some(json!(10)));
        assert!(info.check_consistency().is_ok());
    }

    #[test]
    fn test_analyze_mutation_with_object_argument() {
        let info = analyze(
            "mutation CreateUser($name: String!) { createUser(input: {name: $name, tags: [\"a\"]}) { id } }",
        )
        .unwrap();
        assert_eq!(info.kind, OperationKind::Mutation);
        assert!(info.used_variables.contains("name"));
        assert!(info.variable("name").unwrap().is_required());
    }

    #[test]
    fn test_analyze_anonymous_selection_set() {
        let info = analyze("{ ping }").unwrap();
        assert_eq!(info.kind, OperationKind::Query);
        assert!(info.operation_name.is_none());
        assert!(info.variables.is_empty());
    }

    #[test]
    fn test_analyze_rejects_subscription() {
        assert!(analyze("subscription S { events { id } }").is_err());
    }

    #[test]
    fn test_analyze_rejects_two_operations() {
        assert!(analyze("query A { a } query B { b }").is_err());
    }

    #[test]
    fn test_analyze_parse_error() {
        let err = analyze("query { a(").unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
    }

    #[test]
    fn test_consistency_detects_undeclared_and_unused() {
        let info = analyze("query Q($a: Int) { f(x: $b) }").unwrap();
        let err = info.check_consistency().unwrap_err();
        assert!(err.contains("$b is used but not declared"));

        let info = analyze("query Q($a: Int) { f }").unwrap();
        assert!(info.check_consistency().unwrap_err().contains("$a is declared"));
    }

    #[test]
    fn test_validate_record_kind_mismatch() {
        let record = DslRecord {
            dsl_name: "query_reset".to_string(),
            kind: OperationKind::Query,
            description: "reset".to_string(),
            query_template: "mutation Reset { reset }".to_string(),
            variables: vec![],
            related_types: vec![],
            return_type: "Boolean".to_string(),
            keywords: vec![],
            type_definitions: Default::default(),
        };
        let err = validate_record(&record).unwrap_err();
        assert!(matches!(err, SchemaError::MalformedRecord { .. }));
        assert!(err.to_string().contains("template is a mutation"));
    }
}
