//! GraphQL SDL reader.
//!
//! Parses SDL text into a [`TypeGraph`], merging type extensions and
//! resolving the root operation types.

use std::collections::BTreeMap;
use std::path::Path;

use gqlrag_core::{
    ArgumentDef, FieldDef, SchemaError, SchemaType, SchemaTypeKind, TypeGraph, TypeRef,
};
use graphql_parser::parse_schema;
use graphql_parser::schema::{Definition, Field, InputValue, TypeDefinition, TypeExtension};
use tracing::{debug, info};

use crate::convert::{format_value, type_ref};

/// Reads GraphQL SDL into a [`TypeGraph`].
pub struct SchemaReader;

impl SchemaReader {
    /// Read and parse a schema file.
    pub async fn read_file(path: &Path) -> Result<TypeGraph, SchemaError> {
        let sdl = tokio::fs::read_to_string(path).await?;
        debug!("Read schema {:?} ({} bytes)", path, sdl.len());
        Self::parse(&sdl)
    }

    /// Parse SDL text.
    pub fn parse(sdl: &str) -> Result<TypeGraph, SchemaError> {
        let document =
            parse_schema::<String>(sdl).map_err(|e| SchemaError::Parse(e.to_string()))?;

        let mut types: BTreeMap<String, SchemaType> = BTreeMap::new();
        let mut roots: Option<(Option<String>, Option<String>)> = None;
        let mut extensions = Vec::new();

        for definition in &document.definitions {
            match definition {
                Definition::SchemaDefinition(schema) => {
                    if roots.is_some() {
                        return Err(SchemaError::Invalid(
                            "schema definition appears more than once".to_string(),
                        ));
                    }
                    roots = Some((schema.query.clone(), schema.mutation.clone()));
                }
                Definition::TypeDefinition(def) => {
                    let ty = convert_type_definition(def);
                    if types.contains_key(&ty.name) {
                        return Err(SchemaError::Invalid(format!(
                            "type {} is defined more than once",
                            ty.name
                        )));
                    }
                    types.insert(ty.name.clone(), ty);
                }
                Definition::TypeExtension(ext) => extensions.push(ext),
                Definition::DirectiveDefinition(directive) => {
                    debug!("Ignoring directive definition @{}", directive.name);
                }
            }
        }

        for ext in extensions {
            apply_extension(&mut types, ext)?;
        }

        let (query_type, mutation_type) = match roots {
            Some((query, mutation)) => {
                for name in query.iter().chain(mutation.iter()) {
                    if !types.contains_key(name) {
                        return Err(SchemaError::Invalid(format!(
                            "schema root type {name} is not defined"
                        )));
                    }
                }
                (query, mutation)
            }
            None => (
                types.contains_key("Query").then(|| "Query".to_string()),
                types.contains_key("Mutation").then(|| "Mutation".to_string()),
            ),
        };

        for name in query_type.iter().chain(mutation_type.iter()) {
            if types.get(name).is_some_and(|t| t.kind != SchemaTypeKind::Object) {
                return Err(SchemaError::Invalid(format!(
                    "root type {name} must be an object type"
                )));
            }
        }

        let graph = TypeGraph {
            types,
            query_type,
            mutation_type,
        };
        validate_references(&graph)?;

        info!(
            "Parsed schema: {} types, {} root operations",
            graph.types.len(),
            graph.operation_count()
        );
        Ok(graph)
    }
}

fn convert_field(field: &Field<'_, String>) -> FieldDef {
    FieldDef {
        name: field.name.clone(),
        description: field.description.clone(),
        arguments: field.arguments.iter().map(convert_input_value).collect(),
        field_type: type_ref(&field.field_type),
    }
}

fn convert_input_value(value: &InputValue<'_, String>) -> ArgumentDef {
    ArgumentDef {
        name: value.name.clone(),
        description: value.description.clone(),
        value_type: type_ref(&value.value_type),
        default_value: value.default_value.as_ref().map(format_value),
    }
}

fn convert_type_definition(def: &TypeDefinition<'_, String>) -> SchemaType {
    match def {
        TypeDefinition::Scalar(scalar) => {
            let mut ty = SchemaType::new(scalar.name.clone(), SchemaTypeKind::Scalar);
            ty.description.clone_from(&scalar.description);
            ty
        }
        TypeDefinition::Object(object) => {
            let mut ty = SchemaType::new(object.name.clone(), SchemaTypeKind::Object);
            ty.description.clone_from(&object.description);
            ty.fields = object.fields.iter().map(convert_field).collect();
            ty
        }
        TypeDefinition::Interface(interface) => {
            let mut ty = SchemaType::new(interface.name.clone(), SchemaTypeKind::Interface);
            ty.description.clone_from(&interface.description);
            ty.fields = interface.fields.iter().map(convert_field).collect();
            ty
        }
        TypeDefinition::Union(union) => {
            let mut ty = SchemaType::new(union.name.clone(), SchemaTypeKind::Union);
            ty.description.clone_from(&union.description);
            ty.possible_types.clone_from(&union.types);
            ty
        }
        TypeDefinition::Enum(enum_type) => {
            let mut ty = SchemaType::new(enum_type.name.clone(), SchemaTypeKind::Enum);
            ty.description.clone_from(&enum_type.description);
            ty.enum_values = enum_type.values.iter().map(|v| v.name.clone()).collect();
            ty
        }
        TypeDefinition::InputObject(input) => {
            let mut ty = SchemaType::new(input.name.clone(), SchemaTypeKind::Input);
            ty.description.clone_from(&input.description);
            ty.input_fields = input.fields.iter().map(convert_input_value).collect();
            ty
        }
    }
}

fn apply_extension(
    types: &mut BTreeMap<String, SchemaType>,
    ext: &TypeExtension<'_, String>,
) -> Result<(), SchemaError> {
    let (name, kind) = match ext {
        TypeExtension::Scalar(e) => (&e.name, SchemaTypeKind::Scalar),
        TypeExtension::Object(e) => (&e.name, SchemaTypeKind::Object),
        TypeExtension::Interface(e) => (&e.name, SchemaTypeKind::Interface),
        TypeExtension::Union(e) => (&e.name, SchemaTypeKind::Union),
        TypeExtension::Enum(e) => (&e.name, SchemaTypeKind::Enum),
        TypeExtension::InputObject(e) => (&e.name, SchemaTypeKind::Input),
    };

    let target = types.get_mut(name).ok_or_else(|| {
        SchemaError::Invalid(format!("extension of undefined type {name}"))
    })?;
    if target.kind != kind {
        return Err(SchemaError::Invalid(format!(
            "extension of {name} does not match its kind {:?}",
            target.kind
        )));
    }

    match ext {
        TypeExtension::Scalar(_) => {}
        TypeExtension::Object(e) => extend_fields(target, &e.fields)?,
        TypeExtension::Interface(e) => extend_fields(target, &e.fields)?,
        TypeExtension::Union(e) => target.possible_types.extend(e.types.iter().cloned()),
        TypeExtension::Enum(e) => target
            .enum_values
            .extend(e.values.iter().map(|v| v.name.clone())),
        TypeExtension::InputObject(e) => {
            for field in &e.fields {
                if target.input_fields.iter().any(|f| f.name == field.name) {
                    return Err(SchemaError::Invalid(format!(
                        "field {}.{} is defined more than once",
                        target.name, field.name
                    )));
                }
                target.input_fields.push(convert_input_value(field));
            }
        }
    }

    debug!("Merged extension of {}", name);
    Ok(())
}

fn extend_fields(target: &mut SchemaType, fields: &[Field<'_, String>]) -> Result<(), SchemaError> {
    for field in fields {
        if target.field(&field.name).is_some() {
            return Err(SchemaError::Invalid(format!(
                "field {}.{} is defined more than once",
                target.name, field.name
            )));
        }
        target.fields.push(convert_field(field));
    }
    Ok(())
}

fn validate_references(graph: &TypeGraph) -> Result<(), SchemaError> {
    let check = |owner: &str, ty: &TypeRef| -> Result<(), SchemaError> {
        if graph.is_defined(ty.named()) {
            Ok(())
        } else {
            Err(SchemaError::Invalid(format!(
                "{owner} references undefined type {}",
                ty.named()
            )))
        }
    };

    for ty in graph.types.values() {
        for field in &ty.fields {
            let owner = format!("{}.{}", ty.name, field.name);
            check(&owner, &field.field_type)?;
            for arg in &field.arguments {
                check(&format!("{owner}({})", arg.name), &arg.value_type)?;
            }
        }
        for input in &ty.input_fields {
            check(&format!("{}.{}", ty.name, input.name), &input.value_type)?;
        }
        for member in &ty.possible_types {
            if !graph.get(member).is_some_and(|t| t.kind == SchemaTypeKind::Object) {
                return Err(SchemaError::Invalid(format!(
                    "union {} member {member} is not a defined object type",
                    ty.name
                )));
            }
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use gqlrag_core::OperationKind;
    use std::io::Write;

    const APPLIANCES_SDL: &str = r#"
        "Filter on a single appliance attribute"
        input Filter {
            field: String!
            value: String
        }

        type Appliance {
            id: ID!
            name: String!
            kind: ApplianceKind
        }

        enum ApplianceKind { AIR_CONDITIONER HEATER }

        type Query {
            "List appliances such as air conditioners and heaters"
            appliances(filters: [Filter!]): [Appliance!]
        }
    "#;

    #[test]
    fn test_parse_default_roots() {
        let graph = SchemaReader::parse(APPLIANCES_SDL).unwrap();

        assert_eq!(graph.query_type.as_deref(), Some("Query"));
        assert!(graph.mutation_type.is_none());
        let ops = graph.root_operations(OperationKind::Query);
        assert_eq!(ops.len(), 1);
        assert_eq!(ops[0].name, "appliances");
        assert_eq!(ops[0].field_type.to_string(), "[Appliance!]");
        assert_eq!(ops[0].arguments[0].value_type.to_string(), "[Filter!]");
        assert_eq!(
            ops[0].description.as_deref(),
            Some("List appliances such as air conditioners and heaters")
        );
        assert_eq!(
            graph.get("ApplianceKind").unwrap().enum_values,
            vec!["AIR_CONDITIONER", "HEATER"]
        );
    }

    #[test]
    fn test_parse_schema_definition_roots() {
        let sdl = r"
            schema { query: RootQuery mutation: RootMutation }
            type RootQuery { ping: String }
            type RootMutation { reset(force: Boolean = false): Boolean }
            type Query { ignored: Int }
        ";
        let graph = SchemaReader::parse(sdl).unwrap();

        assert_eq!(graph.query_type.as_deref(), Some("RootQuery"));
        assert_eq!(graph.mutation_type.as_deref(), Some("RootMutation"));
        let reset = &graph.root_operations(OperationKind::Mutation)[0];
        assert_eq!(reset.arguments[0].default_value.as_deref(), Some("false"));
    }

    #[test]
    fn test_parse_merges_extensions() {
        let sdl = r"
            type Query { a: Int }
            extend type Query { b: String }
        ";
        let graph = SchemaReader::parse(sdl).unwrap();
        let names: Vec<_> = graph
            .root_operations(OperationKind::Query)
            .iter()
            .map(|f| f.name.as_str())
            .collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_parse_without_roots() {
        let graph = SchemaReader::parse("type Thing { id: ID }").unwrap();
        assert!(graph.query_type.is_none());
        assert_eq!(graph.operation_count(), 0);
    }

    #[test]
    fn test_parse_error() {
        let err = SchemaReader::parse("type Query {").unwrap_err();
        assert!(matches!(err, SchemaError::Parse(_)));
    }

    #[test]
    fn test_duplicate_type_rejected() {
        let err = SchemaReader::parse("type A { x: Int } type A { y: Int }").unwrap_err();
        assert!(err.to_string().contains("A is defined more than once"));
    }

    #[test]
    fn test_undefined_reference_rejected() {
        let err = SchemaReader::parse("type Query { a: Missing }").unwrap_err();
        assert!(err.to_string().contains("undefined type Missing"));
    }

    #[test]
    fn test_undefined_argument_type_rejected() {
        let err = SchemaReader::parse("type Query { a(f: Missing): Int }").unwrap_err();
        assert!(err.to_string().contains("Query.a(f)"));
    }

    #[test]
    fn test_undefined_schema_root_rejected() {
        let err = SchemaReader::parse("schema { query: Nope } type Query { a: Int }").unwrap_err();
        assert!(err.to_string().contains("root type Nope"));
    }

    #[test]
    fn test_extension_of_undefined_type_rejected() {
        let err = SchemaReader::parse("extend type Query { a: Int }").unwrap_err();
        assert!(err.to_string().contains("undefined type Query"));
    }

    #[test]
    fn test_duplicate_extension_field_rejected() {
        let sdl = "type Query { a: Int } extend type Query { a: Int }";
        assert!(SchemaReader::parse(sdl).is_err());
    }

    #[tokio::test]
    async fn test_read_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(APPLIANCES_SDL.as_bytes()).unwrap();

        let graph = SchemaReader::read_file(file.path()).await.unwrap();
        assert!(graph.get("Appliance").is_some());
    }

    #[tokio::test]
    async fn test_read_missing_file() {
        let err = SchemaReader::read_file(Path::new("/nonexistent/schema.graphql"))
            .await
            .unwrap_err();
        assert!(matches!(err, SchemaError::Io(_)));
    }
}
