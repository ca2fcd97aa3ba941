//! Core types for gqlrag.
//!
//! ## Schema
//! - [`TypeGraph`]: parsed schema, all named types plus the root operation types
//! - [`SchemaType`], [`FieldDef`], [`ArgumentDef`], [`TypeRef`]
//!
//! ## DSL records
//! - [`DslRecord`]: one generated GraphQL operation template, the unit of the registry
//! - [`OperationKind`]: query or mutation
//! - [`VariableSpec`]: a template variable with its GraphQL type
//!
//! ## Retrieval index
//! - [`IndexEntry`], [`IndexManifest`]: what a build publishes
//! - [`SearchQuery`], [`SearchResult`], [`DistanceMetric`], [`StoreStats`]
//!
//! ## Requests
//! - [`QueryRequest`]: natural-language input plus explicit parameters
//! - [`AssembledQuery`]: the emitted query and its bound variables
//! - [`RequestState`]: lifecycle of a single request

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use uuid::Uuid;

use crate::error::SchemaError;

/// Scalars every GraphQL schema provides without declaring them.
pub const BUILTIN_SCALARS: [&str; 5] = ["Int", "Float", "String", "Boolean", "ID"];

// ============================================================================
// Schema
// ============================================================================

/// Reference to a GraphQL type, with list and non-null wrappers.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TypeRef {
    Named(String),
    List(Box<TypeRef>),
    NonNull(Box<TypeRef>),
}

impl TypeRef {
    /// Shorthand for a named type.
    pub fn named_type(name: impl Into<String>) -> Self {
        Self::Named(name.into())
    }

    /// Wrap in a list.
    #[must_use]
    pub fn list_of(inner: TypeRef) -> Self {
        Self::List(Box::new(inner))
    }

    /// Wrap in non-null.
    #[must_use]
    pub fn non_null(inner: TypeRef) -> Self {
        Self::NonNull(Box::new(inner))
    }

    /// Innermost named type.
    #[must_use]
    pub fn named(&self) -> &str {
        match self {
            Self::Named(name) => name,
            Self::List(inner) | Self::NonNull(inner) => inner.named(),
        }
    }

    /// Whether the outermost wrapper is non-null.
    #[must_use]
    pub fn is_non_null(&self) -> bool {
        matches!(self, Self::NonNull(_))
    }

    /// Whether values of this type are lists.
    #[must_use]
    pub fn is_list(&self) -> bool {
        match self {
            Self::List(_) => true,
            Self::NonNull(inner) => inner.is_list(),
            Self::Named(_) => false,
        }
    }

    /// The type with any outer non-null wrapper removed.
    #[must_use]
    pub fn nullable(&self) -> &TypeRef {
        match self {
            Self::NonNull(inner) => inner,
            other => other,
        }
    }

    /// Item type if this is a list.
    #[must_use]
    pub fn list_item(&self) -> Option<&TypeRef> {
        match self.nullable() {
            Self::List(inner) => Some(inner),
            _ => None,
        }
    }
}

impl fmt::Display for TypeRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Named(name) => write!(f, "{name}"),
            Self::List(inner) => write!(f, "[{inner}]"),
            Self::NonNull(inner) => write!(f, "{inner}!"),
        }
    }
}

/// Kind of a named schema type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaTypeKind {
    Object,
    Interface,
    Union,
    Enum,
    Input,
    Scalar,
}

impl SchemaTypeKind {
    /// Object, interface or union: selections are required.
    #[must_use]
    pub fn is_composite(self) -> bool {
        matches!(self, Self::Object | Self::Interface | Self::Union)
    }

    /// Scalar or enum: selections are not allowed.
    #[must_use]
    pub fn is_leaf(self) -> bool {
        matches!(self, Self::Scalar | Self::Enum)
    }
}

/// An argument or input-object field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgumentDef {
    pub name: String,
    pub description: Option<String>,
    pub value_type: TypeRef,
    /// Default value as SDL literal text
    pub default_value: Option<String>,
}

impl ArgumentDef {
    /// Required: non-null and without a default.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.value_type.is_non_null() && self.default_value.is_none()
    }
}

/// A field of an object or interface type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDef {
    pub name: String,
    pub description: Option<String>,
    pub arguments: Vec<ArgumentDef>,
    pub field_type: TypeRef,
}

/// A named type in the schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SchemaType {
    pub name: String,
    pub kind: SchemaTypeKind,
    pub description: Option<String>,
    /// Fields of objects and interfaces
    pub fields: Vec<FieldDef>,
    /// Fields of input objects
    pub input_fields: Vec<ArgumentDef>,
    /// Values of enums
    pub enum_values: Vec<String>,
    /// Members of unions
    pub possible_types: Vec<String>,
}

impl SchemaType {
    /// An empty type of the given kind.
    pub fn new(name: impl Into<String>, kind: SchemaTypeKind) -> Self {
        Self {
            name: name.into(),
            kind,
            description: None,
            fields: Vec::new(),
            input_fields: Vec::new(),
            enum_values: Vec::new(),
            possible_types: Vec::new(),
        }
    }

    /// Look up an output field by name.
    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }
}

/// Parsed schema: named types plus root operation types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeGraph {
    /// All declared types by name
    pub types: BTreeMap<String, SchemaType>,
    /// Name of the query root type
    pub query_type: Option<String>,
    /// Name of the mutation root type
    pub mutation_type: Option<String>,
}

impl TypeGraph {
    /// Look up a declared type.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&SchemaType> {
        self.types.get(name)
    }

    /// Whether a name resolves to a declared or built-in type.
    #[must_use]
    pub fn is_defined(&self, name: &str) -> bool {
        is_builtin_scalar(name) || self.types.contains_key(name)
    }

    /// Whether a name resolves to a scalar or enum.
    #[must_use]
    pub fn is_leaf(&self, name: &str) -> bool {
        is_builtin_scalar(name) || self.get(name).is_some_and(|t| t.kind.is_leaf())
    }

    /// Whether a name resolves to an object, interface or union.
    #[must_use]
    pub fn is_composite(&self, name: &str) -> bool {
        self.get(name).is_some_and(|t| t.kind.is_composite())
    }

    /// Name of the root type for an operation kind.
    #[must_use]
    pub fn root_name(&self, kind: OperationKind) -> Option<&str> {
        match kind {
            OperationKind::Query => self.query_type.as_deref(),
            OperationKind::Mutation => self.mutation_type.as_deref(),
        }
    }

    /// Root fields for an operation kind, in declaration order.
    #[must_use]
    pub fn root_operations(&self, kind: OperationKind) -> &[FieldDef] {
        self.root_name(kind)
            .and_then(|name| self.get(name))
            .map_or(&[], |t| t.fields.as_slice())
    }

    /// Total number of root operations.
    #[must_use]
    pub fn operation_count(&self) -> usize {
        OperationKind::ALL
            .iter()
            .map(|kind| self.root_operations(*kind).len())
            .sum()
    }
}

/// Whether `name` is one of the built-in scalars.
#[must_use]
pub fn is_builtin_scalar(name: &str) -> bool {
    BUILTIN_SCALARS.contains(&name)
}

// ============================================================================
// DSL records
// ============================================================================

/// Root operation kind of a DSL record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationKind {
    Query,
    Mutation,
}

impl OperationKind {
    /// Both kinds, in generation order.
    pub const ALL: [OperationKind; 2] = [OperationKind::Query, OperationKind::Mutation];

    /// Lower-case keyword, also the DSL name prefix.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Query => "query",
            Self::Mutation => "mutation",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One generated operation template. Serialized as one YAML file in the registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DslRecord {
    /// Unique name, also the file stem
    pub dsl_name: String,
    /// Operation kind
    #[serde(rename = "type")]
    pub kind: OperationKind,
    /// Natural-language description used for retrieval
    pub description: String,
    /// GraphQL document with `$name` placeholders
    pub query_template: String,
    /// Placeholder names, in declaration order
    pub variables: Vec<String>,
    /// Non-built-in types the operation touches
    pub related_types: Vec<String>,
    /// Innermost named return type
    pub return_type: String,
    /// Extra retrieval terms
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub keywords: Vec<String>,
    /// Field maps of related types: type name -> field name -> type
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub type_definitions: BTreeMap<String, BTreeMap<String, String>>,
}

impl DslRecord {
    /// `$name` tokens appearing in the template.
    #[must_use]
    pub fn placeholders(&self) -> BTreeSet<String> {
        placeholders(&self.query_template)
    }

    /// Check required fields and the placeholder/variable invariant.
    pub fn validate(&self) -> Result<(), SchemaError> {
        let malformed = |reason: String| SchemaError::MalformedRecord {
            name: self.dsl_name.clone(),
            reason,
        };

        if !is_identifier(&self.dsl_name) {
            return Err(malformed(format!(
                "dsl_name {:?} is not a valid identifier",
                self.dsl_name
            )));
        }
        if self.query_template.trim().is_empty() {
            return Err(malformed("query_template is empty".to_string()));
        }
        if self.return_type.trim().is_empty() {
            return Err(malformed("return_type is empty".to_string()));
        }

        let mut declared = BTreeSet::new();
        for variable in &self.variables {
            if !is_identifier(variable) {
                return Err(malformed(format!("variable {variable:?} is not a valid name")));
            }
            if !declared.insert(variable.clone()) {
                return Err(malformed(format!("variable {variable} listed twice")));
            }
        }

        let used = self.placeholders();
        if let Some(missing) = used.difference(&declared).next() {
            return Err(malformed(format!(
                "placeholder ${missing} is not listed in variables"
            )));
        }
        if let Some(unused) = declared.difference(&used).next() {
            return Err(malformed(format!(
                "variable {unused} does not appear in query_template"
            )));
        }

        Ok(())
    }

    /// Text embedded for retrieval.
    #[must_use]
    pub fn source_text(&self) -> String {
        let mut text = format!(
            "DSL `{}` ({}): {}\nQuery:\n{}",
            self.dsl_name, self.kind, self.description, self.query_template
        );
        if !self.keywords.is_empty() {
            text.push_str("\nKeywords: ");
            text.push_str(&self.keywords.join(", "));
        }
        text.push_str("\nTerms: ");
        text.push_str(&identifier_words(&self.dsl_name).join(" "));
        text
    }
}

/// A template variable and its declared type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,
    pub type_ref: TypeRef,
    pub default_value: Option<Value>,
}

impl VariableSpec {
    /// A value must be supplied: non-null without a default.
    #[must_use]
    pub fn is_required(&self) -> bool {
        self.type_ref.is_non_null() && self.default_value.is_none()
    }

    #[must_use]
    pub fn is_list(&self) -> bool {
        self.type_ref.is_list()
    }
}

/// Collect `$name` placeholders from a GraphQL document.
///
/// String literals, block strings and comments are skipped, so a `$` inside
/// them is not a placeholder.
#[must_use]
pub fn placeholders(template: &str) -> BTreeSet<String> {
    let bytes = template.as_bytes();
    let len = bytes.len();
    let mut found = BTreeSet::new();
    let mut i = 0;

    while i < len {
        match bytes[i] {
            b'#' => {
                while i < len && bytes[i] != b'\n' && bytes[i] != b'\r' {
                    i += 1;
                }
            }
            b'"' if bytes[i..].starts_with(b"\"\"\"") => {
                i += 3;
                while i < len {
                    if bytes[i..].starts_with(b"\\\"\"\"") {
                        i += 4;
                    } else if bytes[i..].starts_with(b"\"\"\"") {
                        i += 3;
                        break;
                    } else {
                        i += 1;
                    }
                }
            }
            b'"' => {
                i += 1;
                while i < len {
                    match bytes[i] {
                        b'\\' => i += 2,
                        b'"' => {
                            i += 1;
                            break;
                        }
                        b'\n' | b'\r' => break,
                        _ => i += 1,
                    }
                }
            }
            b'$' => {
                let start = i + 1;
                let mut end = start;
                while end < len && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_') {
                    end += 1;
                }
                let name = &template[start..end];
                if is_identifier(name) {
                    found.insert(name.to_string());
                }
                i = end;
            }
            _ => i += 1,
        }
    }

    found
}

/// GraphQL name rule: `[_A-Za-z][_0-9A-Za-z]*`.
#[must_use]
pub fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Split `camelCase`, `PascalCase` and `snake_case` identifiers into lower-case words.
#[must_use]
pub fn identifier_words(name: &str) -> Vec<String> {
    let mut words = Vec::new();
    let mut current = String::new();
    let mut prev: Option<char> = None;

    for c in name.chars() {
        if !c.is_ascii_alphanumeric() {
            if !current.is_empty() {
                words.push(std::mem::take(&mut current));
            }
            prev = None;
            continue;
        }
        let boundary = match prev {
            Some(p) => {
                (c.is_ascii_uppercase() && (p.is_ascii_lowercase() || p.is_ascii_digit()))
                    || (c.is_ascii_digit() && p.is_ascii_alphabetic())
            }
            None => false,
        };
        if boundary && !current.is_empty() {
            words.push(std::mem::take(&mut current));
        }
        current.push(c.to_ascii_lowercase());
        prev = Some(c);
    }
    if !current.is_empty() {
        words.push(current);
    }

    words
}

// ============================================================================
// Embedding
// ============================================================================

/// Configuration for embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// Normalize embeddings to unit length
    pub normalize: bool,
    /// Instruction prefix for models that support it
    pub instruction: Option<String>,
    /// Batch size for processing
    pub batch_size: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            normalize: true,
            instruction: None,
            batch_size: 32,
        }
    }
}

/// Output from embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingOutput {
    /// The embedding vector
    pub embedding: Vec<f32>,
    /// Number of tokens in input
    pub token_count: usize,
}

// ============================================================================
// Retrieval index
// ============================================================================

/// One embedded DSL record. Refers to the registry by name only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub dsl_name: String,
    pub embedding: Vec<f32>,
    pub source_text: String,
}

/// Describes one published index build.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexManifest {
    pub build_id: Uuid,
    pub built_at: DateTime<Utc>,
    pub model: String,
    pub dimension: usize,
    pub entry_count: usize,
}

impl IndexManifest {
    /// Manifest for a fresh build.
    pub fn new(model: impl Into<String>, dimension: usize, entry_count: usize) -> Self {
        Self {
            build_id: Uuid::new_v4(),
            built_at: Utc::now(),
            model: model.into(),
            dimension,
            entry_count,
        }
    }
}

/// A search over the index.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Query embedding
    pub embedding: Vec<f32>,
    /// Maximum results to return
    pub limit: usize,
    /// Drop results scoring below this
    pub min_score: Option<f32>,
    /// Distance metric
    pub metric: DistanceMetric,
}

/// Distance metric for vector search. Scores are higher-is-better for every metric.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DistanceMetric {
    #[default]
    Cosine,
    L2,
    Dot,
}

/// A search hit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchResult {
    pub dsl_name: String,
    pub score: f32,
    pub source_text: String,
}

/// Index store statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoreStats {
    /// Entries in the published index
    pub total_entries: u64,
    /// Embedding dimension of the published index
    pub dimension: Option<usize>,
    /// Build that produced the published index
    pub build_id: Option<Uuid>,
    /// When the published index was built
    pub last_updated: Option<DateTime<Utc>>,
    /// On-disk size in bytes
    pub index_size_bytes: u64,
}

/// Index build statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    /// Completed builds
    pub builds: u64,
    /// Failed builds
    pub failed_builds: u64,
    /// Records in the last completed build
    pub indexed_records: u64,
    /// Last completed build time
    pub last_build: Option<DateTime<Utc>>,
}

// ============================================================================
// Requests
// ============================================================================

/// Natural-language request with optional explicit variable values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueryRequest {
    pub text: String,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl QueryRequest {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            params: BTreeMap::new(),
        }
    }

    /// Add an explicit value.
    #[must_use]
    pub fn with_param(mut self, name: impl Into<String>, value: Value) -> Self {
        self.params.insert(name.into(), value);
        self
    }
}

/// Where a bound variable's value came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BindingSource {
    Explicit,
    Extracted,
    Default,
    Policy,
}

/// A retrieval candidate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub dsl_name: String,
    pub score: f32,
}

/// Final output of a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssembledQuery {
    /// GraphQL document
    pub query: String,
    /// Values for every placeholder in `query`
    pub variables: Map<String, Value>,
    /// Record the query was assembled from
    pub dsl_name: String,
    pub kind: OperationKind,
    pub operation_name: Option<String>,
    /// Retrieval score of the record
    pub score: f32,
    /// Provenance per variable
    pub sources: BTreeMap<String, BindingSource>,
    /// Lower-ranked candidates
    #[serde(default)]
    pub alternatives: Vec<Candidate>,
}

impl AssembledQuery {
    /// GraphQL-over-HTTP request body.
    #[must_use]
    pub fn to_request_body(&self) -> Value {
        serde_json::json!({
            "query": self.query,
            "variables": Value::Object(self.variables.clone()),
            "operationName": self.operation_name,
        })
    }
}

/// Why a request ended in [`RequestState::Failed`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    NoMatch,
    MissingVariable,
    Internal,
}

/// Lifecycle of one request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RequestState {
    Received,
    Retrieved { dsl_name: String, score: f32 },
    Bound,
    Emitted,
    Failed { reason: FailureKind },
}

impl RequestState {
    /// Whether `next` may follow `self`.
    #[must_use]
    pub fn can_transition_to(&self, next: &RequestState) -> bool {
        use RequestState::{Bound, Emitted, Failed, Received, Retrieved};

        match (self, next) {
            (Received, Retrieved { .. }) => true,
            (
                Received,
                Failed {
                    reason: FailureKind::NoMatch | FailureKind::Internal,
                },
            ) => true,
            (Retrieved { .. }, Bound) => true,
            (
                Retrieved { .. },
                Failed {
                    reason: FailureKind::MissingVariable | FailureKind::Internal,
                },
            ) => true,
            (Bound, Emitted) => true,
            _ => false,
        }
    }

    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Emitted | Self::Failed { .. })
    }
}
