//! Error types for gqlrag.
//!
//! Build-time failures ([`SchemaError`], [`IndexBuildError`]) abort the offline step they occur in.
//! Request-time failures ([`RequestError`]) are returned to the caller as typed results.

use thiserror::Error;

/// Main error type for gqlrag operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Schema parsing, validation or record shape failed
    #[error("schema error: {0}")]
    Schema(#[from] SchemaError),

    /// DSL registry operation failed
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Embedding generation failed
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbedError),

    /// Index store operation failed
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Index build failed
    #[error("index build error: {0}")]
    IndexBuild(#[from] IndexBuildError),

    /// Request could not be answered
    #[error("request error: {0}")]
    Request(#[from] RequestError),

    /// Sending an assembled query to an endpoint failed
    #[error("execute error: {0}")]
    Execute(#[from] ExecuteError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Configuration error
    #[error("config error: {0}")]
    Config(String),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

/// Schema and record shape errors.
#[derive(Error, Debug)]
pub enum SchemaError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid schema: {0}")]
    Invalid(String),

    #[error("malformed record {name}: {reason}")]
    MalformedRecord { name: String, reason: String },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Two or more operations mapped to the same DSL name.
///
/// Not fatal: the generator resolves it and reports how.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("dsl name collision on {base_name}: {operations:?} resolved to {resolved:?}")]
pub struct GenerationConflict {
    /// The colliding base name
    pub base_name: String,
    /// Operation signatures in resolution order
    pub operations: Vec<String>,
    /// Final names, parallel to `operations`
    pub resolved: Vec<String>,
}

/// DSL registry errors.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error("duplicate dsl name: {0}")]
    Duplicate(String),
}

/// Embedding errors.
#[derive(Error, Debug)]
pub enum EmbedError {
    #[error("model loading failed: {0}")]
    ModelLoad(String),

    #[error("inference failed: {0}")]
    Inference(String),

    #[error("input too long: {tokens} tokens, max {max}")]
    InputTooLong { tokens: usize, max: usize },
}

/// Index store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("store initialization failed: {0}")]
    Init(String),

    #[error("publish failed: {0}")]
    Publish(String),

    #[error("query failed: {0}")]
    Query(String),

    #[error("persist failed: {0}")]
    Persist(String),

    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
}

/// Errors that abort a single index build. The previously published index stays usable.
#[derive(Error, Debug)]
pub enum IndexBuildError {
    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("embedding: {0}")]
    Embedding(#[from] EmbedError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("embedder returned {got} vectors for {expected} records")]
    EmbeddingCountMismatch { expected: usize, got: usize },
}

/// Request-time failures, surfaced to the caller rather than raised.
#[derive(Error, Debug)]
pub enum RequestError {
    /// Nothing in the index scored at or above the minimum score
    #[error("no matching operation (best score {best_score:?}, minimum {min_score})")]
    NoMatch {
        best_score: Option<f32>,
        min_score: f32,
    },

    /// A declared variable could not be bound
    #[error("missing value for variable ${variable} of {dsl_name}")]
    MissingVariable { dsl_name: String, variable: String },

    #[error("embedding: {0}")]
    Embedding(#[from] EmbedError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("registry: {0}")]
    Registry(#[from] RegistryError),

    #[error("template: {0}")]
    Template(#[from] SchemaError),
}

/// Failures while sending an assembled query to a GraphQL endpoint.
#[derive(Error, Debug)]
pub enum ExecuteError {
    #[error("client configuration: {0}")]
    Config(String),

    #[error("http: {0}")]
    Http(String),

    #[error("endpoint returned {status}: {body}")]
    Status { status: u16, body: String },

    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type alias for gqlrag operations.
pub type Result<T> = std::result::Result<T, Error>;
