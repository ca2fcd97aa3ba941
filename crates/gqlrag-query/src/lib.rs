//! # gqlrag-query
//!
//! Online half of gqlrag: turn a natural-language request into an executable
//! GraphQL operation.
//!
//! 1. [`RequestParser`] separates request text from inline directives
//! 2. [`Retriever`] ranks DSL records by similarity to the text
//! 3. [`QueryAssembler`] binds the template's variables
//! 4. [`QueryPipeline`] runs the whole request and tracks its state
//! 5. [`GraphqlClient`] optionally sends the result to an endpoint
//!
//! ```rust,ignore
//! let parsed = RequestParser::default().parse("show me all air conditioners limit:3");
//! match pipeline.execute_with_limit(&parsed.request, parsed.limit).await {
//!     Ok(query) => println!("{}", query.to_request_body()),
//!     Err(RequestError::MissingVariable { variable, .. }) => eprintln!("need ${variable}"),
//!     Err(e) => eprintln!("{e}"),
//! }
//! ```

pub mod assembler;
pub mod client;
pub mod extract;
pub mod parser;
pub mod pipeline;
pub mod retriever;

pub use assembler::{BindingPolicy, QueryAssembler};
pub use client::{EndpointConfig, GraphqlClient, GraphqlResponse};
pub use extract::{ChainExtractor, InlineValueExtractor};
pub use parser::{ParsedRequest, RequestParser, parse_value};
pub use pipeline::{QueryPipeline, TracedExecution};
pub use retriever::{RetrievalConfig, Retrieval, Retriever};
