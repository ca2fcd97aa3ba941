//! Request parser.

use gqlrag_core::QueryRequest;
use serde_json::Value;

/// Parsed request with the candidate count.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedRequest {
    /// Text and explicit parameters
    pub request: QueryRequest,
    /// Candidate count
    pub limit: usize,
}

/// Parser for raw request input.
pub struct RequestParser {
    /// Default candidate count
    default_limit: usize,
}

impl RequestParser {
    #[must_use]
    pub fn new(default_limit: usize) -> Self {
        Self { default_limit }
    }

    /// Parse raw input.
    ///
    /// Supports directives like:
    /// - `limit:3` or `k:3`
    /// - `$first=10`, `$filters=[{"field":"kind","value":"ac"}]`, `$name="air conditioner"`
    ///
    /// Everything else is request text.
    #[must_use]
    pub fn parse(&self, input: &str) -> ParsedRequest {
        let mut text_parts = Vec::new();
        let mut request = QueryRequest::default();
        let mut limit = self.default_limit;

        for token in split_tokens(input) {
            if let Some(assignment) = token.strip_prefix('$') {
                if let Some((name, raw)) = assignment.split_once('=') {
                    if !name.is_empty() {
                        request.params.insert(name.to_string(), parse_value(raw));
                        continue;
                    }
                }
            } else if let Some((key, value)) = token.split_once(':') {
                if matches!(key.to_lowercase().as_str(), "limit" | "k") {
                    if let Ok(n) = value.parse() {
                        limit = n;
                        continue;
                    }
                }
            }
            text_parts.push(token);
        }

        request.text = text_parts.join(" ");
        ParsedRequest { request, limit }
    }
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new(5)
    }
}

/// JSON when it parses, otherwise the raw text with surrounding quotes removed.
#[must_use]
pub fn parse_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(unquote(raw).to_string()))
}

pub(crate) fn unquote(raw: &str) -> &str {
    for quote in ['"', '\''] {
        if raw.len() >= 2 && raw.starts_with(quote) && raw.ends_with(quote) {
            return &raw[1..raw.len() - 1];
        }
    }
    raw
}

/// Split on whitespace, keeping quoted runs together.
pub(crate) fn split_tokens(input: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut quote: Option<char> = None;

    for c in input.chars() {
        match quote {
            Some(q) => {
                current.push(c);
                if c == q {
                    quote = None;
                }
            }
            None if c == '"' || c == '\'' => {
                // An apostrophe inside a word is not a quote
                if c == '\'' && !current.is_empty() && !current.ends_with(['=', ':']) {
                    current.push(c);
                } else {
                    quote = Some(c);
                    current.push(c);
                }
            }
            None if c.is_whitespace() => {
                if !current.is_empty() {
                    tokens.push(std::mem::take(&mut current));
                }
            }
            None => current.push(c),
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}
