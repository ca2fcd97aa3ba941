//! Query assembly: bind every template variable and emit the final document.

use gqlrag_core::{
    AssembledQuery, BindingSource, DslRecord, QueryRequest, RequestError, ValueExtractor,
    VariableSpec,
};
use gqlrag_schema::analyze;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// Fallbacks for variables nothing else supplied a value for.
///
/// Both are off by default, so an unbound variable fails assembly.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BindingPolicy {
    /// Bind `[]` to list-typed variables
    pub default_lists_to_empty: bool,
    /// Bind `null` to nullable variables
    pub default_nullable_to_null: bool,
}

impl BindingPolicy {
    fn fallback(&self, variable: &VariableSpec) -> Option<Value> {
        if self.default_lists_to_empty && variable.is_list() {
            Some(Value::Array(Vec::new()))
        } else if self.default_nullable_to_null && !variable.type_ref.is_non_null() {
            Some(Value::Null)
        } else {
            None
        }
    }
}

/// Binds request values into a record's template.
#[derive(Clone, Default)]
pub struct QueryAssembler {
    extractor: Option<Arc<dyn ValueExtractor>>,
    policy: BindingPolicy,
}

impl QueryAssembler {
    #[must_use]
    pub fn new(policy: BindingPolicy) -> Self {
        Self {
            extractor: None,
            policy,
        }
    }

    #[must_use]
    pub fn with_extractor(mut self, extractor: Arc<dyn ValueExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    #[must_use]
    pub fn policy(&self) -> BindingPolicy {
        self.policy
    }

    /// Bind each declared variable of `record` and emit the query.
    ///
    /// Sources are tried in order: explicit parameter, extractor, template
    /// default, binding policy. An explicit `null` for a non-null variable
    /// does not count as a value.
    pub fn assemble(
        &self,
        request: &QueryRequest,
        record: &DslRecord,
        score: f32,
    ) -> Result<AssembledQuery, RequestError> {
        let info = analyze(&record.query_template)?;

        let mut variables = Map::new();
        let mut sources = BTreeMap::new();

        for variable in &info.variables {
            let Some((value, source)) = self.bind(request, record, variable) else {
                return Err(RequestError::MissingVariable {
                    dsl_name: record.dsl_name.clone(),
                    variable: variable.name.clone(),
                });
            };
            debug!("Bound ${} from {:?}", variable.name, source);
            variables.insert(variable.name.clone(), value);
            sources.insert(variable.name.clone(), source);
        }

        for name in request.params.keys() {
            if info.variable(name).is_none() {
                debug!("Ignoring parameter {} not declared by {}", name, record.dsl_name);
            }
        }

        Ok(AssembledQuery {
            query: record.query_template.clone(),
            variables,
            dsl_name: record.dsl_name.clone(),
            kind: info.kind,
            operation_name: info.operation_name,
            score,
            sources,
            alternatives: Vec::new(),
        })
    }

    fn bind(
        &self,
        request: &QueryRequest,
        record: &DslRecord,
        variable: &VariableSpec,
    ) -> Option<(Value, BindingSource)> {
        let non_null = variable.type_ref.is_non_null();
        let usable = |value: &Value| !(non_null && value.is_null());

        if let Some(value) = request.params.get(&variable.name).filter(|v| usable(*v)) {
            return Some((value.clone(), BindingSource::Explicit));
        }
        if let Some(value) = self
            .extractor
            .as_ref()
            .and_then(|e| e.extract(&request.text, variable, record))
            .filter(|v| usable(v))
        {
            return Some((value, BindingSource::Extracted));
        }
        if let Some(value) = variable.default_value.clone() {
            return Some((value, BindingSource::Default));
        }
        self.policy
            .fallback(variable)
            .map(|value| (value, BindingSource::Policy))
    }
}
