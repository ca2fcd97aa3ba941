//! Request pipeline: retrieve, bind, emit.
//!
//! Each request walks `Received -> Retrieved -> Bound -> Emitted`, or ends in
//! `Failed` with [`FailureKind::NoMatch`] before retrieval succeeds or
//! [`FailureKind::MissingVariable`] during binding. The pipeline only reads the
//! registry and the index, so requests may run concurrently.

use gqlrag_core::{
    AssembledQuery, Candidate, DslRecord, DslRepository, FailureKind, QueryRequest, RequestError,
    RequestState, SearchResult,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::assembler::QueryAssembler;
use crate::retriever::Retriever;

/// Outcome of a request together with the states it went through.
#[derive(Debug)]
pub struct TracedExecution {
    pub result: Result<AssembledQuery, RequestError>,
    pub states: Vec<RequestState>,
}

/// Turns natural-language requests into executable GraphQL operations.
pub struct QueryPipeline {
    registry: Arc<dyn DslRepository>,
    retriever: Retriever,
    assembler: QueryAssembler,
}

impl QueryPipeline {
    pub fn new(
        registry: Arc<dyn DslRepository>,
        retriever: Retriever,
        assembler: QueryAssembler,
    ) -> Self {
        Self {
            registry,
            retriever,
            assembler,
        }
    }

    #[must_use]
    pub fn retriever(&self) -> &Retriever {
        &self.retriever
    }

    /// Answer a request with the default candidate count.
    pub async fn execute(&self, request: &QueryRequest) -> Result<AssembledQuery, RequestError> {
        self.execute_with_limit(request, self.retriever.config().k)
            .await
    }

    /// Answer a request considering at most `limit` candidates.
    pub async fn execute_with_limit(
        &self,
        request: &QueryRequest,
        limit: usize,
    ) -> Result<AssembledQuery, RequestError> {
        let mut states = Vec::new();
        self.run(request, limit, &mut states).await
    }

    /// Like [`execute`](Self::execute), also returning the visited states.
    pub async fn execute_traced(&self, request: &QueryRequest) -> TracedExecution {
        let mut states = Vec::new();
        let result = self
            .run(request, self.retriever.config().k, &mut states)
            .await;
        TracedExecution { result, states }
    }

    async fn run(
        &self,
        request: &QueryRequest,
        limit: usize,
        states: &mut Vec<RequestState>,
    ) -> Result<AssembledQuery, RequestError> {
        advance(states, RequestState::Received);
        debug!("Request: {:?}", request.text);

        let retrieval = match self.retriever.retrieve(&request.text, limit).await {
            Ok(retrieval) => retrieval,
            Err(e) => return Err(fail(states, FailureKind::Internal, e)),
        };

        let (record, score, rest) = match self.first_live(&retrieval.candidates).await {
            Ok(Some(found)) => found,
            Ok(None) => {
                let err = RequestError::NoMatch {
                    best_score: retrieval.best_score,
                    min_score: self.retriever.config().min_score,
                };
                return Err(fail(states, FailureKind::NoMatch, err));
            }
            Err(e) => return Err(fail(states, FailureKind::Internal, e)),
        };

        advance(
            states,
            RequestState::Retrieved {
                dsl_name: record.dsl_name.clone(),
                score,
            },
        );

        let mut assembled = match self.assembler.assemble(request, &record, score) {
            Ok(assembled) => assembled,
            Err(e @ RequestError::MissingVariable { .. }) => {
                return Err(fail(states, FailureKind::MissingVariable, e));
            }
            Err(e) => return Err(fail(states, FailureKind::Internal, e)),
        };
        advance(states, RequestState::Bound);

        assembled.alternatives = rest
            .iter()
            .filter(|c| c.dsl_name != record.dsl_name)
            .map(|c| Candidate {
                dsl_name: c.dsl_name.clone(),
                score: c.score,
            })
            .collect();
        advance(states, RequestState::Emitted);

        info!(
            "Emitted {} (score {:.3}, {} variables)",
            assembled.dsl_name,
            assembled.score,
            assembled.variables.len()
        );
        Ok(assembled)
    }

    /// The best candidate still present in the registry, with those ranked below it.
    async fn first_live<'a>(
        &self,
        candidates: &'a [SearchResult],
    ) -> Result<Option<(DslRecord, f32, &'a [SearchResult])>, RequestError> {
        for (i, candidate) in candidates.iter().enumerate() {
            match self.registry.get(&candidate.dsl_name).await? {
                Some(record) => return Ok(Some((record, candidate.score, &candidates[i + 1..]))),
                None => warn!(
                    "Index entry {} has no registry record, skipping (index is stale)",
                    candidate.dsl_name
                ),
            }
        }
        Ok(None)
    }
}

fn advance(states: &mut Vec<RequestState>, next: RequestState) {
    debug_assert!(
        states.last().is_none_or(|current| current.can_transition_to(&next)),
        "invalid transition {:?} -> {:?}",
        states.last(),
        next
    );
    states.push(next);
}

fn fail(states: &mut Vec<RequestState>, reason: FailureKind, error: RequestError) -> RequestError {
    debug!("Request failed ({:?}): {}", reason, error);
    advance(states, RequestState::Failed { reason });
    error
}
