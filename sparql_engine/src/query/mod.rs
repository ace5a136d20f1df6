// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The query engine (spec.md §2): ties the compiler (C3/C4), the
//! operator tree and continuation codec (C2/C5), the scheduler (C6),
//! the update operators (C7), and the session manager (C8) together
//! behind the one entry point a caller actually uses, [`Engine::run`].

pub mod compiler;
pub mod continuation;
pub mod operators;
pub mod path_compiler;
pub mod plan;
pub mod scheduler;
pub mod session;
pub mod update;

use std::sync::Arc;

use crate::algebra::Algebra;
use crate::config::GraphConfig;
use crate::expr::FunctionRegistry;
use crate::query::session::{Continuation, PlanStore, SessionResponse};
use crate::store::StorageAdapter;
use crate::Result;

/// One call into the engine (spec.md §6 "Request"): the algebra to run
/// — already parsed from SPARQL text by the out-of-scope parser named
/// in spec.md §1 — the graph to target when a basic graph pattern names
/// none, and the continuation to resume from, if any.
pub struct Request {
    pub algebra: Algebra,
    pub default_graph_uri: Option<String>,
    pub next: Option<Continuation>,
}

/// One call's outcome (spec.md §6 "Response").
pub struct Response {
    pub bindings: Vec<crate::term::Mapping>,
    pub has_next: bool,
    pub next: Option<Continuation>,
    pub abort_reason: Option<String>,
}

/// The engine's entry point: everything a caller needs to drive C3
/// through C8 for repeated calls against the same graph.
pub struct Engine {
    config: GraphConfig,
    registry: Arc<FunctionRegistry>,
}

impl Engine {
    pub fn new(config: GraphConfig, registry: Arc<FunctionRegistry>) -> Self {
        Engine { config, registry }
    }

    /// Runs `request` for at most one quantum (spec.md §2 "Control
    /// flow"): compiles fresh or rehydrates from `request.next`, drives
    /// the scheduler, then lets the session manager commit/abort and
    /// package the continuation.
    #[tracing::instrument(level = "debug", skip(self, request, store, plans))]
    pub fn run(&self, request: Request, store: &mut dyn StorageAdapter, plans: &dyn PlanStore) -> Result<Response> {
        let algebra = localize_default_graph(request.algebra, request.default_graph_uri.as_deref());

        let plan_id = match &request.next {
            Some(Continuation::PlanId(id)) => Some(id.clone()),
            _ => None,
        };

        let mut root = match request.next {
            None => plan::compile(&algebra, store, None, &self.config, &self.registry)?,
            Some(continuation) => {
                let frame = session::load_frame(&continuation, plans)?;
                plan::resume(&algebra, frame, store, None, &self.config, &self.registry)?
            }
        };

        let quota = std::time::Duration::from_millis(self.config.quota_ms);
        let result = scheduler::run_quantum(&mut root, store, quota, self.config.max_results);
        let SessionResponse { bindings, done, next, abort_reason } =
            session::finish_quantum(result, &self.config, plans, plan_id.as_deref(), store)?;

        Ok(Response { bindings, has_next: !done, next, abort_reason })
    }
}

/// Rewrites every graph-less basic graph pattern in `algebra` to target
/// `default_graph`, if one was given (spec.md §6 "default_graph_uri").
/// Leaves patterns that already name a graph (a SPARQL `GRAPH` or `FROM`
/// clause) untouched.
fn localize_default_graph(algebra: Algebra, default_graph: Option<&str>) -> Algebra {
    let Some(default_graph) = default_graph else {
        return algebra;
    };
    match algebra {
        Algebra::Bgp { triples, graphs } if graphs.is_empty() => Algebra::Bgp { triples, graphs: vec![default_graph.to_string()] },
        Algebra::Bgp { .. } => algebra,
        Algebra::SelectQuery { reduced, variables, pattern } => Algebra::SelectQuery {
            reduced,
            variables,
            pattern: Box::new(localize_default_graph(*pattern, Some(default_graph))),
        },
        Algebra::ConstructQuery { template, pattern } => {
            Algebra::ConstructQuery { template, pattern: Box::new(localize_default_graph(*pattern, Some(default_graph))) }
        }
        Algebra::Union(left, right) => Algebra::Union(
            Box::new(localize_default_graph(*left, Some(default_graph))),
            Box::new(localize_default_graph(*right, Some(default_graph))),
        ),
        Algebra::Join(left, right) => Algebra::Join(
            Box::new(localize_default_graph(*left, Some(default_graph))),
            Box::new(localize_default_graph(*right, Some(default_graph))),
        ),
        Algebra::Filter { expression, pattern } => {
            Algebra::Filter { expression, pattern: Box::new(localize_default_graph(*pattern, Some(default_graph))) }
        }
        Algebra::Extend { variable, expression, pattern } => {
            Algebra::Extend { variable, expression, pattern: Box::new(localize_default_graph(*pattern, Some(default_graph))) }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::{AlgebraTriple, PredicateOrPath};
    use crate::query::session::InMemoryPlanStore;
    use crate::store::memory::MemoryStore;
    use crate::term::Term;

    fn select_all_p() -> Algebra {
        Algebra::SelectQuery {
            reduced: false,
            variables: vec!["?s".to_string(), "?o".to_string()],
            pattern: Box::new(Algebra::bgp(
                vec![AlgebraTriple {
                    subject: Term::variable("?s"),
                    predicate: PredicateOrPath::Predicate(Term::iri("http://p")),
                    object: Term::variable("?o"),
                }],
                vec![],
            )),
        }
    }

    #[test]
    fn a_fresh_request_runs_to_completion_in_one_call_when_the_graph_is_small() {
        let mut store = MemoryStore::new();
        store.seed(
            "default",
            vec![
                (Term::iri("http://a"), Term::iri("http://p"), Term::iri("http://1")),
                (Term::iri("http://b"), Term::iri("http://p"), Term::iri("http://2")),
            ],
        );
        let engine = Engine::new(GraphConfig::default(), Arc::new(FunctionRegistry::new()));
        let plans = InMemoryPlanStore::new();
        let request = Request { algebra: select_all_p(), default_graph_uri: None, next: None };
        let response = engine.run(request, &mut store, &plans).unwrap();
        assert_eq!(response.bindings.len(), 2);
        assert!(!response.has_next);
        assert!(response.next.is_none());
        assert!(response.abort_reason.is_none());
    }

    #[test]
    fn a_result_cap_yields_a_continuation_the_caller_can_resume() {
        let mut store = MemoryStore::new();
        store.seed(
            "default",
            vec![
                (Term::iri("http://a"), Term::iri("http://p"), Term::iri("http://1")),
                (Term::iri("http://b"), Term::iri("http://p"), Term::iri("http://2")),
                (Term::iri("http://c"), Term::iri("http://p"), Term::iri("http://3")),
            ],
        );
        let config = GraphConfig { max_results: 1, ..GraphConfig::default() };
        let engine = Engine::new(config, Arc::new(FunctionRegistry::new()));
        let plans = InMemoryPlanStore::new();

        let first = engine
            .run(Request { algebra: select_all_p(), default_graph_uri: None, next: None }, &mut store, &plans)
            .unwrap();
        assert_eq!(first.bindings.len(), 1);
        assert!(first.has_next);
        let token = first.next.expect("a capped quantum must return a continuation");

        let second = engine
            .run(Request { algebra: select_all_p(), default_graph_uri: None, next: Some(token) }, &mut store, &plans)
            .unwrap();
        assert_eq!(second.bindings.len(), 1);
        assert!(second.has_next);

        let third = engine
            .run(
                Request { algebra: select_all_p(), default_graph_uri: None, next: second.next },
                &mut store,
                &plans,
            )
            .unwrap();
        assert_eq!(third.bindings.len(), 1);
        assert!(!third.has_next);
        assert!(third.next.is_none());
    }

    #[test]
    fn default_graph_uri_localizes_a_graph_less_bgp() {
        let algebra = Algebra::bgp(
            vec![AlgebraTriple {
                subject: Term::variable("?s"),
                predicate: PredicateOrPath::Predicate(Term::iri("http://p")),
                object: Term::variable("?o"),
            }],
            vec![],
        );
        let localized = localize_default_graph(algebra, Some("http://named-graph"));
        match localized {
            Algebra::Bgp { graphs, .. } => assert_eq!(graphs, vec!["http://named-graph".to_string()]),
            _ => panic!("expected a Bgp node"),
        }
    }

    #[test]
    fn a_stateful_engine_resumes_through_a_plan_id() {
        let mut store = MemoryStore::new();
        store.seed(
            "default",
            vec![
                (Term::iri("http://a"), Term::iri("http://p"), Term::iri("http://1")),
                (Term::iri("http://b"), Term::iri("http://p"), Term::iri("http://2")),
            ],
        );
        let config = GraphConfig { max_results: 1, stateless: false, ..GraphConfig::default() };
        let engine = Engine::new(config, Arc::new(FunctionRegistry::new()));
        let plans = InMemoryPlanStore::new();

        let first = engine
            .run(Request { algebra: select_all_p(), default_graph_uri: None, next: None }, &mut store, &plans)
            .unwrap();
        assert!(matches!(first.next, Some(Continuation::PlanId(_))));

        let second = engine
            .run(
                Request { algebra: select_all_p(), default_graph_uri: None, next: first.next },
                &mut store,
                &plans,
            )
            .unwrap();
        assert_eq!(second.bindings.len(), 1);
        assert!(!second.has_next);
    }
}
