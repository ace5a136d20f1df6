// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Plan construction and continuation restore (spec.md §4.5, C5).
//!
//! A fresh query starts here at [`compile`]. Resuming one goes through
//! [`resume`]: the algebra is recompiled from scratch (deterministic
//! given the same query text and store shape), then
//! [`crate::query::operators::restore`] grafts the decoded [`Frame`]'s
//! state onto that fresh tree. Recompiling rather than deserializing
//! operators directly is what keeps a continuation token small and
//! storage-agnostic — it never needs to know how to reconstruct a
//! parsed expression or a compiled join order, only where each operator
//! had gotten to.

use std::sync::Arc;

use crate::algebra::Algebra;
use crate::config::GraphConfig;
use crate::expr::FunctionRegistry;
use crate::query::compiler;
use crate::query::continuation::Frame;
use crate::query::operators::{self, OperatorNode};
use crate::store::StorageAdapter;
use crate::Result;

/// Compiles `algebra` into a fresh physical pipeline.
pub fn compile(
    algebra: &Algebra,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    config: &GraphConfig,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    compiler::compile(algebra, store, as_of, config, registry)
}

/// Recompiles `algebra` and grafts `frame`'s saved state onto it,
/// producing a pipeline ready to continue where the prior quantum left
/// off.
pub fn resume(
    algebra: &Algebra,
    frame: Frame,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    config: &GraphConfig,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    let fresh = compiler::compile(algebra, store, as_of, config, registry)?;
    operators::restore(fresh, frame, store)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::algebra::{Algebra, AlgebraTriple, PredicateOrPath};
    use crate::store::memory::MemoryStore;
    use crate::term::Term;
    use std::task::Poll;

    fn seeded_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.seed(
            compiler::DEFAULT_GRAPH,
            vec![
                (Term::iri("http://a"), Term::iri("http://knows"), Term::iri("http://b")),
                (Term::iri("http://b"), Term::iri("http://knows"), Term::iri("http://c")),
                (Term::iri("http://c"), Term::iri("http://knows"), Term::iri("http://d")),
            ],
        );
        store
    }

    fn select_all_knows() -> Algebra {
        Algebra::SelectQuery {
            reduced: false,
            variables: vec!["?s".to_string(), "?o".to_string()],
            pattern: Box::new(Algebra::bgp(
                vec![AlgebraTriple {
                    subject: Term::variable("?s"),
                    predicate: PredicateOrPath::Predicate(Term::iri("http://knows")),
                    object: Term::variable("?o"),
                }],
                vec![],
            )),
        }
    }

    #[test]
    fn resuming_a_frozen_scan_continues_without_repeating_or_skipping_rows() {
        let store = seeded_store();
        let registry = Arc::new(FunctionRegistry::new());
        let algebra = select_all_knows();
        let mut node = compile(&algebra, &store, None, &GraphConfig::default(), &registry).unwrap();

        let first = loop {
            match node.next(&store).unwrap() {
                Poll::Ready(mu) => break mu,
                Poll::Pending => continue,
            }
        };
        assert!(first.is_some(), "expected at least one row before freezing");

        let frame = node.save();
        let mut resumed = resume(&algebra, frame, &store, None, &GraphConfig::default(), &registry).unwrap();

        let mut rest = Vec::new();
        loop {
            match resumed.next(&store).unwrap() {
                Poll::Ready(Some(mu)) => rest.push(mu),
                Poll::Ready(None) => break,
                Poll::Pending => continue,
            }
        }
        assert_eq!(rest.len(), 2, "resuming must yield exactly the rows not yet delivered");

        let mut seen: Vec<(String, String)> = rest
            .iter()
            .map(|mu| (mu.get("?s").unwrap().as_str().to_string(), mu.get("?o").unwrap().as_str().to_string()))
            .collect();
        seen.sort();
        assert_eq!(
            seen,
            vec![
                ("<http://b>".to_string(), "<http://c>".to_string()),
                ("<http://c>".to_string(), "<http://d>".to_string()),
            ]
        );
    }

    #[test]
    fn resuming_with_a_shape_mismatch_reports_malformed_continuation() {
        let store = seeded_store();
        let registry = Arc::new(FunctionRegistry::new());
        let algebra = select_all_knows();
        let bogus = Frame::Union { left: Box::new(Frame::Empty), right: Box::new(Frame::Empty) };
        let err = resume(&algebra, bogus, &store, None, &GraphConfig::default(), &registry).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::MalformedContinuation);
    }

    #[test]
    fn resuming_a_never_started_pipeline_replays_the_full_result_set() {
        let store = seeded_store();
        let registry = Arc::new(FunctionRegistry::new());
        let algebra = select_all_knows();
        let node = compile(&algebra, &store, None, &GraphConfig::default(), &registry).unwrap();
        let frame = node.save();
        let mut resumed = resume(&algebra, frame, &store, None, &GraphConfig::default(), &registry).unwrap();
        let mut count = 0;
        loop {
            match resumed.next(&store).unwrap() {
                Poll::Ready(Some(_)) => count += 1,
                Poll::Ready(None) => break,
                Poll::Pending => continue,
            }
        }
        assert_eq!(count, 3);
    }
}
