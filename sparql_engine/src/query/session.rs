// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The session/state manager (spec.md §4.8, C8): turns one
//! [`QuantumResult`] into the continuation the caller actually sees,
//! in either of the two modes spec.md §6's configuration table allows —
//! stateless (the frame's encoded bytes, handed back directly) or
//! stateful (an opaque plan ID, with the bytes held server-side) — and
//! commits or aborts the backend transaction for the quantum
//! accordingly.

use std::collections::HashMap;
use std::sync::Mutex;

use uuid::Uuid;

use crate::config::GraphConfig;
use crate::query::continuation::Frame;
use crate::query::scheduler::QuantumResult;
use crate::store::StorageAdapter;
use crate::term::Mapping;
use crate::{ErrorKind, Result};

/// The continuation a caller sees between HTTP turns (spec.md §6
/// "Response `{ bindings, hasNext, next: opaque_or_null }`").
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Continuation {
    Bytes(Vec<u8>),
    PlanId(String),
}

/// Server-side storage for stateful continuations, keyed by an opaque
/// plan ID (spec.md §5: "stateful-plan store process-wide, CAS-safe, at
/// most one writer per ID at a time").
pub trait PlanStore: Send + Sync {
    fn put(&self, id: &str, bytes: Vec<u8>);
    fn get(&self, id: &str) -> Option<Vec<u8>>;
    fn delete(&self, id: &str);
}

/// An in-process [`PlanStore`], the way [`crate::store::memory::MemoryStore`]
/// stands in for a real triple backend in this crate's own tests.
#[derive(Default)]
pub struct InMemoryPlanStore {
    plans: Mutex<HashMap<String, Vec<u8>>>,
}

impl InMemoryPlanStore {
    pub fn new() -> Self {
        InMemoryPlanStore::default()
    }
}

impl PlanStore for InMemoryPlanStore {
    fn put(&self, id: &str, bytes: Vec<u8>) {
        self.plans.lock().expect("plan store mutex poisoned").insert(id.to_string(), bytes);
    }

    fn get(&self, id: &str) -> Option<Vec<u8>> {
        self.plans.lock().expect("plan store mutex poisoned").get(id).cloned()
    }

    fn delete(&self, id: &str) {
        self.plans.lock().expect("plan store mutex poisoned").remove(id);
    }
}

/// What the caller gets back after a quantum: the bindings produced,
/// whether the query is fully done, the continuation to hand back next
/// (`None` once done or aborted), and the abort reason if the quantum
/// failed (spec.md §7).
#[derive(Debug)]
pub struct SessionResponse {
    pub bindings: Vec<Mapping>,
    pub done: bool,
    pub next: Option<Continuation>,
    pub abort_reason: Option<String>,
}

/// Decodes the frame a caller's continuation refers to, resolving a
/// stateful plan ID against `plans` first (spec.md §4.8).
pub fn load_frame(continuation: &Continuation, plans: &dyn PlanStore) -> Result<Frame> {
    match continuation {
        Continuation::Bytes(bytes) => Frame::decode(bytes),
        Continuation::PlanId(id) => {
            let bytes = plans.get(id).ok_or_else(|| ErrorKind::UnknownPlanId.with_message(id.clone()))?;
            Frame::decode(&bytes)
        }
    }
}

/// Finishes one quantum: commits or aborts `store`'s transaction
/// depending on `result.abort_reason`, then packages whatever's left to
/// resume as a [`Continuation`] per `config.stateless`.
///
/// `plan_id` is the stateful plan ID the caller resumed from, if any —
/// reused rather than re-minted so a single logical session keeps one
/// ID across quanta, and deleted once the query is done or aborted.
#[tracing::instrument(level = "debug", skip(result, plans, store), fields(stateless = config.stateless, plan_id))]
pub fn finish_quantum(
    result: QuantumResult,
    config: &GraphConfig,
    plans: &dyn PlanStore,
    plan_id: Option<&str>,
    store: &mut dyn StorageAdapter,
) -> Result<SessionResponse> {
    let QuantumResult { bindings, next, done, abort_reason } = result;

    if let Some(reason) = abort_reason {
        store.abort()?;
        if let Some(id) = plan_id {
            plans.delete(id);
        }
        tracing::warn!(%reason, "quantum aborted, backend transaction rolled back");
        return Ok(SessionResponse { bindings, done: false, next: None, abort_reason: Some(reason) });
    }

    store.commit()?;

    if done {
        if let Some(id) = plan_id {
            plans.delete(id);
        }
        tracing::trace!("query done, backend transaction committed");
        return Ok(SessionResponse { bindings, done: true, next: None, abort_reason: None });
    }

    let frame = next.expect("an unfinished, unaborted quantum always carries a continuation frame");
    let encoded = frame.encode()?;
    let continuation = if config.stateless {
        Continuation::Bytes(encoded)
    } else {
        let id = plan_id.map(str::to_string).unwrap_or_else(|| Uuid::new_v4().to_string());
        plans.put(&id, encoded);
        Continuation::PlanId(id)
    };
    Ok(SessionResponse { bindings, done: false, next: Some(continuation), abort_reason: None })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::term::Term;

    fn pending(bindings: usize) -> QuantumResult {
        QuantumResult {
            bindings: (0..bindings).map(|_| Mapping::new()).collect(),
            next: Some(Frame::Empty),
            done: false,
            abort_reason: None,
        }
    }

    #[test]
    fn stateless_quantum_returns_bytes_directly() {
        let config = GraphConfig { stateless: true, ..GraphConfig::default() };
        let plans = InMemoryPlanStore::new();
        let mut store = MemoryStore::new();
        let response = finish_quantum(pending(2), &config, &plans, None, &mut store).unwrap();
        assert_eq!(response.bindings.len(), 2);
        assert!(!response.done);
        assert!(matches!(response.next, Some(Continuation::Bytes(_))));
    }

    #[test]
    fn stateful_quantum_issues_and_persists_a_plan_id() {
        let config = GraphConfig { stateless: false, ..GraphConfig::default() };
        let plans = InMemoryPlanStore::new();
        let mut store = MemoryStore::new();
        let response = finish_quantum(pending(1), &config, &plans, None, &mut store).unwrap();
        let Some(Continuation::PlanId(id)) = response.next else {
            panic!("expected a stateful plan id");
        };
        assert!(plans.get(&id).is_some(), "the frame must be persisted under the issued id");
    }

    #[test]
    fn resuming_a_stateful_plan_reuses_the_same_id() {
        let config = GraphConfig { stateless: false, ..GraphConfig::default() };
        let plans = InMemoryPlanStore::new();
        let mut store = MemoryStore::new();
        let first = finish_quantum(pending(1), &config, &plans, None, &mut store).unwrap();
        let Some(Continuation::PlanId(id)) = first.next else {
            panic!("expected a stateful plan id");
        };

        let second = finish_quantum(pending(1), &config, &plans, Some(&id), &mut store).unwrap();
        let Some(Continuation::PlanId(second_id)) = second.next else {
            panic!("expected a stateful plan id");
        };
        assert_eq!(id, second_id, "a resumed session keeps its plan id across quanta");
    }

    #[test]
    fn a_done_quantum_deletes_the_stored_plan() {
        let config = GraphConfig { stateless: false, ..GraphConfig::default() };
        let plans = InMemoryPlanStore::new();
        plans.put("existing-plan", Frame::Empty.encode().unwrap());
        let mut store = MemoryStore::new();
        let result = QuantumResult { bindings: vec![], next: None, done: true, abort_reason: None };
        let response = finish_quantum(result, &config, &plans, Some("existing-plan"), &mut store).unwrap();
        assert!(response.done);
        assert!(response.next.is_none());
        assert!(plans.get("existing-plan").is_none());
    }

    #[test]
    fn an_abort_rolls_back_and_returns_no_continuation() {
        let config = GraphConfig::default();
        let plans = InMemoryPlanStore::new();
        let mut store = MemoryStore::new();
        store.insert(&(Term::iri("http://a"), Term::iri("http://p"), Term::iri("http://b"), Term::iri_raw("default"))).unwrap();

        let result = QuantumResult { bindings: vec![], next: None, done: false, abort_reason: Some("storage:connection reset".to_string()) };
        let response = finish_quantum(result, &config, &plans, None, &mut store).unwrap();
        assert_eq!(response.abort_reason.as_deref(), Some("storage:connection reset"));
        assert!(response.next.is_none());

        store.commit().unwrap();
        assert!(!store.has_graph("default"), "the aborted insert must not have been committed");
    }

    #[test]
    fn load_frame_resolves_a_stateful_plan_id() {
        let plans = InMemoryPlanStore::new();
        plans.put("plan-1", Frame::Empty.encode().unwrap());
        let frame = load_frame(&Continuation::PlanId("plan-1".to_string()), &plans).unwrap();
        assert_eq!(frame, Frame::Empty);
    }

    #[test]
    fn load_frame_rejects_an_unknown_plan_id() {
        let plans = InMemoryPlanStore::new();
        let err = load_frame(&Continuation::PlanId("missing".to_string()), &plans).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnknownPlanId);
    }
}
