// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The preemptive scheduler (spec.md §4.6, C6): drives a compiled
//! pipeline for at most one quantum, turning a potentially unbounded
//! query into bounded server-side work per call.
//!
//! One [`Scheduler::run_quantum`] call is one HTTP "turn": it pulls
//! mappings from the root operator until the root is exhausted, the
//! quantum elapses, or the result cap is hit, then freezes whatever's
//! left into a [`Frame`] the caller can hand back on resume.

use std::task::Poll;
use std::time::{Duration, Instant};

use crate::query::continuation::Frame;
use crate::query::operators::OperatorNode;
use crate::store::StorageAdapter;
use crate::term::Mapping;

/// One quantum's output (spec.md §4.6): the bindings produced, the
/// continuation to resume from (`None` once the query is done or has
/// aborted), whether the root is fully exhausted, and the abort reason
/// if a storage error or a control-tuples overflow cut the quantum
/// short (spec.md §7).
#[derive(Debug)]
pub struct QuantumResult {
    pub bindings: Vec<Mapping>,
    pub next: Option<Frame>,
    pub done: bool,
    pub abort_reason: Option<String>,
}

impl QuantumResult {
    fn done(bindings: Vec<Mapping>) -> Self {
        QuantumResult { bindings, next: None, done: true, abort_reason: None }
    }

    fn suspended(bindings: Vec<Mapping>, next: Frame) -> Self {
        QuantumResult { bindings, next: Some(next), done: false, abort_reason: None }
    }

    fn aborted(bindings: Vec<Mapping>, reason: String) -> Self {
        QuantumResult { bindings, next: None, done: false, abort_reason: Some(reason) }
    }
}

/// Runs `root` for at most `quota` wall-clock time, or until `max_results`
/// bindings have been collected, or until the root is exhausted.
///
/// Elapsed time is only checked between `root.next()` calls: each
/// operator is responsible for yielding [`Poll::Pending`] internally
/// (spec.md §5 "Suspension points") rather than looping unboundedly
/// within a single `next()`.
#[tracing::instrument(level = "debug", skip(root, store), fields(quota_ms = quota.as_millis() as u64, max_results))]
pub fn run_quantum(root: &mut OperatorNode, store: &dyn StorageAdapter, quota: Duration, max_results: usize) -> QuantumResult {
    let start = Instant::now();
    let mut bindings = Vec::new();

    loop {
        if !root.has_next() {
            tracing::trace!(count = bindings.len(), "root exhausted");
            return QuantumResult::done(bindings);
        }

        // Checked before pulling, not after: a zero-length quota must
        // suspend having produced nothing at all (spec.md §8 "Quantum =
        // 0"), not make one tuple of forward progress first.
        if start.elapsed() >= quota || bindings.len() >= max_results {
            let frame = root.save();
            tracing::trace!(count = bindings.len(), "quantum exhausted, freezing pipeline");
            return QuantumResult::suspended(bindings, frame);
        }

        match root.next(store) {
            Ok(Poll::Ready(Some(mu))) => bindings.push(mu),
            Ok(Poll::Ready(None)) => {
                tracing::trace!(count = bindings.len(), "root reported done mid-quantum");
                return QuantumResult::done(bindings);
            }
            Ok(Poll::Pending) => {
                // The operator did internal work and yielded; no mapping
                // this call, but the quantum clock still governs whether
                // we keep pulling.
            }
            Err(e) => {
                let reason = e.abort_reason();
                tracing::warn!(%reason, count = bindings.len(), "quantum aborted");
                return QuantumResult::aborted(bindings, reason);
            }
        }
    }
}
