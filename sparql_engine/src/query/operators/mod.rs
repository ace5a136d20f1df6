// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The physical operator tree (spec.md §4.2, C2).
//!
//! `OperatorNode` is an enum-dispatch tree rather than a collection of
//! `Box<dyn Trait>` objects: this is a closed set of operators known
//! entirely inside this crate, so the indirection and
//! optimizer-opacity of a trait object buys nothing.
//!
//! Every variant implements the same five-operation contract as the
//! original preemptable-iterator design: `has_next` (cheap, synchronous
//! peek of already-known state), `next_stage` (reparameterize from a
//! new outer binding, used by joins), `next` (pull one result, doing a
//! bounded amount of internal work and returning
//! [`std::task::Poll::Pending`] rather than looping unboundedly when
//! more work remains), `save` (freeze to a [`Frame`]), and
//! `serialized_name`. `next` and `next_stage` return `Result` because
//! a storage failure or a control-tuples buffer overflow must abort
//! the quantum (spec.md §7), not vanish as an empty result.

mod closure;
mod construct;
mod expr_ops;
mod join;
mod scan;
mod set_ops;

pub use closure::{PathCollectorOperator, ReflexiveClosureOperator, TransitiveClosureOperator, STEP_VAR};
pub use construct::ConstructOperator;
pub use expr_ops::{BindOperator, FilterOperator};
pub use join::IndexJoinOperator;
pub use scan::ScanOperator;
pub use set_ops::{BagUnionOperator, ProjectionOperator, ReducedOperator};

use std::task::Poll;

use crate::query::continuation::Frame;
use crate::store::StorageAdapter;
use crate::term::Mapping;
use crate::{ErrorKind, Result};

/// A yield budget shared by operators that may otherwise loop for an
/// unbounded number of input tuples before producing output (index
/// joins skipping non-matching outer tuples, filters dropping a long
/// run of failing mappings, binds evaluating over many inputs).
///
/// Mirrors the original's `PreemptiveLoop`, which ticks the async
/// executor once every ~50 iterations; here, hitting the budget just
/// means `next` returns `Poll::Pending` so the scheduler can check the
/// quantum deadline before calling back in.
pub(crate) struct YieldBudget {
    remaining: u32,
}

impl YieldBudget {
    const INTERVAL: u32 = 50;

    pub fn new() -> Self {
        YieldBudget { remaining: Self::INTERVAL }
    }

    /// Returns `true` if the budget is exhausted (caller should return
    /// `Poll::Pending`), otherwise decrements it and returns `false`.
    pub fn tick(&mut self) -> bool {
        if self.remaining == 0 {
            self.remaining = Self::INTERVAL;
            true
        } else {
            self.remaining -= 1;
            false
        }
    }
}

pub enum OperatorNode {
    Scan(ScanOperator),
    IndexJoin(Box<IndexJoinOperator>),
    BagUnion(Box<BagUnionOperator>),
    Projection(Box<ProjectionOperator>),
    Reduced(Box<ReducedOperator>),
    Filter(Box<FilterOperator>),
    Bind(Box<BindOperator>),
    Construct(Box<ConstructOperator>),
    ReflexiveClosure(Box<ReflexiveClosureOperator>),
    TransitiveClosure(Box<TransitiveClosureOperator>),
    PathCollector(Box<PathCollectorOperator>),
    /// Emits exactly one mapping, then reports done. Used for a
    /// standalone `BIND` over an empty BGP (spec.md §4.3).
    SingleTuple(Option<Mapping>),
    /// The sentinel produced for an empty BGP (spec.md §4.3).
    Empty,
}

impl OperatorNode {
    pub fn has_next(&self) -> bool {
        match self {
            OperatorNode::Scan(op) => op.has_next(),
            OperatorNode::IndexJoin(op) => op.has_next(),
            OperatorNode::BagUnion(op) => op.has_next(),
            OperatorNode::Projection(op) => op.child.has_next(),
            OperatorNode::Reduced(op) => op.child.has_next(),
            OperatorNode::Filter(op) => op.has_next(),
            OperatorNode::Bind(op) => op.has_next(),
            OperatorNode::Construct(op) => op.child.has_next(),
            OperatorNode::ReflexiveClosure(op) => op.has_next(),
            OperatorNode::TransitiveClosure(op) => op.has_next(),
            OperatorNode::PathCollector(op) => op.child.has_next(),
            OperatorNode::SingleTuple(mu) => mu.is_some(),
            OperatorNode::Empty => false,
        }
    }

    pub fn next_stage(&mut self, binding: &Mapping, store: &dyn StorageAdapter) -> Result<()> {
        match self {
            OperatorNode::Scan(op) => op.next_stage(binding, store),
            OperatorNode::IndexJoin(op) => op.next_stage(binding, store),
            OperatorNode::BagUnion(op) => op.next_stage(binding, store),
            OperatorNode::Projection(op) => op.child.next_stage(binding, store),
            OperatorNode::Reduced(op) => op.child.next_stage(binding, store),
            OperatorNode::Filter(op) => op.next_stage(binding, store),
            OperatorNode::Bind(op) => op.next_stage(binding, store),
            OperatorNode::Construct(op) => op.child.next_stage(binding, store),
            OperatorNode::ReflexiveClosure(_) | OperatorNode::TransitiveClosure(_) => {
                // Closures are only ever a join's right operand when the
                // path has no remaining free outer variable; re-parameterizing
                // them would require recompiling the path, so joins over a
                // closure right-hand side instead rebuild the closure entirely
                // (see `crate::query::compiler`).
                Ok(())
            }
            OperatorNode::PathCollector(op) => op.child.next_stage(binding, store),
            OperatorNode::SingleTuple(_) | OperatorNode::Empty => Ok(()),
        }
    }

    pub fn next(&mut self, store: &dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        match self {
            OperatorNode::Scan(op) => Ok(Poll::Ready(op.next())),
            OperatorNode::IndexJoin(op) => op.next(store),
            OperatorNode::BagUnion(op) => op.next(store),
            OperatorNode::Projection(op) => op.next(store),
            OperatorNode::Reduced(op) => op.next(store),
            OperatorNode::Filter(op) => op.next(store),
            OperatorNode::Bind(op) => op.next(store),
            OperatorNode::Construct(op) => op.next(store),
            OperatorNode::ReflexiveClosure(op) => Ok(Poll::Ready(op.next())),
            OperatorNode::TransitiveClosure(op) => op.next(store),
            OperatorNode::PathCollector(op) => op.next(store),
            OperatorNode::SingleTuple(mu) => Ok(Poll::Ready(mu.take())),
            OperatorNode::Empty => Ok(Poll::Ready(None)),
        }
    }

    pub fn save(&self) -> Frame {
        match self {
            OperatorNode::Scan(op) => op.save(),
            OperatorNode::IndexJoin(op) => op.save(),
            OperatorNode::BagUnion(op) => op.save(),
            OperatorNode::Projection(op) => Frame::Projection { child: Box::new(op.child.save()) },
            OperatorNode::Reduced(op) => op.save(),
            OperatorNode::Filter(op) => op.save(),
            OperatorNode::Bind(op) => op.save(),
            OperatorNode::Construct(op) => op.save(),
            OperatorNode::ReflexiveClosure(op) => op.save(),
            OperatorNode::TransitiveClosure(op) => op.save(),
            OperatorNode::PathCollector(op) => op.save(),
            OperatorNode::SingleTuple(mu) => Frame::SingleTuple { delivered: mu.is_none() },
            OperatorNode::Empty => Frame::Empty,
        }
    }

    pub fn serialized_name(&self) -> &'static str {
        match self {
            OperatorNode::Scan(_) => "scan",
            OperatorNode::IndexJoin(_) => "join",
            OperatorNode::BagUnion(_) => "union",
            OperatorNode::Projection(_) => "projection",
            OperatorNode::Reduced(_) => "reduced",
            OperatorNode::Filter(_) => "filter",
            OperatorNode::Bind(_) => "bind",
            OperatorNode::Construct(_) => "construct",
            OperatorNode::ReflexiveClosure(_) => "reflexive_closure",
            OperatorNode::TransitiveClosure(_) => "transitive_closure",
            OperatorNode::PathCollector(_) => "path_collector",
            OperatorNode::SingleTuple(_) => "single_tuple",
            OperatorNode::Empty => "empty",
        }
    }
}

/// Grafts saved state from a decoded [`Frame`] onto a freshly compiled
/// operator tree (spec.md §4.5, §5, C5). The fresh tree supplies
/// everything the frame doesn't carry — patterns, expressions,
/// templates, projected variable lists, the path compiler's
/// `build_inner` closures — while the frame supplies where each
/// operator had gotten to. Recompiling from the original algebra rather
/// than deserializing operators directly keeps `Frame` a small,
/// storage-agnostic state snapshot instead of a second copy of the
/// whole compiler's output.
///
/// A shape mismatch between `fresh` and `frame` means the continuation
/// token was produced against different algebra than what's being
/// resumed (or storage changed shape underneath it); that's a
/// [`ErrorKind::MalformedContinuation`], not a silent fallback, since
/// silently keeping the fresh operator could duplicate or drop rows.
pub fn restore(fresh: OperatorNode, frame: Frame, store: &dyn StorageAdapter) -> Result<OperatorNode> {
    match (fresh, frame) {
        (OperatorNode::Scan(op), frame @ Frame::Scan { .. }) => Ok(OperatorNode::Scan(op.restore(frame, store)?)),
        (OperatorNode::IndexJoin(op), frame @ Frame::Join { .. }) => Ok(OperatorNode::IndexJoin(Box::new(op.restore(frame, store)?))),
        (OperatorNode::BagUnion(op), frame @ Frame::Union { .. }) => Ok(OperatorNode::BagUnion(Box::new(op.restore(frame, store)?))),
        (OperatorNode::Projection(op), frame @ Frame::Projection { .. }) => Ok(OperatorNode::Projection(Box::new(op.restore(frame, store)?))),
        (OperatorNode::Reduced(op), frame @ Frame::Reduced { .. }) => Ok(OperatorNode::Reduced(Box::new(op.restore(frame, store)?))),
        (OperatorNode::Filter(op), frame @ Frame::Filter { .. }) => Ok(OperatorNode::Filter(Box::new(op.restore(frame, store)?))),
        (OperatorNode::Bind(op), frame @ Frame::Bind { .. }) => Ok(OperatorNode::Bind(Box::new(op.restore(frame, store)?))),
        (OperatorNode::Construct(op), frame @ Frame::Construct { .. }) => Ok(OperatorNode::Construct(Box::new(op.restore(frame, store)?))),
        (OperatorNode::ReflexiveClosure(op), frame @ Frame::ReflexiveClosure { .. }) => Ok(OperatorNode::ReflexiveClosure(Box::new(op.restore(frame)?))),
        (OperatorNode::TransitiveClosure(op), frame @ Frame::TransitiveClosure { .. }) => Ok(OperatorNode::TransitiveClosure(Box::new(op.restore(frame, store)?))),
        (OperatorNode::PathCollector(op), frame @ Frame::PathCollector { .. }) => Ok(OperatorNode::PathCollector(Box::new(op.restore(frame, store)?))),
        (OperatorNode::SingleTuple(mu), Frame::SingleTuple { delivered }) => Ok(OperatorNode::SingleTuple(if delivered { None } else { mu })),
        (OperatorNode::Empty, Frame::Empty) => Ok(OperatorNode::Empty),
        (_, _) => Err(ErrorKind::MalformedContinuation.with_message("continuation frame shape does not match the compiled query plan")),
    }
}
