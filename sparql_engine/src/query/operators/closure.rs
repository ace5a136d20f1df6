// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Reflexive and transitive closure, and the piggyback path collector
//! (spec.md §4.2 "Reflexive closure", "Transitive closure", "Path
//! collector"), grounded on `reflexive_closure.py`,
//! `ppaths/v2/dls.py`, `dls/v2/visited_nodes_memory.py`, and
//! `ppaths/piggyback.py`.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::task::Poll;

use super::OperatorNode;
use crate::query::continuation::{ClosureFrame, ControlTuple, Frame};
use crate::store::StorageAdapter;
use crate::term::{Mapping, Term};
use crate::{Error, ErrorKind, Result};

/// The name the transitive-closure inner path operator binds its
/// output node to; never visible outside this module.
pub const STEP_VAR: &str = "?__step";

/// `*`/`?` zero-length semantics (spec.md §4.2 "Reflexive closure").
/// Eagerly computed: unlike transitive closure, this never loops over
/// an unbounded frontier, so there's nothing to gain from streaming it
/// lazily against the quantum.
pub struct ReflexiveClosureOperator {
    subject_var: Option<String>,
    object_var: Option<String>,
    remaining: Vec<Term>,
    emitted: BTreeSet<String>,
}

impl ReflexiveClosureOperator {
    /// `subject`/`object` are the path endpoints as they appeared in
    /// the query; `nodes` is the set of candidate reflexive bindings
    /// already resolved by the compiler (the single shared value when
    /// one side is bound, or every distinct node in the graph when
    /// both are variables).
    pub fn new(subject: &Term, object: &Term, nodes: Vec<Term>) -> Self {
        ReflexiveClosureOperator {
            subject_var: subject.is_variable().then(|| subject.as_str().to_string()),
            object_var: object.is_variable().then(|| object.as_str().to_string()),
            remaining: nodes,
            emitted: BTreeSet::new(),
        }
    }

    pub fn with_remaining_and_emitted(subject: &Term, object: &Term, remaining: Vec<Term>, emitted: BTreeSet<String>) -> Self {
        let mut this = Self::new(subject, object, Vec::new());
        this.remaining = remaining;
        this.emitted = emitted;
        this
    }

    pub fn has_next(&self) -> bool {
        !self.remaining.is_empty()
    }

    pub fn next(&mut self) -> Option<Mapping> {
        let node = self.remaining.pop()?;
        if !self.emitted.insert(node.as_str().to_string()) {
            return self.next();
        }
        let mut mu = Mapping::new();
        if let Some(var) = &self.subject_var {
            mu.insert(var.clone(), node.clone());
        }
        if let Some(var) = &self.object_var {
            mu.insert(var.clone(), node);
        }
        Some(mu)
    }

    pub fn save(&self) -> Frame {
        Frame::ReflexiveClosure {
            remaining: self.remaining.iter().map(|t| t.as_str().to_string()).collect(),
            emitted: self.emitted.clone(),
        }
    }

    pub(crate) fn restore(mut self, frame: Frame) -> Result<Self> {
        let Frame::ReflexiveClosure { remaining, emitted } = frame else {
            return Err(ErrorKind::MalformedContinuation.with_message("expected a reflexive closure frame"));
        };
        self.remaining = remaining.into_iter().map(Term::new).collect();
        self.emitted = emitted;
        Ok(self)
    }
}

struct ClosureLevel {
    node: Term,
    inner: OperatorNode,
}

/// Bounded depth-first iterative deepening over a property-path
/// sub-expression (spec.md §4.2 "Transitive closure"), parameterized
/// by a builder supplied by the path compiler: given the current
/// frontier node and the storage adapter, it returns the compiled
/// single-step operator that binds [`STEP_VAR`] to each reachable next
/// node. The adapter is threaded through rather than captured, since a
/// fresh cursor is opened every time the stack grows a level.
pub struct TransitiveClosureOperator {
    build_inner: Arc<dyn Fn(&Term, &dyn StorageAdapter) -> Result<OperatorNode> + Send + Sync>,
    source: Term,
    source_var: Option<String>,
    destination_var: Option<String>,
    destination_bound: Option<Term>,
    min_depth: u32,
    max_depth: u32,
    stack: Vec<ClosureLevel>,
    visited: BTreeSet<String>,
    complete: bool,
    started: bool,
    last_frontier: Option<(Term, u32, bool)>,
}

impl TransitiveClosureOperator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        build_inner: Arc<dyn Fn(&Term, &dyn StorageAdapter) -> Result<OperatorNode> + Send + Sync>,
        source: Term,
        source_var: Option<String>,
        destination_var: Option<String>,
        destination_bound: Option<Term>,
        min_depth: u32,
        max_depth: u32,
    ) -> Self {
        TransitiveClosureOperator {
            build_inner,
            source,
            source_var,
            destination_var,
            destination_bound,
            min_depth,
            max_depth,
            stack: Vec::new(),
            visited: BTreeSet::new(),
            complete: true,
            started: false,
            last_frontier: None,
        }
    }

    pub fn has_next(&self) -> bool {
        !self.started || !self.stack.is_empty()
    }

    pub fn is_complete(&self) -> bool {
        self.complete
    }

    /// The last frontier node seen (reached the goal, or the search
    /// truncated at max depth there): consumed by [`PathCollectorOperator`].
    pub fn take_last_frontier(&mut self) -> Option<(Term, u32, bool)> {
        self.last_frontier.take()
    }

    fn destination_matches(&self, node: &Term) -> bool {
        match &self.destination_bound {
            Some(d) => d == node,
            None => true,
        }
    }

    fn build_output(&self, node: &Term) -> Mapping {
        let mut mu = Mapping::new();
        if let Some(var) = &self.source_var {
            mu.insert(var.clone(), self.source.clone());
        }
        if let Some(var) = &self.destination_var {
            mu.insert(var.clone(), node.clone());
        }
        mu
    }

    pub fn next(&mut self, store: &dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        if !self.started {
            self.started = true;
            self.visited.insert(self.source.as_str().to_string());
            let inner = (self.build_inner)(&self.source, store)?;
            self.stack.push(ClosureLevel { node: self.source.clone(), inner });
        }
        loop {
            let Some(top) = self.stack.last_mut() else { return Ok(Poll::Ready(None)) };
            match top.inner.next(store)? {
                Poll::Pending => return Ok(Poll::Pending),
                Poll::Ready(None) => {
                    self.stack.pop();
                    continue;
                }
                Poll::Ready(Some(mu)) => {
                    let Some(next_node) = mu.get(STEP_VAR).cloned() else { continue };
                    if self.visited.contains(next_node.as_str()) {
                        continue;
                    }
                    self.visited.insert(next_node.as_str().to_string());
                    let depth_reached = self.stack.len() as u32;
                    let at_goal = self.destination_matches(&next_node);
                    let at_max_depth = depth_reached >= self.max_depth;
                    if at_goal || at_max_depth {
                        self.last_frontier = Some((next_node.clone(), depth_reached, at_max_depth));
                    }
                    let emit = at_goal && depth_reached >= self.min_depth;
                    if !at_max_depth {
                        let inner = (self.build_inner)(&next_node, store)?;
                        self.stack.push(ClosureLevel { node: next_node.clone(), inner });
                    } else if self.destination_bound.is_none() || !at_goal {
                        // Could have expanded further; the depth bound is what stopped us.
                        self.complete = false;
                    }
                    if emit {
                        return Ok(Poll::Ready(Some(self.build_output(&next_node))));
                    }
                }
            }
        }
    }

    pub fn save(&self) -> Frame {
        Frame::TransitiveClosure {
            stack: self
                .stack
                .iter()
                .enumerate()
                .map(|(i, level)| ClosureFrame { depth: i as u32, node: level.node.as_str().to_string(), inner: Box::new(level.inner.save()) })
                .collect(),
            visited: self.visited.clone(),
            complete: self.complete,
        }
    }

    /// Rebuilds the DFS stack level by level: each level's inner
    /// operator is recompiled fresh against its frontier node via
    /// `build_inner`, then that fresh operator has the saved sub-frame
    /// grafted onto it, exactly as the outer restore does for the tree
    /// as a whole.
    pub(crate) fn restore(mut self, frame: Frame, store: &dyn StorageAdapter) -> Result<Self> {
        let Frame::TransitiveClosure { stack, visited, complete } = frame else {
            return Err(ErrorKind::MalformedContinuation.with_message("expected a transitive closure frame"));
        };
        let mut restored = Vec::with_capacity(stack.len());
        for level in stack {
            let node = Term::new(level.node);
            let fresh_inner = (self.build_inner)(&node, store)?;
            let inner = super::restore(fresh_inner, *level.inner, store)?;
            restored.push(ClosureLevel { node, inner });
        }
        self.stack = restored;
        self.visited = visited;
        self.complete = complete;
        self.started = true;
        Ok(self)
    }
}

/// Deduplicates frontier reports by `(pattern, context, node)` and
/// enforces the configured cap (spec.md §4.2 "Path collector", §7
/// `TooManyResults`).
pub struct ControlTupleBuffer {
    pattern: String,
    context: String,
    seen: BTreeSet<(String, String, String)>,
    tuples: Vec<ControlTuple>,
    max_results: usize,
}

impl ControlTupleBuffer {
    pub fn new(pattern: String, context: String, max_results: usize) -> Self {
        ControlTupleBuffer { pattern, context, seen: BTreeSet::new(), tuples: Vec::new(), max_results }
    }

    pub fn record(&mut self, node: &Term, depth: u32, is_frontier: bool) -> Result<()> {
        let key = (self.pattern.clone(), self.context.clone(), node.as_str().to_string());
        if !self.seen.insert(key) {
            return Ok(());
        }
        if self.tuples.len() >= self.max_results {
            return Err(Error::from(ErrorKind::TooManyResults));
        }
        self.tuples.push(ControlTuple {
            pattern: self.pattern.clone(),
            context: self.context.clone(),
            node: node.as_str().to_string(),
            depth,
            is_frontier,
        });
        Ok(())
    }

    pub fn into_tuples(self) -> Vec<ControlTuple> {
        self.tuples
    }

    pub fn tuples(&self) -> &[ControlTuple] {
        &self.tuples
    }
}

/// Sits above a [`TransitiveClosureOperator`], passing its mappings
/// through unchanged while piggybacking frontier nodes into a shared
/// [`ControlTupleBuffer`] (spec.md §4.2 "Path collector").
pub struct PathCollectorOperator {
    pub(super) child: OperatorNode,
    buffer: ControlTupleBuffer,
}

impl PathCollectorOperator {
    pub fn new(child: OperatorNode, pattern: String, context: String, max_results: usize) -> Self {
        PathCollectorOperator { child, buffer: ControlTupleBuffer::new(pattern, context, max_results) }
    }

    pub fn with_buffered_tuples(child: OperatorNode, pattern: String, context: String, max_results: usize, tuples: Vec<ControlTuple>) -> Self {
        let mut this = Self::new(child, pattern, context, max_results);
        for t in tuples {
            this.buffer.seen.insert((t.pattern.clone(), t.context.clone(), t.node.clone()));
            this.buffer.tuples.push(t);
        }
        this
    }

    pub fn buffer(&self) -> &ControlTupleBuffer {
        &self.buffer
    }

    pub fn into_buffer(self) -> ControlTupleBuffer {
        self.buffer
    }

    pub fn next(&mut self, store: &dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        let result = self.child.next(store)?;
        if let OperatorNode::TransitiveClosure(closure) = &mut self.child {
            if let Some((node, depth, is_frontier)) = closure.take_last_frontier() {
                self.buffer.record(&node, depth, is_frontier)?;
            }
        }
        Ok(result)
    }

    pub fn save(&self) -> Frame {
        Frame::PathCollector {
            child: Box::new(self.child.save()),
            buffer: self.buffer.tuples().to_vec(),
        }
    }

    pub(crate) fn restore(mut self, frame: Frame, store: &dyn StorageAdapter) -> Result<Self> {
        let Frame::PathCollector { child, buffer } = frame else {
            return Err(ErrorKind::MalformedContinuation.with_message("expected a path collector frame"));
        };
        self.child = super::restore(self.child, *child, store)?;
        for tuple in buffer {
            self.buffer.seen.insert((tuple.pattern.clone(), tuple.context.clone(), tuple.node.clone()));
            self.buffer.tuples.push(tuple);
        }
        Ok(self)
    }
}
