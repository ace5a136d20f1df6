// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bag-union, projection, and distinct-by-REDUCED (spec.md §4.2).

use std::collections::BTreeSet;
use std::task::Poll;

use super::OperatorNode;
use crate::query::continuation::Frame;
use crate::store::StorageAdapter;
use crate::term::Mapping;
use crate::{ErrorKind, Result};

/// Concatenates two branches without deduplication ("Union branch at
/// the algebra level ... produce bag-union", spec.md §4.3).
pub struct BagUnionOperator {
    left: OperatorNode,
    right: OperatorNode,
    left_exhausted: bool,
}

impl BagUnionOperator {
    pub fn new(left: OperatorNode, right: OperatorNode) -> Self {
        BagUnionOperator { left, right, left_exhausted: false }
    }

    pub fn with_left_exhausted(left: OperatorNode, right: OperatorNode, left_exhausted: bool) -> Self {
        BagUnionOperator { left, right, left_exhausted }
    }

    pub fn has_next(&self) -> bool {
        (!self.left_exhausted && self.left.has_next()) || self.right.has_next()
    }

    pub fn next_stage(&mut self, binding: &Mapping, store: &dyn StorageAdapter) -> Result<()> {
        self.left_exhausted = false;
        self.left.next_stage(binding, store)?;
        self.right.next_stage(binding, store)
    }

    pub fn next(&mut self, store: &dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        if !self.left_exhausted {
            match self.left.next(store)? {
                Poll::Pending => return Ok(Poll::Pending),
                Poll::Ready(Some(mu)) => return Ok(Poll::Ready(Some(mu))),
                Poll::Ready(None) => self.left_exhausted = true,
            }
        }
        self.right.next(store)
    }

    pub fn save(&self) -> Frame {
        Frame::Union {
            left: Box::new(self.left.save()),
            right: Box::new(self.right.save()),
        }
    }

    /// The left-exhausted flag isn't carried in the frame: it's a cache
    /// of the left branch's own `Poll::Ready(None)`, which `next` will
    /// rediscover on the first call after restore.
    pub(crate) fn restore(self, frame: Frame, store: &dyn StorageAdapter) -> Result<Self> {
        let Frame::Union { left, right } = frame else {
            return Err(ErrorKind::MalformedContinuation.with_message("expected a union frame"));
        };
        let left = super::restore(self.left, *left, store)?;
        let right = super::restore(self.right, *right, store)?;
        Ok(BagUnionOperator::with_left_exhausted(left, right, false))
    }
}

/// Restricts each output mapping to the `SELECT`ed variables.
pub struct ProjectionOperator {
    pub(super) child: OperatorNode,
    variables: Vec<String>,
}

impl ProjectionOperator {
    pub fn new(child: OperatorNode, variables: Vec<String>) -> Self {
        ProjectionOperator { child, variables }
    }

    pub fn next(&mut self, store: &dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        Ok(self.child.next(store)?.map(|mu| mu.map(|m| m.restrict_to(&self.variables))))
    }

    pub(crate) fn restore(mut self, frame: Frame, store: &dyn StorageAdapter) -> Result<Self> {
        let Frame::Projection { child } = frame else {
            return Err(ErrorKind::MalformedContinuation.with_message("expected a projection frame"));
        };
        self.child = super::restore(self.child, *child, store)?;
        Ok(self)
    }
}

/// Streaming `REDUCED`: drops a mapping only if its canonical key has
/// already been seen, never buffering the whole result set
/// (spec.md §4.2 "Distinct-by-seen (REDUCED)").
pub struct ReducedOperator {
    pub(super) child: OperatorNode,
    seen: BTreeSet<String>,
}

impl ReducedOperator {
    pub fn new(child: OperatorNode) -> Self {
        ReducedOperator { child, seen: BTreeSet::new() }
    }

    pub fn with_seen(child: OperatorNode, seen: BTreeSet<String>) -> Self {
        ReducedOperator { child, seen }
    }

    pub fn next(&mut self, store: &dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        loop {
            match self.child.next(store)? {
                Poll::Pending => return Ok(Poll::Pending),
                Poll::Ready(None) => return Ok(Poll::Ready(None)),
                Poll::Ready(Some(mu)) => {
                    let key = mu.canonical_key();
                    if self.seen.insert(key) {
                        return Ok(Poll::Ready(Some(mu)));
                    }
                }
            }
        }
    }

    pub fn save(&self) -> Frame {
        Frame::Reduced {
            child: Box::new(self.child.save()),
            seen: self.seen.clone(),
        }
    }

    pub(crate) fn restore(self, frame: Frame, store: &dyn StorageAdapter) -> Result<Self> {
        let Frame::Reduced { child, seen } = frame else {
            return Err(ErrorKind::MalformedContinuation.with_message("expected a reduced frame"));
        };
        let child = super::restore(self.child, *child, store)?;
        Ok(ReducedOperator::with_seen(child, seen))
    }
}
