// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The index-nested-loop join operator (spec.md §4.2 "Index-nested-loop
//! join"), grounded on `nlj.py`'s `IndexJoinIterator`.

use std::task::Poll;

use super::{OperatorNode, YieldBudget};
use crate::query::continuation::Frame;
use crate::store::StorageAdapter;
use crate::term::Mapping;
use crate::{ErrorKind, Result};

pub struct IndexJoinOperator {
    left: OperatorNode,
    right: OperatorNode,
    current_binding: Option<Mapping>,
    budget: YieldBudget,
}

impl IndexJoinOperator {
    pub fn new(left: OperatorNode, right: OperatorNode) -> Self {
        IndexJoinOperator {
            left,
            right,
            current_binding: None,
            budget: YieldBudget::new(),
        }
    }

    pub fn with_current_binding(left: OperatorNode, right: OperatorNode, current_binding: Option<Mapping>) -> Self {
        IndexJoinOperator { left, right, current_binding, budget: YieldBudget::new() }
    }

    pub fn has_next(&self) -> bool {
        self.left.has_next() || (self.current_binding.is_some() && self.right.has_next())
    }

    pub fn next_stage(&mut self, binding: &Mapping, store: &dyn StorageAdapter) -> Result<()> {
        self.current_binding = None;
        self.left.next_stage(binding, store)
    }

    pub fn next(&mut self, store: &dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        if !self.has_next() {
            return Ok(Poll::Ready(None));
        }
        while self.current_binding.is_none() || !self.right.has_next() {
            if self.budget.tick() {
                return Ok(Poll::Pending);
            }
            match self.left.next(store)? {
                Poll::Pending => return Ok(Poll::Pending),
                Poll::Ready(None) => return Ok(Poll::Ready(None)),
                Poll::Ready(Some(outer)) => {
                    self.right.next_stage(&outer, store)?;
                    self.current_binding = Some(outer);
                }
            }
        }
        match self.right.next(store)? {
            Poll::Pending => Ok(Poll::Pending),
            Poll::Ready(Some(inner)) => {
                let outer = self.current_binding.as_ref().expect("current_binding set above");
                Ok(Poll::Ready(Some(outer.merged_with(&inner))))
            }
            Poll::Ready(None) => Ok(Poll::Ready(None)),
        }
    }

    pub fn save(&self) -> Frame {
        Frame::Join {
            left: Box::new(self.left.save()),
            right: Box::new(self.right.save()),
            current_binding: self.current_binding.clone(),
        }
    }

    pub(crate) fn restore(self, frame: Frame, store: &dyn StorageAdapter) -> Result<Self> {
        let Frame::Join { left, right, current_binding } = frame else {
            return Err(ErrorKind::MalformedContinuation.with_message("expected a join frame"));
        };
        let left = super::restore(self.left, *left, store)?;
        let right = super::restore(self.right, *right, store)?;
        Ok(IndexJoinOperator::with_current_binding(left, right, current_binding))
    }
}
