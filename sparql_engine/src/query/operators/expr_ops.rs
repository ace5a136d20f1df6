// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Filter and Bind (spec.md §4.2 "Filter", "Bind"), grounded on
//! `filter.py`/`bind.py`'s "cache the last unconsumed input mapping so
//! that a freeze/restore re-tests rather than re-pulls" design.

use std::sync::Arc;
use std::task::Poll;

use super::{OperatorNode, YieldBudget};
use crate::expr::{Expr, FunctionRegistry};
use crate::query::continuation::Frame;
use crate::store::StorageAdapter;
use crate::term::Mapping;
use crate::{ErrorKind, Result};

pub struct FilterOperator {
    child: OperatorNode,
    raw_expression: String,
    expression: Expr,
    registry: Arc<FunctionRegistry>,
    pending: Option<Mapping>,
    budget: YieldBudget,
}

impl FilterOperator {
    pub fn new(child: OperatorNode, raw_expression: String, expression: Expr, registry: Arc<FunctionRegistry>) -> Self {
        FilterOperator {
            child,
            raw_expression,
            expression,
            registry,
            pending: None,
            budget: YieldBudget::new(),
        }
    }

    pub fn with_pending(mut self, pending: Option<Mapping>) -> Self {
        self.pending = pending;
        self
    }

    pub fn has_next(&self) -> bool {
        self.pending.is_some() || self.child.has_next()
    }

    pub fn next_stage(&mut self, binding: &Mapping, store: &dyn StorageAdapter) -> Result<()> {
        // A pending row belongs to the outer binding we're leaving; carrying
        // it over would make `has_next` report state from a context the
        // join has already moved past (and, if it's untruthy, can make
        // `next` surface `Ready(None)` for just this outer as if the whole
        // join were exhausted).
        self.pending = None;
        self.child.next_stage(binding, store)
    }

    /// Truthy per spec.md §7: a malformed or failing expression drops
    /// the row rather than propagating an error.
    fn truthy(&self, mu: &Mapping) -> bool {
        matches!(self.expression.eval(mu, &self.registry), Ok(v) if v.truthy())
    }

    pub fn next(&mut self, store: &dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        if !self.has_next() {
            return Ok(Poll::Ready(None));
        }
        while self.pending.is_none() || !self.truthy(self.pending.as_ref().unwrap()) {
            if self.budget.tick() {
                return Ok(Poll::Pending);
            }
            match self.child.next(store)? {
                Poll::Pending => return Ok(Poll::Pending),
                Poll::Ready(None) => {
                    self.pending = None;
                    return Ok(Poll::Ready(None));
                }
                Poll::Ready(Some(mu)) => self.pending = Some(mu),
            }
        }
        Ok(Poll::Ready(self.pending.take()))
    }

    pub fn save(&self) -> Frame {
        Frame::Filter {
            child: Box::new(self.child.save()),
            pending: self.pending.clone(),
        }
    }

    pub fn raw_expression(&self) -> &str {
        &self.raw_expression
    }

    pub(crate) fn restore(mut self, frame: Frame, store: &dyn StorageAdapter) -> Result<Self> {
        let Frame::Filter { child, pending } = frame else {
            return Err(ErrorKind::MalformedContinuation.with_message("expected a filter frame"));
        };
        self.child = super::restore(self.child, *child, store)?;
        self.pending = pending;
        Ok(self)
    }
}

/// Evaluates `expr` per input mapping and adds `?var -> value`. With no
/// child, emits exactly one mapping once (spec.md §4.2 "Bind").
pub struct BindOperator {
    child: Option<OperatorNode>,
    variable: String,
    expression: Expr,
    registry: Arc<FunctionRegistry>,
    delivered: bool,
    budget: YieldBudget,
}

impl BindOperator {
    pub fn new(child: Option<OperatorNode>, variable: String, expression: Expr, registry: Arc<FunctionRegistry>) -> Self {
        BindOperator {
            child,
            variable,
            expression,
            registry,
            delivered: false,
            budget: YieldBudget::new(),
        }
    }

    pub fn with_delivered(mut self, delivered: bool) -> Self {
        self.delivered = delivered;
        self
    }

    pub fn has_next(&self) -> bool {
        match &self.child {
            Some(child) => child.has_next(),
            None => !self.delivered,
        }
    }

    pub fn next_stage(&mut self, binding: &Mapping, store: &dyn StorageAdapter) -> Result<()> {
        match &mut self.child {
            Some(child) => child.next_stage(binding, store),
            None => Ok(()),
        }
    }

    pub fn next(&mut self, store: &dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        let Some(child) = &mut self.child else {
            if self.delivered {
                return Ok(Poll::Ready(None));
            }
            self.delivered = true;
            return Ok(Poll::Ready(Some(self.bind_one(Mapping::new()))));
        };
        loop {
            if self.budget.tick() {
                return Ok(Poll::Pending);
            }
            match child.next(store)? {
                Poll::Pending => return Ok(Poll::Pending),
                Poll::Ready(None) => return Ok(Poll::Ready(None)),
                Poll::Ready(Some(mu)) => return Ok(Poll::Ready(Some(self.bind_one(mu)))),
            }
        }
    }

    fn bind_one(&self, mut mu: Mapping) -> Mapping {
        if let Ok(value) = self.expression.eval(&mu, &self.registry) {
            mu.insert(self.variable.clone(), value.into());
        }
        mu
    }

    pub fn save(&self) -> Frame {
        Frame::Bind {
            child: self.child.as_ref().map(|c| Box::new(c.save())),
            delivered: self.delivered,
        }
    }

    pub(crate) fn restore(mut self, frame: Frame, store: &dyn StorageAdapter) -> Result<Self> {
        let Frame::Bind { child, delivered } = frame else {
            return Err(ErrorKind::MalformedContinuation.with_message("expected a bind frame"));
        };
        self.child = match (self.child.take(), child) {
            (Some(fresh), Some(frame)) => Some(super::restore(fresh, *frame, store)?),
            (fresh, _) => fresh,
        };
        self.delivered = delivered;
        Ok(self)
    }
}
