// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! CONSTRUCT (spec.md §4.2 "Construct"): a side-effect iterator that
//! never yields mappings, only accumulates triples.

use std::task::Poll;

use super::OperatorNode;
use crate::algebra::AlgebraTriple;
use crate::query::continuation::Frame;
use crate::store::StorageAdapter;
use crate::term::{Mapping, Term};
use crate::{ErrorKind, Result};

pub struct ConstructOperator {
    pub(super) child: OperatorNode,
    template: Vec<AlgebraTriple>,
    accumulated: Vec<(Term, Term, Term)>,
}

impl ConstructOperator {
    pub fn new(child: OperatorNode, template: Vec<AlgebraTriple>) -> Self {
        ConstructOperator { child, template, accumulated: Vec::new() }
    }

    pub fn with_accumulated(mut self, accumulated: Vec<(String, String, String)>) -> Self {
        self.accumulated = accumulated.into_iter().map(|(s, p, o)| (Term::new(s), Term::new(p), Term::new(o))).collect();
        self
    }

    /// The triples instantiated so far. Readable after the iterator
    /// reports done (spec.md §4.2: "readable from the iterator after
    /// completion").
    pub fn accumulated(&self) -> &[(Term, Term, Term)] {
        &self.accumulated
    }

    pub fn next(&mut self, store: &dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        loop {
            match self.child.next(store)? {
                Poll::Pending => return Ok(Poll::Pending),
                Poll::Ready(None) => return Ok(Poll::Ready(None)),
                Poll::Ready(Some(mu)) => {
                    for triple in &self.template {
                        self.accumulated.push(instantiate(triple, &mu));
                    }
                }
            }
        }
    }

    pub fn save(&self) -> Frame {
        Frame::Construct {
            child: Box::new(self.child.save()),
            accumulated: self
                .accumulated
                .iter()
                .map(|(s, p, o)| (s.as_str().to_string(), p.as_str().to_string(), o.as_str().to_string()))
                .collect(),
        }
    }

    pub(crate) fn restore(mut self, frame: Frame, store: &dyn StorageAdapter) -> Result<Self> {
        let Frame::Construct { child, accumulated } = frame else {
            return Err(ErrorKind::MalformedContinuation.with_message("expected a construct frame"));
        };
        self.child = super::restore(self.child, *child, store)?;
        Ok(self.with_accumulated(accumulated))
    }
}

fn instantiate(triple: &AlgebraTriple, mu: &Mapping) -> (Term, Term, Term) {
    let predicate = match &triple.predicate {
        crate::algebra::PredicateOrPath::Predicate(p) => mu.resolve(p),
        crate::algebra::PredicateOrPath::Path(_) => {
            unreachable!("CONSTRUCT templates never contain property paths")
        }
    };
    (mu.resolve(&triple.subject), predicate, mu.resolve(&triple.object))
}
