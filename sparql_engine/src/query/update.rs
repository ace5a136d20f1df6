// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Update operators (spec.md §4.7, C7): `InsertData`, `DeleteData`,
//! `Modify` (as a `SerializableUpdate`), and the `IfExists`-guarded
//! sequence used for "delete the old value, insert the new one only if
//! it was there" patterns.
//!
//! Unlike the read-side operators in [`crate::query::operators`], these
//! aren't part of the `OperatorNode`/`Frame` continuation system: §4.7
//! and §8 describe update atomicity in per-row or per-quantum terms,
//! never a resumed update token, so there's nothing to freeze between
//! HTTP requests. They still drive their read side (`Modify`'s
//! WHERE-clause pipeline, `IfExistsOperator`'s probe) through the same
//! `Poll`-based coroutine shape, so a long-running WHERE clause yields
//! to the scheduler's quantum check exactly as a SELECT would; what
//! they don't support is being frozen to bytes and rehydrated on a
//! different process mid-update.

use std::task::Poll;

use crate::query::operators::OperatorNode;
use crate::store::{Quad, StorageAdapter};
use crate::term::{Mapping, Term};
use crate::Result;

/// A triple-plus-graph pattern, possibly still holding variables, to be
/// instantiated against a WHERE-clause solution before being deleted or
/// inserted (spec.md §4.7 "Modify (serializable)").
#[derive(Debug, Clone)]
pub struct QuadTemplate {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: Term,
}

impl QuadTemplate {
    pub fn new(subject: Term, predicate: Term, object: Term, graph: Term) -> Self {
        QuadTemplate { subject, predicate, object, graph }
    }

    fn instantiate(&self, mu: &Mapping) -> Quad {
        (mu.resolve(&self.subject), mu.resolve(&self.predicate), mu.resolve(&self.object), mu.resolve(&self.graph))
    }
}

/// Atomically inserts a fixed list of quads; a quad already present is
/// a no-op (spec.md §4.7 "InsertData"). Driven by a single `next` call:
/// it never yields an intermediate mapping.
pub struct InsertDataOperator {
    quads: Vec<Quad>,
}

impl InsertDataOperator {
    pub fn new(quads: Vec<Quad>) -> Self {
        InsertDataOperator { quads }
    }

    pub fn next(&mut self, store: &mut dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        for quad in self.quads.drain(..) {
            store.insert(&quad)?;
        }
        Ok(Poll::Ready(None))
    }
}

/// Symmetric to [`InsertDataOperator`] (spec.md §4.7 "DeleteData").
pub struct DeleteDataOperator {
    quads: Vec<Quad>,
}

impl DeleteDataOperator {
    pub fn new(quads: Vec<Quad>) -> Self {
        DeleteDataOperator { quads }
    }

    pub fn next(&mut self, store: &mut dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        for quad in self.quads.drain(..) {
            store.delete(&quad)?;
        }
        Ok(Poll::Ready(None))
    }
}

/// `Modify`, compiled as a serializable update: pulls one mapping at a
/// time from `read` (the WHERE clause, compiled by C4), and for each,
/// deletes then inserts the templates it instantiates against that
/// mapping, yielding the mapping itself (spec.md §4.7 "Modify
/// (serializable)"). Per-row atomic; the caller commits the whole
/// transaction once the update's `next` reports done.
pub struct SerializableUpdate {
    read: OperatorNode,
    delete_templates: Vec<QuadTemplate>,
    insert_templates: Vec<QuadTemplate>,
}

impl SerializableUpdate {
    pub fn new(read: OperatorNode, delete_templates: Vec<QuadTemplate>, insert_templates: Vec<QuadTemplate>) -> Self {
        SerializableUpdate { read, delete_templates, insert_templates }
    }

    pub fn next(&mut self, store: &mut dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        match self.read.next(&*store)? {
            Poll::Pending => Ok(Poll::Pending),
            Poll::Ready(None) => Ok(Poll::Ready(None)),
            Poll::Ready(Some(mu)) => {
                for template in &self.delete_templates {
                    store.delete(&template.instantiate(&mu))?;
                }
                for template in &self.insert_templates {
                    store.insert(&template.instantiate(&mu))?;
                }
                Ok(Poll::Ready(Some(mu)))
            }
        }
    }
}

/// Answers existence for a fully-bound WHERE clause as a single boolean
/// (spec.md §4.7 "IfExists-guarded sequence"): `true` as soon as
/// `probe` yields one solution, `false` once it reports done without
/// ever yielding.
pub struct IfExistsOperator {
    probe: OperatorNode,
}

impl IfExistsOperator {
    pub fn new(probe: OperatorNode) -> Self {
        IfExistsOperator { probe }
    }

    pub fn evaluate(&mut self, store: &dyn StorageAdapter) -> Result<Poll<bool>> {
        match self.probe.next(store)? {
            Poll::Pending => Ok(Poll::Pending),
            Poll::Ready(found) => Ok(Poll::Ready(found.is_some())),
        }
    }
}

enum SequencePhase {
    Evaluating,
    Deleting,
    Inserting,
    Done,
}

/// Owns an [`IfExistsOperator`] probe plus a guarded delete and insert:
/// when the probe answers true, the delete then the insert run; when
/// false, neither runs (spec.md §4.7 "IfExists-guarded sequence").
pub struct UpdateSequenceOperator {
    if_exists: IfExistsOperator,
    delete: DeleteDataOperator,
    insert: InsertDataOperator,
    phase: SequencePhase,
}

impl UpdateSequenceOperator {
    pub fn new(probe: OperatorNode, delete_quads: Vec<Quad>, insert_quads: Vec<Quad>) -> Self {
        UpdateSequenceOperator {
            if_exists: IfExistsOperator::new(probe),
            delete: DeleteDataOperator::new(delete_quads),
            insert: InsertDataOperator::new(insert_quads),
            phase: SequencePhase::Evaluating,
        }
    }

    pub fn next(&mut self, store: &mut dyn StorageAdapter) -> Result<Poll<Option<Mapping>>> {
        loop {
            match self.phase {
                SequencePhase::Evaluating => match self.if_exists.evaluate(&*store)? {
                    Poll::Pending => return Ok(Poll::Pending),
                    Poll::Ready(true) => self.phase = SequencePhase::Deleting,
                    Poll::Ready(false) => self.phase = SequencePhase::Done,
                },
                SequencePhase::Deleting => {
                    self.delete.next(store)?;
                    self.phase = SequencePhase::Inserting;
                }
                SequencePhase::Inserting => {
                    self.insert.next(store)?;
                    self.phase = SequencePhase::Done;
                }
                SequencePhase::Done => return Ok(Poll::Ready(None)),
            }
        }
    }
}
