// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The scan operator (spec.md §4.2 "Scan").

use crate::pattern::TriplePattern;
use crate::query::continuation::Frame;
use crate::store::{Cursor, StorageAdapter};
use crate::term::Mapping;
use crate::Result;

/// Evaluates a triple pattern over a named graph, optionally
/// reparameterized each time the enclosing join advances its outer
/// tuple (`next_stage`).
pub struct ScanOperator {
    pattern: TriplePattern,
    as_of: Option<String>,
    source: Box<dyn Cursor>,
    cardinality: u64,
}

impl ScanOperator {
    pub fn new(pattern: TriplePattern, store: &dyn StorageAdapter, as_of: Option<String>, last_read: Option<String>) -> Result<Self> {
        let (source, cardinality) = open_cursor(&pattern, store, as_of.as_deref(), last_read.as_deref())?;
        Ok(ScanOperator { pattern, as_of, source, cardinality })
    }

    pub fn from_frame(pattern: TriplePattern, store: &dyn StorageAdapter, as_of: Option<String>, frame: Frame) -> Result<Self> {
        let Frame::Scan { last_read } = frame else {
            return Self::new(pattern, store, as_of, None);
        };
        Self::new(pattern, store, as_of, last_read)
    }

    pub fn cardinality(&self) -> u64 {
        self.cardinality
    }

    pub fn has_next(&self) -> bool {
        self.source.has_next()
    }

    /// Rebind this scan's pattern variables from `binding` and restart
    /// the underlying cursor from scratch. Mirrors `ScanIterator.next_stage`.
    pub fn next_stage(&mut self, binding: &Mapping, store: &dyn StorageAdapter) -> Result<()> {
        let substituted = self.pattern.substitute(binding);
        let (source, cardinality) = open_cursor(&substituted, store, self.as_of.as_deref(), None)?;
        self.pattern = substituted;
        self.source = source;
        self.cardinality = cardinality;
        Ok(())
    }

    pub fn next(&mut self) -> Option<Mapping> {
        if !self.source.has_next() {
            return None;
        }
        let (s, p, o) = self.source.next()?;
        Some(self.pattern.select((&s, &p, &o)))
    }

    pub fn save(&self) -> Frame {
        Frame::Scan { last_read: Some(self.source.last_read()) }
    }

    /// Reopen the cursor at the bookmark carried by `frame`, keeping
    /// this (freshly recompiled) scan's pattern and snapshot.
    pub(crate) fn restore(mut self, frame: Frame, store: &dyn StorageAdapter) -> Result<Self> {
        let Frame::Scan { last_read } = frame else {
            return Err(crate::ErrorKind::MalformedContinuation.with_message("expected a scan frame"));
        };
        let (source, cardinality) = open_cursor(&self.pattern, store, self.as_of.as_deref(), last_read.as_deref())?;
        self.source = source;
        self.cardinality = cardinality;
        Ok(self)
    }
}

fn open_cursor(
    pattern: &TriplePattern,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    last_read: Option<&str>,
) -> Result<(Box<dyn Cursor>, u64)> {
    if !store.has_graph(pattern.graph.as_str()) {
        return Ok((Box::new(EmptyCursor), 0));
    }
    store.search(pattern.graph.as_str(), &pattern.subject, &pattern.predicate, &pattern.object, last_read, as_of)
}

/// The cursor for a scan over an unknown graph (spec.md §8 "Unknown
/// default graph"): empty, never throwing.
struct EmptyCursor;

impl Cursor for EmptyCursor {
    fn has_next(&self) -> bool {
        false
    }

    fn next(&mut self) -> Option<(crate::term::Term, crate::term::Term, crate::term::Term)> {
        None
    }

    fn last_read(&self) -> String {
        String::new()
    }
}
