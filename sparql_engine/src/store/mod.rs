// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The storage adapter interface (spec.md C1 / §6).
//!
//! This module is a contract, not an implementation: the on-disk/
//! table-backed triple indexes are an out-of-scope named collaborator
//! (spec.md §1). [`memory`] provides an in-memory implementation used
//! by this crate's own tests.

pub mod memory;

use crate::term::Term;

/// One RDF quad: a triple plus the named graph it lives in.
pub type Quad = (Term, Term, Term, Term);

/// A lazily-advanced sequence of triples produced by the storage
/// adapter (spec.md §3 "Resumable triple cursor").
///
/// `last_read` is the sole state needed to restart a scan: passed back
/// into [`StorageAdapter::search`], it resumes strictly after the last
/// triple this cursor returned.
pub trait Cursor: Send {
    /// Cheap and side-effect-free from the caller's perspective (spec.md
    /// §4.1): implementations that need to peek ahead to answer this must
    /// cache the peeked item internally rather than require `&mut self`.
    fn has_next(&self) -> bool;
    fn next(&mut self) -> Option<(Term, Term, Term)>;
    fn last_read(&self) -> String;
}

/// The graph over which C2 operators scan (spec.md §6).
///
/// Implementations must make `last_read` bookmarks stable across
/// process restarts — the bookmark, not any in-memory cursor state, is
/// what a continuation token actually carries (spec.md §3 invariants).
pub trait StorageAdapter: Send {
    /// `true` if `graph` is known to this adapter. A scan over an
    /// unknown graph becomes immediately empty (spec.md §4.2 "Scan");
    /// this is what the compiler/operators consult to implement that
    /// without treating it as an error (spec.md §8 "Unknown default
    /// graph").
    fn has_graph(&self, graph: &str) -> bool;

    /// Search for triples matching `(s, p, o)` in `graph`, optionally
    /// resuming after `last_read` and under the consistency snapshot
    /// named by `as_of`. Returns a cursor plus the backend's cardinality
    /// estimate for the (unresumed) pattern.
    fn search(
        &self,
        graph: &str,
        s: &Term,
        p: &Term,
        o: &Term,
        last_read: Option<&str>,
        as_of: Option<&str>,
    ) -> crate::Result<(Box<dyn Cursor>, u64)>;

    /// Insert a quad. A no-op if the quad is already present
    /// (spec.md §4.7 "InsertData").
    fn insert(&mut self, quad: &Quad) -> crate::Result<()>;

    /// Delete a quad. A no-op if the quad is absent
    /// (spec.md §4.7 "DeleteData").
    fn delete(&mut self, quad: &Quad) -> crate::Result<()>;

    /// Commit the writes accumulated during the current quantum.
    fn commit(&mut self) -> crate::Result<()>;

    /// Discard the writes accumulated during the current quantum.
    fn abort(&mut self) -> crate::Result<()>;
}
