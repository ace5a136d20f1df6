// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! An in-memory [`StorageAdapter`] implementation.
//!
//! A small, deliberately unoptimized backend that this crate's own
//! tests drive directly; never a production storage engine.

use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;

use super::{Cursor, Quad, StorageAdapter};
use crate::term::Term;
use crate::{ErrorKind, Result};

#[derive(Debug, Clone, Default)]
struct Graph {
    triples: Vec<(Term, Term, Term)>,
}

/// An in-memory multi-graph store, with staged writes that only become
/// visible to [`search`](StorageAdapter::search) after [`commit`](StorageAdapter::commit).
pub struct MemoryStore {
    graphs: BTreeMap<String, Graph>,
    pending_inserts: Vec<Quad>,
    pending_deletes: Vec<Quad>,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore {
            graphs: BTreeMap::new(),
            pending_inserts: Vec::new(),
            pending_deletes: Vec::new(),
        }
    }

    /// Seed a graph with triples, bypassing the staged-write path. Used
    /// by tests to build fixture data.
    pub fn seed(&mut self, graph: &str, triples: impl IntoIterator<Item = (Term, Term, Term)>) {
        self.graphs
            .entry(graph.to_string())
            .or_default()
            .triples
            .extend(triples);
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

/// `peeked`/`matches` use interior mutability so that `has_next` can
/// cache a peeked item under a shared reference (spec.md §4.1 wants
/// `has_next` cheap and side-effect-free from the caller's point of
/// view even though peeking ahead is itself a mutation of this cursor's
/// own internal iterator).
struct MemoryCursor {
    matches: RefCell<std::vec::IntoIter<(Term, Term, Term)>>,
    peeked: Cell<Option<(Term, Term, Term)>>,
    index: usize,
}

impl MemoryCursor {
    fn new(matches: Vec<(Term, Term, Term)>, skip: usize) -> Self {
        let mut iter = matches.into_iter();
        for _ in 0..skip {
            if iter.next().is_none() {
                break;
            }
        }
        MemoryCursor {
            matches: RefCell::new(iter),
            peeked: Cell::new(None),
            index: skip,
        }
    }
}

impl Cursor for MemoryCursor {
    fn has_next(&self) -> bool {
        if let Some(t) = self.peeked.take() {
            self.peeked.set(Some(t));
            return true;
        }
        let next = self.matches.borrow_mut().next();
        let has = next.is_some();
        self.peeked.set(next);
        has
    }

    fn next(&mut self) -> Option<(Term, Term, Term)> {
        let item = self.peeked.take().or_else(|| self.matches.borrow_mut().next());
        if item.is_some() {
            self.index += 1;
        }
        item
    }

    fn last_read(&self) -> String {
        self.index.to_string()
    }
}

impl StorageAdapter for MemoryStore {
    fn has_graph(&self, graph: &str) -> bool {
        self.graphs.contains_key(graph)
    }

    fn search(
        &self,
        graph: &str,
        s: &Term,
        p: &Term,
        o: &Term,
        last_read: Option<&str>,
        _as_of: Option<&str>,
    ) -> Result<(Box<dyn Cursor>, u64)> {
        let Some(g) = self.graphs.get(graph) else {
            return Ok((Box::new(MemoryCursor::new(Vec::new(), 0)), 0));
        };
        let matches: Vec<_> = g
            .triples
            .iter()
            .filter(|(ts, tp, to)| {
                (s.is_variable() || s == ts)
                    && (p.is_variable() || p == tp)
                    && (o.is_variable() || o == to)
            })
            .cloned()
            .collect();
        let cardinality = matches.len() as u64;
        let skip = match last_read {
            None => 0,
            Some(text) => text
                .parse::<usize>()
                .map_err(|e| ErrorKind::MalformedContinuation.with_source(e))?,
        };
        Ok((Box::new(MemoryCursor::new(matches, skip)), cardinality))
    }

    fn insert(&mut self, quad: &Quad) -> Result<()> {
        self.pending_inserts.push(quad.clone());
        Ok(())
    }

    fn delete(&mut self, quad: &Quad) -> Result<()> {
        self.pending_deletes.push(quad.clone());
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        for (s, p, o, g) in self.pending_inserts.drain(..) {
            let graph = self.graphs.entry(g.into_string()).or_default();
            if !graph.triples.iter().any(|t| *t == (s.clone(), p.clone(), o.clone())) {
                graph.triples.push((s, p, o));
            }
        }
        for (s, p, o, g) in self.pending_deletes.drain(..) {
            if let Some(graph) = self.graphs.get_mut(g.as_str()) {
                graph.triples.retain(|t| *t != (s.clone(), p.clone(), o.clone()));
            }
        }
        Ok(())
    }

    fn abort(&mut self) -> Result<()> {
        self.pending_inserts.clear();
        self.pending_deletes.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(s: &str) -> Term {
        Term::iri_raw(s)
    }

    #[test]
    fn search_filters_by_bound_slots() {
        let mut store = MemoryStore::new();
        store.seed(
            "default",
            vec![
                (t("<a>"), t("<isa>"), t("<Thing>")),
                (t("<b>"), t("<isa>"), t("<Other>")),
            ],
        );
        let (mut cursor, cardinality) = store
            .search("default", &Term::variable("?s"), &t("<isa>"), &Term::variable("?o"), None, None)
            .unwrap();
        assert_eq!(cardinality, 2);
        assert!(cursor.has_next());
        assert_eq!(cursor.next(), Some((t("<a>"), t("<isa>"), t("<Thing>"))));
        assert_eq!(cursor.next(), Some((t("<b>"), t("<isa>"), t("<Other>"))));
        assert_eq!(cursor.next(), None);
    }

    #[test]
    fn search_resumes_after_last_read() {
        let mut store = MemoryStore::new();
        store.seed(
            "default",
            vec![(t("<a>"), t("<isa>"), t("<X>")), (t("<b>"), t("<isa>"), t("<Y>"))],
        );
        let (_cursor, _) = store
            .search("default", &Term::variable("?s"), &t("<isa>"), &Term::variable("?o"), None, None)
            .unwrap();
        let (mut resumed, _) = store
            .search("default", &Term::variable("?s"), &t("<isa>"), &Term::variable("?o"), Some("1"), None)
            .unwrap();
        assert_eq!(resumed.next(), Some((t("<b>"), t("<isa>"), t("<Y>"))));
        assert_eq!(resumed.next(), None);
    }

    #[test]
    fn abort_discards_staged_writes() {
        let mut store = MemoryStore::new();
        store.insert(&(t("<a>"), t("<isa>"), t("<X>"), t("default"))).unwrap();
        store.abort().unwrap();
        store.commit().unwrap();
        assert!(!store.has_graph("default"));
    }

    #[test]
    fn commit_applies_staged_writes_idempotently() {
        let mut store = MemoryStore::new();
        let quad = (t("<a>"), t("<isa>"), t("<X>"), t("default"));
        store.insert(&quad).unwrap();
        store.insert(&quad).unwrap();
        store.commit().unwrap();
        let (mut cursor, cardinality) = store
            .search("default", &Term::variable("?s"), &Term::variable("?p"), &Term::variable("?o"), None, None)
            .unwrap();
        assert_eq!(cardinality, 1);
        assert!(cursor.next().is_some());
        assert_eq!(cursor.next(), None);
    }
}
