// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! RDF terms, carried through the pipeline as opaque N3-encoded text
//! (spec.md §3, "RDF term (string-encoded)").
//!
//! The engine never parses a term into a typed IRI/Literal/BlankNode
//! value for its own sake; that's the job of the out-of-scope term
//! parser/printer (spec.md §1). Operators pass N3 text straight through,
//! and only [`crate::expr`] reconstructs typing, on demand, to evaluate
//! FILTER/BIND expressions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single RDF term or a SPARQL variable, in N3 lexical form.
///
/// A variable is any term whose text starts with `?`. This mirrors the
/// convention used throughout the pipeline: the same slot in a triple
/// pattern can hold either a bound term or a variable, and which one it
/// is is a property of the text, not of the type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term(String);

impl Term {
    pub fn new(n3: impl Into<String>) -> Self {
        Term(n3.into())
    }

    pub fn variable(name: &str) -> Self {
        debug_assert!(name.starts_with('?'), "variable terms start with '?'");
        Term(name.to_string())
    }

    pub fn iri(iri: &str) -> Self {
        Term(format!("<{iri}>"))
    }

    /// An IRI given already wrapped in `<...>`, or bare — accepts either,
    /// since scans read bare IRI text off the wire per spec.md §3.
    pub fn iri_raw(text: impl Into<String>) -> Self {
        Term(text.into())
    }

    pub fn is_variable(&self) -> bool {
        self.0.starts_with('?')
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for Term {
    fn from(s: String) -> Self {
        Term(s)
    }
}

impl From<&str> for Term {
    fn from(s: &str) -> Self {
        Term(s.to_string())
    }
}

/// A solution mapping µ: an unordered map from variable name (with
/// leading `?`) to term text (spec.md §3).
///
/// Backed by a `BTreeMap` rather than a `HashMap` so that two mappings
/// built from the same bindings always iterate in the same order; this
/// gives [`crate::query::operators::set_ops::ReducedOperator`] a canonical
/// string form for free and makes continuation frames byte-stable across
/// encodings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping(BTreeMap<String, Term>);

impl Mapping {
    pub fn new() -> Self {
        Mapping(BTreeMap::new())
    }

    pub fn get(&self, var: &str) -> Option<&Term> {
        self.0.get(var)
    }

    pub fn contains(&self, var: &str) -> bool {
        self.0.contains_key(var)
    }

    pub fn insert(&mut self, var: impl Into<String>, value: Term) {
        self.0.insert(var.into(), value);
    }

    pub fn with(mut self, var: impl Into<String>, value: Term) -> Self {
        self.insert(var, value);
        self
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Term)> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Resolve a pattern slot: if `term` is a variable bound in this
    /// mapping, return its value; otherwise return `term` unchanged.
    ///
    /// Mirrors `find_in_mappings` in the original `sage-engine` source.
    pub fn resolve(&self, term: &Term) -> Term {
        if term.is_variable() {
            self.0.get(term.as_str()).cloned().unwrap_or_else(|| term.clone())
        } else {
            term.clone()
        }
    }

    /// Merge another mapping into this one. The engine assumes
    /// compatibility by construction (spec.md §3: "only joined variables
    /// are ever shared") and does not re-check at merge time.
    pub fn merged_with(&self, other: &Mapping) -> Mapping {
        let mut merged = self.0.clone();
        for (k, v) in other.0.iter() {
            merged.insert(k.clone(), v.clone());
        }
        Mapping(merged)
    }

    pub fn restrict_to(&self, vars: &[String]) -> Mapping {
        let mut out = BTreeMap::new();
        for var in vars {
            if let Some(v) = self.0.get(var) {
                out.insert(var.clone(), v.clone());
            }
        }
        Mapping(out)
    }

    /// Canonical string form used to key the REDUCED distinct set
    /// (spec.md §4.2 "Distinct-by-REDUCED"). Relies on `BTreeMap`'s
    /// sorted iteration for determinism.
    pub fn canonical_key(&self) -> String {
        let mut key = String::new();
        for (k, v) in self.0.iter() {
            key.push_str(k);
            key.push(':');
            key.push_str(v.as_str());
            key.push('\u{1f}');
        }
        key
    }
}

impl FromIterator<(String, Term)> for Mapping {
    fn from_iter<I: IntoIterator<Item = (String, Term)>>(iter: I) -> Self {
        Mapping(iter.into_iter().collect())
    }
}

impl IntoIterator for Mapping {
    type Item = (String, Term);
    type IntoIter = std::collections::btree_map::IntoIter<String, Term>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}
