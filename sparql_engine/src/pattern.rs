// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Triple patterns (spec.md §3).

use crate::term::{Mapping, Term};

/// A triple pattern localized to a named graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriplePattern {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    pub graph: Term,
}

impl TriplePattern {
    pub fn new(subject: Term, predicate: Term, object: Term, graph: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph,
        }
    }

    /// Which slots of this pattern are variables, in (subject, predicate,
    /// object) order. Mirrors `vars_positions` in the original source.
    pub fn variable_positions(&self) -> [Option<&str>; 3] {
        [
            self.subject.is_variable().then(|| self.subject.as_str()),
            self.predicate.is_variable().then(|| self.predicate.as_str()),
            self.object.is_variable().then(|| self.object.as_str()),
        ]
    }

    /// Build the solution mapping produced by matching `triple` against
    /// this pattern's variable positions. Mirrors `selection` in the
    /// original source.
    pub fn select(&self, triple: (&Term, &Term, &Term)) -> Mapping {
        let mut mu = Mapping::new();
        if self.subject.is_variable() {
            mu.insert(self.subject.as_str().to_string(), triple.0.clone());
        }
        if self.predicate.is_variable() {
            mu.insert(self.predicate.as_str().to_string(), triple.1.clone());
        }
        if self.object.is_variable() {
            mu.insert(self.object.as_str().to_string(), triple.2.clone());
        }
        mu
    }

    /// Substitute any slot bound in `binding` with its value, producing
    /// the concrete (possibly still partly variable) pattern to search
    /// for. Mirrors `find_in_mappings` applied to each slot in `scan.py`.
    pub fn substitute(&self, binding: &Mapping) -> TriplePattern {
        TriplePattern {
            subject: binding.resolve(&self.subject),
            predicate: binding.resolve(&self.predicate),
            object: binding.resolve(&self.object),
            graph: self.graph.clone(),
        }
    }

    pub fn variables(&self) -> Vec<String> {
        self.variable_positions()
            .into_iter()
            .flatten()
            .map(|s| s.to_string())
            .collect()
    }
}
