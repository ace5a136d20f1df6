// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The SPARQL algebra tree (spec.md §4.3), the input to the
//! logical-to-physical compiler in [`crate::query::compiler`].
//!
//! This is the *parsed* shape of a query: something outside this crate
//! (a SPARQL parser, itself an out-of-scope collaborator per spec.md
//! §1) builds one of these from query text. The compiler never
//! re-parses text except for FILTER/BIND expressions, which arrive
//! here still as source text and are parsed once at compile time by
//! [`crate::expr`].

use crate::path::Path;
use crate::term::Term;

/// One triple pattern slot in a basic graph pattern, which may be a
/// fixed predicate IRI or a property path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PredicateOrPath {
    Predicate(Term),
    Path(Path),
}

/// One element of a basic graph pattern.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlgebraTriple {
    pub subject: Term,
    pub predicate: PredicateOrPath,
    pub object: Term,
}

/// A top-level algebra node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Algebra {
    /// `SELECT` query: a projection wrapping a sub-tree, optionally
    /// followed by `REDUCED`.
    SelectQuery {
        reduced: bool,
        variables: Vec<String>,
        pattern: Box<Algebra>,
    },
    /// `CONSTRUCT` query: a triple template wrapping a sub-tree.
    ConstructQuery {
        template: Vec<AlgebraTriple>,
        pattern: Box<Algebra>,
    },
    /// A basic graph pattern, localized to zero or more named graphs
    /// (empty means the default graph).
    Bgp {
        triples: Vec<AlgebraTriple>,
        graphs: Vec<String>,
    },
    Union(Box<Algebra>, Box<Algebra>),
    Join(Box<Algebra>, Box<Algebra>),
    Filter {
        expression: String,
        pattern: Box<Algebra>,
    },
    /// `BIND(expr AS ?var)`, a.k.a. `Extend` in the SPARQL algebra.
    Extend {
        variable: String,
        expression: String,
        pattern: Box<Algebra>,
    },
}

impl Algebra {
    pub fn bgp(triples: Vec<AlgebraTriple>, graphs: Vec<String>) -> Self {
        Algebra::Bgp { triples, graphs }
    }

    pub fn is_empty_bgp(&self) -> bool {
        matches!(self, Algebra::Bgp { triples, .. } if triples.is_empty())
    }
}
