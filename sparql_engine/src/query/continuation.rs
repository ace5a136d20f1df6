// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The continuation frame tree (spec.md §5, C5).
//!
//! A [`Frame`] is the serializable twin of an [`super::operators::OperatorNode`]:
//! every physical operator's `save()` produces exactly one `Frame`
//! variant, and the plan compiler can rebuild a live operator from a
//! frame plus the original algebra it was compiled from. Encoded with
//! `serde_json`, the same serialization idiom the rest of this crate's
//! JSON-shaped wire types use.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::term::Mapping;
use crate::{ErrorKind, Result};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "op")]
pub enum Frame {
    Scan {
        last_read: Option<String>,
    },
    Join {
        left: Box<Frame>,
        right: Box<Frame>,
        current_binding: Option<Mapping>,
    },
    Union {
        left: Box<Frame>,
        right: Box<Frame>,
    },
    Projection {
        child: Box<Frame>,
    },
    Reduced {
        child: Box<Frame>,
        seen: BTreeSet<String>,
    },
    Filter {
        child: Box<Frame>,
        pending: Option<Mapping>,
    },
    Bind {
        child: Option<Box<Frame>>,
        delivered: bool,
    },
    Construct {
        child: Box<Frame>,
        accumulated: Vec<(String, String, String)>,
    },
    ReflexiveClosure {
        remaining: Vec<String>,
        emitted: BTreeSet<String>,
    },
    TransitiveClosure {
        stack: Vec<ClosureFrame>,
        visited: BTreeSet<String>,
        complete: bool,
    },
    PathCollector {
        child: Box<Frame>,
        buffer: Vec<ControlTuple>,
    },
    SingleTuple {
        delivered: bool,
    },
    Empty,
}

/// One level of the transitive-closure depth-first stack (spec.md §4.2
/// "Transitive closure"): the inner path operator at depth `k`, plus
/// the node it was last reparameterized with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClosureFrame {
    pub depth: u32,
    pub node: String,
    pub inner: Box<Frame>,
}

/// A deduplicated path-frontier entry reported by the piggyback
/// collector (spec.md §4.2 "Path collector").
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub struct ControlTuple {
    pub pattern: String,
    pub context: String,
    pub node: String,
    pub depth: u32,
    pub is_frontier: bool,
}

impl Frame {
    pub fn encode(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(self).map_err(|e| ErrorKind::MalformedContinuation.with_source(e))
    }

    pub fn decode(bytes: &[u8]) -> Result<Frame> {
        serde_json::from_slice(bytes).map_err(|e| ErrorKind::MalformedContinuation.with_source(e))
    }
}
