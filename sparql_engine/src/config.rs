// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Per-graph configuration (spec.md §6).
//!
//! This is a plain value type, not a loader — configuration *loading* is
//! an out-of-scope named collaborator (spec.md §1). Something outside
//! this crate (a config file, environment variables, a CLI flag) builds
//! a `GraphConfig` and hands it to the session manager.

/// The isolation level used by update operators (spec.md §4.7, §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consistency {
    /// Per-row atomicity: each WHERE-clause solution's delete+insert pair
    /// applies atomically, independent of the others.
    AtomicPerRow,
    /// Either every row's delete+insert applies, or the whole update
    /// aborts and none applies (spec.md §8 "Update atomicity").
    Serializable,
    /// The whole quantum's writes commit atomically, or none do
    /// (spec.md §5 "Cancellation and timeouts").
    AtomicPerQuantum,
}

impl Default for Consistency {
    fn default() -> Self {
        Consistency::Serializable
    }
}

/// Options recognized per graph (spec.md §6 table).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GraphConfig {
    /// Per-request quantum, in milliseconds.
    pub quota_ms: u64,
    /// Per-request result cap.
    pub max_results: usize,
    /// Transitive-closure depth bound `D` (spec.md §4.2, §9(d): default 10).
    pub max_depth: u32,
    /// Update isolation level.
    pub consistency: Consistency,
    /// Whether continuations are returned as raw bytes (`true`) or as an
    /// opaque plan ID backed by server-side storage (`false`).
    pub stateless: bool,
}

impl Default for GraphConfig {
    fn default() -> Self {
        GraphConfig {
            quota_ms: 1_000,
            max_results: 10_000,
            max_depth: 10,
            consistency: Consistency::Serializable,
            stateless: true,
        }
    }
}
