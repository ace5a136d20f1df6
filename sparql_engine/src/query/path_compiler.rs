// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The property-path compiler (spec.md §4.3, C3): rewrites a [`Path`]
//! expression into a pipeline of [`OperatorNode`]s.
//!
//! Unlike the original's literal stack of `D+1` pre-built inner
//! iterators, the transitive-closure branch here hands
//! [`TransitiveClosureOperator`] a `build_inner` closure that compiles
//! one step on demand as the depth-first stack grows — the operator
//! doesn't know or care that its steps come from this module.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::expr::FunctionRegistry;
use crate::path::{Path, PathMod};
use crate::pattern::TriplePattern;
use crate::query::operators::{
    BagUnionOperator, FilterOperator, OperatorNode, PathCollectorOperator, ReflexiveClosureOperator,
    ScanOperator, TransitiveClosureOperator, STEP_VAR,
};
use crate::store::StorageAdapter;
use crate::term::Term;
use crate::{ErrorKind, Result};

/// Compiles `path` between `subject` and `object`, localized to `graph`,
/// into a physical operator tree (spec.md §4.3 "Rules").
#[allow(clippy::too_many_arguments)]
pub fn compile(
    path: &Path,
    subject: &Term,
    object: &Term,
    graph: &str,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    max_depth: u32,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    match path {
        Path::Iri(predicate) => compile_iri(predicate, subject, object, graph, store, as_of),
        Path::Inverse(inner) => compile(inner, object, subject, graph, store, as_of, max_depth, registry),
        Path::Sequence(left, right) => {
            compile_sequence(left, right, subject, object, graph, store, as_of, max_depth, registry)
        }
        Path::Alternative(left, right) => {
            let l = compile(left, subject, object, graph, store, as_of, max_depth, registry)?;
            let r = compile(right, subject, object, graph, store, as_of, max_depth, registry)?;
            Ok(union(l, r))
        }
        Path::NegatedPropertySet(excluded) => {
            compile_negated(excluded, subject, object, graph, store, as_of, registry)
        }
        Path::Mul(modifier, inner) => {
            compile_mul(*modifier, inner, subject, object, graph, store, as_of, max_depth, registry)
        }
    }
}

/// Wraps `closure` (a `Mul(+|*, _)` compilation) so the frontier nodes
/// it truncates at `max_depth` are exposed to the client as control
/// tuples (spec.md §4.2 "Path collector"). Called by the logical
/// compiler, not by [`compile`] itself — a bare path sub-expression
/// used inside a larger BGP isn't collected, only a top-level path
/// triple pattern is.
pub fn with_path_collector(closure: OperatorNode, pattern: String, context: String, max_results: usize) -> OperatorNode {
    OperatorNode::PathCollector(Box::new(PathCollectorOperator::new(closure, pattern, context, max_results)))
}

fn union(left: OperatorNode, right: OperatorNode) -> OperatorNode {
    OperatorNode::BagUnion(Box::new(BagUnionOperator::new(left, right)))
}

fn compile_iri(
    predicate: &Term,
    subject: &Term,
    object: &Term,
    graph: &str,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
) -> Result<OperatorNode> {
    let pattern = TriplePattern::new(subject.clone(), predicate.clone(), object.clone(), Term::iri_raw(graph.to_string()));
    let scan = ScanOperator::new(pattern, store, as_of.map(String::from), None)?;
    Ok(OperatorNode::Scan(scan))
}

#[allow(clippy::too_many_arguments)]
fn compile_sequence(
    left: &Path,
    right: &Path,
    subject: &Term,
    object: &Term,
    graph: &str,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    max_depth: u32,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    let mid = fresh_var("seq");
    // Forward unless the left endpoint is a free variable and the right
    // is bound (spec.md §4.3 "Direction choice rule").
    let (outer, inner) = if subject.is_variable() && !object.is_variable() {
        let outer = compile(right, &mid, object, graph, store, as_of, max_depth, registry)?;
        let inner = compile(left, subject, &mid, graph, store, as_of, max_depth, registry)?;
        (outer, inner)
    } else {
        let outer = compile(left, subject, &mid, graph, store, as_of, max_depth, registry)?;
        let inner = compile(right, &mid, object, graph, store, as_of, max_depth, registry)?;
        (outer, inner)
    };
    Ok(OperatorNode::IndexJoin(Box::new(crate::query::operators::IndexJoinOperator::new(outer, inner))))
}

fn compile_negated(
    excluded: &[Path],
    subject: &Term,
    object: &Term,
    graph: &str,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    let mut iris = Vec::with_capacity(excluded.len());
    for p in excluded {
        match p {
            Path::Iri(t) => iris.push(t.as_str().trim_start_matches('<').trim_end_matches('>').to_string()),
            _ => {
                return Err(ErrorKind::UnsupportedSparql
                    .with_message("reverse-negated property-set elements are not supported"))
            }
        }
    }
    let pred_var = fresh_var("negpred");
    let scan = compile_iri(&pred_var, subject, object, graph, store, as_of)?;
    let clauses: Vec<String> = iris.iter().map(|iri| format!("{} != <{iri}>", pred_var.as_str())).collect();
    let expr_text = if clauses.is_empty() { "true".to_string() } else { clauses.join(" && ") };
    let expr = crate::expr::Expr::parse(&expr_text)?;
    Ok(OperatorNode::Filter(Box::new(FilterOperator::new(scan, expr_text, expr, Arc::clone(registry)))))
}

#[allow(clippy::too_many_arguments)]
fn compile_mul(
    modifier: PathMod,
    inner: &Path,
    subject: &Term,
    object: &Term,
    graph: &str,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    max_depth: u32,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    match modifier {
        // `p?`: a single structural rewrite, not the iterative-deepening
        // machinery (spec.md §8 "a? over endpoints (s,o) equals
        // (a | reflexive-at-s-o)").
        PathMod::Optional => {
            let hop = compile(inner, subject, object, graph, store, as_of, max_depth, registry)?;
            let refl = reflexive_closure(subject, object, graph, store, as_of)?;
            Ok(union(hop, refl))
        }
        PathMod::OneOrMore => compile_transitive(inner, subject, object, graph, store, as_of, max_depth, 1, registry),
        PathMod::ZeroOrMore => {
            let tc = compile_transitive(inner, subject, object, graph, store, as_of, max_depth, 0, registry)?;
            let refl = reflexive_closure(subject, object, graph, store, as_of)?;
            Ok(union(tc, refl))
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn compile_transitive(
    inner: &Path,
    subject: &Term,
    object: &Term,
    graph: &str,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    max_depth: u32,
    min_depth: u32,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    if subject.is_variable() && object.is_variable() {
        // Neither endpoint anchors a single start node: enumerate every
        // distinct node in the graph as a candidate source and union
        // their closures. This trades some resumption granularity (the
        // branches are chosen once, at compile time) for reusing the
        // same bounded-DFS operator rather than a second algorithm.
        let nodes = distinct_nodes(graph, store, as_of)?;
        let mut acc: Option<OperatorNode> = None;
        for node in nodes {
            let branch = build_transitive(
                inner,
                node,
                Some(subject.as_str().to_string()),
                Some(object.as_str().to_string()),
                None,
                true,
                graph,
                as_of,
                max_depth,
                min_depth,
                registry,
            );
            acc = Some(match acc {
                None => branch,
                Some(existing) => union(existing, branch),
            });
        }
        return Ok(acc.unwrap_or(OperatorNode::Empty));
    }
    if !subject.is_variable() {
        Ok(build_transitive(
            inner,
            subject.clone(),
            None,
            object.is_variable().then(|| object.as_str().to_string()),
            (!object.is_variable()).then(|| object.clone()),
            true,
            graph,
            as_of,
            max_depth,
            min_depth,
            registry,
        ))
    } else {
        Ok(build_transitive(
            inner,
            object.clone(),
            None,
            Some(subject.as_str().to_string()),
            None,
            false,
            graph,
            as_of,
            max_depth,
            min_depth,
            registry,
        ))
    }
}

#[allow(clippy::too_many_arguments)]
fn build_transitive(
    inner: &Path,
    source: Term,
    source_var: Option<String>,
    destination_var: Option<String>,
    destination_bound: Option<Term>,
    forward: bool,
    graph: &str,
    as_of: Option<&str>,
    max_depth: u32,
    min_depth: u32,
    registry: &Arc<FunctionRegistry>,
) -> OperatorNode {
    let inner_path = inner.clone();
    let graph_owned = graph.to_string();
    let as_of_owned = as_of.map(|s| s.to_string());
    let registry = Arc::clone(registry);
    let build_inner: Arc<dyn Fn(&Term, &dyn StorageAdapter) -> Result<OperatorNode> + Send + Sync> =
        Arc::new(move |node: &Term, store: &dyn StorageAdapter| {
            let step = Term::variable(STEP_VAR);
            let (s, o) = if forward { (node.clone(), step) } else { (step, node.clone()) };
            compile(&inner_path, &s, &o, &graph_owned, store, as_of_owned.as_deref(), max_depth, &registry)
        });
    OperatorNode::TransitiveClosure(Box::new(TransitiveClosureOperator::new(
        build_inner,
        source,
        source_var,
        destination_var,
        destination_bound,
        min_depth,
        max_depth,
    )))
}

/// Builds the reflexive-closure branch for `subject`/`object`, resolving
/// the candidate node set per spec.md §4.2 "Reflexive closure": the
/// bound endpoint's value, or (when both are variables) every distinct
/// node appearing in the graph.
fn reflexive_closure(subject: &Term, object: &Term, graph: &str, store: &dyn StorageAdapter, as_of: Option<&str>) -> Result<OperatorNode> {
    let nodes = if !subject.is_variable() {
        vec![subject.clone()]
    } else if !object.is_variable() {
        vec![object.clone()]
    } else {
        distinct_nodes(graph, store, as_of)?
    };
    Ok(OperatorNode::ReflexiveClosure(Box::new(ReflexiveClosureOperator::new(subject, object, nodes))))
}

fn distinct_nodes(graph: &str, store: &dyn StorageAdapter, as_of: Option<&str>) -> Result<Vec<Term>> {
    if !store.has_graph(graph) {
        return Ok(Vec::new());
    }
    let (mut cursor, _) = store.search(
        graph,
        &Term::variable("?__refl_s"),
        &Term::variable("?__refl_p"),
        &Term::variable("?__refl_o"),
        None,
        as_of,
    )?;
    let mut nodes = BTreeSet::new();
    while cursor.has_next() {
        let Some((s, _p, o)) = cursor.next() else { break };
        nodes.insert(s);
        nodes.insert(o);
    }
    Ok(nodes.into_iter().collect())
}

/// Recursive selectivity estimate for a path expression (spec.md §4.3
/// "Selectivity estimate for a path"), used by the logical compiler's
/// join ordering when a BGP triple's predicate is a path rather than a
/// fixed IRI.
pub fn estimate_cardinality(path: &Path, graph: &str, store: &dyn StorageAdapter, as_of: Option<&str>, max_depth: u32) -> Result<u64> {
    match path {
        Path::Iri(predicate) => scan_cardinality(predicate, graph, store, as_of),
        Path::Inverse(inner) => estimate_cardinality(inner, graph, store, as_of, max_depth),
        Path::Sequence(l, r) => {
            let lc = estimate_cardinality(l, graph, store, as_of, max_depth)?;
            let rc = estimate_cardinality(r, graph, store, as_of, max_depth)?;
            Ok(lc.min(rc))
        }
        Path::Alternative(l, r) => {
            let lc = estimate_cardinality(l, graph, store, as_of, max_depth)?;
            let rc = estimate_cardinality(r, graph, store, as_of, max_depth)?;
            Ok(lc.saturating_add(rc))
        }
        Path::NegatedPropertySet(_) => scan_cardinality(&Term::variable("?__card_pred"), graph, store, as_of),
        Path::Mul(_, inner) => {
            let base = estimate_cardinality(inner, graph, store, as_of, max_depth)?;
            Ok(base.saturating_mul(max_depth.max(1) as u64))
        }
    }
}

fn scan_cardinality(predicate: &Term, graph: &str, store: &dyn StorageAdapter, as_of: Option<&str>) -> Result<u64> {
    if !store.has_graph(graph) {
        return Ok(0);
    }
    let (_, cardinality) = store.search(
        graph,
        &Term::variable("?__card_s"),
        predicate,
        &Term::variable("?__card_o"),
        None,
        as_of,
    )?;
    Ok(cardinality)
}

fn fresh_var(prefix: &str) -> Term {
    use std::sync::atomic::{AtomicU64, Ordering};
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let id = COUNTER.fetch_add(1, Ordering::Relaxed);
    Term::variable(&format!("?__{prefix}_{id}"))
}
