// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The logical-to-physical compiler (spec.md §4.4, C4): walks a
//! [`Algebra`] tree and produces a [`OperatorNode`] pipeline, ordering
//! each basic graph pattern's joins by ascending cardinality.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::algebra::{Algebra, AlgebraTriple, PredicateOrPath};
use crate::config::GraphConfig;
use crate::expr::{Expr, FunctionRegistry};
use crate::pattern::TriplePattern;
use crate::query::operators::{
    BagUnionOperator, BindOperator, ConstructOperator, FilterOperator, IndexJoinOperator, OperatorNode,
    ProjectionOperator, ReducedOperator, ScanOperator,
};
use crate::query::path_compiler;
use crate::store::StorageAdapter;
use crate::term::Term;
use crate::Result;

/// The graph a BGP targets when its algebra carries no `FROM` clause.
pub const DEFAULT_GRAPH: &str = "default";

/// Compiles `algebra` into a physical pipeline, rooted over `store`.
pub fn compile(
    algebra: &Algebra,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    config: &GraphConfig,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    match algebra {
        Algebra::SelectQuery { reduced, variables, pattern } => {
            let inner = compile(pattern, store, as_of, config, registry)?;
            let projected = OperatorNode::Projection(Box::new(ProjectionOperator::new(inner, variables.clone())));
            Ok(if *reduced {
                OperatorNode::Reduced(Box::new(ReducedOperator::new(projected)))
            } else {
                projected
            })
        }
        Algebra::ConstructQuery { template, pattern } => {
            let inner = compile(pattern, store, as_of, config, registry)?;
            Ok(OperatorNode::Construct(Box::new(ConstructOperator::new(inner, template.clone()))))
        }
        Algebra::Bgp { triples, graphs } => compile_bgp(triples, graphs, store, as_of, config, registry),
        Algebra::Union(left, right) => {
            let l = compile(left, store, as_of, config, registry)?;
            let r = compile(right, store, as_of, config, registry)?;
            Ok(OperatorNode::BagUnion(Box::new(BagUnionOperator::new(l, r))))
        }
        Algebra::Join(left, right) => compile_join(left, right, store, as_of, config, registry),
        Algebra::Filter { expression, pattern } => {
            let inner = compile(pattern, store, as_of, config, registry)?;
            let expr = Expr::parse(expression)?;
            Ok(OperatorNode::Filter(Box::new(FilterOperator::new(inner, expression.clone(), expr, Arc::clone(registry)))))
        }
        Algebra::Extend { variable, expression, pattern } => {
            let expr = Expr::parse(expression)?;
            if pattern.is_empty_bgp() {
                // A standalone BIND: no WHERE-clause rows to iterate, so
                // this becomes a one-shot bind (spec.md §4.4 "an extend
                // over an empty BGP produces a standalone single-tuple
                // bind").
                Ok(OperatorNode::Bind(Box::new(BindOperator::new(None, variable.clone(), expr, Arc::clone(registry)))))
            } else {
                let inner = compile(pattern, store, as_of, config, registry)?;
                Ok(OperatorNode::Bind(Box::new(BindOperator::new(Some(inner), variable.clone(), expr, Arc::clone(registry)))))
            }
        }
    }
}

/// Joins between two sub-BGPs are realized by concatenating the triple
/// lists and re-running the BGP compiler, preserving the selectivity
/// ordering (spec.md §4.4); any other combination compiles each side
/// independently and glues them with a plain index-nested-loop join.
fn compile_join(
    left: &Algebra,
    right: &Algebra,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    config: &GraphConfig,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    if let (Algebra::Bgp { triples: lt, graphs: lg }, Algebra::Bgp { triples: rt, graphs: rg }) = (left, right) {
        let mut triples = lt.clone();
        triples.extend(rt.iter().cloned());
        let graphs = if lg.is_empty() { rg.clone() } else { lg.clone() };
        return compile_bgp(&triples, &graphs, store, as_of, config, registry);
    }
    let l = compile(left, store, as_of, config, registry)?;
    let r = compile(right, store, as_of, config, registry)?;
    Ok(OperatorNode::IndexJoin(Box::new(IndexJoinOperator::new(l, r))))
}

fn compile_bgp(
    triples: &[AlgebraTriple],
    graphs: &[String],
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    config: &GraphConfig,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    if triples.is_empty() {
        return Ok(OperatorNode::Empty);
    }
    let targets: Vec<String> = if graphs.is_empty() { vec![DEFAULT_GRAPH.to_string()] } else { graphs.to_vec() };
    let mut targets = targets.into_iter();
    let first = targets.next().expect("at least one target graph");
    let mut pipeline = compile_bgp_over_graph(triples, &first, store, as_of, config, registry)?;
    for graph in targets {
        let branch = compile_bgp_over_graph(triples, &graph, store, as_of, config, registry)?;
        pipeline = OperatorNode::BagUnion(Box::new(BagUnionOperator::new(pipeline, branch)));
    }
    Ok(pipeline)
}

/// Orders `triples` by ascending cardinality, preferring the next
/// pattern connected to the variables already bound, and left-deep
/// joins them (spec.md §4.4).
fn compile_bgp_over_graph(
    triples: &[AlgebraTriple],
    graph: &str,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    config: &GraphConfig,
    registry: &Arc<FunctionRegistry>,
) -> Result<OperatorNode> {
    let mut remaining = Vec::with_capacity(triples.len());
    for triple in triples {
        let cardinality = estimate_triple_cardinality(triple, graph, store, as_of, config.max_depth)?;
        remaining.push((triple.clone(), cardinality));
    }
    remaining.sort_by_key(|(_, cardinality)| *cardinality);

    let (first, _) = remaining.remove(0);
    let mut bound: BTreeSet<String> = triple_variables(&first).into_iter().collect();
    let mut pipeline = compile_triple(&first, graph, store, as_of, registry, config.max_depth)?;

    while !remaining.is_empty() {
        let next_index = remaining
            .iter()
            .position(|(triple, _)| triple_variables(triple).iter().any(|v| bound.contains(v)))
            .unwrap_or(0);
        let (next_triple, _) = remaining.remove(next_index);
        let next_node = compile_triple(&next_triple, graph, store, as_of, registry, config.max_depth)?;
        bound.extend(triple_variables(&next_triple));
        pipeline = OperatorNode::IndexJoin(Box::new(IndexJoinOperator::new(pipeline, next_node)));
    }
    Ok(pipeline)
}

fn triple_variables(triple: &AlgebraTriple) -> Vec<String> {
    let mut vars = Vec::new();
    if triple.subject.is_variable() {
        vars.push(triple.subject.as_str().to_string());
    }
    if let PredicateOrPath::Predicate(p) = &triple.predicate {
        if p.is_variable() {
            vars.push(p.as_str().to_string());
        }
    }
    if triple.object.is_variable() {
        vars.push(triple.object.as_str().to_string());
    }
    vars
}

fn estimate_triple_cardinality(
    triple: &AlgebraTriple,
    graph: &str,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    max_depth: u32,
) -> Result<u64> {
    match &triple.predicate {
        PredicateOrPath::Predicate(p) => {
            if !store.has_graph(graph) {
                return Ok(0);
            }
            let (_, cardinality) = store.search(graph, &triple.subject, p, &triple.object, None, as_of)?;
            Ok(cardinality)
        }
        PredicateOrPath::Path(path) => path_compiler::estimate_cardinality(path, graph, store, as_of, max_depth),
    }
}

fn compile_triple(
    triple: &AlgebraTriple,
    graph: &str,
    store: &dyn StorageAdapter,
    as_of: Option<&str>,
    registry: &Arc<FunctionRegistry>,
    max_depth: u32,
) -> Result<OperatorNode> {
    match &triple.predicate {
        PredicateOrPath::Predicate(p) => {
            let pattern = TriplePattern::new(triple.subject.clone(), p.clone(), triple.object.clone(), Term::iri_raw(graph.to_string()));
            Ok(OperatorNode::Scan(ScanOperator::new(pattern, store, as_of.map(String::from), None)?))
        }
        PredicateOrPath::Path(path) => path_compiler::compile(path, &triple.subject, &triple.object, graph, store, as_of, max_depth, registry),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::memory::MemoryStore;
    use crate::term::Mapping;
    use std::task::Poll;

    fn drain(mut node: OperatorNode, store: &dyn StorageAdapter) -> Vec<Mapping> {
        let mut out = Vec::new();
        loop {
            match node.next(store).unwrap() {
                Poll::Ready(Some(mu)) => out.push(mu),
                Poll::Ready(None) => break,
                Poll::Pending => continue,
            }
        }
        out
    }

    fn seeded_store() -> MemoryStore {
        let mut store = MemoryStore::new();
        store.seed(
            DEFAULT_GRAPH,
            vec![
                (Term::iri("http://a"), Term::iri("http://isa"), Term::iri("http://Thing")),
                (Term::iri("http://b"), Term::iri("http://isa"), Term::iri("http://Thing")),
                (Term::iri("http://donald"), Term::iri("http://isa"), Term::new("\"duck\"")),
            ],
        );
        store
    }

    #[test]
    fn select_query_projects_and_collects_all_bindings() {
        let store = seeded_store();
        let registry = Arc::new(FunctionRegistry::new());
        let algebra = Algebra::SelectQuery {
            reduced: false,
            variables: vec!["?s".to_string()],
            pattern: Box::new(Algebra::bgp(
                vec![AlgebraTriple {
                    subject: Term::variable("?s"),
                    predicate: PredicateOrPath::Predicate(Term::iri("http://isa")),
                    object: Term::variable("?o"),
                }],
                vec![],
            )),
        };
        let node = compile(&algebra, &store, None, &GraphConfig::default(), &registry).unwrap();
        let results = drain(node, &store);
        assert_eq!(results.len(), 3);
        for mu in &results {
            assert!(mu.get("?s").is_some());
            assert!(mu.get("?o").is_none(), "projection must drop unselected variables");
        }
    }

    #[test]
    fn empty_bgp_bind_yields_exactly_one_mapping() {
        let store = seeded_store();
        let registry = Arc::new(FunctionRegistry::new());
        let algebra = Algebra::Extend {
            variable: "?x".to_string(),
            expression: "1".to_string(),
            pattern: Box::new(Algebra::bgp(vec![], vec![])),
        };
        let node = compile(&algebra, &store, None, &GraphConfig::default(), &registry).unwrap();
        let results = drain(node, &store);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("?x").unwrap().as_str(), "1");
    }

    #[test]
    fn join_through_bind_computed_md5_iri() {
        let mut store = seeded_store();
        store.seed(
            DEFAULT_GRAPH,
            vec![(
                Term::iri("http://c2fa74d2d092e3519266a8eb34824559"),
                Term::iri("http://source"),
                Term::iri("http://origin"),
            )],
        );
        let registry = Arc::new(FunctionRegistry::new());
        let bgp = Algebra::bgp(
            vec![AlgebraTriple {
                subject: Term::iri("http://donald"),
                predicate: PredicateOrPath::Predicate(Term::iri("http://isa")),
                object: Term::new("\"duck\""),
            }],
            vec![],
        );
        let bound = Algebra::Extend {
            variable: "?md5".to_string(),
            expression: r#"URI(CONCAT("http://", MD5(CONCAT(STR(<http://donald>), STR(<http://isa>), STR("duck")))))"#.to_string(),
            pattern: Box::new(bgp),
        };
        let joined = Algebra::Join(
            Box::new(bound),
            Box::new(Algebra::bgp(
                vec![AlgebraTriple {
                    subject: Term::variable("?md5"),
                    predicate: PredicateOrPath::Predicate(Term::iri("http://source")),
                    object: Term::variable("?o1"),
                }],
                vec![],
            )),
        );
        let node = compile(&joined, &store, None, &GraphConfig::default(), &registry).unwrap();
        let results = drain(node, &store);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].get("?o1"), Some(&Term::iri("http://origin")));
    }
}
