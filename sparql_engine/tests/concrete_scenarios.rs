// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The six numbered end-to-end scenarios: a five-triple `?s <http://isa>
//! ?o` graph (one `http://donald <http://isa> "duck"`), plus a
//! `<md5(s,p,o)> <http://source> ?o1` scaffold triple per subject,
//! driven through [`Engine::run`] the way a caller actually would.

use std::sync::Arc;

use sparql_engine::algebra::{Algebra, AlgebraTriple, PredicateOrPath};
use sparql_engine::config::GraphConfig;
use sparql_engine::expr::FunctionRegistry;
use sparql_engine::query::session::InMemoryPlanStore;
use sparql_engine::query::{Engine, Request};
use sparql_engine::store::memory::MemoryStore;
use sparql_engine::store::StorageAdapter;
use sparql_engine::term::Term;

const GRAPH: &str = "default";

/// The five `?s <http://isa> ?o` subjects, in seed order.
const SUBJECTS: [(&str, &str); 5] = [
    ("http://s1", "http://Thing"),
    ("http://s2", "http://Thing"),
    ("http://s3", "http://Thing"),
    ("http://s4", "http://Thing"),
    ("http://donald", "\"duck\""),
];

fn md5_hex(parts: &[&str]) -> String {
    use md5::{Digest, Md5};
    let mut hasher = Md5::new();
    hasher.update(parts.concat().as_bytes());
    format!("{:x}", hasher.finalize())
}

fn n3_str(t: &Term) -> String {
    let s = t.as_str();
    if let Some(inner) = s.strip_prefix('<').and_then(|r| r.strip_suffix('>')) {
        return inner.to_string();
    }
    if let Some(rest) = s.strip_prefix('"') {
        if let Some(end) = rest.rfind('"') {
            return rest[..end].to_string();
        }
    }
    s.to_string()
}

fn object_term(o: &str) -> Term {
    if o.starts_with('"') {
        Term::new(o)
    } else {
        Term::iri(o)
    }
}

fn seeded_store() -> MemoryStore {
    let mut store = MemoryStore::new();
    for (s, o) in SUBJECTS {
        store.seed(GRAPH, vec![(Term::iri(s), Term::iri("http://isa"), object_term(o))]);
        let md5 = md5_hex(&[s, "http://isa", &n3_str(&object_term(o))]);
        store.seed(GRAPH, vec![(Term::iri(&format!("http://{md5}")), Term::iri("http://source"), Term::iri("http://origin"))]);
    }
    store
}

fn drain_all(engine: &Engine, request: Request, store: &mut dyn StorageAdapter, plans: &InMemoryPlanStore) -> Vec<sparql_engine::term::Mapping> {
    let algebra = request.algebra.clone();
    let mut next = request.next;
    let mut bindings = Vec::new();
    loop {
        let response = engine.run(Request { algebra: algebra.clone(), default_graph_uri: None, next }, store, plans).unwrap();
        bindings.extend(response.bindings);
        if !response.has_next {
            break;
        }
        next = response.next;
    }
    bindings
}

fn select_all_isa() -> Algebra {
    Algebra::SelectQuery {
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
    }
}

/// Scenario 1: `SELECT ?s WHERE { ?s <http://isa> ?o }`.
#[test]
fn scenario_1_select_all_subjects_yields_five_bindings_with_no_duplicates() {
    let mut store = seeded_store();
    let engine = Engine::new(GraphConfig::default(), Arc::new(FunctionRegistry::new()));
    let plans = InMemoryPlanStore::new();
    let request = Request { algebra: select_all_isa(), default_graph_uri: None, next: None };
    let bindings = drain_all(&engine, request, &mut store, &plans);
    assert_eq!(bindings.len(), 5);
    let mut subjects: Vec<String> = bindings.iter().map(|mu| mu.get("?s").unwrap().as_str().to_string()).collect();
    subjects.sort();
    subjects.dedup();
    assert_eq!(subjects.len(), 5, "no duplicate subjects");
}

fn md5_bind_expression() -> String {
    r#"URI(CONCAT("http://", MD5(CONCAT(STR(?s), STR(<http://isa>), STR(?o)))))"#.to_string()
}

fn select_md5_from_isa() -> Algebra {
    Algebra::SelectQuery {
        reduced: false,
        variables: vec!["?md5".to_string()],
        pattern: Box::new(Algebra::Extend {
            variable: "?md5".to_string(),
            expression: md5_bind_expression(),
            pattern: Box::new(Algebra::bgp(
                vec![AlgebraTriple {
                    subject: Term::variable("?s"),
                    predicate: PredicateOrPath::Predicate(Term::iri("http://isa")),
                    object: Term::variable("?o"),
                }],
                vec![],
            )),
        }),
    }
}

/// Scenario 2: binding `?md5` to the MD5-derived IRI for every `isa` row.
#[test]
fn scenario_2_md5_bind_select_yields_five_computed_iris() {
    let mut store = seeded_store();
    let engine = Engine::new(GraphConfig::default(), Arc::new(FunctionRegistry::new()));
    let plans = InMemoryPlanStore::new();
    let request = Request { algebra: select_md5_from_isa(), default_graph_uri: None, next: None };
    let bindings = drain_all(&engine, request, &mut store, &plans);
    assert_eq!(bindings.len(), 5);

    let mut expected: Vec<String> = SUBJECTS
        .iter()
        .map(|(s, o)| Term::iri(&format!("http://{}", md5_hex(&[s, "http://isa", &n3_str(&object_term(o))]))).as_str().to_string())
        .collect();
    expected.sort();
    let mut actual: Vec<String> = bindings.iter().map(|mu| mu.get("?md5").unwrap().as_str().to_string()).collect();
    actual.sort();
    assert_eq!(actual, expected);
}

fn select_md5_join() -> Algebra {
    Algebra::SelectQuery {
        reduced: false,
        variables: vec!["?o1".to_string()],
        pattern: Box::new(Algebra::Join(
            Box::new(Algebra::Extend {
                variable: "?md5".to_string(),
                expression: md5_bind_expression(),
                pattern: Box::new(Algebra::bgp(
                    vec![AlgebraTriple {
                        subject: Term::variable("?s"),
                        predicate: PredicateOrPath::Predicate(Term::iri("http://isa")),
                        object: Term::variable("?o"),
                    }],
                    vec![],
                )),
            }),
            Box::new(Algebra::bgp(
                vec![AlgebraTriple {
                    subject: Term::variable("?md5"),
                    predicate: PredicateOrPath::Predicate(Term::iri("http://source")),
                    object: Term::variable("?o1"),
                }],
                vec![],
            )),
        )),
    }
}

/// Scenario 3: joining through the md5-built IRI against the scaffold
/// triples reaches every row.
#[test]
fn scenario_3_md5_join_reaches_every_scaffold_triple() {
    let mut store = seeded_store();
    let engine = Engine::new(GraphConfig::default(), Arc::new(FunctionRegistry::new()));
    let plans = InMemoryPlanStore::new();
    let request = Request { algebra: select_md5_join(), default_graph_uri: None, next: None };
    let bindings = drain_all(&engine, request, &mut store, &plans);
    assert_eq!(bindings.len(), 5);
    for mu in &bindings {
        assert_eq!(mu.get("?o1"), Some(&Term::iri("http://origin")));
    }
}

/// Scenario 4: a single fully-bound MD5 computation, with no WHERE-clause
/// rows at all, matches the known constant exactly.
#[test]
fn scenario_4_fully_bound_md5_binding_matches_the_known_constant() {
    let mut store = seeded_store();
    let engine = Engine::new(GraphConfig::default(), Arc::new(FunctionRegistry::new()));
    let plans = InMemoryPlanStore::new();
    let algebra = Algebra::SelectQuery {
        reduced: false,
        variables: vec!["?md5".to_string()],
        pattern: Box::new(Algebra::Extend {
            variable: "?md5".to_string(),
            expression: r#"URI(CONCAT("http://", MD5(CONCAT(STR(<http://donald>), STR(<http://isa>), STR("duck")))))"#.to_string(),
            pattern: Box::new(Algebra::bgp(vec![], vec![])),
        }),
    };
    let request = Request { algebra, default_graph_uri: None, next: None };
    let bindings = drain_all(&engine, request, &mut store, &plans);
    assert_eq!(bindings.len(), 1);
    assert_eq!(bindings[0].get("?md5"), Some(&Term::iri("http://c2fa74d2d092e3519266a8eb34824559")));
}

/// Scenario 5: `INSERT DATA { <http://donald> <http://isa> "duck" }`
/// then a `SELECT *`-equivalent scan shows the triple exactly once —
/// the graph already has `donald isa "duck"` seeded, exercising the
/// idempotent-insert contract (spec.md §4.7).
#[test]
fn scenario_5_insert_data_then_select_all_sees_the_triple_exactly_once() {
    let mut store = seeded_store();
    let mut insert = sparql_engine::query::update::InsertDataOperator::new(vec![(
        Term::iri("http://donald"),
        Term::iri("http://isa"),
        Term::new("\"duck\""),
        Term::iri_raw(GRAPH),
    )]);
    insert.next(&mut store).unwrap();
    store.commit().unwrap();

    let engine = Engine::new(GraphConfig::default(), Arc::new(FunctionRegistry::new()));
    let plans = InMemoryPlanStore::new();
    let request = Request { algebra: select_all_isa(), default_graph_uri: None, next: None };
    let bindings = drain_all(&engine, request, &mut store, &plans);
    let donalds = bindings.iter().filter(|mu| mu.get("?s") == Some(&Term::iri("http://donald"))).count();
    assert_eq!(donalds, 1, "the insert must not have duplicated an already-present triple");
}

/// Scenario 6: `INSERT { ?md5 <http://source> "rennes" } WHERE { BIND(...) }`
/// leaves the computed-IRI triple present in the graph.
#[test]
fn scenario_6_modify_inserts_a_row_per_bound_md5() {
    let mut store = seeded_store();
    let registry = Arc::new(FunctionRegistry::new());
    let where_algebra = Algebra::Extend {
        variable: "?md5".to_string(),
        expression: r#"URI(CONCAT("http://", MD5(CONCAT(STR(<http://donald>), STR(<http://isa>), STR("duck")))))"#.to_string(),
        pattern: Box::new(Algebra::bgp(vec![], vec![])),
    };
    let read = sparql_engine::query::plan::compile(&where_algebra, &store, None, &GraphConfig::default(), &registry).unwrap();
    let insert_templates = vec![sparql_engine::query::update::QuadTemplate::new(
        Term::variable("?md5"),
        Term::iri("http://source"),
        Term::new("\"rennes\""),
        Term::iri_raw(GRAPH),
    )];
    let mut modify = sparql_engine::query::update::SerializableUpdate::new(read, vec![], insert_templates);
    loop {
        match modify.next(&mut store).unwrap() {
            std::task::Poll::Ready(None) => break,
            std::task::Poll::Ready(Some(_)) => continue,
            std::task::Poll::Pending => continue,
        }
    }
    store.commit().unwrap();

    let (mut cursor, _) = store
        .search(GRAPH, &Term::iri("http://c2fa74d2d092e3519266a8eb34824559"), &Term::iri("http://source"), &Term::variable("?o"), None, None)
        .unwrap();
    assert_eq!(cursor.next(), Some((Term::iri("http://c2fa74d2d092e3519266a8eb34824559"), Term::iri("http://source"), Term::new("\"rennes\""))));
}
