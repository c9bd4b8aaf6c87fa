// 질의 파이프라인 통합 테스트: parse → visit → compile → execute

use dqx_core::query::{QueryNode, normalize};
use dqx_core::vm::Instruction;
use dqx_core::{
    Collection, Database, DqxError, DqxResult, EngineConfig, IndexKind, Opcode, QueryConditions,
    SortOrder, VirtualMachine, compile_query, parse_query, visit,
};
use serde_json::json;
use std::sync::Arc;

fn users() -> DqxResult<Collection> {
    let mut c = Collection::new("users", &EngineConfig::default());
    c.insert_many(vec![
        json!({"name": "kim", "age": 31, "city": "Seoul", "tags": ["admin", "dev"]}),
        json!({"name": "lee", "age": 25, "city": "Busan", "tags": ["dev"]}),
        json!({"name": "park", "age": 42, "city": "Seoul", "tags": []}),
        json!({"name": "choi", "age": 19, "city": "Incheon"}),
        json!({"name": "jung", "age": 25, "city": "Seoul", "tags": ["ops"]}),
    ])?;
    Ok(c)
}

fn names(docs: &[serde_json::Value]) -> Vec<&str> {
    docs.iter().filter_map(|d| d["name"].as_str()).collect()
}

#[test]
fn test_normalize_is_idempotent_on_parsed_trees() -> DqxResult<()> {
    let queries = [
        json!({"a": 1}),
        json!({"a": 1, "b": {"$gt": 2, "$lt": 9}}),
        json!({"$and": [{"a": 1}, {"b": 2}]}),
        json!({"$or": [{"a": 1}, {"b": 2, "c": 3}], "z": 0}),
        json!({"$or": [{"a": 1}, {"$and": [{"b": 2}, {"c": 3}]}]}),
    ];
    for q in &queries {
        let tree = parse_query(q)?;
        assert_eq!(normalize(tree.root.clone()), tree.root, "query {q}");
    }
    Ok(())
}

#[test]
fn test_root_and_is_equivalent_to_plain_object() -> DqxResult<()> {
    let plain = parse_query(&json!({"a": 1, "b": 2}))?;
    let hoisted = parse_query(&json!({"$and": [{"a": 1}, {"b": 2}]}))?;
    assert_eq!(plain, hoisted);
    Ok(())
}

#[test]
fn test_compound_index_replaces_equality_tests() -> DqxResult<()> {
    let mut c = Collection::new("t", &EngineConfig::default());
    c.insert(json!({"a": 1, "b": 2}))?;
    c.insert(json!({"a": 1, "b": 3}))?;
    c.ensure_index(&["a", "b"], IndexKind::Hash)?;

    let program = c.plan(&json!({"a": 1, "b": 2}), &QueryConditions::default())?;
    assert_eq!(program.opcodes()[0], 0x1B);
    assert!(!program.contains(Opcode::Eq));
    assert!(!program.contains(Opcode::Scan));
    assert_eq!(c.count(&json!({"a": 1, "b": 2}))?, 1);
    Ok(())
}

#[test]
fn test_visit_leaves_nested_groups_alone() -> DqxResult<()> {
    let mut c = users()?;
    c.ensure_index(&["city"], IndexKind::Hash)?;
    let tree = parse_query(&json!({"$or": [{"city": "Seoul"}, {"city": "Busan"}]}))?;
    let visited = visit(&tree, &[]);
    assert_eq!(visited, tree);

    let program = c.plan(
        &json!({"$or": [{"city": "Seoul"}, {"city": "Busan"}]}),
        &QueryConditions::default(),
    )?;
    assert_eq!(program.opcodes()[0], Opcode::Scan as u8);
    assert_eq!(c.count(&json!({"$or": [{"city": "Seoul"}, {"city": "Busan"}]}))?, 4);
    Ok(())
}

#[test]
fn test_range_index_and_residual_predicate() -> DqxResult<()> {
    let mut c = users()?;
    c.ensure_index(&["age"], IndexKind::Tree)?;
    let predicate = json!({"age": {"$gte": 25, "$lt": 40}, "city": "Seoul"});
    let program = c.plan(&predicate, &QueryConditions::default())?;
    assert_eq!(program.opcodes()[0], Opcode::Range as u8);
    assert!(program.contains(Opcode::Eq));

    let found = c.find(
        &predicate,
        &QueryConditions::new().sort_by("age", SortOrder::Descending),
    )?;
    assert_eq!(names(&found), vec!["kim", "jung"]);
    Ok(())
}

#[test]
fn test_indexed_and_unindexed_results_agree() -> DqxResult<()> {
    let predicates = [
        json!({"age": 25}),
        json!({"age": {"$gt": 20}, "city": {"$ne": "Seoul"}}),
        json!({"tags": {"$all": ["dev"]}}),
        json!({"tags": {"$size": 0}}),
        json!({"tags": {"$exists": false}}),
        json!({"city": {"$in": ["Busan", "Incheon"]}}),
        json!({"$or": [{"age": {"$lt": 20}}, {"name": "park"}]}),
    ];
    let plain = users()?;
    let mut indexed = users()?;
    indexed.ensure_index(&["age"], IndexKind::Tree)?;
    indexed.ensure_index(&["city"], IndexKind::Hash)?;
    for p in &predicates {
        let mut a = plain.find_ids(p, &QueryConditions::default())?;
        let mut b = indexed.find_ids(p, &QueryConditions::default())?;
        a.sort_unstable();
        b.sort_unstable();
        assert_eq!(a, b, "predicate {p}");
    }
    Ok(())
}

#[test]
fn test_large_integers_agree_with_scan() -> DqxResult<()> {
    let build = || -> DqxResult<Collection> {
        let mut c = Collection::new("big", &EngineConfig::default());
        c.insert(json!({"a": 9_007_199_254_740_992_u64}))?;
        c.insert(json!({"a": 9_007_199_254_740_993_u64}))?;
        c.insert(json!({"a": 7}))?;
        Ok(c)
    };
    let plain = build()?;
    let mut tree = build()?;
    tree.ensure_index(&["a"], IndexKind::Tree)?;
    let mut hash = build()?;
    hash.ensure_index(&["a"], IndexKind::Hash)?;

    let predicates = [
        (json!({"a": 9_007_199_254_740_993_u64}), 1),
        (json!({"a": {"$gt": 9_007_199_254_740_992_u64}}), 1),
        (json!({"a": {"$gte": 9_007_199_254_740_992_u64}}), 2),
        (json!({"a": {"$gt": 5, "$lt": 9_007_199_254_740_993_u64}}), 2),
        (json!({"a": 7}), 1),
    ];
    for (p, expected) in &predicates {
        assert_eq!(plain.count(p)?, *expected, "scan {p}");
        assert_eq!(tree.count(p)?, *expected, "tree {p}");
        assert_eq!(hash.count(p)?, *expected, "hash {p}");
    }
    Ok(())
}

#[test]
fn test_sort_limit_and_find_one() -> DqxResult<()> {
    let c = users()?;
    let youngest = c.find(
        &json!({}),
        &QueryConditions::new().sort_by("age", SortOrder::Ascending).limit(2),
    )?;
    assert_eq!(names(&youngest), vec!["choi", "lee"]);
    let one = c.find_one(&json!({"city": "Seoul"}))?;
    assert_eq!(one.map(|d| d["name"].clone()), Some(json!("kim")));
    Ok(())
}

#[test]
fn test_thousand_documents_through_compiled_program() -> DqxResult<()> {
    let mut c = Collection::new("bulk", &EngineConfig::default());
    for i in 0..1_000u64 {
        c.insert(json!({"i": i}))?;
    }
    let tree = parse_query(&json!({}))?;
    let program = Arc::new(compile_query(&tree, &QueryConditions::default(), "bulk")?);
    assert_eq!(
        program.instructions(),
        &[
            Instruction::Scan {
                collection: "bulk".into()
            },
            Instruction::Store,
            Instruction::Transpose,
            Instruction::Halt,
        ]
    );
    let mut vm = VirtualMachine::new();
    let ids = vm.execute(&mut c, program, None, false)?;
    assert_eq!(ids.len(), 1_000);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));
    Ok(())
}

#[test]
fn test_update_with_set_and_index_maintenance() -> DqxResult<()> {
    let mut db = Database::in_memory();
    let c = db.create_collection("users")?;
    for doc in users()?.documents() {
        let mut doc = doc.clone();
        if let Some(obj) = doc.as_object_mut() {
            obj.remove("_id");
        }
        c.insert(doc)?;
    }
    c.ensure_index(&["city"], IndexKind::Hash)?;

    let touched = c.update(
        &json!({"city": "Seoul"}),
        &json!({"$set": {"city": "Daegu"}, "$inc": {"age": 1}}),
        false,
    )?;
    assert_eq!(touched, 3);
    assert_eq!(c.count(&json!({"city": "Seoul"}))?, 0);
    let daegu = c.find(
        &json!({"city": "Daegu"}),
        &QueryConditions::new().sort_by("age", SortOrder::Ascending),
    )?;
    assert_eq!(names(&daegu), vec!["jung", "kim", "park"]);
    assert_eq!(daegu[0]["age"], json!(26));
    Ok(())
}

#[test]
fn test_update_array_operators() -> DqxResult<()> {
    let mut c = users()?;
    c.update(&json!({"name": "lee"}), &json!({"$push": {"tags": "ops"}}), false)?;
    c.update(&json!({"name": "lee"}), &json!({"$pull": {"tags": "dev"}}), false)?;
    let lee = c.find_one(&json!({"name": "lee"}))?;
    assert_eq!(lee.map(|d| d["tags"].clone()), Some(json!(["ops"])));

    c.update(&json!({"name": "choi"}), &json!({"$pushAll": {"tags": ["a", "b"]}}), true)?;
    c.update(&json!({"name": "choi"}), &json!({"$pop": {"tags": -1}}), false)?;
    let choi = c.find_one(&json!({"name": "choi"}))?;
    assert_eq!(choi.map(|d| d["tags"].clone()), Some(json!(["b"])));
    Ok(())
}

#[test]
fn test_delete_and_explain() -> DqxResult<()> {
    let mut c = users()?;
    let listing = c.explain(&json!({"age": {"$gt": 30}}), &QueryConditions::default())?;
    assert!(listing.starts_with("0000  scan"));
    assert!(listing.contains("gt"));

    assert_eq!(c.delete(&json!({"age": {"$gt": 30}}))?, 2);
    assert_eq!(c.len(), 3);
    assert_eq!(c.count(&json!({"age": {"$gt": 30}}))?, 0);
    Ok(())
}

#[test]
fn test_bad_input_surfaces_typed_errors() -> DqxResult<()> {
    let mut c = users()?;
    assert!(matches!(
        c.find(&json!({"a": {"$in": 3}}), &QueryConditions::default()),
        Err(DqxError::QueryParse { .. })
    ));
    assert!(matches!(
        c.update(&json!({}), &json!({"$rename": {"a": "b"}}), false),
        Err(DqxError::Compile { .. })
    ));
    assert!(matches!(
        c.update(&json!({}), &json!({"$set": {"_id": 9}}), false),
        Err(DqxError::Compile { .. })
    ));
    assert!(matches!(
        c.update(&json!({}), &json!({"$inc": {"tags": 1}}), false),
        Err(DqxError::Execution { .. })
    ));
    Ok(())
}

#[test]
fn test_program_cache_hits_on_repeat() -> DqxResult<()> {
    let c = users()?;
    let q = json!({"age": {"$gt": 20}});
    c.count(&q)?;
    c.count(&q)?;
    let stats = c.program_cache_stats().ok_or(DqxError::InvalidConfig("no cache".into()))?;
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    Ok(())
}

#[test]
fn test_parsed_tree_shape_for_or_group() -> DqxResult<()> {
    let tree = parse_query(&json!({"$or": [{"a": 1}, {"b": 2}], "c": 3}))?;
    assert!(matches!(tree.root.last(), Some(QueryNode::Selective { .. })));
    Ok(())
}
