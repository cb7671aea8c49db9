// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Property-based tests (fuzzing) for the query layer and the queue.
//!
//! Uses proptest to generate random/malformed inputs and verify the parser
//! never panics, the compiler is pure, and queue collapsing follows the
//! per-item state machine.
//!
//! Run with: `cargo test --test proptest_fuzz`

use proptest::prelude::*;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

use offline_sync::query::{parse_filter, parse_order_by};
use offline_sync::storage::system::define_system_tables;
use offline_sync::{
    MemoryStore, OperationKind, OperationQueue, QueryDescription, QueryNode, SqlCompiler,
    TableOperation,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

fn column_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("name".to_string()),
        Just("age".to_string()),
        Just("updatedAt".to_string()),
        "[a-z][a-zA-Z0-9_]{0,10}",
    ]
}

fn leaf_strategy() -> impl Strategy<Value = (QueryNode, usize)> {
    let constant = prop_oneof![
        any::<i64>().prop_map(|v| QueryNode::constant(v)),
        "[a-z';%\\]\\[ ]{0,12}".prop_map(|s| QueryNode::constant(s.as_str())),
        any::<bool>().prop_map(|v| QueryNode::constant(v)),
    ];
    (column_strategy(), constant, 0..6u8).prop_map(|(column, value, op)| {
        let member = QueryNode::member(column);
        let node = match op {
            0 => member.equals(value),
            1 => member.not_equals(value),
            2 => member.gt(value),
            3 => member.ge(value),
            4 => member.lt(value),
            _ => member.le(value),
        };
        (node, 1)
    })
}

/// Boolean filter trees paired with the number of literals they contain.
fn filter_strategy() -> impl Strategy<Value = (QueryNode, usize)> {
    leaf_strategy().prop_recursive(4, 32, 2, |inner| {
        prop_oneof![
            (inner.clone(), inner.clone()).prop_map(|((a, n), (b, m))| (a.and(b), n + m)),
            (inner.clone(), inner.clone()).prop_map(|((a, n), (b, m))| (a.or(b), n + m)),
            inner.prop_map(|(a, n)| (a.negate(), n)),
        ]
    })
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Mutation {
    Insert,
    Update,
    Delete,
}

fn mutation_strategy() -> impl Strategy<Value = (Mutation, u8)> {
    (
        prop_oneof![Just(Mutation::Insert), Just(Mutation::Update), Just(Mutation::Delete)],
        0..4u8,
    )
}

/// Expected live operation after applying `mutation` on top of `current`.
/// `Err` means the queue must reject it.
fn model(current: Option<OperationKind>, mutation: Mutation) -> Result<Option<OperationKind>, ()> {
    use OperationKind::*;
    match (current, mutation) {
        (Some(Delete), _) => Err(()),
        (Some(_), Mutation::Insert) => Err(()),
        (None, Mutation::Insert) => Ok(Some(Insert)),
        (None, Mutation::Update) => Ok(Some(Update)),
        (None, Mutation::Delete) => Ok(Some(Delete)),
        (Some(Insert), Mutation::Update) => Ok(Some(Insert)),
        (Some(Update), Mutation::Update) => Ok(Some(Update)),
        (Some(Insert), Mutation::Delete) => Ok(None),
        (Some(Update), Mutation::Delete) => Ok(Some(Delete)),
    }
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

// =============================================================================
// Parser
// =============================================================================

proptest! {
    #[test]
    fn fuzz_parse_filter_never_panics(input in ".{0,80}") {
        let _ = parse_filter(&input);
    }

    #[test]
    fn fuzz_parse_filter_operator_soup(input in "[a-z0-9 ()'.,]{0,20}( (eq|ne|gt|and|or|not|add) [a-z0-9 ()'.,]{0,10}){0,4}") {
        let _ = parse_filter(&input);
    }

    #[test]
    fn fuzz_parse_order_by_never_panics(input in "[a-zA-Z0-9 ,/()]{0,40}") {
        let _ = parse_order_by(&input);
    }

    #[test]
    fn fuzz_query_string_never_panics(input in "(\\$[a-z]{3,11}=[^&]{0,20}&?){0,4}") {
        let _ = QueryDescription::parse("todo", &input);
    }
}

// =============================================================================
// Compiler
// =============================================================================

proptest! {
    #[test]
    fn prop_compiler_is_deterministic((filter, literals) in filter_strategy(), top in proptest::option::of(1..100u64)) {
        let mut query = QueryDescription::new("todo").with_filter(filter).order_by("name");
        query.take = top;

        let first = SqlCompiler::compile(&query);
        let second = SqlCompiler::compile(&query);
        prop_assert_eq!(&first, &second);

        if let Ok(compiled) = first {
            // Every literal is a bound parameter, never SQL text.
            prop_assert_eq!(compiled.select.parameters.len(), literals);
            prop_assert!(!compiled.select.sql.contains('\''));
            prop_assert!(compiled.select.sql.starts_with("SELECT * FROM [todo]"));
        }
    }

    #[test]
    fn prop_compiled_parameters_are_numbered_in_order((filter, _) in filter_strategy()) {
        let query = QueryDescription::new("todo").with_filter(filter);
        if let Ok(statement) = SqlCompiler::compile_select(&query) {
            let numbered = statement.numbered_sql();
            prop_assert!(!numbered.contains("@p"));
            for i in 1..=statement.parameters.len() {
                let placeholder = format!("?{i}");
                prop_assert!(numbered.contains(&placeholder));
            }
        }
    }
}

// =============================================================================
// Operation queue
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_queue_follows_collapse_rules(mutations in prop::collection::vec(mutation_strategy(), 1..40)) {
        let rt = runtime();
        rt.block_on(async {
            let store = Arc::new(MemoryStore::new());
            define_system_tables(store.as_ref()).await.unwrap();
            let queue = OperationQueue::load(store.clone()).await.unwrap();

            let mut expected: HashMap<String, OperationKind> = HashMap::new();
            for (mutation, item) in &mutations {
                let id = format!("item{item}");
                let payload = json!({"id": id}).as_object().cloned().unwrap();
                let op = match mutation {
                    Mutation::Insert => TableOperation::insert("todo", payload),
                    Mutation::Update => TableOperation::update("todo", payload),
                    Mutation::Delete => TableOperation::delete("todo", payload),
                }
                .unwrap();

                let outcome = queue.enqueue(op).await;
                match model(expected.get(&id).copied(), *mutation) {
                    Err(()) => assert!(outcome.is_err(), "{mutation:?} on {id} should be rejected"),
                    Ok(next) => {
                        let live = outcome.unwrap();
                        assert_eq!(live.as_ref().map(|op| op.kind), next);
                        match next {
                            Some(kind) => expected.insert(id, kind),
                            None => expected.remove(&id),
                        };
                    }
                }
            }

            let ops = queue.snapshot().await;
            assert_eq!(ops.len(), expected.len());
            assert!(ops.windows(2).all(|w| w[0].sequence < w[1].sequence));
            for op in &ops {
                assert_eq!(expected.get(&op.item_id), Some(&op.kind));
            }

            // A reload sees exactly the same queue.
            let reloaded = OperationQueue::load(store).await.unwrap();
            let again: Vec<_> = reloaded
                .snapshot()
                .await
                .into_iter()
                .map(|op| (op.sequence, op.item_id, op.kind))
                .collect();
            let before: Vec<_> = ops.into_iter().map(|op| (op.sequence, op.item_id, op.kind)).collect();
            assert_eq!(again, before);
        });
    }
}
