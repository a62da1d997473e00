//! Scenario tests for the block and transaction indexers.

use basalt_index::{BlockEvents, BlockIndexer, IndexError, Query, TxIndexer};
use basalt_storage::{KvStore, MemoryKv};
use basalt_types::{Event, EventAttribute, ExecTxResult, TxResult};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

fn event(kind: &str, attrs: &[(&str, &str)]) -> Event {
    Event::new(
        kind,
        attrs
            .iter()
            .map(|(k, v)| EventAttribute::indexed(*k, *v))
            .collect(),
    )
}

fn block_indexer() -> (Arc<MemoryKv>, BlockIndexer) {
    let kv = Arc::new(MemoryKv::new());
    (kv.clone(), BlockIndexer::new(kv))
}

fn index_block(indexer: &BlockIndexer, height: i64, events: Vec<Event>) {
    indexer.index(&BlockEvents { height, events }).unwrap();
}

fn search(indexer: &BlockIndexer, query: &str) -> Vec<i64> {
    let q = Query::parse(query).unwrap();
    indexer.search(&q, &CancellationToken::new()).unwrap()
}

#[test]
fn cross_event_conjunction_matches_within_a_height() {
    let (_kv, indexer) = block_indexer();
    index_block(
        &indexer,
        3,
        vec![
            event("type1", &[("a", "1")]),
            event("type2", &[("build", "stuff")]),
        ],
    );

    assert_eq!(
        search(&indexer, "type1.a = 1 AND type2.build = 'stuff'"),
        vec![3]
    );
    assert!(search(&indexer, "type1.a = 1 AND type2.build = 'other'").is_empty());
}

#[test]
fn same_type_conditions_must_match_the_same_event() {
    let (_kv, indexer) = block_indexer();
    // No single transfer event has both sender=alice and amount=100.
    index_block(
        &indexer,
        5,
        vec![
            event("transfer", &[("sender", "alice"), ("amount", "50")]),
            event("transfer", &[("sender", "bob"), ("amount", "100")]),
        ],
    );

    assert!(
        search(&indexer, "transfer.sender = 'alice' AND transfer.amount = 100").is_empty(),
        "attributes from different events of the same type must not combine"
    );
    assert_eq!(
        search(&indexer, "transfer.sender = 'bob' AND transfer.amount = 100"),
        vec![5]
    );
}

#[test]
fn height_equality_short_circuits_to_a_point_probe() {
    let (_kv, indexer) = block_indexer();
    index_block(&indexer, 7, vec![event("e", &[("k", "v")])]);

    assert_eq!(search(&indexer, "block.height = 7"), vec![7]);
    assert!(search(&indexer, "block.height = 8").is_empty());
}

#[test]
fn height_ranges_scan_primary_keys() {
    let (_kv, indexer) = block_indexer();
    for height in 1..=10 {
        index_block(&indexer, height, vec![]);
    }
    assert_eq!(
        search(&indexer, "block.height >= 4 AND block.height < 7"),
        vec![4, 5, 6]
    );
    assert_eq!(search(&indexer, "block.height > 8"), vec![9, 10]);
}

#[test]
fn height_condition_constrains_event_matches() {
    let (_kv, indexer) = block_indexer();
    for height in 1..=6 {
        index_block(&indexer, height, vec![event("e", &[("k", "v")])]);
    }
    assert_eq!(
        search(&indexer, "e.k = 'v' AND block.height > 4"),
        vec![5, 6]
    );
    assert_eq!(search(&indexer, "e.k = 'v' AND block.height = 2"), vec![2]);
}

#[test]
fn numeric_ranges_compare_exactly_with_unit_suffixes() {
    let (_kv, indexer) = block_indexer();
    index_block(&indexer, 1, vec![event("pay", &[("amount", "8atom")])]);
    index_block(&indexer, 2, vec![event("pay", &[("amount", "12")])]);
    index_block(&indexer, 3, vec![event("pay", &[("amount", "7.5")])]);

    assert_eq!(search(&indexer, "pay.amount >= 8"), vec![1, 2]);
    assert_eq!(search(&indexer, "pay.amount < 8"), vec![3]);
    assert_eq!(search(&indexer, "pay.amount > 7 AND pay.amount <= 8"), vec![1, 3]);
}

#[test]
fn exists_and_contains_conditions() {
    let (_kv, indexer) = block_indexer();
    index_block(&indexer, 1, vec![event("mint", &[("to", "alice-wallet")])]);
    index_block(&indexer, 2, vec![event("burn", &[("from", "bob-wallet")])]);

    assert_eq!(search(&indexer, "mint.to EXISTS"), vec![1]);
    assert_eq!(search(&indexer, "burn.from CONTAINS 'bob'"), vec![2]);
    assert!(search(&indexer, "mint.to CONTAINS 'bob'").is_empty());
}

#[test]
fn unindexed_attributes_are_not_searchable() {
    let (_kv, indexer) = block_indexer();
    let mut attr = EventAttribute::indexed("k", "v");
    attr.index = false;
    index_block(
        &indexer,
        4,
        vec![Event::new("e", vec![attr])],
    );
    assert!(indexer.has(4).unwrap());
    assert!(search(&indexer, "e.k = 'v'").is_empty());
}

#[test]
fn reserved_composite_key_is_rejected() {
    let (_kv, indexer) = block_indexer();
    let err = indexer
        .index(&BlockEvents {
            height: 1,
            events: vec![event("block", &[("height", "1")])],
        })
        .unwrap_err();
    assert!(matches!(err, IndexError::ReservedKey { .. }));
}

#[test]
fn indexing_is_deterministic_at_the_byte_level() {
    let events = vec![
        event("type1", &[("a", "1"), ("b", "2")]),
        event("type2", &[("build", "stuff")]),
    ];
    let (kv_a, indexer_a) = block_indexer();
    let (kv_b, indexer_b) = block_indexer();
    for height in 1..=3 {
        index_block(&indexer_a, height, events.clone());
        index_block(&indexer_b, height, events.clone());
    }
    let dump = |kv: &MemoryKv| -> Vec<(Vec<u8>, Vec<u8>)> {
        kv.iter_range(&[], None).unwrap().collect()
    };
    assert_eq!(dump(&kv_a), dump(&kv_b), "same input must produce the same bytes");
}

#[test]
fn query_results_are_stable_under_condition_permutation() {
    let (_kv, indexer) = block_indexer();
    for height in 1..=8 {
        index_block(
            &indexer,
            height,
            vec![
                event("a", &[("x", &height.to_string())]),
                event("b", &[("y", "const")]),
            ],
        );
    }
    let forward = search(&indexer, "a.x >= 3 AND b.y = 'const' AND block.height < 7");
    let backward = search(&indexer, "block.height < 7 AND b.y = 'const' AND a.x >= 3");
    assert_eq!(forward, vec![3, 4, 5, 6]);
    assert_eq!(forward, backward);
}

#[test]
fn cancellation_returns_the_empty_slice() {
    let (_kv, indexer) = block_indexer();
    for height in 1..=10 {
        index_block(&indexer, height, vec![event("e", &[("k", "v")])]);
    }
    let token = CancellationToken::new();
    token.cancel();
    let q = Query::parse("e.k = 'v'").unwrap();
    assert!(indexer.search(&q, &token).unwrap().is_empty());
}

#[test]
fn pruning_removes_heights_below_retain() {
    let (_kv, indexer) = block_indexer();
    for height in 1..=10 {
        index_block(&indexer, height, vec![event("e", &[("k", "v")])]);
    }
    let (pruned, new_retain) = indexer.prune(6).unwrap();
    assert_eq!(pruned, 5);
    assert_eq!(new_retain, 6);

    for height in 1..6 {
        assert!(!indexer.has(height).unwrap(), "height {height} must be pruned");
    }
    for height in 6..=10 {
        assert!(indexer.has(height).unwrap(), "height {height} must survive");
    }
    assert_eq!(search(&indexer, "e.k = 'v'"), vec![6, 7, 8, 9, 10]);

    // A repeated prune with the same height is a no-op and the retain
    // marker survives pruning itself.
    assert_eq!(indexer.prune(6).unwrap(), (0, 6));
}

#[test]
fn retain_height_scalar_round_trips() {
    let (_kv, indexer) = block_indexer();
    assert!(matches!(
        indexer.get_retain_height(),
        Err(IndexError::KeyNotFound)
    ));
    indexer.set_retain_height(12).unwrap();
    assert_eq!(indexer.get_retain_height().unwrap(), 12);
    assert!(matches!(
        indexer.set_retain_height(-3),
        Err(IndexError::InvalidHeightValue { height: -3 })
    ));
}

// ───────────────────────────── Tx indexer ─────────────────────────────

fn tx_indexer() -> TxIndexer {
    TxIndexer::new(Arc::new(MemoryKv::new()))
}

fn tx_result(height: i64, index: u32, payload: &[u8], events: Vec<Event>) -> TxResult {
    TxResult {
        height,
        index,
        tx: payload.to_vec(),
        result: ExecTxResult {
            code: 0,
            events,
            ..Default::default()
        },
    }
}

fn tx_search(indexer: &TxIndexer, query: &str) -> Vec<TxResult> {
    let q = Query::parse(query).unwrap();
    indexer.search(&q, &CancellationToken::new()).unwrap()
}

#[test]
fn tx_lookup_by_hash() {
    let indexer = tx_indexer();
    let tx = tx_result(1, 0, b"tx-payload", vec![]);
    indexer.add_batch(std::slice::from_ref(&tx)).unwrap();

    let got = indexer.get(tx.tx_hash().as_bytes()).unwrap().unwrap();
    assert_eq!(got, tx);
    assert!(indexer.get(&[0u8; 32]).unwrap().is_none());
}

#[test]
fn tx_hash_query_short_circuits() {
    let indexer = tx_indexer();
    let tx = tx_result(2, 1, b"payload", vec![event("app", &[("creator", "ivan")])]);
    indexer.add_batch(std::slice::from_ref(&tx)).unwrap();

    let hash_hex = tx.tx_hash().to_hex();
    let results = tx_search(&indexer, &format!("tx.hash = '{hash_hex}'"));
    assert_eq!(results, vec![tx.clone()]);

    // Extra conditions are verified against the loaded result.
    let results = tx_search(
        &indexer,
        &format!("tx.hash = '{hash_hex}' AND app.creator = 'ivan'"),
    );
    assert_eq!(results.len(), 1);
    let results = tx_search(
        &indexer,
        &format!("tx.hash = '{hash_hex}' AND app.creator = 'boris'"),
    );
    assert!(results.is_empty());
}

#[test]
fn tx_search_by_events_and_height() {
    let indexer = tx_indexer();
    let txs = vec![
        tx_result(1, 0, b"t0", vec![event("account", &[("number", "1")])]),
        tx_result(1, 1, b"t1", vec![event("account", &[("number", "2")])]),
        tx_result(3, 0, b"t2", vec![event("account", &[("number", "1")])]),
    ];
    indexer.add_batch(&txs).unwrap();

    let results = tx_search(&indexer, "account.number = 1");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].height, 1);
    assert_eq!(results[1].height, 3);

    let results = tx_search(&indexer, "account.number = 1 AND tx.height > 2");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].height, 3);

    let results = tx_search(&indexer, "tx.height = 1");
    assert_eq!(results.len(), 2);
    assert_eq!(results[0].index, 0);
    assert_eq!(results[1].index, 1);

    let results = tx_search(&indexer, "account.number >= 2");
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].index, 1);
}

#[test]
fn tx_reserved_composites_are_rejected() {
    let indexer = tx_indexer();
    for reserved in [("tx", "hash"), ("tx", "height")] {
        let tx = tx_result(1, 0, b"t", vec![event(reserved.0, &[(reserved.1, "x")])]);
        let err = indexer.add_batch(std::slice::from_ref(&tx)).unwrap_err();
        assert!(matches!(err, IndexError::ReservedKey { .. }));
    }
}

#[test]
fn tx_pruning_removes_results_and_event_keys() {
    let indexer = tx_indexer();
    let txs: Vec<TxResult> = (1..=6)
        .map(|h| {
            tx_result(
                h,
                0,
                format!("tx-{h}").as_bytes(),
                vec![event("e", &[("k", "v")])],
            )
        })
        .collect();
    indexer.add_batch(&txs).unwrap();

    let (pruned, _) = indexer.prune(4).unwrap();
    assert_eq!(pruned, 3);

    for tx in &txs[..3] {
        assert!(indexer.get(tx.tx_hash().as_bytes()).unwrap().is_none());
    }
    for tx in &txs[3..] {
        assert!(indexer.get(tx.tx_hash().as_bytes()).unwrap().is_some());
    }
    let results = tx_search(&indexer, "e.k = 'v'");
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.height >= 4));
}
