mod common;

use common::*;
use obsidian::errors::DbError;
use obsidian::transaction::{IsolationLevel, TransactionState};
use obsidian::value::Value;

#[test]
fn own_writes_are_visible_before_commit_and_hidden_from_others() {
    let test_db = setup("mvcc_own_write");
    let table = create_table(&test_db, "kv", &["k", "v"]);

    let writer = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(&test_db, &writer, &insert_plan(&table, &[vec![1, 10]])).unwrap();
    assert_eq!(scan_pairs(&test_db, &writer, &table), vec![(1, 10)]);

    let reader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    assert!(scan_pairs(&test_db, &reader, &table).is_empty());

    test_db.db.commit(&writer).unwrap();
    assert!(scan_pairs(&test_db, &reader, &table).is_empty());

    let late_reader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    assert_eq!(scan_pairs(&test_db, &late_reader, &table), vec![(1, 10)]);
}

#[test]
fn aborted_inserts_stay_invisible() {
    let test_db = setup("mvcc_abort_insert");
    let table = create_table(&test_db, "kv", &["k", "v"]);

    let writer = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(&test_db, &writer, &insert_plan(&table, &[vec![1, 10], vec![2, 20]])).unwrap();
    test_db.db.abort(&writer).unwrap();

    let reader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    assert!(scan_pairs(&test_db, &reader, &table).is_empty());
}

#[test]
fn aborted_update_restores_the_previous_version() {
    let test_db = setup("mvcc_abort_update");
    let table = create_table(&test_db, "kv", &["k", "v"]);

    let loader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(&test_db, &loader, &insert_plan(&table, &[vec![1, 10]])).unwrap();
    test_db.db.commit(&loader).unwrap();

    let updater = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    let bump_v = update_plan(
        &table,
        Some(col_eq(0, 1)),
        vec![
            obsidian::expression::Expression::column(0),
            obsidian::expression::Expression::literal(Value::Int(99)),
        ],
    );
    run(&test_db, &updater, &bump_v).unwrap();
    assert_eq!(scan_pairs(&test_db, &updater, &table), vec![(1, 99)]);
    test_db.db.abort(&updater).unwrap();

    let reader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    assert_eq!(scan_pairs(&test_db, &reader, &table), vec![(1, 10)]);
}

#[test]
fn delete_then_insert_reuses_the_rid_and_keeps_old_snapshots_intact() {
    let test_db = setup("mvcc_rid_reuse");
    let table = create_table(&test_db, "kv", &["k", "v"]);
    create_pk_index(&test_db, "kv");

    // Commit (1, 2) at ts 1.
    let txn_a = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(&test_db, &txn_a, &insert_plan(&table, &[vec![1, 2]])).unwrap();
    test_db.db.commit(&txn_a).unwrap();

    let index = test_db
        .db
        .catalog
        .lock()
        .unwrap()
        .get_index("kv", "kv_pk")
        .unwrap();
    let original_rid = index.index.scan_key(&[Value::Int(1)]).unwrap()[0];

    // A reader pinned at ts 1.
    let old_reader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    assert_eq!(old_reader.read_ts(), 1);

    // Delete at ts 2, re-insert with a new value at ts 3.
    let txn_b = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(&test_db, &txn_b, &delete_plan(&table, Some(col_eq(0, 1)))).unwrap();
    test_db.db.commit(&txn_b).unwrap();

    let txn_c = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(&test_db, &txn_c, &insert_plan(&table, &[vec![1, 3]])).unwrap();
    test_db.db.commit(&txn_c).unwrap();

    // The dead slot was reclaimed through the index.
    let reused_rid = index.index.scan_key(&[Value::Int(1)]).unwrap()[0];
    assert_eq!(reused_rid, original_rid);

    // The pinned reader still sees the version chain's old value.
    assert_eq!(scan_pairs(&test_db, &old_reader, &table), vec![(1, 2)]);

    // Fresh snapshots see the re-inserted row.
    let new_reader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    assert_eq!(scan_pairs(&test_db, &new_reader, &table), vec![(1, 3)]);
}

#[test]
fn duplicate_insert_against_a_live_row_is_a_conflict() {
    let test_db = setup("mvcc_pk_conflict");
    let table = create_table(&test_db, "kv", &["k", "v"]);
    create_pk_index(&test_db, "kv");

    let loader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(&test_db, &loader, &insert_plan(&table, &[vec![1, 10]])).unwrap();
    test_db.db.commit(&loader).unwrap();

    let dup = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    let err = run(&test_db, &dup, &insert_plan(&table, &[vec![1, 99]])).unwrap_err();
    assert!(matches!(err, DbError::IndexConflict(_)));
    assert_eq!(dup.state(), TransactionState::Tainted);
    assert!(matches!(
        test_db.db.commit(&dup),
        Err(DbError::TxnConflict(_))
    ));
}

#[test]
fn second_writer_on_the_same_row_is_tainted() {
    let test_db = setup("mvcc_ww_conflict");
    let table = create_table(&test_db, "kv", &["k", "v"]);

    let loader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(&test_db, &loader, &insert_plan(&table, &[vec![1, 10]])).unwrap();
    test_db.db.commit(&loader).unwrap();

    let first = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    let second = test_db.db.begin(IsolationLevel::SnapshotIsolation);

    run(
        &test_db,
        &first,
        &update_plan(
            &table,
            None,
            vec![
                obsidian::expression::Expression::column(0),
                obsidian::expression::Expression::literal(Value::Int(11)),
            ],
        ),
    )
    .unwrap();

    // First writer wins; the second sees the in-flight stamp and taints.
    let err = run(
        &test_db,
        &second,
        &update_plan(
            &table,
            None,
            vec![
                obsidian::expression::Expression::column(0),
                obsidian::expression::Expression::literal(Value::Int(12)),
            ],
        ),
    )
    .unwrap_err();
    assert!(matches!(err, DbError::TxnConflict(_)));
    assert_eq!(second.state(), TransactionState::Tainted);

    test_db.db.commit(&first).unwrap();
    assert!(test_db.db.commit(&second).is_err());

    let reader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    assert_eq!(scan_pairs(&test_db, &reader, &table), vec![(1, 11)]);
}

#[test]
fn serializable_write_skew_is_rejected_at_commit() {
    let test_db = setup("mvcc_serializable");
    let table = create_table(&test_db, "flags", &["a", "b"]);

    let loader = test_db.db.begin(IsolationLevel::Serializable);
    run(
        &test_db,
        &loader,
        &insert_plan(
            &table,
            &[
                vec![1, 100],
                vec![1, 101],
                vec![1, 102],
                vec![1, 103],
                vec![0, 200],
            ],
        ),
    )
    .unwrap();
    test_db.db.commit(&loader).unwrap();

    let txn2 = test_db.db.begin(IsolationLevel::Serializable);
    let txn3 = test_db.db.begin(IsolationLevel::Serializable);
    let txn_read = test_db.db.begin(IsolationLevel::Serializable);

    // txn2: SET a = 0 WHERE a = 1. txn3: SET a = 1 WHERE a = 0.
    let flip_to_zero = update_plan(
        &table,
        Some(col_eq(0, 1)),
        vec![
            obsidian::expression::Expression::literal(Value::Int(0)),
            obsidian::expression::Expression::column(1),
        ],
    );
    let flip_to_one = update_plan(
        &table,
        Some(col_eq(0, 0)),
        vec![
            obsidian::expression::Expression::literal(Value::Int(1)),
            obsidian::expression::Expression::column(1),
        ],
    );
    run(&test_db, &txn2, &flip_to_zero).unwrap();
    run(&test_db, &txn3, &flip_to_one).unwrap();

    let read_plan = seq_scan_plan(&table, Some(col_eq(0, 0)));
    let rows = run_rows(&test_db, &txn_read, &read_plan, &table.schema);
    assert_eq!(rows.len(), 1);

    test_db.db.commit(&txn2).unwrap();
    let err = test_db.db.commit(&txn3).unwrap_err();
    assert!(matches!(err, DbError::TxnConflict(_)));
    assert_eq!(txn3.state(), TransactionState::Aborted);

    // txn3's writes were rolled back; only txn2's flip survives.
    let reader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    let pairs = scan_pairs(&test_db, &reader, &table);
    assert_eq!(pairs.iter().filter(|(a, _)| *a == 0).count(), 5);
}

#[test]
fn snapshot_isolation_allows_the_same_interleaving() {
    let test_db = setup("mvcc_si_write_skew_ok");
    let table = create_table(&test_db, "flags", &["a", "b"]);

    let loader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(
        &test_db,
        &loader,
        &insert_plan(&table, &[vec![1, 100], vec![0, 200]]),
    )
    .unwrap();
    test_db.db.commit(&loader).unwrap();

    let txn2 = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    let txn3 = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(
        &test_db,
        &txn2,
        &update_plan(
            &table,
            Some(col_eq(0, 1)),
            vec![
                obsidian::expression::Expression::literal(Value::Int(0)),
                obsidian::expression::Expression::column(1),
            ],
        ),
    )
    .unwrap();
    run(
        &test_db,
        &txn3,
        &update_plan(
            &table,
            Some(col_eq(0, 0)),
            vec![
                obsidian::expression::Expression::literal(Value::Int(1)),
                obsidian::expression::Expression::column(1),
            ],
        ),
    )
    .unwrap();

    // Disjoint write sets: snapshot isolation admits the write skew.
    test_db.db.commit(&txn2).unwrap();
    test_db.db.commit(&txn3).unwrap();
}

#[test]
fn watermark_follows_the_oldest_active_reader() {
    let test_db = setup("mvcc_watermark");
    let table = create_table(&test_db, "kv", &["k", "v"]);

    let t1 = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(&test_db, &t1, &insert_plan(&table, &[vec![1, 1]])).unwrap();
    test_db.db.commit(&t1).unwrap();
    assert_eq!(test_db.db.txn_manager.watermark(), 1);

    let pinned = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    let t2 = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    run(&test_db, &t2, &insert_plan(&table, &[vec![2, 2]])).unwrap();
    test_db.db.commit(&t2).unwrap();

    // The pinned reader holds the watermark at its snapshot.
    assert_eq!(test_db.db.txn_manager.watermark(), 1);
    test_db.db.commit(&pinned).unwrap();
    assert_eq!(test_db.db.txn_manager.watermark(), 2);
}

#[test]
fn garbage_collection_drops_unreachable_transactions() {
    let test_db = setup("mvcc_gc");
    let table = create_table(&test_db, "kv", &["k", "v"]);

    for i in 0..4 {
        let txn = test_db.db.begin(IsolationLevel::SnapshotIsolation);
        run(&test_db, &txn, &insert_plan(&table, &[vec![i, i]])).unwrap();
        test_db.db.commit(&txn).unwrap();
    }
    let old = test_db.db.txn_manager.last_commit_ts();
    assert_eq!(old, 4);

    // With no readers pinned, everything below the watermark collects.
    test_db.db.txn_manager.garbage_collection();
    let reader = test_db.db.begin(IsolationLevel::SnapshotIsolation);
    assert_eq!(
        scan_pairs(&test_db, &reader, &table),
        vec![(0, 0), (1, 1), (2, 2), (3, 3)]
    );
}
