use granitedb_core::{
    CatalogError, ColumnDef, DbError, Engine, EngineConfig, ExecutionContext, IndexDef,
    IndexError, IsolationLevel, LogicalType, ScanOptions, TableDef, TableError, Value,
};
use pretty_assertions::assert_eq;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Barrier};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn ctx() -> ExecutionContext {
    ExecutionContext::internal()
}

fn mem_engine() -> Engine {
    init_logging();
    Engine::open(EngineConfig::default().in_memory()).unwrap()
}

fn users_table() -> TableDef {
    TableDef::new("t")
        .with_column(ColumnDef::new("id", LogicalType::I32).not_null())
        .with_column(ColumnDef::new("name", LogicalType::Varchar(16)))
        .with_primary_key(["id"])
}

fn names(rows: &[(granitedb_core::RowId, Vec<Value>)]) -> Vec<(Value, Value)> {
    rows.iter()
        .map(|(_, row)| (row[0].clone(), row[1].clone()))
        .collect()
}

fn scan_all(engine: &Engine, table: &granitedb_core::Table) -> Vec<(granitedb_core::RowId, Vec<Value>)> {
    let txn = engine.begin_read_only_transaction(&ctx()).unwrap();
    table
        .scan(&ctx(), &txn, ScanOptions::all())
        .unwrap()
        .map(|r| r.unwrap())
        .collect()
}

/// S1 through S5 from the storage contract, in order: insert + ordered
/// scan, update, index creation + point lookup, duplicate key, unique
/// violation.
#[test]
fn crud_index_and_constraint_flow() {
    let engine = mem_engine();
    let db = engine.create_database(&ctx(), "d").unwrap();
    let table = db.create_table(&ctx(), users_table()).unwrap();

    // S1: insert two rows, scan in primary-key order.
    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    table
        .insert(&ctx(), &mut txn, vec![Value::I32(1), "a".into()])
        .unwrap();
    table
        .insert(&ctx(), &mut txn, vec![Value::I32(2), "b".into()])
        .unwrap();
    txn.commit(&ctx()).unwrap();

    assert_eq!(
        names(&scan_all(&engine, &table)),
        vec![
            (Value::I32(1), "a".into()),
            (Value::I32(2), "b".into()),
        ]
    );

    // S2: update name where id = 1.
    let name_col = table.schema().column_by_name("name").unwrap().1.id;
    let row_id = table.row_id_from_pk(&[Value::I32(1)]).unwrap();
    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    let updates = BTreeMap::from([(name_col, Value::from("c"))]);
    table.update(&ctx(), &mut txn, &row_id, &updates).unwrap();
    txn.commit(&ctx()).unwrap();

    assert_eq!(
        names(&scan_all(&engine, &table)),
        vec![
            (Value::I32(1), "c".into()),
            (Value::I32(2), "b".into()),
        ]
    );

    // S3: unique index on name, point lookup via the index.
    table
        .create_index(&ctx(), &IndexDef::new("ix", ["name"]).unique())
        .unwrap();
    let txn = engine.begin_read_only_transaction(&ctx()).unwrap();
    let hits: Vec<_> = table
        .index_lookup(&ctx(), &txn, "ix", &["b".into()])
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].values, vec![Value::I32(2), "b".into()]);
    drop(txn);

    // S4: the same primary key from two transactions; one side loses.
    let mut t1 = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    let mut t2 = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    table
        .insert(&ctx(), &mut t1, vec![Value::I32(3), "x".into()])
        .unwrap();
    table
        .insert(&ctx(), &mut t2, vec![Value::I32(3), "y".into()])
        .unwrap();
    t1.commit(&ctx()).unwrap();
    let err = t2.commit(&ctx()).unwrap_err();
    assert!(err.is_retryable(), "loser surfaces a retryable conflict");

    // Sequentially, the duplicate is caught at insert time instead.
    let mut t3 = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    let err = table
        .insert(&ctx(), &mut t3, vec![Value::I32(3), "z".into()])
        .unwrap_err();
    assert!(matches!(err, DbError::Table(TableError::DuplicateKey(_))));
    t3.rollback().unwrap();

    // S5: unique violation through `ix` ("b" is taken by id 2).
    let mut t4 = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    let err = table
        .insert(&ctx(), &mut t4, vec![Value::I32(4), "b".into()])
        .unwrap_err();
    assert!(matches!(
        err,
        DbError::Index(IndexError::UniqueViolation { .. })
    ));
    t4.rollback().unwrap();
}

/// S6: dropping a database removes every trace of it from disk, across an
/// engine restart.
#[test]
fn drop_database_survives_restart() {
    init_logging();
    let dir = tempfile::TempDir::with_prefix("granite_engine_test").unwrap();
    let config = EngineConfig::default().with_data_dir(dir.path());

    let db_id = {
        let engine = Engine::open(config.clone()).unwrap();
        let db = engine.create_database(&ctx(), "d").unwrap();
        let table = db.create_table(&ctx(), users_table()).unwrap();
        let mut txn = engine
            .begin_transaction(&ctx(), IsolationLevel::Serializable)
            .unwrap();
        table
            .insert(&ctx(), &mut txn, vec![Value::I32(1), "a".into()])
            .unwrap();
        txn.commit(&ctx()).unwrap();

        engine.drop_database(&ctx(), "d").unwrap();
        engine.shutdown(&ctx()).unwrap();
        db.id()
    };

    let engine = Engine::open(config).unwrap();
    let db_names: Vec<_> = engine
        .list_databases()
        .unwrap()
        .into_iter()
        .map(|db| db.name().to_owned())
        .collect();
    assert!(!db_names.contains(&"d".to_string()));

    let txn = engine.begin_read_only_transaction(&ctx()).unwrap();
    let leftovers = txn
        .list_prefix(&ctx(), &granitedb_codec::key::data_db_prefix(db_id))
        .unwrap();
    assert!(leftovers.is_empty());
}

#[test]
fn rolled_back_transaction_leaves_store_unchanged() {
    let engine = mem_engine();
    let db = engine.create_database(&ctx(), "d").unwrap();
    let table = db.create_table(&ctx(), users_table()).unwrap();

    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    table
        .insert(&ctx(), &mut txn, vec![Value::I32(1), "a".into()])
        .unwrap();
    txn.commit(&ctx()).unwrap();

    let before = {
        let txn = engine.begin_read_only_transaction(&ctx()).unwrap();
        txn.list_prefix(&ctx(), &[]).unwrap()
    };

    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    table
        .insert(&ctx(), &mut txn, vec![Value::I32(9), "z".into()])
        .unwrap();
    let row_id = table.row_id_from_pk(&[Value::I32(1)]).unwrap();
    table.delete(&ctx(), &mut txn, &row_id).unwrap();
    txn.rollback().unwrap();

    let after = {
        let txn = engine.begin_read_only_transaction(&ctx()).unwrap();
        txn.list_prefix(&ctx(), &[]).unwrap()
    };
    assert_eq!(before, after);
}

#[test]
fn truncate_keeps_schema_indexes_and_row_counter() {
    let engine = mem_engine();
    let db = engine.create_database(&ctx(), "d").unwrap();
    // No primary key: rows get synthetic monotonic ids.
    let def = TableDef::new("log").with_column(ColumnDef::new("msg", LogicalType::String));
    let table = db.create_table(&ctx(), def).unwrap();
    table
        .create_index(&ctx(), &IndexDef::new("ix_msg", ["msg"]))
        .unwrap();

    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    table
        .insert(&ctx(), &mut txn, vec!["one".into()])
        .unwrap();
    let last_before = table
        .insert(&ctx(), &mut txn, vec!["two".into()])
        .unwrap();
    txn.commit(&ctx()).unwrap();

    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    assert_eq!(table.truncate(&ctx(), &mut txn).unwrap(), 2);
    txn.commit(&ctx()).unwrap();

    assert!(scan_all(&engine, &table).is_empty());
    assert_eq!(table.list_indexes().unwrap().len(), 1);

    // The row-id counter is not reset by truncate.
    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    let first_after = table
        .insert(&ctx(), &mut txn, vec!["three".into()])
        .unwrap();
    txn.commit(&ctx()).unwrap();
    assert!(first_after > last_before);
}

#[test]
fn concurrent_disjoint_writers_both_commit() {
    let engine = mem_engine();
    let db = engine.create_database(&ctx(), "d").unwrap();
    db.create_table(&ctx(), users_table()).unwrap();

    let barrier = Barrier::new(2);
    std::thread::scope(|scope| {
        for id in [10, 20] {
            let engine = engine.clone();
            let barrier = &barrier;
            scope.spawn(move || {
                let table = engine.database("d").unwrap().table("t").unwrap();
                let mut txn = engine
                    .begin_transaction(&ctx(), IsolationLevel::Serializable)
                    .unwrap();
                table
                    .insert(&ctx(), &mut txn, vec![Value::I32(id), "w".into()])
                    .unwrap();
                barrier.wait();
                txn.commit(&ctx()).unwrap();
            });
        }
    });

    let table = engine.database("d").unwrap().table("t").unwrap();
    assert_eq!(scan_all(&engine, &table).len(), 2);
}

#[test]
fn cancellation_aborts_scans_and_writes() {
    let engine = mem_engine();
    let db = engine.create_database(&ctx(), "d").unwrap();
    let table = db.create_table(&ctx(), users_table()).unwrap();

    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    for i in 0..10 {
        table
            .insert(&ctx(), &mut txn, vec![Value::I32(i), "r".into()])
            .unwrap();
    }
    txn.commit(&ctx()).unwrap();

    // A scan cancelled mid-flight surfaces Cancelled on the next item and
    // releases its cursor when dropped.
    let flag = Arc::new(AtomicBool::new(false));
    let cancel_ctx = ExecutionContext::cancellable(flag.clone());
    let txn = engine.begin_read_only_transaction(&cancel_ctx).unwrap();
    let mut rows = table.scan(&cancel_ctx, &txn, ScanOptions::all()).unwrap();
    assert!(rows.next().unwrap().is_ok());
    flag.store(true, Ordering::Relaxed);
    assert!(matches!(rows.next(), Some(Err(DbError::Cancelled))));
    assert!(rows.next().is_none());
    drop(rows);
    drop(txn);

    // A cancelled context refuses new work outright.
    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    let err = table
        .insert(&cancel_ctx, &mut txn, vec![Value::I32(99), "x".into()])
        .unwrap_err();
    assert!(matches!(err, DbError::Cancelled));
    txn.rollback().unwrap();
}

#[test]
fn system_databases_are_read_only() {
    let engine = mem_engine();

    let err = engine.drop_database(&ctx(), "mysql").unwrap_err();
    assert!(matches!(
        err,
        DbError::Catalog(CatalogError::PermissionDenied(_))
    ));

    let info = engine.database("information_schema").unwrap();
    let err = info.create_table(&ctx(), users_table()).unwrap_err();
    assert!(matches!(
        err,
        DbError::Catalog(CatalogError::PermissionDenied(_))
    ));
}

#[test]
fn provider_resolves_names_case_insensitively() {
    let engine = mem_engine();
    let db = engine.create_database(&ctx(), "Sales").unwrap();
    db.create_table(&ctx(), users_table()).unwrap();

    let provider = engine.provide_catalog();
    assert!(provider.database("sales").is_err());
    let table = provider.table_case_insensitive("SALES", "T").unwrap();
    assert_eq!(table.schema().name, "t");
    assert_eq!(provider.all_databases().unwrap().len(), 3);
}

#[test]
fn scan_honors_primary_key_range_and_limit() {
    let engine = mem_engine();
    let db = engine.create_database(&ctx(), "d").unwrap();
    let table = db.create_table(&ctx(), users_table()).unwrap();

    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    for i in 1..=5 {
        table
            .insert(&ctx(), &mut txn, vec![Value::I32(i), format!("n{i}").into()])
            .unwrap();
    }
    txn.commit(&ctx()).unwrap();

    let txn = engine.begin_read_only_transaction(&ctx()).unwrap();
    let rows: Vec<_> = table
        .scan(
            &ctx(),
            &txn,
            ScanOptions::all()
                .with_lower(vec![Value::I32(2)])
                .with_upper(vec![Value::I32(4)]),
        )
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(
        rows.iter().map(|(_, row)| row[0].clone()).collect::<Vec<_>>(),
        vec![Value::I32(2), Value::I32(3), Value::I32(4)]
    );

    let rows: Vec<_> = table
        .scan(&ctx(), &txn, ScanOptions::all().with_limit(2))
        .unwrap()
        .map(|r| r.unwrap())
        .collect();
    assert_eq!(rows.len(), 2);
}

#[test]
fn rename_table_and_drop_index() {
    let engine = mem_engine();
    let db = engine.create_database(&ctx(), "d").unwrap();
    let table = db.create_table(&ctx(), users_table()).unwrap();
    table
        .create_index(&ctx(), &IndexDef::new("ix", ["name"]))
        .unwrap();

    let renamed = db.rename_table(&ctx(), "t", "t2").unwrap();
    assert!(db.table("t").is_err());
    assert_eq!(renamed.list_indexes().unwrap().len(), 1);

    renamed.drop_index(&ctx(), "ix").unwrap();
    assert!(matches!(
        renamed.get_index("ix"),
        Err(DbError::Index(IndexError::NotFound(_)))
    ));
    // The entries are gone with the definition.
    let txn = engine.begin_read_only_transaction(&ctx()).unwrap();
    let schema = renamed.schema();
    let leftovers = txn
        .list_prefix(
            &ctx(),
            &granitedb_codec::key::index_entries_table_prefix(schema.database_id, schema.id),
        )
        .unwrap();
    assert!(leftovers.is_empty());
}

#[test]
fn temporal_queries_are_stubbed_out() {
    let engine = mem_engine();
    assert!(matches!(
        engine.begin_transaction_as_of(&ctx(), IsolationLevel::Snapshot, 0),
        Err(DbError::NotImplemented(_))
    ));
}

#[test]
fn closed_table_handle_rejects_operations() {
    let engine = mem_engine();
    let db = engine.create_database(&ctx(), "d").unwrap();
    let table = db.create_table(&ctx(), users_table()).unwrap();
    table.close();

    let mut txn = engine
        .begin_transaction(&ctx(), IsolationLevel::Serializable)
        .unwrap();
    let err = table
        .insert(&ctx(), &mut txn, vec![Value::I32(1), "a".into()])
        .unwrap_err();
    assert!(matches!(err, DbError::Table(TableError::Closed)));
    txn.rollback().unwrap();
}
