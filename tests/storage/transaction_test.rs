use lumbung::{
    storage::{
        btree::BTree,
        pager::{PageRead, PageWrite, Pager, PagerConfig},
        transaction::{TransactionState, WriteTransaction},
    },
    types::error::DatabaseError,
    utils::mock::TempDatabase,
};

fn open(db: &TempDatabase) -> Pager {
    Pager::open(&db.path, false, true, PagerConfig::default()).unwrap()
}

#[test]
fn test_state_machine_commit() {
    let db = TempDatabase::with_prefix("txn_commit");
    let pager = open(&db);

    let mut tx = WriteTransaction::begin(&pager).unwrap();
    assert_eq!(tx.state(), TransactionState::Active);
    tx.write(|pages| BTree::new(pages).insert(5, b"five")).unwrap();

    // Own writes are visible inside, not outside.
    assert_eq!(
        tx.read(|view| BTree::new(view).find(5)).unwrap(),
        Some(b"five".to_vec())
    );
    assert_eq!(BTree::new(pager.snapshot()).find(5).unwrap(), None);

    let info = tx.commit().unwrap();
    assert!(info.frames_written >= 2);
    assert_eq!(tx.state(), TransactionState::Idle);
    drop(tx);

    assert_eq!(
        BTree::new(pager.snapshot()).find(5).unwrap(),
        Some(b"five".to_vec())
    );
}

#[test]
fn test_rollback_and_reuse_after_finish() {
    let db = TempDatabase::with_prefix("txn_rollback");
    let pager = open(&db);

    let mut tx = WriteTransaction::begin(&pager).unwrap();
    tx.write(|pages| BTree::new(pages).insert(1, b"one")).unwrap();
    tx.rollback().unwrap();
    assert_eq!(tx.state(), TransactionState::RolledBack);
    assert!(matches!(
        tx.write(|pages| BTree::new(pages).insert(2, b"two")),
        Err(DatabaseError::TransactionAborted { .. })
    ));
    assert!(matches!(
        tx.commit(),
        Err(DatabaseError::TransactionAborted { .. })
    ));
    drop(tx);

    assert_eq!(BTree::new(pager.snapshot()).find(1).unwrap(), None);
}

#[test]
fn test_nested_begin_fails() {
    let db = TempDatabase::with_prefix("txn_nested");
    let pager = open(&db);

    let _tx = WriteTransaction::begin(&pager).unwrap();
    assert!(matches!(
        WriteTransaction::begin(&pager),
        Err(DatabaseError::TransactionAlreadyActive)
    ));
}

#[test]
fn test_drop_rolls_back_and_releases_lock() {
    let db = TempDatabase::with_prefix("txn_drop");
    let pager = open(&db);

    {
        let mut tx = WriteTransaction::begin(&pager).unwrap();
        tx.write(|pages| BTree::new(pages).insert(9, b"nine")).unwrap();
    }

    assert_eq!(BTree::new(pager.snapshot()).find(9).unwrap(), None);
    let tx = WriteTransaction::begin(&pager).unwrap();
    assert_eq!(tx.state(), TransactionState::Active);
}

#[test]
fn test_write_error_aborts_transaction() {
    let db = TempDatabase::with_prefix("txn_abort");
    let pager = open(&db);

    let mut tx = WriteTransaction::begin(&pager).unwrap();
    tx.write(|pages| BTree::new(pages).insert(1, b"one")).unwrap();

    let err = tx
        .write(|pages| pages.write_page(1, vec![0; 10]))
        .unwrap_err();
    assert!(matches!(err, DatabaseError::PageOutOfRange { .. }));
    assert_eq!(tx.state(), TransactionState::RolledBack);

    match tx.read(|view| BTree::new(view).find(1)) {
        Err(DatabaseError::TransactionAborted { reason }) => {
            assert!(reason.contains("out of range"));
        }
        other => panic!("expected TransactionAborted, got {:?}", other),
    }
    drop(tx);
    assert_eq!(BTree::new(pager.snapshot()).find(1).unwrap(), None);
}

#[test]
fn test_header_changes_commit_with_pages() {
    let db = TempDatabase::with_prefix("txn_header");
    let pager = open(&db);

    let mut tx = WriteTransaction::begin(&pager).unwrap();
    tx.write(|pages| {
        pages.header_mut().user_version = 12;
        Ok(())
    })
    .unwrap();
    assert_eq!(tx.write_set().unwrap().header().user_version, 12);
    assert_eq!(pager.header().user_version, 0);
    tx.commit().unwrap();
    drop(tx);

    assert_eq!(pager.header().user_version, 12);
    assert_eq!(pager.snapshot().header().user_version, 12);
}

#[test]
fn test_generation_moves_with_every_mutation() {
    let db = TempDatabase::with_prefix("txn_generation");
    let pager = open(&db);
    let committed = pager.committed_generation();

    let mut tx = WriteTransaction::begin(&pager).unwrap();
    let g0 = tx.read(|view| Ok(view.generation())).unwrap();
    assert_eq!(g0, committed);
    tx.write(|pages| BTree::new(pages).insert(1, b"a")).unwrap();
    let g1 = tx.read(|view| Ok(view.generation())).unwrap();
    tx.write(|pages| BTree::new(pages).insert(2, b"b")).unwrap();
    let g2 = tx.read(|view| Ok(view.generation())).unwrap();
    assert!(g0 < g1 && g1 < g2);

    tx.commit().unwrap();
    assert!(pager.committed_generation() > g2);
}
