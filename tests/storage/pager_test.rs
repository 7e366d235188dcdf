use std::{fs, time::Instant};

use lumbung::{
    storage::{
        pager::{CheckpointMode, PageRead, PageWrite, Pager, PagerConfig},
        wal::wal_path_for,
    },
    types::{
        PAGE_SIZE,
        error::DatabaseError,
        page::{Page, PageType},
    },
    utils::mock::TempDatabase,
};

fn open(db: &TempDatabase) -> Pager {
    Pager::open(&db.path, false, true, PagerConfig::default()).unwrap()
}

fn leaf_image(page_id: u64, marker: &[u8]) -> Vec<u8> {
    let mut page = Page::new(page_id, PageType::Leaf);
    page.insert_cell(marker).unwrap();
    page.to_bytes()
}

#[test]
fn test_create_new_database() {
    let db = TempDatabase::with_prefix("pager_create");
    let pager = open(&db);

    let header = pager.header();
    assert_eq!(header.page_count, 2);
    assert_eq!(header.root_page, 2);
    assert_eq!(fs::metadata(&db.path).unwrap().len(), 2 * PAGE_SIZE as u64);

    let snapshot = pager.snapshot();
    let root = snapshot.read_page(2).unwrap();
    assert_eq!(PageType::of(&root).unwrap(), PageType::Leaf);
    assert!(matches!(
        snapshot.read_page(3),
        Err(DatabaseError::PageOutOfRange { page_id: 3, page_count: 2 })
    ));
}

#[test]
fn test_open_missing_without_create_fails() {
    let db = TempDatabase::with_prefix("pager_missing");
    let result = Pager::open(&db.path, false, false, PagerConfig::default());
    assert!(matches!(result, Err(DatabaseError::Io(_))));
    assert!(!db.path.exists());
}

#[test]
fn test_corrupt_and_short_headers() {
    let db = TempDatabase::with_prefix("pager_corrupt");
    fs::write(&db.path, vec![7u8; PAGE_SIZE * 2]).unwrap();
    assert!(matches!(
        Pager::open(&db.path, false, true, PagerConfig::default()),
        Err(DatabaseError::CorruptHeader { .. })
    ));

    fs::write(&db.path, vec![0u8; 512]).unwrap();
    assert!(matches!(
        Pager::open(&db.path, false, true, PagerConfig::default()),
        Err(DatabaseError::CorruptHeader { .. })
    ));
}

#[test]
fn test_uncommitted_pages_are_invisible_to_snapshots() {
    let db = TempDatabase::with_prefix("pager_isolation");
    let pager = open(&db);

    let guard = pager.lock_writer().unwrap();
    let mut set = pager.begin_write(&guard).unwrap();
    let before = pager.committed_generation();
    {
        let mut handle = pager.write_handle(&mut set);
        let page_id = handle.allocate_page().unwrap();
        assert_eq!(page_id, 3);
        handle.write_page(3, leaf_image(3, b"new")).unwrap();
        assert_eq!(handle.read_page(3).unwrap().to_vec(), leaf_image(3, b"new"));
    }

    assert_eq!(pager.header().page_count, 2);
    assert!(pager.snapshot().read_page(3).is_err());
    assert_eq!(set.dirty_pages().collect::<Vec<_>>(), vec![3]);

    let info = pager.commit(&mut set).unwrap();
    assert_eq!(info.frames_written, 2);
    assert!(pager.committed_generation() > before);
    assert_eq!(pager.header().page_count, 3);
    assert_eq!(pager.header().file_change_counter, 1);
    assert_eq!(
        pager.snapshot().read_page(3).unwrap().to_vec(),
        leaf_image(3, b"new")
    );
    drop(guard);
}

#[test]
fn test_rollback_discards_frames() {
    let db = TempDatabase::with_prefix("pager_rollback");
    let pager = open(&db);

    let guard = pager.lock_writer().unwrap();
    let mut set = pager.begin_write(&guard).unwrap();
    pager
        .write_handle(&mut set)
        .write_page(2, leaf_image(2, b"gone"))
        .unwrap();
    assert!(wal_path_for(&db.path).exists());
    pager.rollback(set).unwrap();
    drop(guard);

    assert_eq!(pager.wal_frames(), 0);
    let root = Page::from_bytes(&pager.snapshot().read_page(2).unwrap()).unwrap();
    assert_eq!(root.cell_count, 0);
}

#[test]
fn test_empty_commit_writes_nothing() {
    let db = TempDatabase::with_prefix("pager_empty_commit");
    let pager = open(&db);

    let guard = pager.lock_writer().unwrap();
    let mut set = pager.begin_write(&guard).unwrap();
    let info = pager.commit(&mut set).unwrap();
    assert_eq!(info.frames_written, 0);
    assert_eq!(pager.header().file_change_counter, 0);
    drop(guard);
}

#[test]
fn test_single_writer_lock() {
    let db = TempDatabase::with_prefix("pager_writer");
    let pager = open(&db);

    let guard = pager.lock_writer().unwrap();
    assert!(matches!(
        pager.lock_writer(),
        Err(DatabaseError::TransactionAlreadyActive)
    ));
    assert!(matches!(
        pager.checkpoint(CheckpointMode::Passive),
        Err(DatabaseError::Busy { .. })
    ));
    drop(guard);
    assert!(pager.lock_writer().is_ok());
}

#[test]
fn test_busy_timeout_waits_then_fails() {
    let db = TempDatabase::with_prefix("pager_busy");
    let config = PagerConfig {
        busy_timeout: Some(50),
        ..PagerConfig::default()
    };
    let pager = Pager::open(&db.path, false, true, config).unwrap();

    let _guard = pager.lock_writer().unwrap();
    let started = Instant::now();
    let err = pager.lock_writer().unwrap_err();
    assert!(matches!(err, DatabaseError::Busy { operation: "begin" }));
    assert!(err.is_retryable());
    assert!(started.elapsed().as_millis() >= 40);
}

#[test]
fn test_free_list_reuse() {
    let db = TempDatabase::with_prefix("pager_freelist");
    let pager = open(&db);

    {
        let guard = pager.lock_writer().unwrap();
        let mut set = pager.begin_write(&guard).unwrap();
        let mut handle = pager.write_handle(&mut set);
        for expected in 3..=5 {
            let page_id = handle.allocate_page().unwrap();
            assert_eq!(page_id, expected);
            handle.write_page(page_id, leaf_image(page_id, b"x")).unwrap();
        }
        handle.free_page(4).unwrap();
        assert_eq!(handle.header().freelist_head, 4);
        assert_eq!(handle.header().freelist_count, 1);
        pager.commit(&mut set).unwrap();
    }

    assert_eq!(pager.header().freelist_count, 1);

    let guard = pager.lock_writer().unwrap();
    let mut set = pager.begin_write(&guard).unwrap();
    let mut handle = pager.write_handle(&mut set);
    assert_eq!(handle.allocate_page().unwrap(), 4);
    assert_eq!(handle.allocate_page().unwrap(), 6);
    assert_eq!(handle.header().freelist_count, 0);
    pager.rollback(set).unwrap();
    drop(guard);
}

#[test]
fn test_write_page_bounds() {
    let db = TempDatabase::with_prefix("pager_bounds");
    let pager = open(&db);

    let guard = pager.lock_writer().unwrap();
    let mut set = pager.begin_write(&guard).unwrap();
    let mut handle = pager.write_handle(&mut set);
    assert!(matches!(
        handle.write_page(1, vec![0; PAGE_SIZE]),
        Err(DatabaseError::PageOutOfRange { page_id: 1, .. })
    ));
    assert!(matches!(
        handle.write_page(9, vec![0; PAGE_SIZE]),
        Err(DatabaseError::PageOutOfRange { page_id: 9, .. })
    ));
    pager.rollback(set).unwrap();
    drop(guard);
}

#[test]
fn test_checkpoint_moves_frames_into_main_file() {
    let db = TempDatabase::with_prefix("pager_checkpoint");
    let pager = open(&db);

    {
        let guard = pager.lock_writer().unwrap();
        let mut set = pager.begin_write(&guard).unwrap();
        let mut handle = pager.write_handle(&mut set);
        let page_id = handle.allocate_page().unwrap();
        handle.write_page(page_id, leaf_image(page_id, b"durable")).unwrap();
        pager.commit(&mut set).unwrap();
    }
    assert_eq!(pager.wal_frames(), 2);

    let result = pager.checkpoint(CheckpointMode::Truncate).unwrap();
    assert_eq!(result.log_frames, 2);
    assert_eq!(result.checkpointed_frames, 2);
    assert_eq!(pager.wal_frames(), 0);
    assert_eq!(fs::metadata(wal_path_for(&db.path)).unwrap().len(), 0);

    let main = fs::read(&db.path).unwrap();
    assert_eq!(main.len(), 3 * PAGE_SIZE);
    assert_eq!(&main[2 * PAGE_SIZE..], leaf_image(3, b"durable").as_slice());

    // Idempotent.
    let again = pager.checkpoint(CheckpointMode::Passive).unwrap();
    assert_eq!(again.checkpointed_frames, 0);
}

#[test]
fn test_reopen_recovers_committed_frames() {
    let db = TempDatabase::with_prefix("pager_recover");
    let config = PagerConfig {
        checkpoint_on_close: false,
        ..PagerConfig::default()
    };
    {
        let pager = Pager::open(&db.path, false, true, config.clone()).unwrap();
        let guard = pager.lock_writer().unwrap();
        let mut set = pager.begin_write(&guard).unwrap();
        let mut handle = pager.write_handle(&mut set);
        let page_id = handle.allocate_page().unwrap();
        handle.write_page(page_id, leaf_image(page_id, b"kept")).unwrap();
        pager.commit(&mut set).unwrap();
    }
    assert!(wal_path_for(&db.path).exists());

    let pager = Pager::open(&db.path, false, true, config).unwrap();
    assert!(!wal_path_for(&db.path).exists());
    assert_eq!(pager.header().page_count, 3);
    assert_eq!(
        pager.snapshot().read_page(3).unwrap().to_vec(),
        leaf_image(3, b"kept")
    );
}

#[test]
fn test_read_only_pager() {
    let db = TempDatabase::with_prefix("pager_read_only");
    drop(open(&db));

    let pager = Pager::open(&db.path, true, false, PagerConfig::default()).unwrap();
    assert!(pager.is_read_only());
    assert!(matches!(pager.lock_writer(), Err(DatabaseError::ReadOnly)));
    assert!(matches!(
        pager.checkpoint(CheckpointMode::Full),
        Err(DatabaseError::ReadOnly)
    ));
    assert!(pager.snapshot().read_page(2).is_ok());
}

#[test]
fn test_cache_counts_hits() {
    let db = TempDatabase::with_prefix("pager_cache");
    let pager = open(&db);

    pager.snapshot().read_page(2).unwrap();
    pager.snapshot().read_page(2).unwrap();
    let stats = pager.cache_stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);

    pager.set_cache_size(8);
    assert_eq!(pager.cache_stats().capacity, 8);
}

#[test]
fn test_config_deserializes_with_defaults() {
    let config: PagerConfig = serde_json::from_str(r#"{ "busy_timeout": 250 }"#).unwrap();
    assert_eq!(config.busy_timeout, Some(250));
    assert_eq!(config.cache_size, PagerConfig::default().cache_size);
    assert!(config.checkpoint_on_close);
}
