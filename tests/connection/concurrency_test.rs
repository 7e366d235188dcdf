use std::{
    sync::{
        Arc, Barrier,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use lumbung::{
    Connection, DatabaseError, OpenOptions,
    executor::scan::Scanner,
    types::{record::Record, value::Value},
    utils::mock::TempDatabase,
};

fn assert_send_sync<T: Send + Sync>() {}

#[test]
fn test_connection_is_shareable() {
    assert_send_sync::<Connection>();
}

/// Readers keep scanning while a writer rewrites every row; no key ever
/// goes missing and the final state is the last commit.
#[test]
fn test_readers_run_alongside_writer() {
    let db = TempDatabase::with_prefix("concurrency_readers");
    let conn = Arc::new(db.open().unwrap());
    const ROWS: u64 = 50;

    let write_version = |version: i64| {
        let mut tx = conn.begin().unwrap();
        for key in 0..ROWS {
            tx.put(key, &Record::new(vec![Value::Integer(version)]))
                .unwrap();
        }
        tx.commit().unwrap();
    };
    write_version(0);

    let stop = Arc::new(AtomicBool::new(false));
    let readers: Vec<_> = (0..4)
        .map(|_| {
            let conn = Arc::clone(&conn);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                while !stop.load(Ordering::SeqCst) {
                    let versions: Vec<i64> = conn
                        .scan(..)
                        .into_iter()
                        .map(|row| row.unwrap().1.integer(0).unwrap())
                        .collect();
                    assert_eq!(versions.len() as u64, ROWS);
                    // Point reads always see a committed version.
                    let value = conn.get(ROWS / 2).unwrap().unwrap();
                    assert!(value.integer(0).unwrap() >= 0);
                }
            })
        })
        .collect();

    for version in 1..=20 {
        write_version(version);
    }
    stop.store(true, Ordering::SeqCst);
    for reader in readers {
        reader.join().unwrap();
    }

    let versions: Vec<i64> = conn
        .scan(..)
        .into_iter()
        .map(|row| row.unwrap().1.integer(0).unwrap())
        .collect();
    assert!(versions.iter().all(|v| *v == 20));
}

#[test]
fn test_point_reads_during_writer_thread() {
    let db = TempDatabase::with_prefix("concurrency_batch");
    let conn = Arc::new(db.open().unwrap());
    {
        let mut tx = conn.begin().unwrap();
        for key in 0..20 {
            tx.put(key, &Record::new(vec![Value::Integer(0)])).unwrap();
        }
        tx.commit().unwrap();
    }

    let writer = {
        let conn = Arc::clone(&conn);
        thread::spawn(move || {
            for version in 1..=50i64 {
                let mut tx = conn.begin().unwrap();
                for key in 0..20 {
                    tx.put(key, &Record::new(vec![Value::Integer(version)]))
                        .unwrap();
                }
                tx.commit().unwrap();
            }
        })
    };

    // Each point read runs against one committed snapshot.
    while !writer.is_finished() {
        let record = conn.get(7).unwrap().unwrap();
        let version = record.integer(0).unwrap();
        assert!((0..=50).contains(&version));
        let batch = conn.scan(..).scan_batch(20).unwrap();
        assert_eq!(batch.len(), 20);
    }
    writer.join().unwrap();
    assert_eq!(conn.get(7).unwrap().unwrap().integer(0).unwrap(), 50);
}

/// Point reads keep completing while a checkpoint copies a large log back
/// into the main file.
#[test]
fn test_reads_proceed_during_checkpoint() {
    let db = TempDatabase::with_prefix("concurrency_checkpoint");
    let conn = Arc::new(
        db.open_with(
            &OpenOptions::new()
                .wal_autocheckpoint(0)
                .checkpoint_on_close(false)
                .cache_size(4),
        )
        .unwrap(),
    );
    const ROWS: u64 = 8_000;
    {
        let mut tx = conn.begin().unwrap();
        for key in 0..ROWS {
            tx.put(key, &Record::new(vec![Value::Blob(vec![key as u8; 800])]))
                .unwrap();
        }
        tx.commit().unwrap();
    }
    assert!(conn.pager().wal_frames() > 1_000);

    let start = Arc::new(Barrier::new(2));
    let done = Arc::new(AtomicBool::new(false));
    let checkpointer = {
        let conn = Arc::clone(&conn);
        let start = Arc::clone(&start);
        let done = Arc::clone(&done);
        thread::spawn(move || {
            start.wait();
            let result = conn.checkpoint().unwrap();
            done.store(true, Ordering::SeqCst);
            result
        })
    };

    start.wait();
    let mut reads_during_checkpoint = 0u32;
    let mut key = 0;
    while !done.load(Ordering::SeqCst) {
        let record = conn.get(key).unwrap().unwrap();
        assert_eq!(record.blob(0).unwrap()[0], key as u8);
        if !done.load(Ordering::SeqCst) {
            reads_during_checkpoint += 1;
        }
        key = (key + 997) % ROWS;
    }
    let result = checkpointer.join().unwrap();

    assert!(result.checkpointed_frames > 1_000);
    assert!(
        reads_during_checkpoint > 1,
        "only {reads_during_checkpoint} reads finished during the checkpoint"
    );
    assert_eq!(conn.pager().wal_frames(), 0);
    let last = conn.get(ROWS - 1).unwrap().unwrap();
    assert_eq!(last.blob(0).unwrap()[0], (ROWS - 1) as u8);
}

#[test]
fn test_busy_timeout_waits_then_fails() {
    let db = TempDatabase::with_prefix("concurrency_busy");
    let conn = Arc::new(
        db.open_with(&OpenOptions::new().busy_timeout(Some(Duration::from_millis(50))))
            .unwrap(),
    );

    let held = Arc::new(Barrier::new(2));
    let release = Arc::new(Barrier::new(2));
    let holder = {
        let conn = Arc::clone(&conn);
        let held = Arc::clone(&held);
        let release = Arc::clone(&release);
        thread::spawn(move || {
            let tx = conn.begin().unwrap();
            held.wait();
            release.wait();
            tx.rollback().unwrap();
        })
    };

    held.wait();
    let started = Instant::now();
    let err = conn.begin().err().unwrap();
    assert!(matches!(err, DatabaseError::Busy { operation: "begin" }));
    assert!(err.is_retryable());
    assert!(started.elapsed() >= Duration::from_millis(40));
    release.wait();
    holder.join().unwrap();

    // The lock is free again.
    conn.begin().unwrap().commit().unwrap();
}

#[test]
fn test_busy_timeout_succeeds_when_writer_finishes() {
    let db = TempDatabase::with_prefix("concurrency_wait");
    let conn = Arc::new(
        db.open_with(&OpenOptions::new().busy_timeout(Some(Duration::from_secs(5))))
            .unwrap(),
    );

    let held = Arc::new(Barrier::new(2));
    let holder = {
        let conn = Arc::clone(&conn);
        let held = Arc::clone(&held);
        thread::spawn(move || {
            let mut tx = conn.begin().unwrap();
            tx.put(1, &Record::new(vec![Value::Integer(1)])).unwrap();
            held.wait();
            thread::sleep(Duration::from_millis(20));
            tx.commit().unwrap();
        })
    };

    held.wait();
    let mut tx = conn.begin().unwrap();
    // The waiting writer starts from the other thread's commit.
    assert!(tx.get(1).unwrap().is_some());
    tx.put(2, &Record::new(vec![Value::Integer(2)])).unwrap();
    tx.commit().unwrap();
    holder.join().unwrap();

    assert!(conn.contains(1).unwrap());
    assert!(conn.contains(2).unwrap());
}

#[test]
fn test_no_timeout_fails_fast() {
    let db = TempDatabase::with_prefix("concurrency_fast");
    let conn = db.open().unwrap();

    thread::scope(|scope| {
        let tx = conn.begin().unwrap();
        scope
            .spawn(|| {
                assert!(matches!(
                    conn.begin(),
                    Err(DatabaseError::TransactionAlreadyActive)
                ));
            })
            .join()
            .unwrap();
        drop(tx);
    });
}
