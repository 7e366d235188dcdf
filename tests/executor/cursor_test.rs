use lumbung::{
    Connection,
    executor::{
        ReadContext,
        cursor::{Cursor, Seek},
        range_scan::{KeyRange, RangeCursor},
    },
    types::{record::Record, value::Value},
    utils::mock::TempDatabase,
};

fn row(key: u64) -> Record {
    Record::new(vec![Value::Integer(key as i64), Value::Text("x".repeat(150))])
}

/// Even keys 2..=400, enough for several leaves.
fn populated(db: &TempDatabase) -> Connection {
    let conn = db.open().unwrap();
    let mut tx = conn.begin().unwrap();
    for key in (2..=400).step_by(2) {
        tx.put(key, &row(key)).unwrap();
    }
    tx.commit().unwrap();
    conn
}

fn drain_forward(conn: &Connection, cursor: &mut Cursor) -> Vec<u64> {
    let mut keys = Vec::new();
    loop {
        let snapshot = conn.pager().snapshot();
        match cursor.next(&snapshot).unwrap() {
            Some((key, _)) => keys.push(key),
            None => return keys,
        }
    }
}

#[test]
fn test_forward_and_backward_walks() {
    let db = TempDatabase::with_prefix("cursor_walk");
    let conn = populated(&db);
    assert!(conn.check_integrity().unwrap().height >= 2);

    let mut cursor = Cursor::new();
    cursor.seek_first(&conn.pager().snapshot()).unwrap();
    let forward = drain_forward(&conn, &mut cursor);
    assert_eq!(forward, (2..=400).step_by(2).collect::<Vec<_>>());
    assert!(cursor.is_exhausted());

    let snapshot = conn.pager().snapshot();
    let mut cursor = Cursor::new();
    cursor.seek_last(&snapshot).unwrap();
    let mut backward = Vec::new();
    while let Some((key, record)) = cursor.previous(&snapshot).unwrap() {
        assert_eq!(record.integer(0).unwrap(), key as i64);
        backward.push(key);
    }
    assert_eq!(backward, (2..=400).step_by(2).collect::<Vec<_>>().into_iter().rev().collect::<Vec<_>>());
}

#[test]
fn test_seek_ge_and_le_land_between_keys() {
    let db = TempDatabase::with_prefix("cursor_seek");
    let conn = populated(&db);
    let snapshot = conn.pager().snapshot();

    let mut cursor = Cursor::new();
    cursor.seek_ge(&snapshot, 101).unwrap();
    assert_eq!(cursor.next(&snapshot).unwrap().map(|(k, _)| k), Some(102));

    cursor.seek_le(&snapshot, 101).unwrap();
    assert_eq!(cursor.previous(&snapshot).unwrap().map(|(k, _)| k), Some(100));

    cursor.seek(&snapshot, Seek::Ge(401)).unwrap();
    assert_eq!(cursor.next(&snapshot).unwrap(), None);

    cursor.seek(&snapshot, Seek::Le(1)).unwrap();
    assert_eq!(cursor.previous(&snapshot).unwrap(), None);
}

#[test]
fn test_cursor_on_empty_tree() {
    let db = TempDatabase::with_prefix("cursor_empty");
    let conn = db.open().unwrap();
    let snapshot = conn.pager().snapshot();

    let mut cursor = Cursor::new();
    cursor.seek_first(&snapshot).unwrap();
    assert_eq!(cursor.next(&snapshot).unwrap(), None);
    cursor.seek_last(&snapshot).unwrap();
    assert_eq!(cursor.previous(&snapshot).unwrap(), None);
}

#[test]
fn test_cursor_reseeks_after_concurrent_commit() {
    let db = TempDatabase::with_prefix("cursor_reseek");
    let conn = populated(&db);

    let mut cursor = Cursor::new();
    cursor.seek_first(&conn.pager().snapshot()).unwrap();
    let mut seen = Vec::new();
    for _ in 0..10 {
        let snapshot = conn.pager().snapshot();
        seen.push(cursor.next(&snapshot).unwrap().unwrap().0);
    }
    assert_eq!(seen.last(), Some(&20));

    // Reshape the tree under the cursor: odd keys in, a block of evens out.
    {
        let mut tx = conn.begin().unwrap();
        for key in (1..=399).step_by(2) {
            tx.put(key, &row(key)).unwrap();
        }
        for key in (22..=60).step_by(2) {
            tx.delete(key).unwrap();
        }
        tx.commit().unwrap();
    }

    seen.extend(drain_forward(&conn, &mut cursor));
    let mut expected: Vec<u64> = (2..=20).step_by(2).collect();
    expected.extend(21..=400);
    expected.retain(|k| !(22..=60).contains(k) || k % 2 == 1);
    assert_eq!(seen, expected);
}

#[test]
fn test_cursor_sees_writes_inside_transaction() {
    let db = TempDatabase::with_prefix("cursor_txn");
    let conn = populated(&db);
    let mut tx = conn.begin().unwrap();

    let mut cursor = RangeCursor::new(KeyRange::all(), false);
    let mut keys = Vec::new();
    loop {
        let next = tx.with_pages(|pages| cursor.next_in(pages)).unwrap();
        let Some((key, _)) = next else {
            break;
        };
        keys.push(key);
        if key == 10 {
            // Insert ahead of the cursor and delete behind it.
            tx.put(11, &row(11)).unwrap();
            tx.delete(4).unwrap();
        }
        if key >= 14 {
            break;
        }
    }
    assert_eq!(keys, vec![2, 4, 6, 8, 10, 11, 12, 14]);
}

#[test]
fn test_range_cursor_bounds() {
    let db = TempDatabase::with_prefix("cursor_range");
    let conn = populated(&db);

    let collect = |range: KeyRange, descending: bool| -> Vec<u64> {
        let mut cursor = RangeCursor::new(range, descending);
        let snapshot = conn.pager().snapshot();
        let mut keys = Vec::new();
        while let Some((key, _)) = cursor.next_in(&snapshot).unwrap() {
            keys.push(key);
        }
        keys
    };

    assert_eq!(collect(KeyRange::from_bounds(10..=16), false), vec![10, 12, 14, 16]);
    assert_eq!(collect(KeyRange::from_bounds(10..16), false), vec![10, 12, 14]);
    assert_eq!(collect(KeyRange::from_bounds(10..=16), true), vec![16, 14, 12, 10]);
    assert_eq!(collect(KeyRange::from_bounds(395..), false), vec![396, 398, 400]);
    assert_eq!(collect(KeyRange::from_bounds(..5), true), vec![4, 2]);
    assert!(collect(KeyRange::from_bounds(11..11), false).is_empty());
    assert!(collect(KeyRange::from_bounds(..0), true).is_empty());
    assert!(KeyRange::inclusive(Some(3), None).contains(u64::MAX));
}
