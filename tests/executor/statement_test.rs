use lumbung::{
    Connection, DatabaseError,
    executor::{
        predicate::Predicate,
        statement::{Statement, Step},
    },
    types::{record::Record, value::Value},
    utils::mock::TempDatabase,
};

fn populated(db: &TempDatabase) -> Connection {
    let conn = db.open().unwrap();
    let mut tx = conn.begin().unwrap();
    for key in 1..=50u64 {
        let parity = if key % 2 == 0 { "even" } else { "odd" };
        tx.put(
            key,
            &Record::new(vec![Value::Integer(key as i64 * 10), Value::from(parity)]),
        )
        .unwrap();
    }
    tx.commit().unwrap();
    conn
}

fn keys(statement: &mut Statement, conn: &Connection) -> Vec<u64> {
    statement
        .rows(conn)
        .map(|row| row.map(|(key, _)| key))
        .collect::<Result<_, _>>()
        .unwrap()
}

#[test]
fn test_point_statement() {
    let db = TempDatabase::with_prefix("stmt_point");
    let conn = populated(&db);

    let mut statement = Statement::point();
    assert_eq!(statement.parameter_count(), 1);
    statement.bind(1, 42).unwrap();

    match statement.step(&conn).unwrap() {
        Step::Row(key, record) => {
            assert_eq!(key, 42);
            assert_eq!(record.integer(0).unwrap(), 420);
        }
        Step::Done => panic!("expected row 42"),
    }
    assert_eq!(statement.step(&conn).unwrap(), Step::Done);
    // Stays done until reset.
    assert_eq!(statement.step(&conn).unwrap(), Step::Done);

    statement.reset();
    statement.bind(1, 99).unwrap();
    assert_eq!(statement.step(&conn).unwrap(), Step::Done);
}

#[test]
fn test_bind_errors() {
    let mut statement = Statement::point();
    assert!(matches!(
        statement.bind(0, 1),
        Err(DatabaseError::ParameterIndexOutOfRange { index: 0, count: 1 })
    ));
    assert!(matches!(
        statement.bind(2, 1),
        Err(DatabaseError::ParameterIndexOutOfRange { index: 2, count: 1 })
    ));

    let mut range = Statement::range(false);
    assert_eq!(range.parameter_count(), 2);
    range.bind(2, 10).unwrap();
    assert!(matches!(
        range.bind(3, 10),
        Err(DatabaseError::ParameterIndexOutOfRange { index: 3, count: 2 })
    ));
}

#[test]
fn test_unbound_point_parameter() {
    let db = TempDatabase::with_prefix("stmt_unbound");
    let conn = populated(&db);

    let mut statement = Statement::point();
    assert!(matches!(
        statement.step(&conn),
        Err(DatabaseError::UnboundParameter { index: 1 })
    ));

    statement.bind(1, 3).unwrap();
    statement.clear_bindings();
    statement.reset();
    assert!(matches!(
        statement.step(&conn),
        Err(DatabaseError::UnboundParameter { index: 1 })
    ));
}

#[test]
fn test_range_statement() {
    let db = TempDatabase::with_prefix("stmt_range");
    let conn = populated(&db);

    let mut statement = Statement::range(false);
    statement.bind(1, 10).unwrap();
    statement.bind(2, 15).unwrap();
    assert_eq!(keys(&mut statement, &conn), vec![10, 11, 12, 13, 14, 15]);

    // Rows resets, so a second pass yields the same rows.
    assert_eq!(keys(&mut statement, &conn), vec![10, 11, 12, 13, 14, 15]);

    // An unbound side is open.
    statement.clear_bindings();
    statement.bind(1, 48).unwrap();
    assert_eq!(keys(&mut statement, &conn), vec![48, 49, 50]);

    statement.clear_bindings();
    assert_eq!(keys(&mut statement, &conn).len(), 50);
}

#[test]
fn test_descending_range_statement() {
    let db = TempDatabase::with_prefix("stmt_desc");
    let conn = populated(&db);

    let mut statement = Statement::range(true);
    statement.bind(2, 4).unwrap();
    assert_eq!(keys(&mut statement, &conn), vec![4, 3, 2, 1]);

    statement.bind(1, 20).unwrap();
    statement.bind(2, 10).unwrap();
    assert!(keys(&mut statement, &conn).is_empty());
}

#[test]
fn test_filtered_statements() {
    let db = TempDatabase::with_prefix("stmt_filter");
    let conn = populated(&db);

    let mut range = Statement::range(false).filter(Predicate::eq(1, "even"));
    range.bind(1, 1).unwrap();
    range.bind(2, 10).unwrap();
    assert_eq!(keys(&mut range, &conn), vec![2, 4, 6, 8, 10]);

    range.set_filter(Some(Predicate::gt(0, 80i64)));
    assert_eq!(keys(&mut range, &conn), vec![9, 10]);

    let mut point = Statement::point().filter(Predicate::eq(1, "even"));
    point.bind(1, 7).unwrap();
    assert_eq!(point.step(&conn).unwrap(), Step::Done);
    point.reset();
    point.bind(1, 8).unwrap();
    assert!(matches!(point.step(&conn).unwrap(), Step::Row(8, _)));
}

#[test]
fn test_statement_inside_transaction() {
    let db = TempDatabase::with_prefix("stmt_txn");
    let conn = populated(&db);

    let mut tx = conn.begin().unwrap();
    tx.put(51, &Record::new(vec![Value::Integer(510), Value::from("odd")]))
        .unwrap();

    let mut statement = Statement::range(false);
    statement.bind(1, 49).unwrap();
    let seen: Vec<u64> = statement
        .rows(&tx)
        .map(|row| row.unwrap().0)
        .collect();
    assert_eq!(seen, vec![49, 50, 51]);

    tx.rollback().unwrap();
    assert_eq!(keys(&mut statement, &conn), vec![49, 50]);
}
