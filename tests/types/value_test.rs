use std::cmp::Ordering;

use lumbung::types::{
    error::DatabaseError,
    value::{DataType, Value},
};

#[test]
fn test_value_data_types() {
    assert_eq!(Value::Null.data_type(), DataType::Null);
    assert_eq!(Value::Integer(42).data_type(), DataType::Integer);
    assert_eq!(Value::Real(3.5).data_type(), DataType::Real);
    assert_eq!(Value::Text("hello".to_string()).data_type(), DataType::Text);
    assert_eq!(Value::Blob(vec![1, 2, 3]).data_type(), DataType::Blob);
}

#[test]
fn test_type_tags_round_trip() {
    for data_type in [
        DataType::Null,
        DataType::Integer,
        DataType::Real,
        DataType::Text,
        DataType::Blob,
    ] {
        assert_eq!(DataType::from_tag(data_type.tag()), Some(data_type));
    }
    assert_eq!(DataType::from_tag(9), None);
}

#[test]
fn test_value_sizes_for_storage() {
    assert_eq!(Value::Null.size(), 0);
    assert_eq!(Value::Integer(123).size(), 8);
    assert_eq!(Value::Real(1.25).size(), 8);
    assert_eq!(Value::Text("hello".to_string()).size(), 5);
    assert_eq!(Value::Blob(vec![1, 2, 3]).size(), 3);
    assert_eq!(Value::Text("a".repeat(1000)).size(), 1000);
}

#[test]
fn test_strict_accessors() {
    assert_eq!(Value::Integer(7).as_integer().unwrap(), 7);
    assert_eq!(Value::Text("x".into()).as_text().unwrap(), "x");

    let err = Value::Integer(7).as_real().unwrap_err();
    assert!(matches!(
        err,
        DatabaseError::TypeMismatch {
            expected: DataType::Real,
            actual: DataType::Integer
        }
    ));
    assert!(Value::Null.as_blob().is_err());
}

#[test]
fn test_compare_is_strict_about_types() {
    assert_eq!(
        Value::Integer(1).compare(&Value::Integer(2)).unwrap(),
        Some(Ordering::Less)
    );
    assert_eq!(
        Value::Text("b".into()).compare(&Value::Text("a".into())).unwrap(),
        Some(Ordering::Greater)
    );
    assert_eq!(Value::Null.compare(&Value::Integer(1)).unwrap(), None);
    assert!(matches!(
        Value::Integer(5).compare(&Value::Real(5.5)),
        Err(DatabaseError::TypeMismatch { .. })
    ));
}

#[test]
fn test_partial_ord_orders_null_first() {
    assert!(Value::Null < Value::Integer(0));
    assert!(Value::Integer(5) < Value::Integer(10));
    assert!(Value::Blob(vec![1]) < Value::Blob(vec![1, 0]));
    assert_eq!(Value::Integer(1).partial_cmp(&Value::Text("1".into())), None);
}

#[test]
fn test_conversions() {
    assert_eq!(Value::from(3i64), Value::Integer(3));
    assert_eq!(Value::from("abc"), Value::Text("abc".into()));
    assert_eq!(Value::from(vec![0u8, 1]), Value::Blob(vec![0, 1]));
    assert_eq!(Value::from(None::<i64>), Value::Null);
    assert_eq!(Value::from(Some(2.5)), Value::Real(2.5));
}

#[test]
fn test_value_serde_json() {
    let value = Value::Blob(vec![0, 255]);
    let json = serde_json::to_string(&value).unwrap();
    let back: Value = serde_json::from_str(&json).unwrap();
    assert_eq!(back, value);
}
