#![forbid(unsafe_code)]

use super::coerce_value;
use crate::store::FieldValue;
use serde_json::{Map, Value, json};
use tb_core::FieldType;

fn object(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        other => panic!("expected an object, got {other:?}"),
    }
}

fn accepted() -> Vec<(FieldType, Value, FieldValue)> {
    vec![
        (FieldType::String, json!(5), FieldValue::Text("5".to_string())),
        (FieldType::Markdown, json!("# Notes"), FieldValue::Text("# Notes".to_string())),
        (FieldType::Number, json!(" 2.5 "), FieldValue::Number(2.5)),
        (FieldType::Double, json!(-1), FieldValue::Number(-1.0)),
        (FieldType::Integer, json!(3.0), FieldValue::Integer(3)),
        (FieldType::Integer, json!(" 42 "), FieldValue::Integer(42)),
        (FieldType::Boolean, json!("Checked"), FieldValue::Boolean(true)),
        (FieldType::Boolean, json!(""), FieldValue::Boolean(false)),
        (FieldType::Boolean, json!(0), FieldValue::Boolean(false)),
        (
            FieldType::Date,
            json!("2024-01-05T23:30:00-02:00"),
            FieldValue::Date("2024-01-06".to_string()),
        ),
        (FieldType::Time, json!("09:05"), FieldValue::Time("09:05:00".to_string())),
        (FieldType::Time, json!("23:59:58"), FieldValue::Time("23:59:58".to_string())),
        (
            FieldType::Timestamp,
            json!("2024-03-01 10:00"),
            FieldValue::Timestamp("2024-03-01T10:00:00Z".to_string()),
        ),
        (
            FieldType::Timestamp,
            json!(0),
            FieldValue::Timestamp("1970-01-01T00:00:00Z".to_string()),
        ),
        (
            FieldType::TimestampTz,
            json!("2024-03-01T10:00:00+02:00"),
            FieldValue::Timestamp("2024-03-01T08:00:00Z".to_string()),
        ),
        (
            FieldType::Uuid,
            json!(" 550E8400-E29B-41D4-A716-446655440000 "),
            FieldValue::Uuid("550e8400-e29b-41d4-a716-446655440000".to_string()),
        ),
        (
            FieldType::Uuid,
            json!("550e8400e29b41d4a716446655440000"),
            FieldValue::Uuid("550e8400-e29b-41d4-a716-446655440000".to_string()),
        ),
        (FieldType::Binary, json!("base64:AQID"), FieldValue::Binary(vec![1, 2, 3])),
        (FieldType::Binary, json!("hex:010203"), FieldValue::Binary(vec![1, 2, 3])),
        (FieldType::Binary, json!("0x0a0b"), FieldValue::Binary(vec![10, 11])),
        (FieldType::Binary, json!("0a0b"), FieldValue::Binary(vec![10, 11])),
        (FieldType::Binary, json!("AQID"), FieldValue::Binary(vec![1, 2, 3])),
        (FieldType::Binary, json!([1, 2, 255]), FieldValue::Binary(vec![1, 2, 255])),
        (
            FieldType::List,
            json!("- milk\n- eggs\n"),
            FieldValue::List(vec!["milk".to_string(), "eggs".to_string()]),
        ),
        (
            FieldType::List,
            json!("1. first\n2) second"),
            FieldValue::List(vec!["first".to_string(), "second".to_string()]),
        ),
        (
            FieldType::List,
            json!("plain\n\n  other "),
            FieldValue::List(vec!["plain".to_string(), "other".to_string()]),
        ),
        (
            FieldType::List,
            json!([1, true, "x"]),
            FieldValue::List(vec!["1".to_string(), "true".to_string(), "x".to_string()]),
        ),
        (
            FieldType::ObjectList,
            json!("[{\"sku\": \"a-1\", \"qty\": 2}]"),
            FieldValue::ObjectList(vec![object(json!({"sku": "a-1", "qty": 2}))]),
        ),
        (
            FieldType::ObjectList,
            json!("{\"sku\": \"b-2\"}"),
            FieldValue::ObjectList(vec![object(json!({"sku": "b-2"}))]),
        ),
        (
            FieldType::RowReference,
            json!("  t1 "),
            FieldValue::RowReference("t1".to_string()),
        ),
    ]
}

#[test]
fn raw_values_coerce_to_their_declared_type() {
    for (field_type, raw, expected) in accepted() {
        assert_eq!(
            coerce_value(field_type, &raw),
            Ok(expected),
            "{} from {raw}",
            field_type.as_str()
        );
    }
}

#[test]
fn coerced_values_survive_a_second_pass() {
    for (field_type, raw, _) in accepted() {
        let first = coerce_value(field_type, &raw).expect("first pass");
        let second = coerce_value(field_type, &first.to_json()).expect("second pass");
        assert_eq!(second, first, "{} from {raw}", field_type.as_str());
    }
}

#[test]
fn malformed_values_are_refused() {
    let refused = [
        (FieldType::String, json!(null)),
        (FieldType::Number, json!("NaN")),
        (FieldType::Number, json!("inf")),
        (FieldType::Integer, json!(3.5)),
        (FieldType::Boolean, json!(2)),
        (FieldType::Boolean, json!("maybe")),
        (FieldType::Date, json!("05/01/2024")),
        (FieldType::Time, json!("25:00")),
        (FieldType::TimestampTz, json!("2024-03-01 10:00")),
        (FieldType::TimestampTz, json!(0)),
        (FieldType::Uuid, json!("not-a-uuid")),
        (FieldType::Binary, json!("hex:zz")),
        (FieldType::Binary, json!([256])),
        (FieldType::List, json!([{"nested": true}])),
        (FieldType::ObjectList, json!("\"just text\"")),
        (FieldType::ObjectList, json!([1])),
        (FieldType::RowReference, json!("  ")),
    ];
    for (field_type, raw) in refused {
        assert!(
            coerce_value(field_type, &raw).is_err(),
            "{} accepted {raw}",
            field_type.as_str()
        );
    }
}
