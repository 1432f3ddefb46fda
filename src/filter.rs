// Record predicates built from `where` conditions, and sorting.
use std::cmp::Ordering;

use crate::datatype::{Record, Value};
use crate::query::{Condition, Operator, SortOrder};

/// True when the record satisfies every condition.
pub fn matches_all(record: &Record, conditions: &[Condition]) -> bool {
    conditions.iter().all(|condition| matches(record, condition))
}

/// A field missing from the record only satisfies `eq null`. Values that cannot
/// be compared never match an ordering operator.
pub fn matches(record: &Record, condition: &Condition) -> bool {
    let operand = &condition.operand;
    let Some(value) = record.get(&condition.field) else {
        return condition.operator == Operator::Eq && operand.is_null();
    };
    match condition.operator {
        Operator::Eq => value.loosely_equals(operand),
        Operator::Ne => !value.loosely_equals(operand),
        Operator::Gt => compares(value, operand, |o| o == Ordering::Greater),
        Operator::Gte => compares(value, operand, |o| o != Ordering::Less),
        Operator::Lt => compares(value, operand, |o| o == Ordering::Less),
        Operator::Lte => compares(value, operand, |o| o != Ordering::Greater),
        Operator::Contains => match value {
            Value::Text(text) => operand.as_str().is_some_and(|needle| text.contains(needle)),
            Value::List(items) => items.iter().any(|item| item.loosely_equals(operand)),
            _ => false,
        },
        Operator::StartsWith => match (value, operand) {
            (Value::Text(text), Value::Text(prefix)) => text.starts_with(prefix.as_str()),
            _ => false,
        },
        Operator::EndsWith => match (value, operand) {
            (Value::Text(text), Value::Text(suffix)) => text.ends_with(suffix.as_str()),
            _ => false,
        },
        Operator::In => operand
            .as_list()
            .is_some_and(|items| items.iter().any(|item| value.loosely_equals(item))),
        Operator::Nin => operand
            .as_list()
            .is_some_and(|items| !items.iter().any(|item| value.loosely_equals(item))),
    }
}

fn compares(value: &Value, operand: &Value, accept: impl Fn(Ordering) -> bool) -> bool {
    if value.is_null() || operand.is_null() {
        return false;
    }
    value.compare(operand).is_some_and(accept)
}

/// Stable sort on one field. Ascending puts nulls and missing values first,
/// descending puts them last.
pub fn sort_records(records: &mut [Record], field: &str, order: SortOrder) {
    records.sort_by(|a, b| {
        let ordering = Value::sort_cmp(a.get(field), b.get(field));
        match order {
            SortOrder::Ascending => ordering,
            SortOrder::Descending => ordering.reverse(),
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(json: &str) -> Record {
        serde_json::from_str(json).unwrap()
    }
    fn condition(field: &str, operator: Operator, operand: serde_json::Value) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            operand: Value::from(&operand),
        }
    }

    #[test]
    fn missing_fields_only_match_null_checks() {
        let r = record(r#"{"name": "Ann"}"#);
        assert!(!matches(&r, &condition("salary", Operator::Gt, 1.into())));
        assert!(!matches(&r, &condition("salary", Operator::Ne, 1.into())));
        assert!(matches(&r, &condition("salary", Operator::Eq, serde_json::Value::Null)));
    }

    #[test]
    fn numbers_and_strings() {
        let r = record(r#"{"salary": 60000, "name": "Annika", "tags": ["a", "b"], "boss": null}"#);
        assert!(matches(&r, &condition("salary", Operator::Gt, 50000.into())));
        assert!(matches(&r, &condition("salary", Operator::Eq, 60000.0.into())));
        assert!(matches(&r, &condition("name", Operator::Gt, "Ann".into())));
        assert!(!matches(&r, &condition("tags", Operator::Lt, 1.into())));
        assert!(matches(&r, &condition("name", Operator::StartsWith, "Ann".into())));
        assert!(matches(&r, &condition("name", Operator::Contains, "nik".into())));
        assert!(matches(&r, &condition("tags", Operator::Contains, "b".into())));
        assert!(matches(&r, &condition("name", Operator::In, serde_json::json!(["Bo", "Annika"]))));
        assert!(matches(&r, &condition("name", Operator::Nin, serde_json::json!(["Bo"]))));
        assert!(matches(&r, &condition("boss", Operator::Eq, serde_json::Value::Null)));
        assert!(!matches(&r, &condition("boss", Operator::Gt, 1.into())));
    }

    #[test]
    fn sorting_places_nulls() {
        let mut records = vec![
            record(r#"{"n": "b"}"#),
            record(r#"{"n": null}"#),
            record(r#"{"n": "A"}"#),
        ];
        sort_records(&mut records, "n", SortOrder::Ascending);
        assert!(records[0].get("n").unwrap().is_null());
        assert_eq!(records[1].get("n").unwrap().as_str(), Some("A"));
        sort_records(&mut records, "n", SortOrder::Descending);
        assert_eq!(records[0].get("n").unwrap().as_str(), Some("b"));
        assert!(records[2].get("n").unwrap().is_null());
    }
}
