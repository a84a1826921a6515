//! Condition document evaluation
//!
//! Conditions are objects mapping field names to either a literal value
//! (equality) or an operator object (`$ne`, `$gt`, `$gte`, `$lt`, `$lte`,
//! `$in`). An empty or null condition matches every record.

use std::cmp::Ordering;

use fanout_store::{EntitySchema, StoreError};
use serde_json::Value;

/// Check every field the condition references against the schema.
///
/// A condition naming an undeclared field is rejected up front so the whole
/// operation fails on this node instead of silently matching nothing.
pub fn validate(schema: &EntitySchema, condition: &Value) -> Result<(), StoreError> {
    let Some(fields) = condition.as_object() else {
        if condition.is_null() {
            return Ok(());
        }
        return Err(StoreError::InvalidCondition(format!(
            "expected an object, got {condition}"
        )));
    };

    for field in fields.keys() {
        if !schema.has_field(field) {
            return Err(StoreError::UnknownField {
                entity: schema.name.clone(),
                field: field.clone(),
            });
        }
    }

    Ok(())
}

/// Whether a record satisfies the condition
pub fn matches(record: &Value, condition: &Value) -> bool {
    let Some(fields) = condition.as_object() else {
        return true;
    };

    fields.iter().all(|(field, expected)| {
        let actual = record.get(field).unwrap_or(&Value::Null);
        match expected.as_object() {
            Some(ops) if ops.keys().any(|key| key.starts_with('$')) => ops
                .iter()
                .all(|(op, operand)| apply_operator(actual, op, operand)),
            _ => actual == expected,
        }
    })
}

fn apply_operator(actual: &Value, op: &str, operand: &Value) -> bool {
    match op {
        "$ne" => actual != operand,
        "$gt" => compare(actual, operand) == Some(Ordering::Greater),
        "$gte" => matches!(
            compare(actual, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "$lt" => compare(actual, operand) == Some(Ordering::Less),
        "$lte" => matches!(
            compare(actual, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        "$in" => operand
            .as_array()
            .is_some_and(|candidates| candidates.contains(actual)),
        // Unknown operators never match.
        _ => false,
    }
}

fn compare(left: &Value, right: &Value) -> Option<Ordering> {
    match (left, right) {
        (Value::Number(l), Value::Number(r)) => l.as_f64().partial_cmp(&r.as_f64()),
        (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
        (Value::Bool(l), Value::Bool(r)) => Some(l.cmp(r)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn equality_and_operators() {
        let record = json!({"id": 3, "name": "ada", "score": 7});

        assert!(matches(&record, &json!({"name": "ada"})));
        assert!(matches(&record, &json!({"score": {"$gt": 5}})));
        assert!(matches(&record, &json!({"score": {"$gte": 7, "$lte": 7}})));
        assert!(matches(&record, &json!({"id": {"$in": [1, 2, 3]}})));
        assert!(!matches(&record, &json!({"name": {"$ne": "ada"}})));
        assert!(!matches(&record, &json!({"score": {"$lt": 7}})));
    }

    #[test]
    fn empty_condition_matches_everything() {
        let record = json!({"id": 1});
        assert!(matches(&record, &json!({})));
        assert!(matches(&record, &Value::Null));
    }

    #[test]
    fn validation_rejects_unknown_fields() {
        let schema = fanout_store::EntitySchema::new("user", "main", "id").with_fields(["name"]);
        assert!(validate(&schema, &json!({"name": "ada"})).is_ok());

        let err = validate(&schema, &json!({"ghost": 1})).unwrap_err();
        assert!(matches!(err, StoreError::UnknownField { .. }));
    }
}
