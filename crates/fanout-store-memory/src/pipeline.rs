//! Aggregation pipeline execution
//!
//! Each node runs the full pipeline against its own local subset; `$skip`
//! and `$limit` apply per node, exactly like find's limit/offset.

use std::collections::BTreeMap;

use fanout_store::{EntitySchema, StoreError};
use serde_json::{Map, Value, json};

use crate::condition;

/// Run a pipeline of stages over the given rows
pub fn run(
    schema: &EntitySchema,
    mut rows: Vec<Value>,
    pipeline: &[Value],
) -> Result<Vec<Value>, StoreError> {
    for stage in pipeline {
        let stage_object = stage
            .as_object()
            .ok_or_else(|| StoreError::InvalidPipeline(format!("expected an object, got {stage}")))?;
        let (name, spec) = stage_object
            .iter()
            .next()
            .ok_or_else(|| StoreError::InvalidPipeline("empty stage".to_string()))?;

        rows = match name.as_str() {
            "$match" => {
                condition::validate(schema, spec)?;
                rows.into_iter()
                    .filter(|row| condition::matches(row, spec))
                    .collect()
            }
            "$group" => group(spec, rows)?,
            "$skip" => {
                let count = stage_usize(name, spec)?;
                rows.into_iter().skip(count).collect()
            }
            "$limit" => {
                let count = stage_usize(name, spec)?;
                rows.into_iter().take(count).collect()
            }
            other => {
                return Err(StoreError::InvalidPipeline(format!(
                    "unsupported stage '{other}'"
                )));
            }
        };
    }

    Ok(rows)
}

fn stage_usize(name: &str, spec: &Value) -> Result<usize, StoreError> {
    spec.as_u64()
        .map(|count| count as usize)
        .ok_or_else(|| StoreError::InvalidPipeline(format!("{name} expects a non-negative integer")))
}

fn group(spec: &Value, rows: Vec<Value>) -> Result<Vec<Value>, StoreError> {
    let spec = spec
        .as_object()
        .ok_or_else(|| StoreError::InvalidPipeline("$group expects an object".to_string()))?;
    let key_expr = spec
        .get("_id")
        .ok_or_else(|| StoreError::InvalidPipeline("$group requires _id".to_string()))?;

    // Buckets keyed by the serialized group key for deterministic output order.
    let mut buckets: BTreeMap<String, (Value, Vec<Value>)> = BTreeMap::new();
    for row in rows {
        let key = evaluate(key_expr, &row);
        let bucket_key = key.to_string();
        buckets
            .entry(bucket_key)
            .or_insert_with(|| (key, Vec::new()))
            .1
            .push(row);
    }

    let mut output = Vec::with_capacity(buckets.len());
    for (_, (key, members)) in buckets {
        let mut grouped = Map::new();
        grouped.insert("_id".to_string(), key);
        for (field, accumulator) in spec.iter().filter(|(field, _)| *field != "_id") {
            grouped.insert(field.clone(), accumulate(accumulator, &members)?);
        }
        output.push(Value::Object(grouped));
    }

    Ok(output)
}

fn accumulate(accumulator: &Value, members: &[Value]) -> Result<Value, StoreError> {
    let accumulator = accumulator
        .as_object()
        .and_then(|object| object.iter().next())
        .ok_or_else(|| {
            StoreError::InvalidPipeline(format!("invalid accumulator {accumulator}"))
        })?;

    let values: Vec<f64> = members
        .iter()
        .filter_map(|row| evaluate(accumulator.1, row).as_f64())
        .collect();

    let result = match accumulator.0.as_str() {
        "$sum" => values.iter().sum::<f64>(),
        "$avg" => {
            if values.is_empty() {
                return Ok(Value::Null);
            }
            values.iter().sum::<f64>() / values.len() as f64
        }
        "$min" => match values.iter().copied().reduce(f64::min) {
            Some(min) => min,
            None => return Ok(Value::Null),
        },
        "$max" => match values.iter().copied().reduce(f64::max) {
            Some(max) => max,
            None => return Ok(Value::Null),
        },
        other => {
            return Err(StoreError::InvalidPipeline(format!(
                "unsupported accumulator '{other}'"
            )));
        }
    };

    // Keep whole results as integers so `$sum: 1` counts read naturally.
    if result.fract() == 0.0 {
        Ok(json!(result as i64))
    } else {
        Ok(json!(result))
    }
}

/// Evaluate a `$field` reference or literal against a row
fn evaluate(expr: &Value, row: &Value) -> Value {
    match expr {
        Value::String(text) if text.starts_with('$') => {
            row.get(&text[1..]).cloned().unwrap_or(Value::Null)
        }
        other => other.clone(),
    }
}
