//! Field-level comparison of desired config against a live read or a
//! recorded state.

use serde_json::Value;

use crate::plan::FieldDrift;

/// Field name used when the compared values are not JSON objects.
pub const WHOLE_VALUE: &str = "*";

/// Compare the top-level fields of `desired` against `live`.
///
/// Only fields present in `desired` are compared; a field the desired
/// config leaves out is not managed. A missing live field counts as `null`.
/// Fields named in `immutable` force replacement.
pub fn field_diff(desired: &Value, live: &Value, immutable: &[&str]) -> Vec<FieldDrift> {
    let (Value::Object(want), Value::Object(have)) = (desired, live) else {
        return whole_value_diff(desired, live);
    };

    let mut drift = Vec::new();
    for (field, expected) in want {
        let actual = have.get(field).unwrap_or(&Value::Null);
        if expected == actual {
            continue;
        }
        let forces_replacement = immutable.contains(&field.as_str());
        drift.push(FieldDrift {
            field: field.clone(),
            expected: expected.clone(),
            actual: actual.clone(),
            forces_replacement,
        });
    }
    drift
}

/// Conservative comparison of desired config against the recorded state blob.
///
/// Used when the live object can't be read back field by field. The state
/// blob usually holds the applied config plus backend-assigned fields, so a
/// desired field is in sync only if the state records the same value under
/// the same key. Anything else reports drift: this may flag changes that
/// aren't real, but never misses one. An immutable field is only treated as
/// forcing replacement when the state actually records a different value
/// for it; if the state doesn't record it at all an update is assumed.
pub fn whole_blob_diff(desired: &Value, recorded: &Value, immutable: &[&str]) -> Vec<FieldDrift> {
    let (Value::Object(want), Value::Object(have)) = (desired, recorded) else {
        return whole_value_diff(desired, recorded);
    };

    let mut drift = Vec::new();
    for (field, expected) in want {
        match have.get(field) {
            Some(actual) if actual == expected => {}
            Some(actual) => drift.push(FieldDrift {
                field: field.clone(),
                expected: expected.clone(),
                actual: actual.clone(),
                forces_replacement: immutable.contains(&field.as_str()),
            }),
            None => drift.push(FieldDrift::mutable(
                field.clone(),
                expected.clone(),
                Value::Null,
            )),
        }
    }
    drift
}

fn whole_value_diff(desired: &Value, actual: &Value) -> Vec<FieldDrift> {
    if desired == actual {
        vec![]
    } else {
        vec![FieldDrift::mutable(WHOLE_VALUE, desired.clone(), actual.clone())]
    }
}
