//! Prime-testing demo service.
//!
//! Trial division driven by the platform: `FirstDivisor` seeds the divisor,
//! `Test` classifies the current divisor against `n`, and `Iterate` advances
//! to the next odd divisor.

use anyhow::{Context, Result, anyhow};
use serde_json::{Value, json};
use tracing::debug;

use crate::runtime::Outcome;
use crate::runtime::codec::FieldMap;

fn integer(fields: &FieldMap, name: &str) -> Result<i64> {
    let value = fields
        .get(name)
        .with_context(|| format!("field '{name}' is missing"))?;
    match value {
        Value::Number(number) => number
            .as_i64()
            .with_context(|| format!("field '{name}' is not an integer")),
        Value::String(text) => text
            .trim()
            .parse()
            .with_context(|| format!("field '{name}' is not an integer")),
        other => Err(anyhow!("field '{name}' is not an integer: {other}")),
    }
}

fn outcome(output: &str, fields: Value) -> Outcome {
    let fields = match fields {
        Value::Object(map) => map,
        _ => FieldMap::new(),
    };
    Outcome::success(output, fields)
}

/// Request handler for the primes service.
pub fn handle_request(op_name: &str, fields: &FieldMap) -> Result<Outcome> {
    debug!(op = op_name, ?fields, "primes request");
    match op_name {
        "FirstDivisor" => Ok(outcome("Divisor", json!({"div": 2}))),
        "Iterate" => {
            let n = integer(fields, "n")?;
            let div = integer(fields, "div")?;
            let next = if div == 2 { 3 } else { div + 2 };
            Ok(outcome("Iterate", json!({"div": next, "n": n})))
        }
        "Test" => {
            let n = integer(fields, "n")?;
            let div = integer(fields, "div")?;
            let (output, flag) = if div * div > n {
                ("Yes", "YES")
            } else if div != 0 && n % div == 0 {
                ("No", "NO")
            } else {
                ("Maybe", "MAYBE")
            };
            let mut flags = FieldMap::new();
            flags.insert(flag.to_string(), json!(flag));
            Ok(Outcome::success(output, flags))
        }
        other => Err(anyhow!("primes service has no operation '{other}'")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fields(value: Value) -> FieldMap {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn divisors_advance_through_odd_numbers() {
        let first = handle_request("FirstDivisor", &FieldMap::new()).unwrap();
        assert_eq!(first.output_name, "Divisor");
        assert_eq!(first.fields.get("div"), Some(&json!(2)));

        let next = handle_request("Iterate", &fields(json!({"n": 21, "div": 2}))).unwrap();
        assert_eq!(next.fields.get("div"), Some(&json!(3)));
        let next = handle_request("Iterate", &fields(json!({"n": 21, "div": "3"}))).unwrap();
        assert_eq!(next.fields.get("div"), Some(&json!(5)));
        assert_eq!(next.fields.get("n"), Some(&json!(21)));
    }

    #[test]
    fn test_classifies_divisors() {
        let yes = handle_request("Test", &fields(json!({"n": 7, "div": 3}))).unwrap();
        assert_eq!(yes.output_name, "Yes");
        assert_eq!(yes.fields.get("YES"), Some(&json!("YES")));

        let no = handle_request("Test", &fields(json!({"n": 21, "div": 3}))).unwrap();
        assert_eq!(no.output_name, "No");

        let maybe = handle_request("Test", &fields(json!({"n": 25, "div": 3}))).unwrap();
        assert_eq!(maybe.output_name, "Maybe");
    }

    #[test]
    fn unknown_operation_and_bad_fields_fail() {
        assert!(handle_request("Factor", &FieldMap::new()).is_err());
        let err = handle_request("Test", &fields(json!({"n": "x", "div": 3}))).unwrap_err();
        assert!(err.to_string().contains("'n'"));
    }
}
