use std::collections::HashMap;

use neo4rs::{BoltNull, BoltType};
use serde_json::{Map, Value};

use crate::error::{Result, StoreError};

/// Convert a JSON value into a bolt parameter.
pub(crate) fn json_to_bolt(value: &Value) -> BoltType {
    match value {
        Value::Null => BoltType::Null(BoltNull),
        Value::Bool(b) => BoltType::from(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => BoltType::from(i),
            None => BoltType::from(n.as_f64().unwrap_or_default()),
        },
        Value::String(s) => BoltType::from(s.as_str()),
        Value::Array(items) => BoltType::from(items.iter().map(json_to_bolt).collect::<Vec<BoltType>>()),
        Value::Object(map) => map_to_bolt(map),
    }
}

pub(crate) fn map_to_bolt(map: &Map<String, Value>) -> BoltType {
    BoltType::from(
        map.iter()
            .map(|(k, v)| (k.clone(), json_to_bolt(v)))
            .collect::<HashMap<String, BoltType>>(),
    )
}

/// Drop null-valued entries; Neo4j cannot store them and projections that
/// reference missing keys produce them.
pub(crate) fn without_nulls(map: Map<String, Value>) -> Map<String, Value> {
    map.into_iter().filter(|(_, v)| !v.is_null()).collect()
}

/// Backtick-quote a label, relationship type or property name for splicing
/// into Cypher. Empty names and names containing control characters are
/// rejected.
pub(crate) fn quote_ident(name: &str) -> Result<String> {
    if name.is_empty() || name.chars().any(char::is_control) {
        return Err(StoreError::InvalidIdentifier(name.to_string()));
    }
    Ok(format!("`{}`", name.replace('`', "``")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identifiers_are_backtick_quoted() {
        assert_eq!(quote_ident("Account").unwrap(), "`Account`");
        assert_eq!(quote_ident("we`ird").unwrap(), "`we``ird`");
    }

    #[test]
    fn empty_or_control_identifiers_are_rejected() {
        assert!(quote_ident("").is_err());
        assert!(quote_ident("bad\nlabel").is_err());
    }

    #[test]
    fn nulls_are_dropped() {
        let map = json!({"a": 1, "b": null}).as_object().unwrap().clone();
        let cleaned = without_nulls(map);
        assert!(cleaned.contains_key("a"));
        assert!(!cleaned.contains_key("b"));
    }

    #[test]
    fn integers_stay_integers() {
        assert!(matches!(json_to_bolt(&json!(5)), BoltType::Integer(_)));
        assert!(matches!(json_to_bolt(&json!(0.5)), BoltType::Float(_)));
        assert!(matches!(json_to_bolt(&json!(true)), BoltType::Boolean(_)));
        assert!(matches!(json_to_bolt(&Value::Null), BoltType::Null(_)));
    }
}
