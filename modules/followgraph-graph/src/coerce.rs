use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;

/// Target type for a staged property.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoercionKind {
    Timestamp,
    Boolean,
    Integer,
    Float,
}

impl CoercionKind {
    /// Cypher function that performs the same conversion server-side.
    pub(crate) fn cypher_fn(self) -> &'static str {
        match self {
            CoercionKind::Timestamp => "datetime",
            CoercionKind::Boolean => "toBoolean",
            CoercionKind::Integer => "toInteger",
            CoercionKind::Float => "toFloat",
        }
    }

    /// Convert a raw JSON value. Values already of the target type pass
    /// through; unconvertible values are an error.
    pub fn apply(self, value: &Value) -> Result<Value, String> {
        match (self, value) {
            (_, Value::Null) => Ok(Value::Null),

            (CoercionKind::Timestamp, Value::String(s)) => parse_timestamp(s)
                .map(|t| Value::from(t.to_rfc3339()))
                .ok_or_else(|| format!("not a timestamp: {s:?}")),

            (CoercionKind::Boolean, Value::Bool(_)) => Ok(value.clone()),
            (CoercionKind::Boolean, Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" => Ok(Value::Bool(true)),
                "false" => Ok(Value::Bool(false)),
                _ => Err(format!("not a boolean: {s:?}")),
            },

            (CoercionKind::Integer, Value::Number(n)) if n.is_i64() => Ok(value.clone()),
            (CoercionKind::Integer, Value::Number(n)) => n
                .as_f64()
                .map(|f| Value::from(f.trunc() as i64))
                .ok_or_else(|| format!("not an integer: {n}")),
            (CoercionKind::Integer, Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Value::from)
                .map_err(|_| format!("not an integer: {s:?}")),

            (CoercionKind::Float, Value::Number(n)) => n
                .as_f64()
                .map(Value::from)
                .ok_or_else(|| format!("not a float: {n}")),
            (CoercionKind::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Value::from)
                .map_err(|_| format!("not a float: {s:?}")),

            (kind, other) => Err(format!("cannot coerce {other} to {kind:?}")),
        }
    }
}

/// One staged property and the type it should end up as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyCoercion {
    pub property: String,
    pub kind: CoercionKind,
}

impl PropertyCoercion {
    pub fn new(property: impl Into<String>, kind: CoercionKind) -> Self {
        Self {
            property: property.into(),
            kind,
        }
    }

    /// Coercions for the account properties written by the crawler.
    pub fn account_defaults() -> Vec<Self> {
        use CoercionKind::*;
        vec![
            Self::new("createdAt", Timestamp),
            Self::new("followersCount", Integer),
            Self::new("followingCount", Integer),
            Self::new("tweetCount", Integer),
            Self::new("isPrivate", Boolean),
            Self::new("verified", Boolean),
            Self::new("importedFollowing", Boolean),
            Self::new("referenceScore", Float),
        ]
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    // Neo4j's toString(datetime) drops seconds when they are zero ("2020-01-01T00:00Z").
    if let Some(stripped) = raw.strip_suffix('Z') {
        for fmt in ["%Y-%m-%dT%H:%M", "%Y-%m-%dT%H:%M:%S%.f"] {
            if let Ok(t) = NaiveDateTime::parse_from_str(stripped, fmt) {
                return Some(t.and_utc());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn timestamps_normalize_to_rfc3339() {
        let v = CoercionKind::Timestamp.apply(&json!("2013-12-14T04:35:55.000Z")).unwrap();
        assert_eq!(v, json!("2013-12-14T04:35:55+00:00"));
    }

    #[test]
    fn neo4j_short_timestamps_are_accepted() {
        let v = CoercionKind::Timestamp.apply(&json!("2020-01-01T00:00Z")).unwrap();
        assert_eq!(v, json!("2020-01-01T00:00:00+00:00"));
    }

    #[test]
    fn string_booleans_and_integers_are_coerced() {
        assert_eq!(CoercionKind::Boolean.apply(&json!("TRUE")).unwrap(), json!(true));
        assert_eq!(CoercionKind::Integer.apply(&json!(" 1200 ")).unwrap(), json!(1200));
        assert_eq!(CoercionKind::Float.apply(&json!("0.25")).unwrap(), json!(0.25));
        assert_eq!(CoercionKind::Float.apply(&json!(2)).unwrap(), json!(2.0));
    }

    #[test]
    fn typed_values_pass_through() {
        assert_eq!(CoercionKind::Boolean.apply(&json!(false)).unwrap(), json!(false));
        assert_eq!(CoercionKind::Integer.apply(&json!(7)).unwrap(), json!(7));
        assert_eq!(CoercionKind::Integer.apply(&Value::Null).unwrap(), Value::Null);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(CoercionKind::Boolean.apply(&json!("yes please")).is_err());
        assert!(CoercionKind::Timestamp.apply(&json!("last tuesday")).is_err());
        assert!(CoercionKind::Integer.apply(&json!([1, 2])).is_err());
    }
}
