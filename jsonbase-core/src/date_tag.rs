// jsonbase-core/src/date_tag.rs
// Date-tagged JSON values: { "__type": "Date", "value": "<ISO-8601>" }
//
// Plain JSON has no timestamp type, so timestamps travel through blobs and
// the property store as tagged objects. A round trip through encode/decode
// must yield a timestamp equal by epoch milliseconds.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Value};

/// Key carrying the type tag
pub const TYPE_KEY: &str = "__type";
/// Tag value marking a timestamp
pub const DATE_TAG: &str = "Date";

/// Encode a timestamp as a Date-tagged JSON object
pub fn encode(dt: &DateTime<Utc>) -> Value {
    json!({
        TYPE_KEY: DATE_TAG,
        "value": dt.to_rfc3339_opts(SecondsFormat::Millis, true),
    })
}

/// Decode a Date-tagged JSON object back to a timestamp
///
/// Returns `None` for anything that is not a well-formed tag, including
/// tags with an unparseable ISO-8601 value.
pub fn decode(value: &Value) -> Option<DateTime<Utc>> {
    let obj = value.as_object()?;
    if obj.get(TYPE_KEY)?.as_str()? != DATE_TAG {
        return None;
    }
    let raw = obj.get("value")?.as_str()?;
    DateTime::parse_from_rfc3339(raw)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

/// True iff the value is a well-formed Date tag
pub fn is_date(value: &Value) -> bool {
    decode(value).is_some()
}

/// Epoch milliseconds of a Date-tagged value
pub fn epoch_ms(value: &Value) -> Option<i64> {
    decode(value).map(|dt| dt.timestamp_millis())
}

/// serde adapter for struct fields: `#[serde(with = "crate::date_tag::tagged")]`
pub mod tagged {
    use super::*;
    use serde::de::Error as DeError;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(dt: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        use serde::Serialize;
        encode(dt).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        decode(&value).ok_or_else(|| D::Error::custom("expected a Date-tagged object"))
    }
}
