use serde_json::{Map, Value};

// Standardize activity log shape. Fields may be null depending on the event type.
const REQUIRED_KEYS: [&str; 7] = [
    "ts",
    "user",
    "op",
    "asset",
    "amount",
    "result",
    "error_code",
];

pub fn utc_now_iso() -> String {
    chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true)
}

pub fn normalize_entry(v: Value) -> Value {
    let mut obj = match v {
        Value::Object(m) => m,
        other @ (Value::Null
        | Value::Bool(_)
        | Value::Number(_)
        | Value::String(_)
        | Value::Array(_)) => {
            let mut m = Map::new();
            m.insert("raw".to_owned(), other);
            m
        }
    };

    // Ensure timestamp exists.
    if !obj.contains_key("ts") {
        obj.insert("ts".to_owned(), Value::String(utc_now_iso()));
    }

    // Ensure required keys exist (null if unknown for the event).
    for k in REQUIRED_KEYS {
        if !obj.contains_key(k) {
            obj.insert(k.to_owned(), Value::Null);
        }
    }

    Value::Object(obj)
}
