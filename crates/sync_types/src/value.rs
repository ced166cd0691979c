//! Dynamically-typed snapshot values.
//!
//! Snapshots and `set` payloads are heterogeneous JSON-like trees that may
//! additionally reference another object by OID. `Value` models this as an
//! explicit tagged variant rather than reusing `serde_json::Value` directly,
//! so that a ref is a first-class case callers must handle (materialisation
//! needs to walk them, compaction doesn't) rather than an object shape they
//! might forget to check for. The wire encoding still uses the
//! `{"@@type": "ref", "id": <oid>}` convention spec.md specifies, via
//! `Value::to_json` / `Value::from_json`.

use std::collections::BTreeMap;

use serde_json::{
    Map,
    Number,
    Value as Json,
};

use crate::oid::Oid;

#[derive(Clone, Debug, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Float64(f64),
    Str(String),
    Array(Vec<Value>),
    Object(BTreeMap<String, Value>),
    Ref(Oid),
}

const REF_TYPE_TAG: &str = "@@type";
const REF_TYPE_VALUE: &str = "ref";
const REF_ID_FIELD: &str = "id";

impl Value {
    pub fn to_json(&self) -> Json {
        match self {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::Float64(f) => Number::from_f64(*f).map(Json::Number).unwrap_or(Json::Null),
            Value::Str(s) => Json::String(s.clone()),
            Value::Array(items) => Json::Array(items.iter().map(Value::to_json).collect()),
            Value::Object(fields) => {
                let mut map = Map::new();
                for (k, v) in fields {
                    map.insert(k.clone(), v.to_json());
                }
                Json::Object(map)
            },
            Value::Ref(oid) => {
                let mut map = Map::new();
                map.insert(REF_TYPE_TAG.to_string(), Json::String(REF_TYPE_VALUE.to_string()));
                map.insert(REF_ID_FIELD.to_string(), Json::String(oid.as_str().to_string()));
                Json::Object(map)
            },
        }
    }

    pub fn from_json(json: &Json) -> Value {
        match json {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::Number(n) => Value::Float64(n.as_f64().unwrap_or(0.0)),
            Json::String(s) => Value::Str(s.clone()),
            Json::Array(items) => Value::Array(items.iter().map(Value::from_json).collect()),
            Json::Object(map) => {
                if let Some(Json::String(tag)) = map.get(REF_TYPE_TAG) {
                    if tag == REF_TYPE_VALUE {
                        if let Some(Json::String(id)) = map.get(REF_ID_FIELD) {
                            return Value::Ref(Oid::from(id.clone()));
                        }
                    }
                }
                let mut fields = BTreeMap::new();
                for (k, v) in map {
                    fields.insert(k.clone(), Value::from_json(v));
                }
                Value::Object(fields)
            },
        }
    }

    /// Every OID this value directly references (not transitively).
    pub fn direct_refs(&self) -> Vec<&Oid> {
        let mut out = Vec::new();
        self.collect_refs(&mut out);
        out
    }

    fn collect_refs<'a>(&'a self, out: &mut Vec<&'a Oid>) {
        match self {
            Value::Ref(oid) => out.push(oid),
            Value::Array(items) => items.iter().for_each(|v| v.collect_refs(out)),
            Value::Object(fields) => fields.values().for_each(|v| v.collect_refs(out)),
            _ => {},
        }
    }
}

impl serde::Serialize for Value {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_json().serialize(serializer)
    }
}

impl<'de> serde::Deserialize<'de> for Value {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let json = Json::deserialize(deserializer)?;
        Ok(Value::from_json(&json))
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float64(f)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ref_round_trips_through_json() {
        let oid = Oid::root("items", "1");
        let v = Value::Ref(oid.clone());
        let json = v.to_json();
        assert_eq!(json["@@type"], "ref");
        let back = Value::from_json(&json);
        assert_eq!(back, Value::Ref(oid));
    }

    #[test]
    fn object_distinguishes_from_ref_shape() {
        let mut fields = BTreeMap::new();
        fields.insert("name".to_string(), Value::from("apples"));
        let v = Value::Object(fields);
        let json = v.to_json();
        let back = Value::from_json(&json);
        assert_eq!(back, v);
    }

    #[test]
    fn nested_refs_are_collected() {
        let mut fields = BTreeMap::new();
        fields.insert("a".to_string(), Value::Ref(Oid::root("x", "1")));
        fields.insert(
            "b".to_string(),
            Value::Array(vec![Value::Ref(Oid::root("x", "2")), Value::from(true)]),
        );
        let v = Value::Object(fields);
        assert_eq!(v.direct_refs().len(), 2);
    }

    fn arb_value() -> impl proptest::strategy::Strategy<Value = Value> {
        use proptest::prelude::*;

        // Leaf floats are drawn from i64 rather than the full f64 range: NaN
        // and infinities don't round-trip through `serde_json::Number` (they
        // collapse to `Null`), and that's a property of JSON, not of this
        // encoding.
        let leaf = prop_oneof![
            Just(Value::Null),
            any::<bool>().prop_map(Value::Bool),
            any::<i64>().prop_map(|n| Value::Float64(n as f64)),
            ".*".prop_map(Value::Str),
        ];
        leaf.prop_recursive(8, 256, 10, |inner| {
            prop_oneof![
                prop::collection::vec(inner.clone(), 0..10).prop_map(Value::Array),
                prop::collection::btree_map("[a-z]{1,8}", inner, 0..10).prop_map(Value::Object),
            ]
        })
    }

    proptest::proptest! {
        #[test]
        fn value_round_trips_through_json(v in arb_value()) {
            proptest::prop_assert_eq!(Value::from_json(&v.to_json()), v);
        }
    }
}
