use std::borrow::Borrow;

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::EormError;
use crate::value::Value;

/// A key that compares and hashes case-insensitively while remembering the
/// case it was first inserted with, so iteration and JSON round-trips keep
/// the caller's original spelling.
#[derive(Debug, Clone)]
struct FoldedKey(String);

impl FoldedKey {
    fn fold(s: &str) -> String {
        s.to_ascii_lowercase()
    }
}

impl PartialEq for FoldedKey {
    fn eq(&self, other: &Self) -> bool {
        Self::fold(&self.0) == Self::fold(&other.0)
    }
}
impl Eq for FoldedKey {}

impl std::hash::Hash for FoldedKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        Self::fold(&self.0).hash(state)
    }
}

impl Borrow<str> for FoldedKey {
    fn borrow(&self) -> &str {
        &self.0
    }
}

/// Ordered, case-insensitive column-to-value mapping used for all row-level
/// I/O: the shape returned by a query, the shape accepted by an INSERT/UPDATE,
/// and the shape a caller assembles by hand.
///
/// Column order is insertion order and is preserved through `clone`, `remove`,
/// and JSON round-trips — the synthesiser relies on it for deterministic
/// column lists.
#[derive(Debug, Clone, Default)]
pub struct Record {
    fields: IndexMap<FoldedKey, Value>,
}

impl Record {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) -> &mut Self {
        let key = key.into();
        if let Some(existing) = self.fields.get_index_of(key.as_str()) {
            let (_, slot) = self.fields.get_index_mut(existing).unwrap();
            *slot = value;
        } else {
            self.fields.insert(FoldedKey(key), value);
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn has(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    pub fn clear(&mut self) {
        self.fields.clear();
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Column names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(|k| k.0.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.fields.iter().map(|(k, v)| (k.0.as_str(), v))
    }

    // --- total, never-panics type accessors -------------------------------
    //
    // Missing key -> zero value; unparseable value -> zero value. Mirrors
    // the coercion contract column readers rely on when scanning
    // driver-supplied rows of unknown origin.

    pub fn str(&self, key: &str) -> String {
        match self.get(key) {
            Some(Value::Text(s)) | Some(Value::Json(s)) | Some(Value::Decimal(s)) => s.clone(),
            Some(Value::Int(i)) => i.to_string(),
            Some(Value::Float(f)) => f.to_string(),
            Some(Value::Bool(b)) => b.to_string(),
            Some(v) if !v.is_null() => v.as_display_string(),
            _ => String::new(),
        }
    }

    pub fn int(&self, key: &str) -> i64 {
        match self.get(key) {
            Some(Value::Int(i)) => *i,
            Some(Value::Float(f)) => *f as i64,
            Some(Value::Bool(b)) => *b as i64,
            Some(Value::Text(s)) | Some(Value::Decimal(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        }
    }

    pub fn int64(&self, key: &str) -> i64 {
        self.int(key)
    }

    pub fn float(&self, key: &str) -> f64 {
        match self.get(key) {
            Some(Value::Float(f)) => *f,
            Some(Value::Int(i)) => *i as f64,
            Some(Value::Text(s)) | Some(Value::Decimal(s)) => s.trim().parse().unwrap_or(0.0),
            _ => 0.0,
        }
    }

    pub fn bool(&self, key: &str) -> bool {
        match self.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::Int(i)) => *i != 0,
            Some(Value::Text(s)) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "1" | "t" | "true" | "yes" | "y"
            ),
            _ => false,
        }
    }

    pub fn time(&self, key: &str) -> Option<DateTime<Utc>> {
        match self.get(key) {
            Some(Value::DateTime(dt)) => Some(*dt),
            Some(Value::Text(s)) => DateTime::parse_from_rfc3339(s)
                .ok()
                .map(|dt| dt.with_timezone(&Utc)),
            _ => None,
        }
    }

    pub fn to_map(&self) -> IndexMap<String, Value> {
        self.fields
            .iter()
            .map(|(k, v)| (k.0.clone(), v.clone()))
            .collect()
    }

    pub fn to_json(&self) -> Result<String, EormError> {
        let map: IndexMap<String, Value> = self.to_map();
        Ok(serde_json::to_string(&map)?)
    }

    pub fn from_json(s: &str) -> Result<Self, EormError> {
        let map: IndexMap<String, Value> = serde_json::from_str(s)?;
        let mut record = Self::new();
        for (k, v) in map {
            record.set(k, v);
        }
        Ok(record)
    }

    /// Project the record onto a typed struct via its `serde::Deserialize`
    /// impl — Rust has no runtime reflection, so this goes through JSON
    /// rather than tagged field binding.
    pub fn to_struct<T: DeserializeOwned>(&self) -> Result<T, EormError> {
        let map = self.to_map();
        let value = serde_json::to_value(map)?;
        Ok(serde_json::from_value(value)?)
    }

    pub fn from_struct<T: Serialize>(src: &T) -> Result<Self, EormError> {
        let value = serde_json::to_value(src)?;
        let map: IndexMap<String, Value> = serde_json::from_value(value)?;
        let mut record = Self::new();
        for (k, v) in map {
            record.set(k, v);
        }
        Ok(record)
    }
}

impl Serialize for Record {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.to_map().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Record {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let map: IndexMap<String, Value> = IndexMap::deserialize(deserializer)?;
        let mut record = Self::new();
        for (k, v) in map {
            record.set(k, v);
        }
        Ok(record)
    }
}
