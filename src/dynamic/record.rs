//! Map-backed records

use crate::error::{TabulaError, TabulaResult};
use crate::schema::{FieldSink, FieldSource};
use crate::types::FieldValue;
use rust_decimal::prelude::ToPrimitive;
use serde::{Serialize, Serializer};
use serde_json::{Map, Number, Value};
use std::collections::BTreeMap;
use std::path::Path;

/// A record whose fields live in an ordered map.
///
/// Nested objects are addressed with dotted paths (`dept.name`). A list of
/// objects is a sub-collection and is exposed as child records.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DynamicRecord {
    values: Map<String, Value>,
    children: BTreeMap<String, Vec<DynamicRecord>>,
    images: BTreeMap<String, Vec<u8>>,
}

impl DynamicRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> TabulaResult<Self> {
        let Value::Object(map) = value else {
            return Err(TabulaError::Config(format!(
                "expected a record object, found {}",
                kind_of(&value)
            )));
        };
        let mut record = Self::new();
        for (key, value) in map {
            match value {
                Value::Array(items) if !items.is_empty() && items.iter().all(Value::is_object) => {
                    let children = items
                        .into_iter()
                        .map(Self::from_value)
                        .collect::<TabulaResult<Vec<_>>>()?;
                    record.children.insert(key, children);
                }
                other => {
                    record.values.insert(key, other);
                }
            }
        }
        Ok(record)
    }

    pub fn to_value(&self) -> Value {
        let mut map = self.values.clone();
        for (key, children) in &self.children {
            map.insert(
                key.clone(),
                Value::Array(children.iter().map(Self::to_value).collect()),
            );
        }
        Value::Object(map)
    }

    #[must_use]
    pub fn with(mut self, path: &str, value: impl Into<FieldValue>) -> Self {
        // only fails when a path segment is a scalar, which a fresh chain never is
        let _ = self.set_field(path, value.into());
        self
    }

    #[must_use]
    pub fn with_children(mut self, field: impl Into<String>, children: Vec<DynamicRecord>) -> Self {
        self.children.insert(field.into(), children);
        self
    }

    pub fn children(&self, field: &str) -> &[DynamicRecord] {
        self.children.get(field).map_or(&[], Vec::as_slice)
    }

    /// Picture bytes assigned on import, removed from the record
    pub fn take_images(&mut self) -> BTreeMap<String, Vec<u8>> {
        std::mem::take(&mut self.images)
    }

    fn lookup(&self, path: &str) -> Option<&Value> {
        let mut segments = path.split('.');
        let mut current = self.values.get(segments.next()?)?;
        for segment in segments {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }
}

impl Serialize for DynamicRecord {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.to_value().serialize(serializer)
    }
}

impl FieldSource for DynamicRecord {
    fn field(&self, path: &str) -> FieldValue {
        if let Some(bytes) = self.images.get(path) {
            return FieldValue::Image(bytes.clone());
        }
        self.lookup(path).map_or(FieldValue::Null, to_field_value)
    }

    fn sub_records(&self, field: &str) -> Vec<&dyn FieldSource> {
        self.children(field)
            .iter()
            .map(|r| r as &dyn FieldSource)
            .collect()
    }
}

impl FieldSink for DynamicRecord {
    fn set_field(&mut self, path: &str, value: FieldValue) -> Result<(), String> {
        if let FieldValue::Image(bytes) = value {
            self.images.insert(path.to_string(), bytes);
            return Ok(());
        }
        let json = to_json(value);
        let (parents, leaf) = match path.rsplit_once('.') {
            Some((parents, leaf)) => (Some(parents), leaf),
            None => (None, path),
        };
        let mut target = &mut self.values;
        for segment in parents.into_iter().flat_map(|p| p.split('.')) {
            let slot = target
                .entry(segment.to_string())
                .or_insert_with(|| Value::Object(Map::new()));
            target = slot
                .as_object_mut()
                .ok_or_else(|| format!("'{segment}' in '{path}' is not an object"))?;
        }
        target.insert(leaf.to_string(), json);
        Ok(())
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "a list",
        Value::Object(_) => "an object",
    }
}

fn to_field_value(value: &Value) -> FieldValue {
    match value {
        Value::Null => FieldValue::Null,
        Value::Bool(b) => FieldValue::Bool(*b),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => FieldValue::Long(i),
            (None, Some(f)) => FieldValue::Double(f),
            _ => FieldValue::Text(n.to_string()),
        },
        Value::String(s) => FieldValue::Text(s.clone()),
        other => FieldValue::Text(other.to_string()),
    }
}

fn to_json(value: FieldValue) -> Value {
    match value {
        FieldValue::Null | FieldValue::Image(_) => Value::Null,
        FieldValue::Text(s) => Value::String(s),
        FieldValue::Int(v) => Value::from(v),
        FieldValue::Long(v) => Value::from(v),
        FieldValue::Double(v) => Number::from_f64(v).map_or(Value::Null, Value::Number),
        FieldValue::Decimal(d) => d
            .to_f64()
            .and_then(Number::from_f64)
            .map_or_else(|| Value::String(d.to_string()), Value::Number),
        FieldValue::Bool(b) => Value::Bool(b),
        date @ (FieldValue::Date(_) | FieldValue::DateTime(_)) => Value::String(date.to_text()),
    }
}

fn is_json(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"))
}

/// Load a YAML or JSON list of records; JSON is chosen by the `.json` extension
pub fn load_records(path: &Path) -> TabulaResult<Vec<DynamicRecord>> {
    let content = std::fs::read_to_string(path).map_err(|source| TabulaError::Resource {
        target: path.display().to_string(),
        source,
    })?;
    let value: Value = if is_json(path) {
        serde_json::from_str(&content)?
    } else {
        serde_yaml::from_str(&content)?
    };
    match value {
        Value::Array(items) => items.into_iter().map(DynamicRecord::from_value).collect(),
        Value::Null => Ok(Vec::new()),
        other => Err(TabulaError::Config(format!(
            "{}: expected a list of records, found {}",
            path.display(),
            kind_of(&other)
        ))),
    }
}

/// Write records as YAML, or JSON for a `.json` path
pub fn save_records(path: &Path, records: &[DynamicRecord]) -> TabulaResult<()> {
    let content = if is_json(path) {
        serde_json::to_string_pretty(records)?
    } else {
        serde_yaml::to_string(records)?
    };
    std::fs::write(path, content).map_err(|source| TabulaError::Resource {
        target: path.display().to_string(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn test_dotted_paths_read_and_write() {
        let mut record = DynamicRecord::from_value(json!({
            "name": "Ann",
            "dept": { "name": "R&D" }
        }))
        .unwrap();
        assert_eq!(record.field("dept.name"), FieldValue::Text("R&D".into()));
        assert_eq!(record.field("dept.floor"), FieldValue::Null);

        record.set_field("dept.floor", FieldValue::Int(3)).unwrap();
        record.set_field("boss.name", "Bob".into()).unwrap();
        assert_eq!(
            record.to_value(),
            json!({
                "name": "Ann",
                "dept": { "name": "R&D", "floor": 3 },
                "boss": { "name": "Bob" }
            })
        );
    }

    #[test]
    fn test_scalar_in_path_is_rejected() {
        let mut record = DynamicRecord::new().with("name", "Ann");
        assert!(record.set_field("name.first", "A".into()).is_err());
    }

    #[test]
    fn test_object_lists_become_children() {
        let record = DynamicRecord::from_value(json!({
            "no": "A-1",
            "tags": ["x", "y"],
            "items": [{ "sku": "p1" }, { "sku": "p2" }]
        }))
        .unwrap();
        let children = record.sub_records("items");
        assert_eq!(children.len(), 2);
        assert_eq!(children[1].field("sku"), FieldValue::Text("p2".into()));
        assert_eq!(record.field("tags"), FieldValue::Text(r#"["x","y"]"#.into()));
    }

    #[test]
    fn test_images_kept_aside() {
        let mut record = DynamicRecord::new();
        record
            .set_field("photo", FieldValue::Image(vec![0x89, b'P']))
            .unwrap();
        assert_eq!(record.field("photo"), FieldValue::Image(vec![0x89, b'P']));
        assert_eq!(record.take_images().len(), 1);
        assert_eq!(record.field("photo"), FieldValue::Null);
    }

    #[test]
    fn test_yaml_and_json_files() {
        let dir = TempDir::new().unwrap();
        let records = vec![
            DynamicRecord::new().with("id", 1).with("amount", 2.5),
            DynamicRecord::new().with("id", 2).with("flag", true),
        ];
        for name in ["data.yaml", "data.json"] {
            let path = dir.path().join(name);
            save_records(&path, &records).unwrap();
            let loaded = load_records(&path).unwrap();
            assert_eq!(loaded[0].field("id"), FieldValue::Long(1));
            assert_eq!(loaded[0].field("amount"), FieldValue::Double(2.5));
            assert_eq!(loaded[1].field("flag"), FieldValue::Bool(true));
        }
    }

    #[test]
    fn test_non_list_file_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("data.yaml");
        std::fs::write(&path, "name: not a list\n").unwrap();
        assert!(matches!(load_records(&path), Err(TabulaError::Config(_))));
    }
}
