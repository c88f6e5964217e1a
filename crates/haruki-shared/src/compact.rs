//! Compact record restoration.
//!
//! The game ships large homogeneous arrays in two space-saving shapes:
//!
//! * **positional**: every record is an array whose `i`-th element maps to
//!   the `i`-th descriptor of a schema loaded from JSON at startup;
//! * **columnar**: a single object `{__ENUM__: {col: [...]}, col: [...], ...}`
//!   where each column holds one value per record and enum columns hold
//!   indices into their `__ENUM__` table.
//!
//! Both are turned back into arrays of objects here.

use std::collections::HashMap;
use std::path::Path;

use serde_json::{Map, Value as Json};

use crate::error::SchemaError;

/// Key of the enum table inside a columnar compact object.
pub const ENUM_KEY: &str = "__ENUM__";

/// One position of a positional record.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDesc {
    pub key: String,
    /// Present when this position holds a nested array of records.
    pub children: Option<Vec<FieldDesc>>,
}

impl FieldDesc {
    pub fn leaf(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            children: None,
        }
    }

    pub fn nested(key: impl Into<String>, children: Vec<FieldDesc>) -> Self {
        Self {
            key: key.into(),
            children: Some(children),
        }
    }
}

/// Field name → ordered position descriptors.
#[derive(Debug, Clone, Default)]
pub struct CompactSchema {
    fields: HashMap<String, Vec<FieldDesc>>,
}

impl CompactSchema {
    pub fn from_file(path: &Path) -> Result<Self, SchemaError> {
        let data = std::fs::read_to_string(path)?;
        Self::from_json_str(&data)
    }

    /// Parses `{"userCards": ["cardId", "level", ["episodes", ["cardEpisodeId"]]]}`.
    pub fn from_json_str(data: &str) -> Result<Self, SchemaError> {
        let raw: Json = serde_json::from_str(data)?;
        let Json::Object(obj) = raw else {
            return Err(SchemaError::NotAnObject);
        };
        let mut fields = HashMap::with_capacity(obj.len());
        for (name, defs) in obj {
            let Json::Array(items) = defs else {
                return Err(SchemaError::Field {
                    field: name,
                    reason: "descriptor list must be an array".into(),
                });
            };
            let parsed = parse_descs(&items).map_err(|reason| SchemaError::Field {
                field: name.clone(),
                reason,
            })?;
            fields.insert(name, parsed);
        }
        Ok(Self { fields })
    }

    pub fn insert(&mut self, field: impl Into<String>, descs: Vec<FieldDesc>) {
        self.fields.insert(field.into(), descs);
    }

    pub fn get(&self, field: &str) -> Option<&[FieldDesc]> {
        self.fields.get(field).map(Vec::as_slice)
    }

    pub fn contains(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Restores every schema field present in `data` in place. Fields whose
    /// value is not an array are left alone.
    pub fn restore_fields(&self, data: &mut Map<String, Json>) {
        for (field, descs) in &self.fields {
            if let Some(Json::Array(items)) = data.get_mut(field) {
                let taken = std::mem::take(items);
                *items = restore_rows(taken, descs);
            }
        }
    }

    /// Restores a single array value against the descriptors of `field`.
    /// Returns `None` when the schema has no entry for it.
    pub fn restore_value(&self, field: &str, value: Json) -> Option<Json> {
        let descs = self.fields.get(field)?;
        match value {
            Json::Array(items) => Some(Json::Array(restore_rows(items, descs))),
            other => Some(other),
        }
    }
}

fn parse_descs(raw: &[Json]) -> Result<Vec<FieldDesc>, String> {
    let mut out = Vec::with_capacity(raw.len());
    for elem in raw {
        match elem {
            Json::String(key) => out.push(FieldDesc::leaf(key.clone())),
            Json::Array(pair) => {
                if pair.len() != 2 {
                    return Err(format!(
                        "nested descriptor must have 2 elements, got {}",
                        pair.len()
                    ));
                }
                let Json::String(name) = &pair[0] else {
                    return Err("nested descriptor name must be a string".into());
                };
                let Json::Array(sub) = &pair[1] else {
                    return Err(format!("nested descriptor {name}: keys must be an array"));
                };
                let children = parse_descs(sub).map_err(|e| format!("nested field {name}: {e}"))?;
                out.push(FieldDesc::nested(name.clone(), children));
            }
            other => return Err(format!("unexpected descriptor element: {other}")),
        }
    }
    Ok(out)
}

fn restore_rows(items: Vec<Json>, descs: &[FieldDesc]) -> Vec<Json> {
    items
        .into_iter()
        .map(|item| match item {
            Json::Array(row) => Json::Object(row_to_object(row, descs)),
            Json::Object(mut obj) => {
                restore_nested_in_object(&mut obj, descs);
                Json::Object(obj)
            }
            other => other,
        })
        .collect()
}

fn row_to_object(row: Vec<Json>, descs: &[FieldDesc]) -> Map<String, Json> {
    let mut obj = Map::with_capacity(descs.len());
    for (desc, value) in descs.iter().zip(row) {
        if value.is_null() {
            continue;
        }
        let value = match (&desc.children, value) {
            (Some(children), Json::Array(sub)) => Json::Array(restore_rows(sub, children)),
            (_, v) => v,
        };
        obj.insert(desc.key.clone(), value);
    }
    obj
}

fn restore_nested_in_object(obj: &mut Map<String, Json>, descs: &[FieldDesc]) {
    for desc in descs {
        let Some(children) = &desc.children else {
            continue;
        };
        if let Some(Json::Array(sub)) = obj.get_mut(&desc.key) {
            let taken = std::mem::take(sub);
            *sub = restore_rows(taken, children);
        }
    }
}

// ---------------------------------------------------------------------------
// Columnar form
// ---------------------------------------------------------------------------

/// `userCards` → `compactUserCards`.
pub fn compact_key(key: &str) -> String {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) => format!("compact{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => "compact".to_string(),
    }
}

/// Whether `value` is a columnar compact object (carries an `__ENUM__` table).
pub fn is_enum_columnar(value: &Json) -> bool {
    value
        .as_object()
        .is_some_and(|obj| obj.contains_key(ENUM_KEY))
}

/// Expands a columnar object into one object per row.
///
/// Non-array columns count as empty. Enum columns are looked up by index,
/// yielding `null` for out-of-range or null indices. The row count is the
/// length of the shortest column.
pub fn restore_enum_columns(data: &Map<String, Json>) -> Vec<Json> {
    let enums = data.get(ENUM_KEY).and_then(Json::as_object);

    let mut labels: Vec<&str> = Vec::with_capacity(data.len());
    let mut columns: Vec<Vec<Json>> = Vec::with_capacity(data.len());

    for (key, value) in data {
        if key == ENUM_KEY {
            continue;
        }
        let raw: &[Json] = value.as_array().map(Vec::as_slice).unwrap_or(&[]);
        let table = enums.and_then(|e| e.get(key));
        let column = match table {
            Some(table) => {
                let table: &[Json] = table.as_array().map(Vec::as_slice).unwrap_or(&[]);
                raw.iter().map(|idx| lookup_enum(table, idx)).collect()
            }
            None => raw.to_vec(),
        };
        labels.push(key);
        columns.push(column);
    }

    let rows = columns.iter().map(Vec::len).min().unwrap_or(0);
    let mut out = Vec::with_capacity(rows);
    for i in 0..rows {
        let mut entry = Map::with_capacity(labels.len());
        for (label, column) in labels.iter().zip(&columns) {
            entry.insert((*label).to_string(), column[i].clone());
        }
        out.push(Json::Object(entry));
    }
    out
}

fn lookup_enum(table: &[Json], idx: &Json) -> Json {
    if idx.is_null() {
        return Json::Null;
    }
    let i = idx
        .as_i64()
        .or_else(|| idx.as_f64().map(|f| f as i64))
        .unwrap_or(0);
    usize::try_from(i)
        .ok()
        .and_then(|i| table.get(i))
        .cloned()
        .unwrap_or(Json::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> CompactSchema {
        CompactSchema::from_json_str(
            r#"{
                "userCards": ["cardId", "level", ["episodes", ["cardEpisodeId", "scenarioStatus"]]],
                "userMusics": ["musicId", "status"]
            }"#,
        )
        .unwrap()
    }

    #[test]
    fn test_parse_schema() {
        let s = schema();
        assert_eq!(s.len(), 2);
        let cards = s.get("userCards").unwrap();
        assert_eq!(cards[0], FieldDesc::leaf("cardId"));
        assert_eq!(
            cards[2],
            FieldDesc::nested(
                "episodes",
                vec![FieldDesc::leaf("cardEpisodeId"), FieldDesc::leaf("scenarioStatus")]
            )
        );
    }

    #[test]
    fn test_parse_rejects_bad_nested() {
        assert!(CompactSchema::from_json_str(r#"{"a": [["x"]]}"#).is_err());
        assert!(CompactSchema::from_json_str(r#"{"a": [1]}"#).is_err());
        assert!(CompactSchema::from_json_str(r#"[]"#).is_err());
        assert!(CompactSchema::from_json_str(r#"{"a": "b"}"#).is_err());
    }

    #[test]
    fn test_restore_positional_rows() {
        let mut data = json!({
            "userCards": [
                [1, 60, [[100, "read"], [101, null]]],
                [2, null]
            ],
            "userGamedata": {"userId": 1}
        })
        .as_object()
        .unwrap()
        .clone();

        schema().restore_fields(&mut data);

        assert_eq!(
            data["userCards"],
            json!([
                {"cardId": 1, "level": 60, "episodes": [
                    {"cardEpisodeId": 100, "scenarioStatus": "read"},
                    {"cardEpisodeId": 101}
                ]},
                {"cardId": 2}
            ])
        );
        assert_eq!(data["userGamedata"], json!({"userId": 1}));
    }

    #[test]
    fn test_dict_rows_restore_nested_children() {
        let mut data = json!({
            "userCards": [{"cardId": 3, "episodes": [[7, "unread"]]}]
        })
        .as_object()
        .unwrap()
        .clone();

        schema().restore_fields(&mut data);

        assert_eq!(
            data["userCards"],
            json!([{"cardId": 3, "episodes": [{"cardEpisodeId": 7, "scenarioStatus": "unread"}]}])
        );
    }

    #[test]
    fn test_non_array_field_left_alone() {
        let mut data = json!({"userMusics": {"x": 1}}).as_object().unwrap().clone();
        schema().restore_fields(&mut data);
        assert_eq!(data["userMusics"], json!({"x": 1}));
    }

    #[test]
    fn test_schema_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.json");
        std::fs::write(&path, r#"{"userAreas": ["areaId"]}"#).unwrap();
        let s = CompactSchema::from_file(&path).unwrap();
        assert!(s.contains("userAreas"));
        assert!(CompactSchema::from_file(&dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_compact_key() {
        assert_eq!(compact_key("userCards"), "compactUserCards");
        assert_eq!(compact_key(""), "compact");
    }

    #[test]
    fn test_enum_columns() {
        let data = json!({
            "__ENUM__": {"attr": ["cool", "cute"]},
            "cardId": [1, 2, 3],
            "attr": [1, 0, 9],
            "level": [60, 40]
        });
        let rows = restore_enum_columns(data.as_object().unwrap());
        assert_eq!(
            rows,
            vec![
                json!({"cardId": 1, "attr": "cute", "level": 60}),
                json!({"cardId": 2, "attr": "cool", "level": 40}),
            ]
        );
    }

    #[test]
    fn test_enum_columns_out_of_range_and_empty() {
        let data = json!({"__ENUM__": {"a": ["x"]}, "a": [null, -1, 5]});
        let rows = restore_enum_columns(data.as_object().unwrap());
        assert_eq!(rows, vec![json!({"a": null}); 3]);

        let only_enum = json!({"__ENUM__": {}});
        assert!(restore_enum_columns(only_enum.as_object().unwrap()).is_empty());
        assert!(is_enum_columnar(&only_enum));
        assert!(!is_enum_columnar(&json!([1])));
    }
}
