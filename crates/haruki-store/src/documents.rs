//! Player documents.
//!
//! Suite documents are upserted field by field: every top-level field is
//! overwritten except `userEvents` and `userWorldBlooms`, which are merged
//! with the stored records. Mysekai and birthday party documents are
//! replaced whole.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};
use serde_json::{Map, Value as Json};

use haruki_shared::{DocumentKind, Server};

use crate::database::Database;
use crate::error::Result;

/// A merged record field: which keys identify a record and which field holds
/// its progress.
struct MergeRule {
    field: &'static str,
    keys: &'static [&'static str],
    point: &'static str,
}

const SUITE_MERGE_RULES: [MergeRule; 2] = [
    MergeRule {
        field: "userEvents",
        keys: &["eventId"],
        point: "eventPoint",
    },
    MergeRule {
        field: "userWorldBlooms",
        keys: &["eventId", "gameCharacterId"],
        point: "worldBloomChapterPoint",
    },
];

impl Database {
    /// Merges `doc` into the stored suite document and returns the result.
    pub fn upsert_suite(
        &mut self,
        server: Server,
        user_id: i64,
        mut doc: Map<String, Json>,
        upload_time: i64,
    ) -> Result<Map<String, Json>> {
        let tx = self.conn_mut().transaction()?;

        let existing: Option<String> = tx
            .query_row(
                "SELECT body FROM documents WHERE kind = ?1 AND server = ?2 AND user_id = ?3",
                params![DocumentKind::Suite.as_str(), server.as_str(), user_id],
                |row| row.get(0),
            )
            .optional()?;

        let merged = match existing {
            Some(body) => {
                let mut stored: Map<String, Json> = serde_json::from_str(&body)?;
                for rule in &SUITE_MERGE_RULES {
                    let Some(new) = doc.get_mut(rule.field).and_then(Json::as_array_mut) else {
                        continue;
                    };
                    let old = take_array(&mut stored, rule.field);
                    let incoming = std::mem::take(new);
                    *new = merge_records(old, incoming, rule.keys, rule.point);
                }
                for (k, v) in doc {
                    stored.insert(k, v);
                }
                stored
            }
            None => doc,
        };

        tx.execute(
            "INSERT INTO documents (kind, server, user_id, body, upload_time)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (kind, server, user_id)
             DO UPDATE SET body = excluded.body, upload_time = excluded.upload_time",
            params![
                DocumentKind::Suite.as_str(),
                server.as_str(),
                user_id,
                serde_json::to_string(&merged)?,
                upload_time,
            ],
        )?;
        tx.commit()?;

        Ok(merged)
    }

    /// Replaces the stored document of `kind` with `doc`.
    pub fn replace_document(
        &self,
        kind: DocumentKind,
        server: Server,
        user_id: i64,
        doc: &Map<String, Json>,
        upload_time: i64,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO documents (kind, server, user_id, body, upload_time)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (kind, server, user_id)
             DO UPDATE SET body = excluded.body, upload_time = excluded.upload_time",
            params![
                kind.as_str(),
                server.as_str(),
                user_id,
                serde_json::to_string(doc)?,
                upload_time,
            ],
        )?;
        Ok(())
    }

    pub fn get_document(
        &self,
        kind: DocumentKind,
        server: Server,
        user_id: i64,
    ) -> Result<Option<Map<String, Json>>> {
        let body: Option<String> = self
            .conn()
            .query_row(
                "SELECT body FROM documents WHERE kind = ?1 AND server = ?2 AND user_id = ?3",
                params![kind.as_str(), server.as_str(), user_id],
                |row| row.get(0),
            )
            .optional()?;
        match body {
            Some(body) => Ok(Some(serde_json::from_str(&body)?)),
            None => Ok(None),
        }
    }


}

fn take_array(map: &mut Map<String, Json>, field: &str) -> Vec<Json> {
    map.get_mut(field)
        .and_then(Json::as_array_mut)
        .map(std::mem::take)
        .unwrap_or_default()
}

/// Unions `old` and `new`, keeping one record per identity. The record with
/// the larger point wins; on ties the newer one does. Records lacking an
/// identity key are kept as they are.
fn merge_records(old: Vec<Json>, new: Vec<Json>, keys: &[&str], point: &str) -> Vec<Json> {
    let mut out: Vec<Json> = Vec::with_capacity(old.len() + new.len());
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in old.into_iter().chain(new) {
        let Some(identity) = record_identity(&record, keys) else {
            out.push(record);
            continue;
        };
        match index.get(&identity) {
            Some(&i) => {
                if point_of(&record, point) >= point_of(&out[i], point) {
                    out[i] = record;
                }
            }
            None => {
                index.insert(identity, out.len());
                out.push(record);
            }
        }
    }
    out
}

fn record_identity(record: &Json, keys: &[&str]) -> Option<String> {
    let obj = record.as_object()?;
    let mut parts = Vec::with_capacity(keys.len());
    for key in keys {
        let v = obj.get(*key)?;
        // 7 and 7.0 must collide
        let part = match v.as_f64() {
            Some(f) => f.to_string(),
            None => v.to_string(),
        };
        parts.push(part);
    }
    Some(parts.join("|"))
}

fn point_of(record: &Json, field: &str) -> f64 {
    record.get(field).and_then(Json::as_f64).unwrap_or(0.0)
}
