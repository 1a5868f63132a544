//! Sync log entries and the per-entity collapse rule.

use crate::error::{ProtocolError, ProtocolResult};
use crate::metadata::is_local;
use crate::operation::SyncOperation;
use lodestore_storage::{document_id, Document};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A pending local mutation waiting to be pushed.
///
/// A sync log holds at most one entry per entity. The entry id is the entity
/// id, so the storage key itself enforces that invariant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncLogEntry {
    /// Entry id; always equal to `entity_id`.
    #[serde(rename = "_id")]
    pub id: String,
    /// Logical collection name of the entity.
    pub collection: String,
    /// Id of the entity in the local cache.
    #[serde(rename = "entityId")]
    pub entity_id: String,
    /// Operation to replay against the backend.
    pub operation: SyncOperation,
    /// Latest local state of the entity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Document>,
}

impl SyncLogEntry {
    /// Creates an entry for an entity.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::InvalidRecord`] if the entity has no `_id`.
    pub fn new(collection: &str, operation: SyncOperation, entity: Document) -> ProtocolResult<Self> {
        let entity_id = document_id(&entity)
            .ok_or_else(|| ProtocolError::InvalidRecord("entity has no _id".to_string()))?
            .to_string();
        Ok(Self {
            id: entity_id.clone(),
            collection: collection.to_string(),
            entity_id,
            operation,
            entity: Some(entity),
        })
    }

    /// Encodes the entry as a storable document.
    pub fn to_document(&self) -> ProtocolResult<Document> {
        match serde_json::to_value(self)? {
            Value::Object(doc) => Ok(doc),
            _ => Err(ProtocolError::InvalidRecord(
                "sync log entry did not encode to an object".to_string(),
            )),
        }
    }

    /// Decodes an entry from a stored document.
    pub fn from_document(doc: Document) -> ProtocolResult<Self> {
        Ok(serde_json::from_value(Value::Object(doc))?)
    }

    /// Returns the document used to match this entry against a query.
    ///
    /// Entries without an entity match on `{"_id": entity_id}` only.
    pub fn match_target(&self) -> Document {
        match &self.entity {
            Some(entity) => entity.clone(),
            None => {
                let mut doc = Document::new();
                doc.insert("_id".to_string(), Value::String(self.entity_id.clone()));
                doc
            }
        }
    }
}

/// Outcome of recording a mutation against an entity's existing entry.
#[derive(Debug, Clone, PartialEq)]
pub enum Collapse {
    /// Store this entry, replacing any existing one.
    Upsert(SyncLogEntry),
    /// Remove the existing entry, if any; nothing needs to reach the backend.
    Drop,
}

/// Combines a new local mutation with the entity's pending entry.
///
/// - Create then Update stays a Create carrying the latest entity.
/// - Any mutation followed by Delete becomes a Delete.
/// - Delete of an entity that was only ever created locally drops the entry.
/// - Create or Update after a pending Update or Delete becomes an Update.
///
/// # Errors
///
/// Returns [`ProtocolError::InvalidRecord`] if the entity has no `_id`.
pub fn collapse(
    existing: Option<&SyncLogEntry>,
    collection: &str,
    operation: SyncOperation,
    entity: Document,
) -> ProtocolResult<Collapse> {
    let previous = existing.map(|entry| entry.operation);

    let resolved = match (previous, operation) {
        (Some(SyncOperation::Create), SyncOperation::Delete) => return Ok(Collapse::Drop),
        (None, SyncOperation::Delete) if is_local(&entity) => return Ok(Collapse::Drop),
        (_, SyncOperation::Delete) => SyncOperation::Delete,
        (None, SyncOperation::Create) | (Some(SyncOperation::Create), _) => SyncOperation::Create,
        (_, _) => SyncOperation::Update,
    };

    Ok(Collapse::Upsert(SyncLogEntry::new(
        collection, resolved, entity,
    )?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    fn doc(value: Value) -> Document {
        value.as_object().cloned().unwrap()
    }

    fn apply(
        existing: Option<SyncLogEntry>,
        operation: SyncOperation,
        entity: Document,
    ) -> Option<SyncLogEntry> {
        match collapse(existing.as_ref(), "books", operation, entity).unwrap() {
            Collapse::Upsert(entry) => Some(entry),
            Collapse::Drop => None,
        }
    }

    #[test]
    fn entry_id_is_entity_id() {
        let entry =
            SyncLogEntry::new("books", SyncOperation::Create, doc(json!({"_id": "a"}))).unwrap();
        assert_eq!(entry.id, "a");
        assert_eq!(entry.entity_id, "a");
    }

    #[test]
    fn entry_requires_id() {
        let result = SyncLogEntry::new("books", SyncOperation::Create, doc(json!({"x": 1})));
        assert!(matches!(result, Err(ProtocolError::InvalidRecord(_))));
    }

    #[test]
    fn entry_document_layout() {
        let entry =
            SyncLogEntry::new("books", SyncOperation::Update, doc(json!({"_id": "a"}))).unwrap();
        let stored = entry.to_document().unwrap();

        assert_eq!(stored["_id"], "a");
        assert_eq!(stored["entityId"], "a");
        assert_eq!(stored["operation"], "PUT");
        assert_eq!(stored["collection"], "books");

        assert_eq!(SyncLogEntry::from_document(stored).unwrap(), entry);
    }

    #[test]
    fn match_target_without_entity() {
        let mut entry =
            SyncLogEntry::new("books", SyncOperation::Delete, doc(json!({"_id": "a"}))).unwrap();
        entry.entity = None;
        assert_eq!(entry.match_target(), doc(json!({"_id": "a"})));
    }

    #[test]
    fn create_then_update_stays_create() {
        let first = apply(None, SyncOperation::Create, doc(json!({"_id": "a", "v": 1})));
        let second = apply(first, SyncOperation::Update, doc(json!({"_id": "a", "v": 2}))).unwrap();

        assert_eq!(second.operation, SyncOperation::Create);
        assert_eq!(second.entity.unwrap()["v"], 2);
    }

    #[test]
    fn update_then_delete_becomes_delete() {
        let first = apply(None, SyncOperation::Update, doc(json!({"_id": "a"})));
        let second = apply(first, SyncOperation::Delete, doc(json!({"_id": "a"}))).unwrap();
        assert_eq!(second.operation, SyncOperation::Delete);
    }

    #[test]
    fn delete_of_local_create_drops() {
        let local = doc(json!({"_id": "a", "_kmd": {"local": true}}));
        let first = apply(None, SyncOperation::Create, local.clone());
        assert!(apply(first, SyncOperation::Delete, local.clone()).is_none());

        // No entry left behind, e.g. after a cleared log.
        assert!(apply(None, SyncOperation::Delete, local).is_none());
    }

    #[test]
    fn delete_of_synced_entity_is_kept() {
        let entry = apply(None, SyncOperation::Delete, doc(json!({"_id": "a"}))).unwrap();
        assert_eq!(entry.operation, SyncOperation::Delete);
    }

    #[test]
    fn update_after_delete_becomes_update() {
        let first = apply(None, SyncOperation::Delete, doc(json!({"_id": "a"})));
        let second = apply(first, SyncOperation::Update, doc(json!({"_id": "a"}))).unwrap();
        assert_eq!(second.operation, SyncOperation::Update);
    }

    proptest! {
        #[test]
        fn create_then_updates_keep_last_payload(values in prop::collection::vec(any::<i64>(), 1..20)) {
            let mut entry = apply(None, SyncOperation::Create, doc(json!({"_id": "a", "v": 0})));
            for v in &values {
                entry = apply(entry, SyncOperation::Update, doc(json!({"_id": "a", "v": v})));
            }

            let entry = entry.unwrap();
            prop_assert_eq!(entry.operation, SyncOperation::Create);
            prop_assert_eq!(&entry.entity.unwrap()["v"], &json!(values[values.len() - 1]));
        }

        #[test]
        fn synced_entity_follows_last_mutation(ops in prop::collection::vec(0u8..3, 1..20)) {
            let mut entry = None;
            let mut last = SyncOperation::Update;
            for (i, code) in ops.iter().enumerate() {
                let op = match code {
                    0 => SyncOperation::Create,
                    1 => SyncOperation::Update,
                    _ => SyncOperation::Delete,
                };
                // The first mutation of a backend entity is never a Create.
                let op = if i == 0 && op == SyncOperation::Create { SyncOperation::Update } else { op };
                entry = apply(entry, op, doc(json!({"_id": "a", "step": i})));
                last = op;
            }

            let entry = entry.unwrap();
            let expected = if last == SyncOperation::Delete {
                SyncOperation::Delete
            } else {
                SyncOperation::Update
            };
            prop_assert_eq!(entry.operation, expected);
            prop_assert_eq!(&entry.entity.unwrap()["step"], &json!(ops.len() - 1));
        }
    }
}
