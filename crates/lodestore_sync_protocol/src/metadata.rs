//! Reserved document metadata.
//!
//! Every cached document may carry a `_kmd` object. The only field the sync
//! engine interprets is `_kmd.local`, which marks a document created or
//! edited offline and never confirmed by the backend.

use lodestore_storage::{document_id, Document, ID_ATTRIBUTE};
use serde_json::{Map, Value};
use uuid::Uuid;

/// Name of the metadata attribute.
pub const KMD_ATTRIBUTE: &str = "_kmd";

const LOCAL_FLAG: &str = "local";

/// Generates a new local document id.
#[must_use]
pub fn generate_id() -> String {
    Uuid::new_v4().simple().to_string()
}

/// Returns true if the document is marked as locally created.
pub fn is_local(doc: &Document) -> bool {
    doc.get(KMD_ATTRIBUTE)
        .and_then(|kmd| kmd.get(LOCAL_FLAG))
        .and_then(Value::as_bool)
        .unwrap_or(false)
}

/// Sets `_kmd.local = true`, creating `_kmd` if needed.
pub fn mark_local(doc: &mut Document) {
    let kmd = doc
        .entry(KMD_ATTRIBUTE)
        .or_insert_with(|| Value::Object(Map::new()));
    if !kmd.is_object() {
        *kmd = Value::Object(Map::new());
    }
    if let Value::Object(kmd) = kmd {
        kmd.insert(LOCAL_FLAG.to_string(), Value::Bool(true));
    }
}

/// Removes `_kmd.local`. An `_kmd` left empty is removed as well.
pub fn clear_local(doc: &mut Document) {
    let now_empty = match doc.get_mut(KMD_ATTRIBUTE) {
        Some(Value::Object(kmd)) => {
            kmd.remove(LOCAL_FLAG);
            kmd.is_empty()
        }
        _ => false,
    };
    if now_empty {
        doc.remove(KMD_ATTRIBUTE);
    }
}

/// Assigns a generated `_id` and marks the document local when it has none.
///
/// Returns the document id.
pub fn ensure_id(doc: &mut Document) -> String {
    if let Some(id) = document_id(doc) {
        return id.to_string();
    }
    let id = generate_id();
    doc.insert(ID_ATTRIBUTE.to_string(), Value::String(id.clone()));
    mark_local(doc);
    id
}
