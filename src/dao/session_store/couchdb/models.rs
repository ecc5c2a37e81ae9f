use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dao::models::SessionEntity;

/// Prefix of every session document id.
pub const SESSION_PREFIX: &str = "session::";
/// Appended to the prefix to close an `_all_docs` key range.
pub const END_SUFFIX: &str = "\u{ffff}";

/// Body of `GET _all_docs?include_docs=true`.
#[derive(Debug, Deserialize)]
pub struct AllDocsResponse {
    pub rows: Vec<AllDocsRow>,
}

#[derive(Debug, Deserialize)]
pub struct AllDocsRow {
    /// Document id, `session::<id>`.
    pub id: String,
    #[serde(default)]
    pub doc: Option<Value>,
}

/// Body CouchDB returns after a successful write.
#[derive(Debug, Deserialize)]
pub struct WriteResponse {
    pub rev: String,
}

/// Session document as stored in CouchDB.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CouchSessionDocument {
    /// `session::<id>`.
    #[serde(rename = "_id")]
    pub id: String,
    /// Revision read with the document; absent on first insert.
    #[serde(rename = "_rev", skip_serializing_if = "Option::is_none")]
    pub rev: Option<String>,
    /// Session fields, stored inline next to `_id`/`_rev`.
    #[serde(flatten)]
    pub session: SessionEntity,
}

impl CouchSessionDocument {
    /// Wrap `session`, carrying `rev` for an update.
    pub fn new(session: SessionEntity, rev: Option<String>) -> Self {
        Self {
            id: session_doc_id(&session.id),
            rev,
            session,
        }
    }
}

/// Document id of session `id`.
pub fn session_doc_id(id: &str) -> String {
    format!("{SESSION_PREFIX}{id}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dao::models::fixtures;

    #[test]
    fn new_documents_carry_no_revision() {
        let document = CouchSessionDocument::new(fixtures::session("s1", vec![]), None);
        let value = serde_json::to_value(&document).unwrap();

        assert_eq!(value["_id"], "session::s1");
        assert!(value.get("_rev").is_none());
        assert_eq!(value["id"], "s1");
        assert_eq!(value["config"]["phase"], 1);
    }

    #[test]
    fn stored_documents_round_trip_with_revision() {
        let session = fixtures::session("s1", vec![fixtures::player("alice", None, false)]);
        let mut value = serde_json::to_value(CouchSessionDocument::new(session.clone(), None)).unwrap();
        value["_rev"] = "3-abc".into();

        let document: CouchSessionDocument = serde_json::from_value(value).unwrap();
        assert_eq!(document.rev.as_deref(), Some("3-abc"));
        assert_eq!(document.session, session);
    }
}
