//! Firestore REST: ordered collection queries and commits with a
//! server-assigned timestamp.

use serde_json::{json, Map, Value};
use time::{format_description::well_known::Rfc3339, OffsetDateTime};
use tracing::warn;
use uuid::Uuid;

use crate::{
    feed::{CollectionPath, CollectionQuery},
    model::{self, Message, MessageDraft, RoomId, SYSTEM_AUTHOR_ID},
    AppResult, GetField,
};

pub(crate) struct Firestore {
    /// `projects/{project}/databases/(default)/documents`
    documents: String,
}

impl Firestore {
    pub(crate) fn new(project_id: &str) -> Firestore {
        Firestore {
            documents: format!("projects/{project_id}/databases/(default)/documents"),
        }
    }

    fn url(&self, suffix: &str) -> String {
        format!("https://firestore.googleapis.com/v1/{}{suffix}", self.documents)
    }

    pub(crate) async fn run_query(
        &self,
        http_client: &reqwest::Client,
        id_token: &str,
        query: &CollectionQuery,
    ) -> AppResult<Vec<Message>> {
        let rows: Vec<Value> = http_client.post(self.url(&format!("/{}:runQuery", query.path.parent())))
            .bearer_auth(id_token)
            .json(&structured_query(query))
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        let mut messages = Vec::with_capacity(rows.len());
        for row in &rows {
            let Some(document) = row.get("document") else {
                continue;
            };
            if let Some(message) = decode_document(document, query.path.room_id())? {
                messages.push(message);
            }
        }
        Ok(messages)
    }

    pub(crate) async fn commit(
        &self,
        http_client: &reqwest::Client,
        id_token: &str,
        path: &CollectionPath,
        draft: &MessageDraft,
    ) -> AppResult<()> {
        let name = format!("{}/{path}/{}", self.documents, Uuid::now_v7().simple());
        http_client.post(self.url(":commit"))
            .bearer_auth(id_token)
            .json(&commit_body(&name, draft))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

pub(crate) fn structured_query(query: &CollectionQuery) -> Value {
    json!({
        "structuredQuery": {
            "from": [{ "collectionId": query.path.collection_id() }],
            "orderBy": [{
                "field": { "fieldPath": query.order_by },
                "direction": "ASCENDING",
            }],
        }
    })
}

pub(crate) fn commit_body(name: &str, draft: &MessageDraft) -> Value {
    json!({
        "writes": [{
            "update": { "name": name, "fields": encode_draft(draft) },
            "updateTransforms": [{
                "fieldPath": "timestamp",
                "setToServerValue": "REQUEST_TIME",
            }],
            "currentDocument": { "exists": false },
        }]
    })
}

fn string_value(value: &str) -> Value {
    json!({ "stringValue": value })
}

pub(crate) fn encode_draft(draft: &MessageDraft) -> Value {
    let mut fields = Map::new();
    fields.insert("text".to_owned(), string_value(&draft.text));
    if let Some(author_id) = &draft.author_id {
        fields.insert("userId".to_owned(), string_value(author_id));
    }
    fields.insert("userName".to_owned(), string_value(&draft.author_name));
    fields.insert("userPhoto".to_owned(), string_value(&draft.author_avatar_url));
    fields.insert("roomId".to_owned(), string_value(draft.room_id.as_str()));
    Value::Object(fields)
}

fn string_field(fields: &Value, field: &str) -> Option<String> {
    fields.get(field)?.get_opt_str_field("stringValue")
}

/// Decodes one stored message. Documents without a resolved timestamp are
/// skipped, the same way an ordered query leaves them out.
pub(crate) fn decode_document(document: &Value, room_id: &RoomId) -> AppResult<Option<Message>> {
    let name = document.get_str_field("name")?;
    let id = name.rsplit('/').next().unwrap_or(&name).to_owned();
    let fields = document.get_obj_field("fields")?;

    let Some(timestamp) = fields.get("timestamp").and_then(|t| t.get_opt_str_field("timestampValue")) else {
        warn!(%id, "skipping message without timestamp");
        return Ok(None);
    };
    let timestamp = OffsetDateTime::parse(&timestamp, &Rfc3339)?;

    let author_name = string_field(fields, "userName").unwrap_or_else(|| "Anonymous".to_owned());
    Ok(Some(Message {
        id,
        text: string_field(fields, "text").unwrap_or_default(),
        author_id: string_field(fields, "userId").unwrap_or_else(|| SYSTEM_AUTHOR_ID.to_owned()),
        author_avatar_url: string_field(fields, "userPhoto").unwrap_or_else(|| model::avatar_url(&author_name)),
        author_name,
        room_id: string_field(fields, "roomId").map(RoomId::new).unwrap_or_else(|| room_id.clone()),
        timestamp,
    }))
}
