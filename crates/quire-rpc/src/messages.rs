//! JSON request and reply bodies
//!
//! Passphrases arrive as plain strings and are wrapped in `SecretString`
//! by the handler before they go anywhere else.

use quire_core::ScopeId;
use quire_store::RecordKind;
use serde::{Deserialize, Serialize};

/// Reply envelope: `{"ok": value}` or `{"error": code}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reply {
    Ok(serde_json::Value),
    Error(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeRequest {
    /// Standard base64 of the client's 32-byte ed25519 verifying key
    pub verify_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyExchangeReply {
    pub token: String,
    /// Standard base64 of the server's 32-byte ed25519 verifying key for this token
    pub server_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdReply {
    pub id: ScopeId,
}

/// Which signed-in scope owns shelves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Owner {
    Account,
    User,
}

#[derive(Serialize, Deserialize)]
pub struct CreateAccountRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ScopeId>,
    pub name: String,
    pub passphrase: String,
}

#[derive(Serialize, Deserialize)]
pub struct SignInRequest {
    pub name: String,
    pub passphrase: String,
}

#[derive(Serialize, Deserialize)]
pub struct CreateUserRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ScopeId>,
    pub account_passphrase: String,
    pub email: String,
    pub passphrase: String,
}

#[derive(Serialize, Deserialize)]
pub struct SignInUserRequest {
    pub email: String,
    pub passphrase: String,
}

#[derive(Serialize, Deserialize)]
pub struct CreateShelfRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ScopeId>,
    pub owner: Owner,
    pub passphrase: String,
    pub name: String,
}

#[derive(Serialize, Deserialize)]
pub struct ListShelvesRequest {
    pub owner: Owner,
    pub passphrase: String,
}

#[derive(Serialize, Deserialize)]
pub struct DeleteShelfRequest {
    pub owner: Owner,
    pub passphrase: String,
    pub shelf_id: ScopeId,
}

#[derive(Serialize, Deserialize)]
pub struct CreateCollectionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<ScopeId>,
    pub owner: Owner,
    pub passphrase: String,
    pub shelf_id: ScopeId,
    pub name: String,
}

#[derive(Serialize, Deserialize)]
pub struct ListCollectionsRequest {
    pub owner: Owner,
    pub passphrase: String,
    pub shelf_id: ScopeId,
}

#[derive(Serialize, Deserialize)]
pub struct DeleteCollectionRequest {
    pub owner: Owner,
    pub passphrase: String,
    pub shelf_id: ScopeId,
    pub collection_id: ScopeId,
}

/// Which store a record call addresses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTarget {
    pub owner: Owner,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shelf_id: Option<ScopeId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collection_id: Option<ScopeId>,
}

#[derive(Serialize, Deserialize)]
pub struct SaveRecordRequest {
    pub target: RecordTarget,
    pub passphrase: String,
    pub kind: RecordKind,
    pub id: String,
    /// Standard base64
    pub data: String,
}

#[derive(Serialize, Deserialize)]
pub struct ListRecordsRequest {
    pub target: RecordTarget,
    pub passphrase: String,
    pub kind: RecordKind,
}

#[derive(Serialize, Deserialize)]
pub struct DeleteRecordRequest {
    pub target: RecordTarget,
    pub passphrase: String,
    pub kind: RecordKind,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordItem {
    pub id: String,
    /// Standard base64
    pub data: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_reply_envelope_shape() {
        let ok = serde_json::to_value(Reply::Ok(json!({"id": "x"}))).unwrap();
        assert_eq!(ok, json!({"ok": {"id": "x"}}));
        let err = serde_json::to_value(Reply::Error("unauthorized".into())).unwrap();
        assert_eq!(err, json!({"error": "unauthorized"}));
    }

    #[test]
    fn test_optional_ids() {
        let req: CreateShelfRequest = serde_json::from_value(json!({
            "owner": "user",
            "passphrase": "pw",
            "name": "Reading"
        }))
        .unwrap();
        assert!(req.id.is_none());
        assert_eq!(req.owner, Owner::User);

        let target: RecordTarget = serde_json::from_value(json!({"owner": "account"})).unwrap();
        assert!(target.shelf_id.is_none() && target.collection_id.is_none());
    }

    #[test]
    fn test_record_kind_names() {
        let req: ListRecordsRequest = serde_json::from_value(json!({
            "target": {"owner": "account"},
            "passphrase": "pw",
            "kind": "notebook"
        }))
        .unwrap();
        assert_eq!(req.kind, RecordKind::Notebook);
    }
}
