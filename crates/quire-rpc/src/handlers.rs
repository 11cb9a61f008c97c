//! Method handlers
//!
//! Every handler gets the shared [`ServerContext`], the calling token's
//! session and the raw body, decodes its own payload and returns the value
//! for the `ok` side of the reply. They block (scrypt, RocksDB), so the
//! server runs them on the blocking pool.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use quire_core::ScopeKey;
use quire_store::hierarchy::{self, Target};
use quire_store::records;
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};

use crate::error::RpcError;
use crate::messages::*;
use crate::method::Method;
use crate::server::ServerContext;
use crate::token::Session;

type HandlerResult = Result<Value, RpcError>;

pub(crate) fn dispatch(ctx: &ServerContext, method: Method, session: &mut Session, body: &[u8]) -> HandlerResult {
    match method {
        Method::KeyExchange | Method::Ping => Err(RpcError::Internal(format!(
            "{method} is answered by the transport"
        ))),
        Method::CreateAccount => create_account(ctx, session, body),
        Method::SignIn => sign_in(ctx, session, body),
        Method::SignOut => sign_out(ctx, session, body),
        Method::CreateUser => create_user(ctx, session, body),
        Method::SignInUser => sign_in_user(ctx, session, body),
        Method::CreateShelf => create_shelf(ctx, session, body),
        Method::ListShelves => list_shelves(ctx, session, body),
        Method::DeleteShelf => delete_shelf(ctx, session, body),
        Method::CreateCollection => create_collection(ctx, session, body),
        Method::ListCollections => list_collections(ctx, session, body),
        Method::DeleteCollection => delete_collection(ctx, session, body),
        Method::SaveRecord => save_record(ctx, session, body),
        Method::ListRecords => list_records(ctx, session, body),
        Method::DeleteRecord => delete_record(ctx, session, body),
    }
}

fn decode<T: DeserializeOwned>(body: &[u8]) -> Result<T, RpcError> {
    serde_json::from_slice(body).map_err(|e| RpcError::Decode(e.to_string()))
}

fn to_value(value: impl Serialize) -> HandlerResult {
    serde_json::to_value(value).map_err(|e| RpcError::Internal(e.to_string()))
}

fn secret(passphrase: String) -> SecretString {
    SecretString::from(passphrase)
}

fn owner_key(session: &Session, owner: Owner) -> Result<ScopeKey, RpcError> {
    match owner {
        Owner::Account => session.account.map(ScopeKey::account),
        Owner::User => session.user.map(ScopeKey::user),
    }
    .ok_or(RpcError::Unauthorized)
}

fn target(session: &Session, target: RecordTarget) -> Result<Target, RpcError> {
    Ok(Target {
        owner: owner_key(session, target.owner)?,
        shelf: target.shelf_id,
        collection: target.collection_id,
    })
}

// ── Accounts and users ──────────────────────────────────────────────────────

fn create_account(ctx: &ServerContext, _session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: CreateAccountRequest = decode(body)?;
    let id = hierarchy::create_account(ctx.stores(), req.id, &req.name, &secret(req.passphrase))?;
    to_value(IdReply { id })
}

fn sign_in(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: SignInRequest = decode(body)?;
    let id = hierarchy::sign_in_account(ctx.stores(), &req.name, &secret(req.passphrase))?;
    if session.account != Some(id) {
        session.user = None;
    }
    session.account = Some(id);
    tracing::debug!(account = %id, "signed in");
    to_value(IdReply { id })
}

fn sign_out(ctx: &ServerContext, session: &mut Session, _body: &[u8]) -> HandlerResult {
    session.clear();
    ctx.stores().close_account_scopes();
    Ok(json!({}))
}

fn create_user(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: CreateUserRequest = decode(body)?;
    let account = session.account.ok_or(RpcError::Unauthorized)?;
    let id = hierarchy::create_user(
        ctx.stores(),
        account,
        &secret(req.account_passphrase),
        req.id,
        &req.email,
        &secret(req.passphrase),
    )?;
    to_value(IdReply { id })
}

fn sign_in_user(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: SignInUserRequest = decode(body)?;
    let account = session.account.ok_or(RpcError::Unauthorized)?;
    let id = hierarchy::sign_in_user(ctx.stores(), account, &req.email, &secret(req.passphrase))?;
    session.user = Some(id);
    tracing::debug!(user = %id, "user signed in");
    to_value(IdReply { id })
}

// ── Shelves and collections ─────────────────────────────────────────────────

fn create_shelf(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: CreateShelfRequest = decode(body)?;
    let owner = owner_key(session, req.owner)?;
    let id = hierarchy::create_shelf(ctx.stores(), owner, &secret(req.passphrase), req.id, &req.name)?;
    to_value(IdReply { id })
}

fn list_shelves(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: ListShelvesRequest = decode(body)?;
    let owner = owner_key(session, req.owner)?;
    to_value(hierarchy::list_shelves(ctx.stores(), owner, &secret(req.passphrase))?)
}

fn delete_shelf(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: DeleteShelfRequest = decode(body)?;
    let owner = owner_key(session, req.owner)?;
    hierarchy::delete_shelf(ctx.stores(), owner, &secret(req.passphrase), req.shelf_id)?;
    Ok(json!({}))
}

fn create_collection(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: CreateCollectionRequest = decode(body)?;
    let owner = owner_key(session, req.owner)?;
    let id = hierarchy::create_collection(
        ctx.stores(),
        owner,
        &secret(req.passphrase),
        req.shelf_id,
        req.id,
        &req.name,
    )?;
    to_value(IdReply { id })
}

fn list_collections(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: ListCollectionsRequest = decode(body)?;
    let owner = owner_key(session, req.owner)?;
    to_value(hierarchy::list_collections(
        ctx.stores(),
        owner,
        &secret(req.passphrase),
        req.shelf_id,
    )?)
}

fn delete_collection(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: DeleteCollectionRequest = decode(body)?;
    let owner = owner_key(session, req.owner)?;
    hierarchy::delete_collection(
        ctx.stores(),
        owner,
        &secret(req.passphrase),
        req.shelf_id,
        req.collection_id,
    )?;
    Ok(json!({}))
}

// ── Records ─────────────────────────────────────────────────────────────────

fn save_record(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: SaveRecordRequest = decode(body)?;
    let target = target(session, req.target)?;
    let data = BASE64
        .decode(&req.data)
        .map_err(|e| RpcError::Decode(format!("data: {e}")))?;

    let (handle, key) = hierarchy::unlock_target(ctx.stores(), &target, &secret(req.passphrase))?;
    records::save(&handle, &key, req.kind, &req.id, &data)?;
    Ok(json!({}))
}

fn list_records(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: ListRecordsRequest = decode(body)?;
    let target = target(session, req.target)?;

    let (handle, key) = hierarchy::unlock_target(ctx.stores(), &target, &secret(req.passphrase))?;
    let items: Vec<RecordItem> = records::load_all(&handle, &key, req.kind)?
        .into_iter()
        .map(|r| RecordItem {
            id: r.id,
            data: BASE64.encode(r.data),
        })
        .collect();
    to_value(items)
}

fn delete_record(ctx: &ServerContext, session: &mut Session, body: &[u8]) -> HandlerResult {
    let req: DeleteRecordRequest = decode(body)?;
    let target = target(session, req.target)?;

    let (handle, _key) = hierarchy::unlock_target(ctx.stores(), &target, &secret(req.passphrase))?;
    records::delete(&handle, req.kind, &req.id)?;
    Ok(json!({}))
}

#[cfg(test)]
mod tests {
    use super::*;
    use quire_crypto::KdfParams;
    use quire_store::Registry;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn context(tmp: &TempDir) -> ServerContext {
        let stores = Registry::new(tmp.path(), KdfParams::insecure_fast()).unwrap();
        ServerContext::new(Arc::new(stores))
    }

    fn call(ctx: &ServerContext, method: Method, session: &mut Session, body: Value) -> HandlerResult {
        dispatch(ctx, method, session, &serde_json::to_vec(&body).unwrap())
    }

    #[test]
    fn test_bad_payload_is_decode_error() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let mut session = Session::default();

        let err = dispatch(&ctx, Method::CreateAccount, &mut session, b"{not json").unwrap_err();
        assert_eq!(err.code(), "decode");
        let err = call(&ctx, Method::SignIn, &mut session, json!({"name": "acme"})).unwrap_err();
        assert_eq!(err.code(), "decode");
    }

    #[test]
    fn test_session_is_required() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let mut session = Session::default();

        let err = call(
            &ctx,
            Method::ListShelves,
            &mut session,
            json!({"owner": "account", "passphrase": "pw"}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "unauthorized");

        let err = call(
            &ctx,
            Method::SignInUser,
            &mut session,
            json!({"email": "ada@example.com", "passphrase": "pw"}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "unauthorized");
    }

    #[test]
    fn test_account_flow_and_sign_out() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let mut session = Session::default();

        let created = call(
            &ctx,
            Method::CreateAccount,
            &mut session,
            json!({"name": "acme", "passphrase": "correct-horse"}),
        )
        .unwrap();
        let signed_in = call(
            &ctx,
            Method::SignIn,
            &mut session,
            json!({"name": "acme", "passphrase": "correct-horse"}),
        )
        .unwrap();
        assert_eq!(created, signed_in);
        assert!(session.account.is_some());

        call(&ctx, Method::SignOut, &mut session, json!({})).unwrap();
        assert_eq!(session, Session::default());
        assert_eq!(ctx.stores().handle_count(), 1, "only master stays open");

        let err = call(
            &ctx,
            Method::CreateAccount,
            &mut session,
            json!({"name": "acme", "passphrase": "other"}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "conflict");
    }

    #[test]
    fn test_shelf_cannot_reuse_another_accounts_id() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let mut victim = Session::default();
        let mut attacker = Session::default();

        let victim_id = call(
            &ctx,
            Method::CreateAccount,
            &mut victim,
            json!({"name": "acme", "passphrase": "victim-pw"}),
        )
        .unwrap()["id"]
            .clone();
        call(
            &ctx,
            Method::CreateAccount,
            &mut attacker,
            json!({"name": "globex", "passphrase": "attacker-pw"}),
        )
        .unwrap();
        call(
            &ctx,
            Method::SignIn,
            &mut attacker,
            json!({"name": "globex", "passphrase": "attacker-pw"}),
        )
        .unwrap();
        call(&ctx, Method::SignOut, &mut victim, json!({})).unwrap();

        let err = call(
            &ctx,
            Method::CreateShelf,
            &mut attacker,
            json!({"id": victim_id, "owner": "account", "passphrase": "attacker-pw", "name": "Loot"}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "unauthorized");

        let signed_in = call(
            &ctx,
            Method::SignIn,
            &mut victim,
            json!({"name": "acme", "passphrase": "victim-pw"}),
        )
        .unwrap();
        assert_eq!(signed_in["id"], victim_id);
    }

    #[test]
    fn test_record_roundtrip() {
        let tmp = TempDir::new().unwrap();
        let ctx = context(&tmp);
        let mut session = Session::default();

        call(&ctx, Method::CreateAccount, &mut session, json!({"name": "acme", "passphrase": "pw"})).unwrap();
        call(&ctx, Method::SignIn, &mut session, json!({"name": "acme", "passphrase": "pw"})).unwrap();

        let target = json!({"owner": "account"});
        call(
            &ctx,
            Method::SaveRecord,
            &mut session,
            json!({"target": target, "passphrase": "pw", "kind": "note", "id": "n1", "data": BASE64.encode("hello")}),
        )
        .unwrap();

        let listed = call(
            &ctx,
            Method::ListRecords,
            &mut session,
            json!({"target": target, "passphrase": "pw", "kind": "note"}),
        )
        .unwrap();
        assert_eq!(listed, json!([{"id": "n1", "data": BASE64.encode("hello")}]));

        let err = call(
            &ctx,
            Method::SaveRecord,
            &mut session,
            json!({"target": target, "passphrase": "pw", "kind": "note", "id": "n2", "data": "%%%"}),
        )
        .unwrap_err();
        assert_eq!(err.code(), "decode");

        call(
            &ctx,
            Method::DeleteRecord,
            &mut session,
            json!({"target": target, "passphrase": "pw", "kind": "note", "id": "n1"}),
        )
        .unwrap();
        let listed = call(
            &ctx,
            Method::ListRecords,
            &mut session,
            json!({"target": target, "passphrase": "pw", "kind": "note"}),
        )
        .unwrap();
        assert_eq!(listed, json!([]));
    }
}
