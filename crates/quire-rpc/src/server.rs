//! `POST /rpc` over TLS
//!
//! Request flow:
//!   1. parse `x-quire-method` (unknown → drop)
//!   2. `Ping` answers `pong` unsigned, `KeyExchange` registers a token
//!   3. everything else: token lookup, sequence compare-and-advance,
//!      signature check, then dispatch on the blocking pool
//!   4. the reply envelope is signed and sequenced with the token's key
//!
//! Every transport rejection produces the same empty 200.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Router;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use ed25519_dalek::VerifyingKey;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto;
use hyper_util::service::TowerToHyperService;
use quire_store::Registry;
use serde_json::Value;
use tokio::net::TcpListener;
use tokio::task::JoinSet;
use tokio_rustls::TlsAcceptor;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Rejection, RpcError};
use crate::handlers;
use crate::headers;
use crate::messages::{KeyExchangeReply, KeyExchangeRequest, Reply};
use crate::method::Method;
use crate::metrics::RpcMetrics;
use crate::token::{ClientToken, TokenRegistry};

/// State shared by every request
pub struct ServerContext {
    stores: Arc<Registry>,
    tokens: TokenRegistry,
    metrics: RpcMetrics,
}

impl ServerContext {
    pub fn new(stores: Arc<Registry>) -> Self {
        Self {
            stores,
            tokens: TokenRegistry::default(),
            metrics: RpcMetrics::default(),
        }
    }

    pub fn with_metrics(mut self, metrics: RpcMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn with_token_limit(mut self, limit: usize) -> Self {
        self.tokens = TokenRegistry::with_limit(limit);
        self
    }

    pub fn stores(&self) -> &Registry {
        &self.stores
    }

    pub fn tokens(&self) -> &TokenRegistry {
        &self.tokens
    }

    pub fn metrics(&self) -> &RpcMetrics {
        &self.metrics
    }
}

pub fn router(ctx: Arc<ServerContext>) -> Router {
    Router::new().route("/rpc", post(rpc)).with_state(ctx)
}

async fn rpc(State(ctx): State<Arc<ServerContext>>, headers: HeaderMap, body: Bytes) -> Response {
    match handle(&ctx, &headers, body).await {
        Ok(response) => response,
        Err(rejection) => {
            debug!(reason = rejection.reason(), "request dropped: {rejection}");
            ctx.metrics.rejected(rejection);
            StatusCode::OK.into_response()
        }
    }
}

async fn handle(ctx: &Arc<ServerContext>, headers: &HeaderMap, body: Bytes) -> Result<Response, Rejection> {
    let method: Method = headers::text(headers, headers::METHOD)?
        .parse()
        .map_err(|_| Rejection::UnknownMethod)?;

    match method {
        Method::Ping => {
            ctx.metrics.accepted(method);
            Ok((StatusCode::OK, "pong").into_response())
        }
        Method::KeyExchange => key_exchange(ctx, headers, &body),
        _ => call(ctx, method, headers, body).await,
    }
}

fn key_exchange(ctx: &ServerContext, headers: &HeaderMap, body: &[u8]) -> Result<Response, Rejection> {
    let signature = headers::signature(headers)?;
    let req: KeyExchangeRequest = serde_json::from_slice(body).map_err(|_| Rejection::Handshake)?;
    let raw = BASE64
        .decode(req.verify_key.as_bytes())
        .map_err(|_| Rejection::Handshake)?;
    let raw: [u8; 32] = raw.as_slice().try_into().map_err(|_| Rejection::Handshake)?;
    let client_key = VerifyingKey::from_bytes(&raw).map_err(|_| Rejection::Handshake)?;

    // The signature is checked against the key that was just registered.
    let token = ctx.tokens.register(client_key)?;
    if let Err(rejection) = token
        .check_sequence(1)
        .and_then(|()| token.verify(body, &signature))
    {
        ctx.tokens.unregister(token.id());
        return Err(rejection);
    }

    ctx.metrics.accepted(Method::KeyExchange);
    debug!(tokens = ctx.tokens.len(), "client token registered");

    let reply = KeyExchangeReply {
        token: token.id().to_string(),
        server_key: BASE64.encode(token.server_key().as_bytes()),
    };
    let value = serde_json::to_value(reply).map_err(|e| RpcError::Internal(e.to_string()));
    Ok(signed_response(&token, Method::KeyExchange, envelope(value)))
}

async fn call(
    ctx: &Arc<ServerContext>,
    method: Method,
    headers: &HeaderMap,
    body: Bytes,
) -> Result<Response, Rejection> {
    let token_id = headers::text(headers, headers::TOKEN)?;
    let sequence = headers::sequence(headers)?;
    let signature = headers::signature(headers)?;

    let token = ctx.tokens.get(token_id).ok_or(Rejection::UnknownToken)?;
    token.check_sequence(sequence)?;
    token.verify(&body, &signature)?;
    ctx.metrics.accepted(method);

    let task_ctx = Arc::clone(ctx);
    let task_token = Arc::clone(&token);
    let result = tokio::task::spawn_blocking(move || {
        let mut session = task_token.session().lock();
        handlers::dispatch(&task_ctx, method, &mut session, &body)
    })
    .await
    .unwrap_or_else(|e| Err(RpcError::Internal(format!("handler task failed: {e}"))));

    if let Err(e) = &result {
        debug!(method = %method, code = e.code(), "call failed: {e}");
    }
    ctx.metrics.set_open_handles(ctx.stores.handle_count());

    Ok(signed_response(&token, method, envelope(result)))
}

fn envelope(result: Result<Value, RpcError>) -> Reply {
    match result {
        Ok(value) => Reply::Ok(value),
        Err(e) => Reply::Error(e.code().to_string()),
    }
}

fn signed_response(token: &ClientToken, method: Method, reply: Reply) -> Response {
    let body = serde_json::to_vec(&reply).unwrap_or_else(|e| {
        error!("encoding reply: {e}");
        br#"{"error":"internal"}"#.to_vec()
    });
    let (signature, sequence) = token.sign_reply(&body);
    (
        StatusCode::OK,
        [
            ("content-type", "application/json".to_string()),
            (headers::METHOD, method.to_string()),
            (headers::SIGNATURE, headers::encode_signature(&signature)),
            (headers::SEQUENCE, sequence.to_string()),
        ],
        body,
    )
        .into_response()
}

/// Accept TLS connections until `shutdown` fires, then abort the ones still open.
pub async fn serve(
    listener: TcpListener,
    tls: Arc<rustls::ServerConfig>,
    ctx: Arc<ServerContext>,
    shutdown: CancellationToken,
) {
    let acceptor = TlsAcceptor::from(tls);
    let app = router(ctx);
    let mut connections = JoinSet::new();

    if let Ok(addr) = listener.local_addr() {
        info!(addr = %addr, "rpc: listening on /rpc");
    }

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            accepted = listener.accept() => {
                let (stream, peer) = match accepted {
                    Ok(accepted) => accepted,
                    Err(e) => {
                        warn!("accept failed: {e}");
                        continue;
                    }
                };
                let acceptor = acceptor.clone();
                let service = TowerToHyperService::new(app.clone());
                connections.spawn(async move {
                    let stream = match acceptor.accept(stream).await {
                        Ok(stream) => stream,
                        Err(e) => {
                            debug!(peer = %peer, "TLS handshake failed: {e}");
                            return;
                        }
                    };
                    if let Err(e) = auto::Builder::new(TokioExecutor::new())
                        .serve_connection(TokioIo::new(stream), service)
                        .await
                    {
                        debug!(peer = %peer, "connection ended: {e}");
                    }
                });
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }

    debug!(open = connections.len(), "rpc: shutting down");
    connections.shutdown().await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use ed25519_dalek::{Signer, SigningKey};
    use quire_crypto::KdfParams;
    use rand::rngs::OsRng;
    use serde_json::json;
    use tempfile::TempDir;
    use tower::ServiceExt;

    struct Harness {
        _tmp: TempDir,
        ctx: Arc<ServerContext>,
        app: Router,
    }

    fn harness() -> Harness {
        harness_with(|ctx| ctx)
    }

    fn harness_with(configure: impl FnOnce(ServerContext) -> ServerContext) -> Harness {
        let tmp = TempDir::new().unwrap();
        let stores = Registry::new(tmp.path(), KdfParams::insecure_fast()).unwrap();
        let ctx = Arc::new(configure(ServerContext::new(Arc::new(stores))));
        Harness {
            app: router(Arc::clone(&ctx)),
            ctx,
            _tmp: tmp,
        }
    }

    fn request(method: &str, extra: &[(&str, String)], body: Vec<u8>) -> Request<Body> {
        let mut builder = Request::post("/rpc").header(headers::METHOD, method);
        for (name, value) in extra {
            builder = builder.header(*name, value);
        }
        builder.body(Body::from(body)).unwrap()
    }

    async fn send(app: &Router, req: Request<Body>) -> (HeaderMap, Vec<u8>) {
        let resp = app.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let headers = resp.headers().clone();
        let body = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        (headers, body.to_vec())
    }

    async fn handshake(app: &Router, client: &SigningKey) -> (String, VerifyingKey) {
        let body = serde_json::to_vec(&json!({
            "verify_key": BASE64.encode(client.verifying_key().as_bytes())
        }))
        .unwrap();
        let sig = headers::encode_signature(&client.sign(&body));
        let (hdrs, reply) = send(
            app,
            request("KeyExchange", &[(headers::SIGNATURE, sig), (headers::SEQUENCE, "1".into())], body),
        )
        .await;
        assert_eq!(hdrs[headers::SEQUENCE], "1");

        let reply: Reply = serde_json::from_slice(&reply).unwrap();
        let Reply::Ok(value) = reply else { panic!("handshake failed") };
        let reply: KeyExchangeReply = serde_json::from_value(value).unwrap();
        let key: [u8; 32] = BASE64.decode(reply.server_key).unwrap().try_into().unwrap();
        (reply.token, VerifyingKey::from_bytes(&key).unwrap())
    }

    fn signed(client: &SigningKey, method: &str, token: &str, seq: u64, body: Value) -> Request<Body> {
        let body = serde_json::to_vec(&body).unwrap();
        let sig = headers::encode_signature(&client.sign(&body));
        request(
            method,
            &[
                (headers::TOKEN, token.to_string()),
                (headers::SIGNATURE, sig),
                (headers::SEQUENCE, seq.to_string()),
            ],
            body,
        )
    }

    #[tokio::test]
    async fn test_ping_is_unsigned() {
        let h = harness();
        let (hdrs, body) = send(&h.app, request("Ping", &[], Vec::new())).await;
        assert_eq!(body, b"pong");
        assert!(hdrs.get(headers::SIGNATURE).is_none());
    }

    #[tokio::test]
    async fn test_unknown_method_is_silent() {
        let h = harness();
        let (hdrs, body) = send(&h.app, request("DropTables", &[], b"{}".to_vec())).await;
        assert!(body.is_empty());
        assert!(hdrs.get(headers::SIGNATURE).is_none());
        assert_eq!(h.ctx.metrics().rejected_count("unknown_method"), 1);
    }

    #[tokio::test]
    async fn test_handshake_with_bad_signature_leaves_no_token() {
        let h = harness();
        let client = SigningKey::generate(&mut OsRng);
        let other = SigningKey::generate(&mut OsRng);
        let body = serde_json::to_vec(&json!({
            "verify_key": BASE64.encode(client.verifying_key().as_bytes())
        }))
        .unwrap();
        let sig = headers::encode_signature(&other.sign(&body));

        let (_, reply) = send(&h.app, request("KeyExchange", &[(headers::SIGNATURE, sig)], body)).await;
        assert!(reply.is_empty());
        assert!(h.ctx.tokens().is_empty());
        assert_eq!(h.ctx.metrics().rejected_count("signature"), 1);
    }

    #[tokio::test]
    async fn test_handshake_past_token_limit_is_silent() {
        let h = harness_with(|ctx| ctx.with_token_limit(1));
        let first = SigningKey::generate(&mut OsRng);
        handshake(&h.app, &first).await;

        let second = SigningKey::generate(&mut OsRng);
        let body = serde_json::to_vec(&json!({
            "verify_key": BASE64.encode(second.verifying_key().as_bytes())
        }))
        .unwrap();
        let sig = headers::encode_signature(&second.sign(&body));
        let (hdrs, reply) = send(
            &h.app,
            request("KeyExchange", &[(headers::SIGNATURE, sig), (headers::SEQUENCE, "1".into())], body),
        )
        .await;
        assert!(reply.is_empty());
        assert!(hdrs.get(headers::SIGNATURE).is_none());
        assert_eq!(h.ctx.tokens().len(), 1);
        assert_eq!(h.ctx.metrics().rejected_count("token_limit"), 1);
    }

    #[tokio::test]
    async fn test_skipped_sequence_is_dropped_then_next_accepted() {
        let h = harness();
        let client = SigningKey::generate(&mut OsRng);
        let (token, server_key) = handshake(&h.app, &client).await;
        let create = json!({"name": "acme", "passphrase": "pw"});

        let (_, body) = send(&h.app, signed(&client, "CreateAccount", &token, 3, create.clone())).await;
        assert!(body.is_empty());
        assert_eq!(h.ctx.tokens().get(&token).unwrap().recv_sequence(), 1);

        let (hdrs, body) = send(&h.app, signed(&client, "CreateAccount", &token, 2, create)).await;
        assert_eq!(hdrs[headers::METHOD], "CreateAccount");
        assert_eq!(hdrs[headers::SEQUENCE], "2");
        let sig = headers::signature(&hdrs).unwrap();
        server_key.verify_strict(&body, &sig).unwrap();

        let reply: Reply = serde_json::from_slice(&body).unwrap();
        assert!(matches!(reply, Reply::Ok(_)));
        assert_eq!(h.ctx.metrics().accepted_count(Method::CreateAccount), 1);
    }

    #[tokio::test]
    async fn test_replayed_and_tampered_requests_are_dropped() {
        let h = harness();
        let client = SigningKey::generate(&mut OsRng);
        let (token, _) = handshake(&h.app, &client).await;

        let req = || signed(&client, "SignOut", &token, 2, json!({}));
        let (_, first) = send(&h.app, req()).await;
        assert!(!first.is_empty());
        let (_, replay) = send(&h.app, req()).await;
        assert!(replay.is_empty());

        let mut forged = signed(&client, "SignOut", &token, 3, json!({}));
        *forged.body_mut() = Body::from(br#"{"x":1}"#.to_vec());
        let (_, body) = send(&h.app, forged).await;
        assert!(body.is_empty());
        assert_eq!(h.ctx.metrics().rejected_count("signature"), 1);

        let (_, body) = send(&h.app, signed(&client, "SignOut", "no-such-token", 4, json!({}))).await;
        assert!(body.is_empty());
        assert_eq!(h.ctx.metrics().rejected_count("unknown_token"), 1);
    }

    #[tokio::test]
    async fn test_handler_errors_are_signed_replies() {
        let h = harness();
        let client = SigningKey::generate(&mut OsRng);
        let (token, _) = handshake(&h.app, &client).await;

        let (hdrs, body) = send(
            &h.app,
            signed(&client, "ListShelves", &token, 2, json!({"owner": "user", "passphrase": "pw"})),
        )
        .await;
        assert!(hdrs.get(headers::SIGNATURE).is_some());
        let reply: Reply = serde_json::from_slice(&body).unwrap();
        assert_eq!(reply, Reply::Error("unauthorized".into()));
    }
}
