//! Client half of the protocol
//!
//! The client pins the server's certificate PEM, generates its own ed25519
//! key, runs `KeyExchange` and then signs and sequences every call. Replies
//! are checked against the server key handed out by the handshake.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bytes::Bytes;
use ed25519_dalek::{Signer, SigningKey, Verifier, VerifyingKey};
use rand::rngs::OsRng;
use reqwest::header::HeaderMap;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::error::ClientError;
use crate::headers;
use crate::messages::{KeyExchangeReply, KeyExchangeRequest, Reply};
use crate::method::Method;

#[derive(Debug)]
struct Sequences {
    next_send: u64,
    last_recv: u64,
}

pub struct RpcClient {
    http: reqwest::Client,
    url: String,
    signing_key: SigningKey,
    token: String,
    server_key: VerifyingKey,
    sequences: Mutex<Sequences>,
}

impl std::fmt::Debug for RpcClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RpcClient")
            .field("url", &self.url)
            .finish_non_exhaustive()
    }
}

impl RpcClient {
    /// Connect to `addr` (`host:port`), trusting only `cert_pem`, and run the handshake.
    pub async fn connect(addr: &str, cert_pem: &[u8]) -> Result<Self, ClientError> {
        let cert = reqwest::Certificate::from_pem(cert_pem)
            .map_err(|e| ClientError::Certificate(e.to_string()))?;
        let http = reqwest::Client::builder()
            .use_rustls_tls()
            .tls_built_in_root_certs(false)
            .add_root_certificate(cert)
            .build()?;
        let url = format!("https://{addr}/rpc");
        let signing_key = SigningKey::generate(&mut OsRng);

        let body = serde_json::to_vec(&KeyExchangeRequest {
            verify_key: BASE64.encode(signing_key.verifying_key().as_bytes()),
        })?;
        let signature = signing_key.sign(&body);
        let resp = http
            .post(&url)
            .header(headers::METHOD, Method::KeyExchange.as_ref())
            .header(headers::SIGNATURE, headers::encode_signature(&signature))
            .header(headers::SEQUENCE, "1")
            .body(body)
            .send()
            .await?;
        let (reply_headers, reply_body) = read(resp).await?;

        let reply: KeyExchangeReply = match serde_json::from_slice(&reply_body)? {
            Reply::Ok(value) => serde_json::from_value(value)?,
            Reply::Error(code) => return Err(ClientError::Server(code)),
        };
        let server_key = decode_key(&reply.server_key)?;
        check_reply(&server_key, &reply_headers, &reply_body, 1)?;

        tracing::debug!(url = %url, "handshake complete");

        Ok(Self {
            http,
            url,
            signing_key,
            token: reply.token,
            server_key,
            sequences: Mutex::new(Sequences {
                next_send: 2,
                last_recv: 1,
            }),
        })
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Sequence the next `call` will carry
    pub async fn next_sequence(&self) -> u64 {
        self.sequences.lock().await.next_send
    }

    /// Signed, sequenced call. A signed `{"error": code}` reply surfaces as
    /// [`ClientError::Server`].
    pub async fn call<Req, Resp>(&self, method: Method, req: &Req) -> Result<Resp, ClientError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let body = serde_json::to_vec(req)?;
        let mut sequences = self.sequences.lock().await;
        let sequence = sequences.next_send;
        let result = self.exchange(&mut sequences, method, body, sequence).await;
        // The server has consumed the sequence unless the request was dropped
        // before reaching it or rejected outright.
        if !matches!(result, Err(ClientError::Rejected | ClientError::Transport(_))) {
            sequences.next_send += 1;
        }
        drop(sequences);

        match result? {
            Reply::Ok(value) => Ok(serde_json::from_value(value)?),
            Reply::Error(code) => Err(ClientError::Server(code)),
        }
    }

    /// Send an already encoded body with an explicit sequence number. The
    /// client's own send counter is left alone.
    pub async fn send_raw(&self, method: Method, body: Vec<u8>, sequence: u64) -> Result<Reply, ClientError> {
        let mut sequences = self.sequences.lock().await;
        self.exchange(&mut sequences, method, body, sequence).await
    }

    pub async fn ping(&self) -> Result<(), ClientError> {
        let resp = self
            .http
            .post(&self.url)
            .header(headers::METHOD, Method::Ping.as_ref())
            .send()
            .await?;
        let (_, body) = read(resp).await?;
        if body.as_ref() == b"pong" {
            Ok(())
        } else {
            Err(ClientError::Malformed("unexpected ping reply".into()))
        }
    }

    async fn exchange(
        &self,
        sequences: &mut Sequences,
        method: Method,
        body: Vec<u8>,
        sequence: u64,
    ) -> Result<Reply, ClientError> {
        let signature = self.signing_key.sign(&body);
        let resp = self
            .http
            .post(&self.url)
            .header(headers::METHOD, method.as_ref())
            .header(headers::TOKEN, self.token.as_str())
            .header(headers::SIGNATURE, headers::encode_signature(&signature))
            .header(headers::SEQUENCE, sequence.to_string())
            .body(body)
            .send()
            .await?;
        let (reply_headers, reply_body) = read(resp).await?;

        let expected = sequences.last_recv + 1;
        check_reply(&self.server_key, &reply_headers, &reply_body, expected)?;
        sequences.last_recv = expected;

        Ok(serde_json::from_slice(&reply_body)?)
    }
}

async fn read(resp: reqwest::Response) -> Result<(HeaderMap, Bytes), ClientError> {
    let status = resp.status();
    if !status.is_success() {
        return Err(ClientError::Malformed(format!("HTTP {status}")));
    }
    let headers = resp.headers().clone();
    let body = resp.bytes().await?;
    if body.is_empty() {
        return Err(ClientError::Rejected);
    }
    Ok((headers, body))
}

fn decode_key(encoded: &str) -> Result<VerifyingKey, ClientError> {
    let raw = BASE64
        .decode(encoded)
        .map_err(|e| ClientError::Malformed(format!("server key: {e}")))?;
    let raw: [u8; 32] = raw
        .as_slice()
        .try_into()
        .map_err(|_| ClientError::Malformed("server key length".into()))?;
    VerifyingKey::from_bytes(&raw).map_err(|e| ClientError::Malformed(format!("server key: {e}")))
}

fn check_reply(server_key: &VerifyingKey, headers: &HeaderMap, body: &[u8], expected: u64) -> Result<(), ClientError> {
    let signature = headers::signature(headers).map_err(|e| ClientError::Malformed(e.to_string()))?;
    server_key
        .verify(body, &signature)
        .map_err(|_| ClientError::BadSignature)?;

    let got = headers::sequence(headers).map_err(|e| ClientError::Malformed(e.to_string()))?;
    if got != expected {
        return Err(ClientError::BadSequence { expected, got });
    }
    Ok(())
}
