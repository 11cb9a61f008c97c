//! quire-rpc: authenticated RPC over TLS
//!
//! One endpoint, `POST /rpc`. Clients run `KeyExchange` once, then sign
//! every body with their ed25519 key and number every request. Anything
//! that fails those checks gets an empty 200 and nothing else.

pub mod client;
pub mod error;
mod handlers;
pub mod headers;
pub mod messages;
pub mod method;
pub mod metrics;
pub mod server;
pub mod tls;
pub mod token;

pub use client::RpcClient;
pub use error::{ClientError, Rejection, RpcError};
pub use messages::Reply;
pub use method::Method;
pub use metrics::RpcMetrics;
pub use server::{router, serve, ServerContext};
pub use tls::{bootstrap, TlsMaterial};
pub use token::{ClientToken, Session, TokenRegistry};
