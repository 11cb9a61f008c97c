//! RPC counters, registered into the daemon's Prometheus registry

use std::sync::atomic::AtomicI64;

use prometheus_client::metrics::{counter::Counter, family::Family, gauge::Gauge};
use prometheus_client::registry::Registry;

use crate::error::Rejection;
use crate::method::Method;

type Labels = Vec<(String, String)>;

#[derive(Clone, Default)]
pub struct RpcMetrics {
    calls: Family<Labels, Counter>,
    rejections: Family<Labels, Counter>,
    open_handles: Gauge<i64, AtomicI64>,
}

impl RpcMetrics {
    pub fn register(&self, registry: &mut Registry) {
        registry.register(
            "quire_rpc_calls",
            "Requests that passed transport checks, by method",
            self.calls.clone(),
        );
        registry.register(
            "quire_rpc_rejections",
            "Requests dropped silently, by reason",
            self.rejections.clone(),
        );
        registry.register(
            "quire_open_scope_handles",
            "Scope stores currently open, master included",
            self.open_handles.clone(),
        );
    }

    pub fn accepted(&self, method: Method) {
        self.calls
            .get_or_create(&vec![("method".to_string(), method.as_ref().to_string())])
            .inc();
    }

    pub fn rejected(&self, rejection: Rejection) {
        self.rejections
            .get_or_create(&vec![("reason".to_string(), rejection.reason().to_string())])
            .inc();
    }

    pub fn set_open_handles(&self, count: usize) {
        self.open_handles.set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    pub fn accepted_count(&self, method: Method) -> u64 {
        self.calls
            .get_or_create(&vec![("method".to_string(), method.as_ref().to_string())])
            .get()
    }

    pub fn rejected_count(&self, reason: &str) -> u64 {
        self.rejections
            .get_or_create(&vec![("reason".to_string(), reason.to_string())])
            .get()
    }
}
