//! Prometheus metrics for the streaming supervisor and both send paths

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter_vec_with_registry, register_int_counter_with_registry,
    register_int_gauge_with_registry, IntCounter, IntCounterVec, IntGauge, Registry,
};

lazy_static! {
    pub static ref GCM_REGISTRY: Registry =
        Registry::new_custom(Some("gcm".to_string()), None).unwrap();
}

lazy_static! {
    pub static ref CONNECTION_REPLACEMENTS: IntCounterVec = register_int_counter_vec_with_registry!(
        "connection_replacements_total",
        "Streaming connection replacements by trigger and outcome",
        &["reason", "status"],
        GCM_REGISTRY
    )
    .unwrap();
    pub static ref PING_TIMEOUTS: IntCounter = register_int_counter_with_registry!(
        "ping_timeouts_total",
        "Health checks that went unanswered",
        GCM_REGISTRY
    )
    .unwrap();
    pub static ref CURRENT_GENERATION: IntGauge = register_int_gauge_with_registry!(
        "connection_generation",
        "Generation number of the current streaming connection",
        GCM_REGISTRY
    )
    .unwrap();
    pub static ref STREAMING_SENDS: IntCounterVec = register_int_counter_vec_with_registry!(
        "streaming_sends_total",
        "Messages written to the streaming connection",
        &["status"],
        GCM_REGISTRY
    )
    .unwrap();
    pub static ref UNARY_ATTEMPTS: IntCounterVec = register_int_counter_vec_with_registry!(
        "unary_attempts_total",
        "HTTP send attempts by outcome",
        &["outcome"],
        GCM_REGISTRY
    )
    .unwrap();
    pub static ref UPSTREAM_MESSAGES: IntCounterVec = register_int_counter_vec_with_registry!(
        "upstream_messages_total",
        "Inbound messages by kind and routing decision",
        &["kind", "route"],
        GCM_REGISTRY
    )
    .unwrap();
}
