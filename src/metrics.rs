//! Prometheus metrics registry and instruments.
//!
//! This module is framework-agnostic and can be used from any layer.

use std::sync::Once;

use lazy_static::lazy_static;
use prometheus::{HistogramOpts, IntCounterVec, IntGauge, Opts, Registry};

lazy_static! {
    /// Global Prometheus registry
    pub static ref REGISTRY: Registry = Registry::new();

    // HTTP Metrics
    pub static ref HTTP_REQUESTS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gravity_http_requests_total", "Total number of HTTP requests"),
        &["method", "endpoint", "status"]
    ).expect("metric can be created");

    // Auth Metrics
    pub static ref TOKEN_VERIFICATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gravity_token_verifications_total", "Ownership token verifications by outcome"),
        &["outcome"]
    ).expect("metric can be created");

    // Record Metrics
    pub static ref RECORD_MUTATIONS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gravity_record_mutations_total", "Committed record mutations"),
        &["operation"]
    ).expect("metric can be created");

    pub static ref REGISTERED_USERS: IntGauge = IntGauge::new(
        "gravity_registered_users", "Registered owners"
    ).expect("metric can be created");
    pub static ref STORED_RECORDS: IntGauge = IntGauge::new(
        "gravity_records", "Current records"
    ).expect("metric can be created");

    // Federation Metrics
    pub static ref FOLLOW_RELATIONS: IntGauge = IntGauge::new(
        "gravity_follow_relations", "Remote follower and local user pairs"
    ).expect("metric can be created");
    pub static ref ACTIVITYPUB_ACTIVITIES_RECEIVED: IntCounterVec = IntCounterVec::new(
        Opts::new("gravity_activitypub_activities_received_total", "Total number of ActivityPub activities received"),
        &["activity_type"]
    ).expect("metric can be created");
    pub static ref ACTIVITYPUB_ACTIVITIES_SENT: IntCounterVec = IntCounterVec::new(
        Opts::new("gravity_activitypub_activities_sent_total", "Total number of ActivityPub activities delivered"),
        &["activity_type", "outcome"]
    ).expect("metric can be created");
    pub static ref FEDERATION_DELIVERY_DURATION_SECONDS: prometheus::HistogramVec = prometheus::HistogramVec::new(
        HistogramOpts::new(
            "gravity_federation_delivery_duration_seconds",
            "Inbox discovery plus signed delivery duration in seconds"
        ).buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
        &["activity_type"]
    ).expect("metric can be created");

    // Error Metrics
    pub static ref ERRORS_TOTAL: IntCounterVec = IntCounterVec::new(
        Opts::new("gravity_errors_total", "Total number of error responses"),
        &["error_type"]
    ).expect("metric can be created");
}

static INIT: Once = Once::new();

/// Initialize metrics registry.
///
/// Safe to call more than once; only the first call registers.
pub fn init_metrics() {
    INIT.call_once(|| {
        REGISTRY
            .register(Box::new(HTTP_REQUESTS_TOTAL.clone()))
            .expect("HTTP_REQUESTS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(TOKEN_VERIFICATIONS_TOTAL.clone()))
            .expect("TOKEN_VERIFICATIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(RECORD_MUTATIONS_TOTAL.clone()))
            .expect("RECORD_MUTATIONS_TOTAL can be registered");
        REGISTRY
            .register(Box::new(REGISTERED_USERS.clone()))
            .expect("REGISTERED_USERS can be registered");
        REGISTRY
            .register(Box::new(STORED_RECORDS.clone()))
            .expect("STORED_RECORDS can be registered");
        REGISTRY
            .register(Box::new(FOLLOW_RELATIONS.clone()))
            .expect("FOLLOW_RELATIONS can be registered");
        REGISTRY
            .register(Box::new(ACTIVITYPUB_ACTIVITIES_RECEIVED.clone()))
            .expect("ACTIVITYPUB_ACTIVITIES_RECEIVED can be registered");
        REGISTRY
            .register(Box::new(ACTIVITYPUB_ACTIVITIES_SENT.clone()))
            .expect("ACTIVITYPUB_ACTIVITIES_SENT can be registered");
        REGISTRY
            .register(Box::new(FEDERATION_DELIVERY_DURATION_SECONDS.clone()))
            .expect("FEDERATION_DELIVERY_DURATION_SECONDS can be registered");
        REGISTRY
            .register(Box::new(ERRORS_TOTAL.clone()))
            .expect("ERRORS_TOTAL can be registered");

        tracing::info!("Metrics registry initialized");
    });
}
