use std::net::SocketAddr;

use axum::{extract::State, http::StatusCode, routing::get, Router, Server};
use prometheus::{
    register_int_counter_vec_with_registry, register_int_gauge_vec_with_registry, Encoder,
    IntCounterVec, IntGaugeVec, Registry, TextEncoder,
};
use tracing::info;

use crate::{filter::EventCategory, Error, Result};

type GaugeVec = IntGaugeVec;
type CounterVec = IntCounterVec;

#[derive(Clone)]
pub struct Metrics {
    /// The number of events handed to the consumer
    /// Labels: ['category']
    hubflow_events: CounterVec,

    /// The number of times the event stream had to reconnect
    /// Labels: ['category']
    hubflow_reconnects: CounterVec,

    /// The number of inbound stream messages that could not be parsed
    /// Labels: ['category']
    hubflow_parse_errors: CounterVec,

    /// The number of stream transport errors and server-reported errors
    /// Labels: ['category']
    hubflow_stream_errors: CounterVec,

    /// Whether the event stream is currently subscribed (1) or not (0)
    /// Labels: ['category']
    hubflow_stream_connected: GaugeVec,

    /// The number of dispatched operations
    /// Labels: ['resource', 'operation', 'outcome']
    hubflow_operations: CounterVec,

    /// The number of broadcast transactions
    /// Labels: ['msg_type', 'outcome']
    hubflow_broadcasts: CounterVec,
}

impl Metrics {
    pub fn new() -> Result<(Self, Registry)> {
        let registry = Registry::new();

        let hubflow_events = register_int_counter_vec_with_registry!(
            "hubflow_events",
            "The number of events handed to the consumer",
            &["category"],
            registry
        )?;

        let hubflow_reconnects = register_int_counter_vec_with_registry!(
            "hubflow_reconnects",
            "The number of times the event stream had to reconnect",
            &["category"],
            registry
        )?;

        let hubflow_parse_errors = register_int_counter_vec_with_registry!(
            "hubflow_parse_errors",
            "The number of inbound stream messages that could not be parsed",
            &["category"],
            registry
        )?;

        let hubflow_stream_errors = register_int_counter_vec_with_registry!(
            "hubflow_stream_errors",
            "The number of stream transport errors and server-reported errors",
            &["category"],
            registry
        )?;

        let hubflow_stream_connected = register_int_gauge_vec_with_registry!(
            "hubflow_stream_connected",
            "Whether the event stream is currently subscribed",
            &["category"],
            registry
        )?;

        let hubflow_operations = register_int_counter_vec_with_registry!(
            "hubflow_operations",
            "The number of dispatched operations",
            &["resource", "operation", "outcome"],
            registry
        )?;

        let hubflow_broadcasts = register_int_counter_vec_with_registry!(
            "hubflow_broadcasts",
            "The number of broadcast transactions",
            &["msg_type", "outcome"],
            registry
        )?;

        Ok((
            Self {
                hubflow_events,
                hubflow_reconnects,
                hubflow_parse_errors,
                hubflow_stream_errors,
                hubflow_stream_connected,
                hubflow_operations,
                hubflow_broadcasts,
            },
            registry,
        ))
    }

    pub fn hubflow_events(&self, category: EventCategory) {
        self.hubflow_events
            .with_label_values(&[category.label()])
            .inc();
    }

    pub fn hubflow_reconnects(&self, category: EventCategory) {
        self.hubflow_reconnects
            .with_label_values(&[category.label()])
            .inc();
    }

    pub fn hubflow_parse_errors(&self, category: EventCategory) {
        self.hubflow_parse_errors
            .with_label_values(&[category.label()])
            .inc();
    }

    pub fn hubflow_stream_errors(&self, category: EventCategory) {
        self.hubflow_stream_errors
            .with_label_values(&[category.label()])
            .inc();
    }

    pub fn hubflow_stream_connected(&self, category: EventCategory, connected: bool) {
        self.hubflow_stream_connected
            .with_label_values(&[category.label()])
            .set(i64::from(connected));
    }

    pub fn hubflow_operations(&self, resource: &str, operation: &str, success: bool) {
        self.hubflow_operations
            .with_label_values(&[resource, operation, outcome(success)])
            .inc();
    }

    /// `success` is the on-chain result code being zero.
    pub fn hubflow_broadcasts(&self, msg_type: &str, success: bool) {
        self.hubflow_broadcasts
            .with_label_values(&[msg_type, outcome(success)])
            .inc();
    }
}

fn outcome(success: bool) -> &'static str {
    if success {
        "success"
    } else {
        "failure"
    }
}

pub async fn run(port: u16, registry: Registry) -> Result<()> {
    let app = Router::new()
        .route("/metrics", get(get_metrics))
        .with_state(registry);

    let server =
        Server::bind(&SocketAddr::from(([0, 0, 0, 0], port))).serve(app.into_make_service());

    info!("Metrics server listening at http://localhost:{port}/metrics");
    server
        .await
        .map_err(|e| Error::Transport(format!("metrics server: {e}")))?;

    Ok(())
}

pub async fn get_metrics(
    State(registry): State<Registry>,
) -> std::result::Result<String, StatusCode> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();

    let metric_families = registry.gather();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    String::from_utf8(buffer).map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
