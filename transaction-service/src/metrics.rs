use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, Encoder, IntCounter, IntCounterVec,
    TextEncoder,
};

lazy_static! {
    pub static ref TRANSACTIONS_CREATED_TOTAL: IntCounter = register_int_counter!(
        "transactions_created_total",
        "Total transactions created"
    )
    .expect("metric can be created");

    pub static ref VERDICTS_APPLIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "transaction_verdicts_total",
        "Verdicts received, by status and store result",
        &["status", "result"]
    )
    .expect("metric can be created");

    pub static ref DUAL_WRITE_FAILURES_TOTAL: IntCounter = register_int_counter!(
        "transaction_dual_write_failures_total",
        "Transactions stored whose inline event publish failed"
    )
    .expect("metric can be created");

    pub static ref OUTBOX_RELAYED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "transaction_outbox_relayed_total",
        "Outbox entries relayed, by status",
        &["status"]
    )
    .expect("metric can be created");
}

/// Render every registered metric in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::error!("Failed to encode metrics: {}", e);
    }

    String::from_utf8(buffer).unwrap_or_default()
}
