//! Metrics collection for observability
//!
//! This module provides Prometheus metrics for monitoring the ledger.
//! Metrics live in a private registry owned by each [`Metrics`] instance.
//!
//! # Metrics
//!
//! - `ledger_transactions_total{kind}` - Committed log records by kind
//! - `ledger_rejections_total{reason}` - Failed operations by error kind
//! - `ledger_neurons_moved_total{kind}` - Neurons moved by record kind
//! - `ledger_transfer_duration_seconds` - Histogram of transfer latencies
//! - `ledger_conflict_retries_total` - Retries after a transaction conflict

use crate::{error::ErrorKind, types::TransactionRecord};
use prometheus::{Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry};
use std::sync::Arc;

/// Metrics collector
#[derive(Clone)]
pub struct Metrics {
    /// Committed records by kind
    pub transactions_total: IntCounterVec,

    /// Rejected operations by error kind
    pub rejections_total: IntCounterVec,

    /// Neurons moved by kind
    pub neurons_moved_total: IntCounterVec,

    /// Transfer duration histogram
    pub transfer_duration: Histogram,

    /// Conflict retries
    pub conflict_retries: IntCounter,

    /// Prometheus registry
    pub registry: Arc<Registry>,
}

impl Metrics {
    /// Create new metrics collector
    pub fn new() -> prometheus::Result<Self> {
        let registry = Arc::new(Registry::new());

        let transactions_total = IntCounterVec::new(
            Opts::new("ledger_transactions_total", "Committed log records by kind"),
            &["kind"],
        )?;
        registry.register(Box::new(transactions_total.clone()))?;

        let rejections_total = IntCounterVec::new(
            Opts::new("ledger_rejections_total", "Rejected operations by reason"),
            &["reason"],
        )?;
        registry.register(Box::new(rejections_total.clone()))?;

        let neurons_moved_total = IntCounterVec::new(
            Opts::new("ledger_neurons_moved_total", "Neurons moved by record kind"),
            &["kind"],
        )?;
        registry.register(Box::new(neurons_moved_total.clone()))?;

        let transfer_duration = Histogram::with_opts(
            HistogramOpts::new(
                "ledger_transfer_duration_seconds",
                "Histogram of transfer latencies",
            )
            .buckets(vec![0.001, 0.005, 0.010, 0.025, 0.050, 0.100, 0.250, 0.500, 1.0]),
        )?;
        registry.register(Box::new(transfer_duration.clone()))?;

        let conflict_retries = IntCounter::new(
            "ledger_conflict_retries_total",
            "Retries after a transaction conflict",
        )?;
        registry.register(Box::new(conflict_retries.clone()))?;

        Ok(Self {
            transactions_total,
            rejections_total,
            neurons_moved_total,
            transfer_duration,
            conflict_retries,
            registry,
        })
    }

    /// Record a committed log record
    pub fn record_transaction(&self, record: &TransactionRecord) {
        let kind = record.kind.as_str();
        self.transactions_total.with_label_values(&[kind]).inc();
        self.neurons_moved_total
            .with_label_values(&[kind])
            .inc_by(record.amount);
    }

    /// Record a rejected operation
    pub fn record_rejection(&self, kind: ErrorKind) {
        self.rejections_total
            .with_label_values(&[kind.as_str()])
            .inc();
    }

    /// Record transfer duration
    pub fn record_transfer_duration(&self, duration_seconds: f64) {
        self.transfer_duration.observe(duration_seconds);
    }

    /// Get metrics registry
    pub fn registry(&self) -> &Registry {
        &self.registry
    }
}
