//! Audit trail of successful write operations

use axum::http::{Method, StatusCode};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::info;
use warden_common::model::EndpointId;

use crate::routing::is_write_method;

/// One audited write
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditRecord {
    /// When the backend answered
    pub timestamp: DateTime<Utc>,
    /// Caller's username
    pub username: String,
    /// Target environment
    pub endpoint_id: EndpointId,
    /// Target environment name
    pub endpoint_name: String,
    /// HTTP method
    pub method: String,
    /// Kubernetes API path, without the environment prefix
    pub path: String,
    /// Backend status code
    pub status: u16,
    /// Redacted request body
    pub payload: String,
}

/// Collector of audit records
#[cfg_attr(test, mockall::automock)]
pub trait AuditLogger: Send + Sync {
    /// Record one write
    fn log(&self, record: &AuditRecord);
}

/// Writes audit records as tracing events on the `audit` target
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditLogger;

impl AuditLogger for TracingAuditLogger {
    fn log(&self, record: &AuditRecord) {
        info!(
            target: "audit",
            timestamp = %record.timestamp.to_rfc3339(),
            user = %record.username,
            endpoint = %record.endpoint_id,
            endpoint_name = %record.endpoint_name,
            method = %record.method,
            path = %record.path,
            status = record.status,
            payload = %record.payload,
            "Kubernetes write"
        );
    }
}

/// Whether a response to this request is audited
pub fn should_audit(method: &Method, status: StatusCode) -> bool {
    is_write_method(method) && status.is_success()
}
