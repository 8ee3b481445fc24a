/// Health supervision of a topology's healthy set
pub mod supervisor;
pub mod validate;

pub use supervisor::Supervisor;
pub use validate::{KeyEqualityValidator, NoopValidator, Validator};

use crate::codec::{merge_key, ValueCodec};
use crate::core::command::Command;
use crate::core::connection::Connection;
use crate::core::reply;
use std::fmt;

/// Outcome of probing one endpoint
#[derive(Debug, Clone, PartialEq)]
pub enum HealthStatus {
    Healthy,
    Unhealthy { reason: String },
    Timeout,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "Healthy"),
            HealthStatus::Unhealthy { reason } => write!(f, "Unhealthy: {}", reason),
            HealthStatus::Timeout => write!(f, "Timeout"),
        }
    }
}

impl HealthStatus {
    /// Check if the status represents a healthy backend
    pub fn is_healthy(&self) -> bool {
        matches!(self, HealthStatus::Healthy)
    }

    fn unhealthy<S: Into<String>>(reason: S) -> Self {
        HealthStatus::Unhealthy {
            reason: reason.into(),
        }
    }
}

/// How a supervisor pass decides membership
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum CheckPolicy {
    /// `PING` plus the validate predicate
    #[default]
    Plain,
    /// Additionally fence replicas on the integer stored under `key`
    Version { key: String },
}

/// What probes need to read application keys the way clients write them
#[derive(Debug, Clone, Default)]
pub struct CheckContext {
    pub namespace: String,
    pub codec: ValueCodec,
}

impl CheckContext {
    pub fn new(namespace: impl Into<String>, codec: ValueCodec) -> Self {
        Self {
            namespace: namespace.into(),
            codec,
        }
    }

    /// Read a namespaced, enveloped key as text; `None` when absent or undecodable.
    pub async fn read_text(&self, conn: &mut dyn Connection, key: &str) -> Option<String> {
        let key = merge_key(&self.namespace, key);
        let value = match conn.execute(&Command::get(&key)).await.and_then(reply::bulk) {
            Ok(Some(value)) => value,
            Ok(None) => {
                tracing::debug!("{} has no value for {}", conn.endpoint(), key);
                return None;
            }
            Err(e) => {
                tracing::debug!("Reading {} from {} failed: {}", key, conn.endpoint(), e);
                return None;
            }
        };
        match self.codec.stored_text(&value) {
            Ok(text) => Some(text),
            Err(e) => {
                tracing::debug!("Decoding {} from {} failed: {}", key, conn.endpoint(), e);
                None
            }
        }
    }

    /// Version stored under `key`, or -1 when missing or not an integer
    pub async fn read_version(&self, conn: &mut dyn Connection, key: &str) -> i64 {
        self.read_text(conn, key)
            .await
            .and_then(|text| text.trim().parse::<i64>().ok())
            .unwrap_or(-1)
    }
}
