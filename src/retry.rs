/// Retry envelope around single-target operations
///
/// An attempt checks out a connection from a [`Dispatch`] target and runs a
/// pipeline on it. A connection-class failure demotes the endpoint it happened
/// on and, while attempts remain, tries again after the configured sleep;
/// every other failure surfaces at once. The connection goes back to its pool
/// at the end of each attempt whatever the outcome.
use crate::config::RetryConfig;
use crate::core::command::Command;
use crate::core::pool::PooledConnection;
use crate::core::reply;
use crate::core::resp::RespValue;
use crate::core::sentinel::SentinelPool;
use crate::core::topology::Topology;
use crate::core::Endpoint;
use crate::error::{TejidoError, TejidoResult};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

/// Where an attempt gets its connection and how a failed endpoint is demoted
#[async_trait]
pub trait Dispatch: Send + Sync {
    async fn acquire(&self) -> TejidoResult<PooledConnection>;

    async fn demote(&self, endpoint: &Endpoint);
}

/// Any healthy member of a topology
pub struct AnyHealthy(pub Arc<Topology>);

#[async_trait]
impl Dispatch for AnyHealthy {
    async fn acquire(&self) -> TejidoResult<PooledConnection> {
        self.0.get_connection().await
    }

    async fn demote(&self, endpoint: &Endpoint) {
        self.0.remove(endpoint).await;
    }
}

/// The sentinel-resolved master
pub struct Master(pub Arc<SentinelPool>);

#[async_trait]
impl Dispatch for Master {
    async fn acquire(&self) -> TejidoResult<PooledConnection> {
        self.0.get().await
    }

    async fn demote(&self, endpoint: &Endpoint) {
        self.0.invalidate(endpoint).await;
    }
}

/// One specific topology member, healthy or not
pub struct Pinned<'a> {
    pub topology: &'a Topology,
    pub endpoint: &'a Endpoint,
}

#[async_trait]
impl Dispatch for Pinned<'_> {
    async fn acquire(&self) -> TejidoResult<PooledConnection> {
        self.topology.get_connection_for(self.endpoint).await
    }

    async fn demote(&self, endpoint: &Endpoint) {
        self.topology.remove(endpoint).await;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl RetryPolicy {
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    pub fn retries(&self) -> usize {
        self.config.count
    }

    /// Run `commands` as one pipeline; replies come back unchecked.
    pub async fn pipeline(
        &self,
        target: &dyn Dispatch,
        commands: &[Command],
    ) -> TejidoResult<Vec<RespValue>> {
        let attempts = self.config.count + 1;
        let mut last = None;

        for attempt in 0..attempts {
            if attempt > 0 && !self.config.sleep.is_zero() {
                tokio::time::sleep(self.config.sleep).await;
            }

            let err = match attempt_once(target, commands).await {
                Ok(replies) => return Ok(replies),
                Err(err) => err,
            };

            let retryable =
                err.is_connection_error() || matches!(err, TejidoError::NoHealthyBackend { .. });
            if !retryable {
                return Err(err);
            }
            if let Some(endpoint) = err.endpoint() {
                target.demote(endpoint).await;
            }
            if self.config.count == 0 {
                return Err(err);
            }
            warn!(
                "Attempt {}/{} failed: {}",
                attempt + 1,
                attempts,
                err
            );
            last = Some(err);
        }

        let last = last.unwrap_or_else(|| TejidoError::operation("no attempt was made"));
        Err(TejidoError::RetriesExhausted {
            attempts,
            last: Box::new(last),
        })
    }

    /// Run one command; an error reply surfaces as an operation error.
    pub async fn execute(&self, target: &dyn Dispatch, command: &Command) -> TejidoResult<RespValue> {
        let mut replies = self
            .pipeline(target, std::slice::from_ref(command))
            .await?;
        match replies.pop() {
            Some(value) => reply::check(value),
            None => Err(TejidoError::operation(format!(
                "no reply to {}",
                command.name()
            ))),
        }
    }
}

async fn attempt_once(target: &dyn Dispatch, commands: &[Command]) -> TejidoResult<Vec<RespValue>> {
    let mut conn = target.acquire().await?;
    debug!("Dispatching {} command(s) to {}", commands.len(), conn.endpoint());
    conn.pipeline(commands).await
}
