/// Start/stop state machine shared by every component that owns resources
///
/// `NEW -> STARTED -> STOPPED`, with `FAILED` entered when `start` errors. A
/// `start` on a failed component first runs `stop` to drain whatever the
/// failed attempt allocated, then tries again. A stopped component cannot be
/// restarted.
use crate::error::{TejidoError, TejidoResult};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Mutex;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    New,
    Started,
    Failed,
    Stopped,
}

impl LifecycleState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => LifecycleState::New,
            1 => LifecycleState::Started,
            2 => LifecycleState::Failed,
            _ => LifecycleState::Stopped,
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            LifecycleState::New => 0,
            LifecycleState::Started => 1,
            LifecycleState::Failed => 2,
            LifecycleState::Stopped => 3,
        }
    }
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::New => "NEW",
            LifecycleState::Started => "STARTED",
            LifecycleState::Failed => "FAILED",
            LifecycleState::Stopped => "STOPPED",
        };
        f.write_str(name)
    }
}

/// State holder embedded in each component; transitions are serialized.
#[derive(Debug)]
pub struct LifecycleCell {
    state: AtomicU8,
    transition: Mutex<()>,
}

impl Default for LifecycleCell {
    fn default() -> Self {
        Self {
            state: AtomicU8::new(LifecycleState::New.as_u8()),
            transition: Mutex::new(()),
        }
    }
}

impl LifecycleCell {
    pub fn get(&self) -> LifecycleState {
        LifecycleState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set(&self, state: LifecycleState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }
}

#[async_trait]
pub trait Lifecycle: Send + Sync {
    fn lifecycle(&self) -> &LifecycleCell;

    /// Short label for log lines
    fn component(&self) -> String;

    /// Allocate resources
    async fn start_internal(&self) -> TejidoResult<()>;

    /// Release resources; must tolerate partially started state
    async fn stop_internal(&self) -> TejidoResult<()>;

    fn state(&self) -> LifecycleState {
        self.lifecycle().get()
    }

    fn is_started(&self) -> bool {
        self.state() == LifecycleState::Started
    }

    async fn start(&self) -> TejidoResult<()> {
        let cell = self.lifecycle();
        let _guard = cell.transition.lock().await;

        match cell.get() {
            LifecycleState::Started => {
                info!("{} already started", self.component());
                return Ok(());
            }
            LifecycleState::Stopped => {
                return Err(TejidoError::lifecycle(format!(
                    "{} is stopped and cannot be restarted",
                    self.component()
                )));
            }
            LifecycleState::Failed => {
                if let Err(e) = self.stop_internal().await {
                    warn!("Stopping failed {} raised: {}", self.component(), e);
                }
                cell.set(LifecycleState::Stopped);
            }
            LifecycleState::New => {}
        }

        match self.start_internal().await {
            Ok(()) => {
                cell.set(LifecycleState::Started);
                info!("{} started", self.component());
                Ok(())
            }
            Err(e) => {
                cell.set(LifecycleState::Failed);
                warn!("{} failed to start: {}", self.component(), e);
                Err(e)
            }
        }
    }

    /// Idempotent; errors are logged and swallowed.
    async fn stop(&self) {
        let cell = self.lifecycle();
        let _guard = cell.transition.lock().await;

        match cell.get() {
            LifecycleState::Stopped => return,
            LifecycleState::New => {
                cell.set(LifecycleState::Stopped);
                return;
            }
            LifecycleState::Started | LifecycleState::Failed => {}
        }

        if let Err(e) = self.stop_internal().await {
            warn!("{} raised while stopping: {}", self.component(), e);
        }
        cell.set(LifecycleState::Stopped);
        info!("{} stopped", self.component());
    }
}
