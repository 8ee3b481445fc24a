/// Bounded worker pool for write-all fan-out
///
/// Sized as `core;max;queue;keepAlive`: `core` workers live for the pool's
/// lifetime, jobs queue up to `queue` entries once they are busy, and extra
/// workers up to `max` are spawned when the queue is full. Extra workers exit
/// after `keepAlive` without work. Submitting past that point is refused.
use crate::config::WritePoolConfig;
use crate::core::lifecycle::{Lifecycle, LifecycleCell};
use crate::error::{TejidoError, TejidoResult};
use async_trait::async_trait;
use futures::FutureExt;
use std::collections::VecDeque;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::sync::{oneshot, Notify};
use tracing::{debug, error, info};

type Job = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

#[derive(Default)]
struct Queue {
    jobs: VecDeque<Job>,
    workers: usize,
    idle: usize,
    closed: bool,
}

struct Shared {
    name: String,
    config: WritePoolConfig,
    queue: Mutex<Queue>,
    notify: Notify,
}

impl Shared {
    fn queue(&self) -> MutexGuard<'_, Queue> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Completion handle for a submitted job
pub struct WriteHandle<T> {
    rx: oneshot::Receiver<T>,
}

impl<T> WriteHandle<T> {
    /// Wait for the job's output.
    pub async fn wait(self) -> TejidoResult<T> {
        self.rx
            .await
            .map_err(|_| TejidoError::operation("write job was dropped before completing"))
    }
}

pub struct WritePool {
    shared: Arc<Shared>,
    lifecycle: LifecycleCell,
}

impl WritePool {
    pub fn new(name: impl Into<String>, config: WritePoolConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                name: name.into(),
                config,
                queue: Mutex::new(Queue::default()),
                notify: Notify::new(),
            }),
            lifecycle: LifecycleCell::default(),
        }
    }

    pub fn config(&self) -> &WritePoolConfig {
        &self.shared.config
    }

    /// Live worker count
    pub fn workers(&self) -> usize {
        self.shared.queue().workers
    }

    /// Jobs waiting for a worker
    pub fn queued(&self) -> usize {
        self.shared.queue().jobs.len()
    }

    /// Queue a job, spawning a worker when allowed.
    pub fn submit<F, T>(&self, future: F) -> TejidoResult<WriteHandle<T>>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::pin(async move {
            let _ = tx.send(future.await);
        });

        let config = self.shared.config;
        let mut queue = self.shared.queue();
        if queue.closed {
            return Err(TejidoError::operation(format!(
                "write pool {} is stopped",
                self.shared.name
            )));
        }

        if queue.idle > queue.jobs.len() || queue.jobs.len() < config.queue {
            queue.jobs.push_back(job);
            drop(queue);
            self.shared.notify.notify_one();
        } else if queue.workers < config.max {
            queue.workers += 1;
            drop(queue);
            spawn_worker(Arc::clone(&self.shared), Some(job));
        } else {
            return Err(TejidoError::operation(format!(
                "write pool saturated ({} workers, {} queued)",
                queue.workers,
                queue.jobs.len()
            )));
        }
        Ok(WriteHandle { rx })
    }
}

fn spawn_worker(shared: Arc<Shared>, first: Option<Job>) {
    tokio::spawn(async move {
        if let Some(job) = first {
            run(&shared, job).await;
        }
        worker_loop(&shared).await;
    });
}

async fn run(shared: &Shared, job: Job) {
    if AssertUnwindSafe(job).catch_unwind().await.is_err() {
        error!("Write job panicked in pool {}", shared.name);
    }
}

async fn worker_loop(shared: &Arc<Shared>) {
    loop {
        let notified = shared.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();

        let (job, elastic) = {
            let mut queue = shared.queue();
            match queue.jobs.pop_front() {
                Some(job) => (Some(job), false),
                None if queue.closed => {
                    queue.workers -= 1;
                    return;
                }
                None => {
                    queue.idle += 1;
                    (None, queue.workers > shared.config.core)
                }
            }
        };
        if let Some(job) = job {
            run(shared, job).await;
            continue;
        }

        // core workers wait without a deadline
        let woke = if elastic {
            tokio::time::timeout(shared.config.keep_alive, notified)
                .await
                .is_ok()
        } else {
            notified.await;
            true
        };

        let mut queue = shared.queue();
        queue.idle -= 1;
        if !woke && queue.jobs.is_empty() && queue.workers > shared.config.core {
            queue.workers -= 1;
            debug!(
                "Idle write worker exits, {} left in pool {}",
                queue.workers, shared.name
            );
            return;
        }
    }
}

#[async_trait]
impl Lifecycle for WritePool {
    fn lifecycle(&self) -> &LifecycleCell {
        &self.lifecycle
    }

    fn component(&self) -> String {
        format!("write-pool[{}]", self.shared.name)
    }

    async fn start_internal(&self) -> TejidoResult<()> {
        let core = self.shared.config.core;
        {
            let mut queue = self.shared.queue();
            queue.closed = false;
            queue.workers += core;
        }
        for _ in 0..core {
            spawn_worker(Arc::clone(&self.shared), None);
        }
        info!(
            "Write pool {} started with {} core workers",
            self.shared.name, core
        );
        Ok(())
    }

    async fn stop_internal(&self) -> TejidoResult<()> {
        self.shared.queue().closed = true;
        self.shared.notify.notify_waiters();
        Ok(())
    }
}
