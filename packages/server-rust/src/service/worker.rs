//! Background worker driving continuous services.
//!
//! Provides a generic `BackgroundWorker<R>` that runs a `BackgroundRunnable`
//! on its own tokio task: commands arrive over an mpsc channel, `on_tick`
//! fires on the runnable's (re-read every cycle) interval, and a cancellation
//! token ends the loop. `start` only returns once the runnable reports ready.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Work loop body executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// Commands this runnable accepts.
    type Task: Send + 'static;

    /// Called once on the worker task before the loop. An error aborts the
    /// launch and is reported by `BackgroundWorker::start`.
    async fn on_start(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Process a single command.
    async fn run(&mut self, task: Self::Task);

    /// Called each time the tick interval elapses.
    async fn on_tick(&mut self) {}

    /// Interval until the next `on_tick`, re-read after every tick and command.
    fn tick_interval(&self) -> Duration;

    /// Called once when the loop exits.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Handle to a running background worker task.
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: mpsc::Sender<R::Task>,
    cancel: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Spawns the worker and waits up to `ready_timeout` for `on_start`.
    ///
    /// The channel capacity is fixed at 64.
    ///
    /// # Errors
    ///
    /// Returns an error if no tokio runtime is available, `on_start` fails,
    /// the worker exits before reporting ready, or the timeout elapses.
    pub async fn start(name: &str, mut runnable: R, ready_timeout: Duration) -> anyhow::Result<Self> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| anyhow::anyhow!("no async runtime available: {e}"))?;

        let (tx, mut rx) = mpsc::channel::<R::Task>(64);
        let (ready_tx, ready_rx) = oneshot::channel::<anyhow::Result<()>>();
        let cancel = CancellationToken::new();
        let loop_cancel = cancel.clone();

        let span = tracing::info_span!("service_worker", service = %name);
        let handle = runtime.spawn(
            async move {
                let ready = runnable.on_start().await;
                let launched = ready.is_ok();
                let _ = ready_tx.send(ready);
                if !launched {
                    return;
                }

                let mut next_tick = Instant::now() + runnable.tick_interval();
                loop {
                    tokio::select! {
                        biased;
                        () = loop_cancel.cancelled() => break,
                        task = rx.recv() => match task {
                            Some(t) => {
                                runnable.run(t).await;
                                // A shortened interval takes effect without waiting out the old one.
                                next_tick = next_tick.min(Instant::now() + runnable.tick_interval());
                            }
                            None => break,
                        },
                        () = tokio::time::sleep_until(next_tick) => {
                            runnable.on_tick().await;
                            next_tick = Instant::now() + runnable.tick_interval();
                        }
                    }
                }

                runnable.shutdown().await;
                tracing::debug!("worker loop exited");
            }
            .instrument(span),
        );

        let worker = Self {
            tx,
            cancel,
            handle: Mutex::new(Some(handle)),
        };

        match tokio::time::timeout(ready_timeout, ready_rx).await {
            Ok(Ok(Ok(()))) => Ok(worker),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_)) => Err(anyhow::anyhow!("worker exited before reporting ready")),
            Err(_) => {
                worker.cancel.cancel();
                Err(anyhow::anyhow!(
                    "worker did not report ready within {}ms",
                    ready_timeout.as_millis()
                ))
            }
        }
    }

    /// Queue a command without waiting. Returns `false` if the queue is full
    /// or the worker has stopped.
    pub fn try_submit(&self, task: R::Task) -> bool {
        self.tx.try_send(task).is_ok()
    }

    /// Returns `true` while the worker task is alive. Never blocks.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }

    /// Cancels the loop and waits up to `timeout` for it to finish.
    ///
    /// Returns `true` if the worker exited in time.
    pub async fn stop(&self, timeout: Duration) -> bool {
        self.cancel.cancel();
        let handle = self.handle.lock().take();
        match handle {
            Some(handle) => tokio::time::timeout(timeout, handle).await.is_ok(),
            None => true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
