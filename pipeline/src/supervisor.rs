//! Supervision of the consumer components.
//!
//! Each component runs in its own task. A recoverable failure (log, sink, or
//! checkpoint storage trouble) puts the component back into `STARTING` after
//! a backoff; an unrecoverable one (corrupted checkpoint or output, a log
//! position the log cannot serve, bad configuration) leaves it `FAILED` for an
//! operator. Either way the other components keep running.

use orderstream_projections::{BatchHandler, MicroBatchRunner, PipelineError};
use std::future::Future;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Final result of one supervised component.
#[derive(Debug)]
pub struct ComponentExit {
    /// Component id
    pub component: String,
    /// Restarts performed before the component stopped
    pub restarts: u32,
    /// `Ok` after a requested shutdown, the last error otherwise
    pub result: Result<(), PipelineError>,
}

/// Owns the tasks of every running component.
pub struct Supervisor {
    backoff: Duration,
    tasks: Vec<JoinHandle<ComponentExit>>,
    shutdowns: Vec<watch::Sender<bool>>,
}

impl Supervisor {
    /// Create a supervisor that waits `backoff` before each restart.
    #[must_use]
    pub const fn new(backoff: Duration) -> Self {
        Self {
            backoff,
            tasks: Vec::new(),
            shutdowns: Vec::new(),
        }
    }

    /// Number of supervised components.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    /// Whether nothing is supervised.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Start `runner` in its own task.
    ///
    /// `shutdown` is the sender returned by [`MicroBatchRunner::new`].
    pub fn spawn<H>(&mut self, runner: MicroBatchRunner<H>, shutdown: watch::Sender<bool>)
    where
        H: BatchHandler + 'static,
    {
        let stop = shutdown.subscribe();
        let backoff = self.backoff;
        self.tasks.push(tokio::spawn(supervise(runner, stop, backoff)));
        self.shutdowns.push(shutdown);
    }

    /// Ask every component to stop after its in-flight batch.
    pub fn shutdown(&self) {
        for sender in &self.shutdowns {
            sender.send_replace(true);
        }
    }

    /// Wait for every component to exit.
    ///
    /// A task that panicked is reported as a configuration error so the
    /// caller sees it among the exits.
    pub async fn join(self) -> Vec<ComponentExit> {
        collect(self.tasks).await
    }

    /// Wait until `stop` resolves or every component has exited, whichever
    /// comes first.
    ///
    /// When `stop` wins, every component is asked to stop after its
    /// in-flight batch and then awaited.
    pub async fn join_until(self, stop: impl Future<Output = ()>) -> Vec<ComponentExit> {
        let Self { tasks, shutdowns, .. } = self;
        let exits = collect(tasks);
        tokio::pin!(exits);

        tokio::select! {
            exits = &mut exits => {
                tracing::warn!(components = exits.len(), "Every component has exited");
                exits
            }
            () = stop => {
                for sender in &shutdowns {
                    sender.send_replace(true);
                }
                exits.await
            }
        }
    }
}

async fn collect(tasks: Vec<JoinHandle<ComponentExit>>) -> Vec<ComponentExit> {
    let mut exits = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(exit) => exits.push(exit),
            Err(error) => {
                tracing::error!(error = %error, "Component task aborted");
                exits.push(ComponentExit {
                    component: "unknown".to_string(),
                    restarts: 0,
                    result: Err(PipelineError::Config(format!("component task aborted: {error}"))),
                });
            }
        }
    }
    exits
}

async fn supervise<H: BatchHandler>(
    mut runner: MicroBatchRunner<H>,
    mut stop: watch::Receiver<bool>,
    backoff: Duration,
) -> ComponentExit {
    let component = runner.component().to_string();
    let mut restarts = 0;

    loop {
        let result = runner.run().await;
        let error = match result {
            Ok(()) => {
                return ComponentExit {
                    component,
                    restarts,
                    result: Ok(()),
                };
            }
            Err(error) => error,
        };

        if !error.is_recoverable() || *stop.borrow() {
            if !error.is_recoverable() {
                tracing::error!(
                    component = %component,
                    error = %error,
                    "Component needs operator intervention, not restarting"
                );
            }
            return ComponentExit {
                component,
                restarts,
                result: Err(error),
            };
        }

        tracing::warn!(
            component = %component,
            error = %error,
            backoff_ms = u64::try_from(backoff.as_millis()).unwrap_or(u64::MAX),
            "Restarting component"
        );
        tokio::select! {
            () = tokio::time::sleep(backoff) => {}
            Ok(()) = stop.changed() => {}
        }
        if *stop.borrow() {
            return ComponentExit {
                component,
                restarts,
                result: Err(error),
            };
        }
        restarts += 1;
    }
}
