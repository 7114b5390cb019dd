//! A concurrent application runner that manages long-running processes with graceful shutdown.
//!
//! The runner orchestrates app processes and cleanup functions:
//! - App processes run concurrently until one fails or a shutdown signal arrives
//! - SIGTERM/SIGINT cancel every process through a shared token
//! - Closers always run afterwards, bounded by a timeout
//!
//! # Example
//!
//! ```no_run
//! use twinbridge_runner::Runner;
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     Runner::new()
//!         .with_named_process("heartbeat", |ctx| async move {
//!             loop {
//!                 tokio::select! {
//!                     _ = ctx.cancelled() => break,
//!                     _ = tokio::time::sleep(Duration::from_secs(1)) => {
//!                         tracing::info!("still running");
//!                     }
//!                 }
//!             }
//!             Ok(())
//!         })
//!         .with_closer(|| async move {
//!             tracing::info!("Cleaning up resources");
//!             Ok(())
//!         })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Type alias for an app process function.
/// Takes a cancellation token and returns a future that resolves to Result<(), anyhow::Error>
pub type AppProcess = Box<
    dyn FnOnce(CancellationToken) -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>>
        + Send,
>;

/// Type alias for a closer function.
/// Returns a future that resolves to Result<(), anyhow::Error>
pub type Closer =
    Box<dyn FnOnce() -> Pin<Box<dyn Future<Output = Result<(), anyhow::Error>> + Send>> + Send>;

struct NamedProcess {
    name: String,
    process: AppProcess,
}

/// Runs app processes until the first failure or a shutdown signal, then runs closers
pub struct Runner {
    app_processes: Vec<NamedProcess>,
    closers: Vec<Closer>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Creates a new Runner with default configuration.
    ///
    /// Default settings:
    /// - Closer timeout: 10 seconds
    /// - No app processes or closers
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Adds an app process to the runner.
    ///
    /// If any process returns an error, all processes are cancelled and
    /// closers are executed.
    pub fn with_app_process<F, Fut>(self, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        let name = format!("process_{}", self.app_processes.len());
        self.with_named_process(name, process)
    }

    /// Adds an app process whose name appears in logs.
    pub fn with_named_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.app_processes.push(NamedProcess {
            name: name.into(),
            process: Box::new(|token| Box::pin(process(token))),
        });
        self
    }

    /// Adds a closer to the runner.
    ///
    /// Closers are executed after all app processes have stopped.
    /// All closers will attempt to execute even if some fail.
    pub fn with_closer<F, Fut>(mut self, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), anyhow::Error>> + Send + 'static,
    {
        self.closers.push(Box::new(|| Box::pin(closer())));
        self
    }

    /// Sets the timeout for executing closers. Default is 10 seconds.
    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    /// Sets a custom cancellation token for external control over shutdown.
    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Runs all app processes and waits for completion or a shutdown signal.
    ///
    /// This method:
    /// 1. Spawns all app processes concurrently
    /// 2. Monitors for SIGTERM/SIGINT signals
    /// 3. Cancels all processes when a signal is received or any process fails
    /// 4. Executes all closers with the configured timeout
    /// 5. Returns the first process error, if any
    pub async fn run(self) -> anyhow::Result<()> {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for NamedProcess { name, process } in self.app_processes {
            let process_token = token.clone();
            join_set.spawn(async move {
                tracing::debug!(process = %name, "starting app process");
                (name, process(process_token).await)
            });
        }

        let signal_token = token.clone();
        tokio::spawn(async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    tracing::info!("Received shutdown signal");
                    signal_token.cancel();
                }
                Err(err) => {
                    tracing::error!("Error setting up signal handler: {}", err);
                }
            }
        });

        #[cfg(unix)]
        {
            let sigterm_token = token.clone();
            tokio::spawn(async move {
                use tokio::signal::unix::{signal, SignalKind};
                match signal(SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                        tracing::info!("Received SIGTERM signal");
                        sigterm_token.cancel();
                    }
                    Err(err) => {
                        tracing::error!("Error setting up SIGTERM handler: {}", err);
                    }
                }
            });
        }

        let first_error = Self::supervise(&mut join_set, &token).await;

        // Let cancelled processes stop on their own before aborting stragglers
        let drain = async { while join_set.join_next().await.is_some() {} };
        if tokio::time::timeout(self.closer_timeout, drain).await.is_err() {
            tracing::warn!("App processes did not stop within {:?}, aborting", self.closer_timeout);
        }
        join_set.shutdown().await;

        if !self.closers.is_empty() {
            tracing::info!("Running closers with timeout of {:?}", self.closer_timeout);

            match tokio::time::timeout(self.closer_timeout, Self::run_closers(self.closers)).await
            {
                Ok(()) => tracing::info!("All closers completed"),
                Err(_) => tracing::error!("Closers timed out after {:?}", self.closer_timeout),
            }
        }

        match first_error {
            Some(err) => {
                tracing::error!("Application exiting with error: {:#}", err);
                Err(err)
            }
            None => {
                tracing::info!("Application exiting normally");
                Ok(())
            }
        }
    }

    /// Waits for processes until one fails or the token is cancelled.
    async fn supervise(
        join_set: &mut JoinSet<(String, anyhow::Result<()>)>,
        token: &CancellationToken,
    ) -> Option<anyhow::Error> {
        let mut first_error = None;

        loop {
            let result = tokio::select! {
                _ = token.cancelled() => break,
                result = join_set.join_next() => match result {
                    Some(result) => result,
                    None => break,
                },
            };

            match result {
                Ok((name, Ok(()))) => {
                    tracing::debug!(process = %name, "App process completed successfully");
                }
                Ok((name, Err(err))) => {
                    tracing::error!(process = %name, "App process error: {:#}", err);
                    first_error = Some(err.context(format!("process {} failed", name)));
                    token.cancel();
                    break;
                }
                Err(err) => {
                    tracing::error!("App process panicked: {}", err);
                    first_error = Some(anyhow::anyhow!("app process panicked: {}", err));
                    token.cancel();
                    break;
                }
            }
        }

        first_error
    }

    /// Runs all closers concurrently.
    async fn run_closers(closers: Vec<Closer>) {
        let mut closer_set = JoinSet::new();

        for closer in closers {
            closer_set.spawn(async move { closer().await });
        }

        while let Some(result) = closer_set.join_next().await {
            match result {
                Ok(Ok(())) => {
                    tracing::debug!("Closer completed successfully");
                }
                Ok(Err(err)) => {
                    tracing::error!("Closer error: {:#}", err);
                }
                Err(err) => {
                    tracing::error!("Closer panicked: {}", err);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_runner_stops_on_cancellation_and_runs_closers() {
        // Arrange
        let closer_called = Arc::new(AtomicBool::new(false));
        let closer_flag = closer_called.clone();
        let token = CancellationToken::new();
        let cancel = token.clone();

        let runner = Runner::new()
            .with_named_process("waiter", |ctx| async move {
                ctx.cancelled().await;
                Ok(())
            })
            .with_closer(move || async move {
                closer_flag.store(true, Ordering::SeqCst);
                Ok(())
            })
            .with_cancellation_token(token)
            .with_closer_timeout(Duration::from_secs(5));

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            cancel.cancel();
        });

        // Act
        let result = runner.run().await;

        // Assert
        assert!(result.is_ok());
        assert!(closer_called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_runner_returns_first_error_and_cancels_others() {
        let runner = Runner::new()
            .with_named_process("failing", |_ctx| async move {
                Err(anyhow::anyhow!("connection lost"))
            })
            .with_named_process("waiter", |ctx| async move {
                ctx.cancelled().await;
                Ok(())
            });

        let result = runner.run().await;

        let err = result.unwrap_err();
        assert!(format!("{:#}", err).contains("connection lost"));
        assert!(format!("{:#}", err).contains("failing"));
    }

    #[tokio::test]
    async fn test_runner_completes_when_all_processes_finish() {
        let result = Runner::new()
            .with_app_process(|_ctx| async move { Ok(()) })
            .with_app_process(|_ctx| async move { Ok(()) })
            .run()
            .await;

        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_closer_execution() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        let runner = Runner::new().with_closer(move || async move {
            flag.store(true, Ordering::SeqCst);
            Ok(())
        });

        Runner::run_closers(runner.closers).await;
        assert!(called.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_failing_closer_does_not_stop_others() {
        let called = Arc::new(AtomicBool::new(false));
        let flag = called.clone();

        let runner = Runner::new()
            .with_closer(|| async move { Err(anyhow::anyhow!("flush failed")) })
            .with_closer(move || async move {
                flag.store(true, Ordering::SeqCst);
                Ok(())
            });

        Runner::run_closers(runner.closers).await;
        assert!(called.load(Ordering::SeqCst));
    }
}
