use std::{
    fmt,
    sync::{Arc, OnceLock},
};
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    Interrupt,
    Terminate,
}

impl fmt::Display for ShutdownSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownSignal::Interrupt => f.write_str("SIGINT"),
            ShutdownSignal::Terminate => f.write_str("SIGTERM"),
        }
    }
}

/// Turns the first SIGINT or SIGTERM into a cancelled token.
///
/// Running extraction jobs are left alone; the orchestrator checks the token
/// between sources and between cycles.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    cancel: CancellationToken,
    signal: Arc<OnceLock<ShutdownSignal>>,
}

impl ShutdownCoordinator {
    pub fn new(cancel: CancellationToken) -> Self {
        Self {
            cancel,
            signal: Arc::new(OnceLock::new()),
        }
    }

    pub fn register_handlers(&self) {
        let coordinator = self.clone();
        tokio::spawn(async move {
            let received = wait_for_signal().await;
            coordinator.request(received);
        });
    }

    /// Records the signal (first one wins) and cancels the token.
    pub fn request(&self, received: ShutdownSignal) {
        if self.signal.set(received).is_ok() {
            info!(signal = %received, "Shutdown requested, finishing in-flight jobs");
        }
        self.cancel.cancel();
    }

    pub fn requested(&self) -> Option<ShutdownSignal> {
        self.signal.get().copied()
    }

    pub fn is_shutdown_requested(&self) -> bool {
        self.requested().is_some()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

async fn wait_for_signal() -> ShutdownSignal {
    let interrupt = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install SIGINT handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = interrupt => ShutdownSignal::Interrupt,
        _ = terminate => ShutdownSignal::Terminate,
    }
}

/// Process exit codes of `leftshove`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    Success = 0,
    GeneralError = 1,
    StateStoreUnavailable = 2,
    AlreadyRunning = 3,
    Config = 4,
    /// 128 + SIGINT.
    ShutdownRequested = 130,
}

impl ExitCode {
    pub fn as_i32(self) -> i32 {
        self as i32
    }
}
