//! Single-instance enforcement through a local HTTP endpoint.
//!
//! The running instance answers `GET /` on the guard address with its
//! process id. A second instance that fails to bind asks that address who
//! owns it and refuses to start.

use crate::error::GuardError;
use axum::{Router, routing::get};
use std::{net::SocketAddr, time::Duration};
use tokio::{net::TcpListener, task::JoinHandle};
use tracing::{debug, error, info};

const QUERY_TIMEOUT: Duration = Duration::from_secs(2);

/// Holds the guard listener; dropping it releases the address.
pub struct InstanceGuard {
    addr: SocketAddr,
    server: JoinHandle<()>,
}

impl InstanceGuard {
    pub async fn acquire(addr: SocketAddr) -> Result<Self, GuardError> {
        let listener = match TcpListener::bind(addr).await {
            Ok(listener) => listener,
            Err(bind_err) => {
                debug!(%addr, error = %bind_err, "Guard address taken, asking owner");
                return match query_pid(addr).await {
                    Ok(pid) => Err(GuardError::AlreadyRunning { addr, pid }),
                    Err(reason) => Err(GuardError::Unreachable { addr, reason }),
                };
            }
        };

        let addr = listener.local_addr().unwrap_or(addr);
        let server = tokio::spawn(serve(listener));
        info!(%addr, pid = std::process::id(), "Instance guard acquired");
        Ok(Self { addr, server })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

impl Drop for InstanceGuard {
    fn drop(&mut self) {
        self.server.abort();
    }
}

/// Serves the pid until aborted. Accept errors are retried by axum after a
/// short pause.
async fn serve(listener: TcpListener) {
    let pid = std::process::id();
    let app = Router::new().route("/", get(move || async move { pid.to_string() }));
    if let Err(e) = axum::serve(listener, app).await {
        error!(error = %e, "Instance guard endpoint stopped");
    }
}

/// Asks whoever listens on `addr` for its process id.
pub async fn query_pid(addr: SocketAddr) -> Result<u32, String> {
    let client = reqwest::Client::builder()
        .timeout(QUERY_TIMEOUT)
        .no_proxy()
        .build()
        .map_err(|e| e.to_string())?;

    let body = client
        .get(format!("http://{addr}/"))
        .send()
        .await
        .and_then(|response| response.error_for_status())
        .map_err(|e| e.to_string())?
        .text()
        .await
        .map_err(|e| e.to_string())?;

    let body = body.trim();
    body.parse()
        .map_err(|_| format!("unexpected response `{body}`"))
}
