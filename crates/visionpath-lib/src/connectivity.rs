//! Connectivity monitor — polls a reachability probe on a fixed interval.
//!
//! The probe is synchronous (platform reachability APIs are), so each poll
//! runs on the blocking pool. A failed or panicking probe counts as offline;
//! the next poll corrects transient errors.

use std::net::{TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, info};

/// Synchronous reachability check.
pub trait Reachability: Send + Sync + 'static {
    fn check(&self) -> std::io::Result<bool>;
}

/// Reachable if a TCP connection to `addr` opens within `timeout`.
pub struct TcpProbe {
    addr: String,
    timeout: Duration,
}

impl TcpProbe {
    pub fn new(addr: impl Into<String>, timeout: Duration) -> Self {
        Self {
            addr: addr.into(),
            timeout,
        }
    }
}

impl Reachability for TcpProbe {
    fn check(&self) -> std::io::Result<bool> {
        for addr in self.addr.to_socket_addrs()? {
            if TcpStream::connect_timeout(&addr, self.timeout).is_ok() {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

pub struct ConnectivityMonitor {
    rx: watch::Receiver<bool>,
    task: JoinHandle<()>,
}

impl ConnectivityMonitor {
    /// Probe once, then keep polling every `interval` until dropped.
    pub async fn start(probe: Arc<dyn Reachability>, interval: Duration) -> Self {
        let initial = poll(&probe).await;
        info!("connectivity: initially {}", describe(initial));
        let (tx, rx) = watch::channel(initial);

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let online = poll(&probe).await;
                tx.send_if_modified(|current| {
                    if *current == online {
                        return false;
                    }
                    info!("connectivity: now {}", describe(online));
                    *current = online;
                    true
                });
                if tx.is_closed() {
                    debug!("connectivity: no subscribers left, stopping");
                    break;
                }
            }
        });

        Self { rx, task }
    }

    pub fn is_online(&self) -> bool {
        *self.rx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.rx.clone()
    }
}

impl Drop for ConnectivityMonitor {
    fn drop(&mut self) {
        self.task.abort();
    }
}

async fn poll(probe: &Arc<dyn Reachability>) -> bool {
    let probe = Arc::clone(probe);
    match tokio::task::spawn_blocking(move || probe.check()).await {
        Ok(Ok(online)) => online,
        Ok(Err(e)) => {
            debug!("connectivity: probe failed: {e}");
            false
        }
        Err(e) => {
            debug!("connectivity: probe task failed: {e}");
            false
        }
    }
}

fn describe(online: bool) -> &'static str {
    if online { "online" } else { "offline" }
}
