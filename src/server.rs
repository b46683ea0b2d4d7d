//! Server composition and lifecycle.
//!
//! # Responsibilities
//! - Bind the physical listener(s) and build the virtual listeners
//! - Run the RPC and HTTP front ends concurrently over one queue engine
//! - Propagate the first front-end failure and stop the sibling within a
//!   bounded grace period, so a dead front end never leaves an orphaned
//!   listener behind

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinError;

use crate::config::ListenerConfig;
use crate::error::ServeError;
use crate::net::{load_acceptor, mux, VirtualListener};
use crate::queue::Queue;
use crate::{hooks, rpc};

/// How long a healthy front end gets to wind down after its sibling dies.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Level-triggered shutdown coordinator shared by all long-running tasks.
/// A subscriber that starts waiting after the trigger still observes it.
#[derive(Clone)]
pub struct Shutdown {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl Shutdown {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }

    /// An owned future resolving once shutdown has been triggered.
    pub fn wait(&self) -> impl std::future::Future<Output = ()> + Send + 'static {
        let mut rx = self.rx.clone();
        async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        }
    }
}

impl Default for Shutdown {
    fn default() -> Self {
        Self::new()
    }
}

/// The composed service: both front ends wired onto one queue engine.
pub struct Server {
    rpc: VirtualListener,
    http: VirtualListener,
    queue: Arc<Queue>,
    http_addr: SocketAddr,
    rpc_addr: SocketAddr,
}

impl Server {
    /// Bind according to the listener configuration: one multiplexed
    /// socket by default, or two standalone sockets when an RPC address
    /// is configured. TLS (when present) wraps every connection before
    /// any protocol bytes are inspected.
    pub async fn bind(config: &ListenerConfig, queue: Arc<Queue>) -> Result<Self, ServeError> {
        let tls = match &config.tls {
            Some(tls) => Some(load_acceptor(
                Path::new(&tls.cert_path),
                Path::new(&tls.key_path),
            )?),
            None => None,
        };

        let listener = bind(&config.bind_address).await?;
        let http_addr = local_addr(&listener, &config.bind_address)?;

        let (rpc, http, rpc_addr) = match &config.rpc_address {
            None => {
                let (rpc, http) = mux::split(listener, tls);
                (rpc, http, http_addr)
            }
            Some(rpc_address) => {
                let rpc_listener = bind(rpc_address).await?;
                let rpc_addr = local_addr(&rpc_listener, rpc_address)?;
                let rpc = mux::passthrough(rpc_listener, tls.clone());
                let http = mux::passthrough(listener, tls);
                (rpc, http, rpc_addr)
            }
        };

        Ok(Self {
            rpc,
            http,
            queue,
            http_addr,
            rpc_addr,
        })
    }

    /// Address serving HTTP (and RPC too, when multiplexed).
    pub fn http_addr(&self) -> SocketAddr {
        self.http_addr
    }

    pub fn rpc_addr(&self) -> SocketAddr {
        self.rpc_addr
    }

    /// Run both front ends until one fails or `shutdown` triggers.
    /// Returns the first failure after stopping the sibling.
    pub async fn run(self, shutdown: Shutdown) -> Result<(), ServeError> {
        tracing::info!(
            http_addr = %self.http_addr,
            rpc_addr = %self.rpc_addr,
            "server starting"
        );

        let mut http_task = tokio::spawn(hooks::serve(
            self.http,
            self.queue.clone(),
            shutdown.clone(),
        ));
        let mut rpc_task = tokio::spawn(rpc::serve(self.rpc, self.queue, shutdown.clone()));

        let (first, mut sibling) = tokio::select! {
            finished = &mut http_task => (flatten(finished, "http"), rpc_task),
            finished = &mut rpc_task => (flatten(finished, "rpc"), http_task),
        };

        shutdown.trigger();
        if tokio::time::timeout(SHUTDOWN_GRACE, &mut sibling).await.is_err() {
            tracing::warn!("sibling front end did not stop in time, aborting");
            sibling.abort();
        }

        tracing::info!("server stopped");
        first
    }
}

async fn bind(addr: &str) -> Result<TcpListener, ServeError> {
    TcpListener::bind(addr).await.map_err(|source| ServeError::Bind {
        addr: addr.to_string(),
        source,
    })
}

fn local_addr(listener: &TcpListener, addr: &str) -> Result<SocketAddr, ServeError> {
    listener.local_addr().map_err(|source| ServeError::Bind {
        addr: addr.to_string(),
        source,
    })
}

fn flatten(
    finished: Result<Result<(), ServeError>, JoinError>,
    side: &str,
) -> Result<(), ServeError> {
    match finished {
        Ok(outcome) => outcome,
        Err(join) => Err(ServeError::Task(format!("{side} front end: {join}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ListenerConfig;
    use crate::store::MemoryStore;

    fn test_queue() -> Arc<Queue> {
        Arc::new(Queue::new("test", Arc::new(MemoryStore::new())).unwrap())
    }

    fn loopback_config() -> ListenerConfig {
        ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            rpc_address: None,
            tls: None,
        }
    }

    #[tokio::test]
    async fn triggered_shutdown_stops_both_front_ends_cleanly() {
        let server = Server::bind(&loopback_config(), test_queue()).await.unwrap();
        let shutdown = Shutdown::new();
        let trigger = shutdown.clone();
        let running = tokio::spawn(server.run(shutdown));

        trigger.trigger();
        let outcome = tokio::time::timeout(Duration::from_secs(5), running)
            .await
            .expect("run did not stop after shutdown")
            .unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn dead_front_end_takes_down_the_sibling() {
        let config = loopback_config();
        let listener = TcpListener::bind(&config.bind_address).await.unwrap();
        let http_addr = listener.local_addr().unwrap();
        let server = Server {
            rpc: mux::closed_for_tests(),
            http: mux::passthrough(listener, None),
            queue: test_queue(),
            http_addr,
            rpc_addr: http_addr,
        };

        let outcome = tokio::time::timeout(Duration::from_secs(10), server.run(Shutdown::new()))
            .await
            .expect("composition kept running after a front end died");
        assert!(matches!(outcome, Err(ServeError::ListenerClosed)));
    }

    #[tokio::test]
    async fn standalone_mode_binds_two_addresses() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            rpc_address: Some("127.0.0.1:0".into()),
            tls: None,
        };
        let server = Server::bind(&config, test_queue()).await.unwrap();
        assert_ne!(server.http_addr().port(), server.rpc_addr().port());
    }

    #[tokio::test]
    async fn shutdown_wait_observes_earlier_trigger() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        tokio::time::timeout(Duration::from_secs(1), shutdown.wait())
            .await
            .expect("wait missed a trigger that happened first");
    }
}
