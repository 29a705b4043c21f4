//! TCP Server
//!
//! Accepts connections and runs each on its own thread.

use std::collections::HashMap;
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::Mutex;

use super::connection::Connection;
use crate::config::Config;
use crate::error::Result;
use crate::protocol::{write_response, Response};
use crate::sync::ShutdownSignal;
use crate::tablet::TabletServer;
use crate::TabletError;

/// Accept loop poll interval while idle
const ACCEPT_POLL: Duration = Duration::from_millis(20);

struct Worker {
    stream: TcpStream,
    handle: JoinHandle<()>,
}

/// TCP server for a tablet server
pub struct Server {
    config: Config,
    tablets: Arc<TabletServer>,
    listener: TcpListener,
    local_addr: SocketAddr,
    shutdown: ShutdownSignal,
    workers: Mutex<HashMap<u64, Worker>>,
    next_conn_id: AtomicU64,
}

impl Server {
    /// Bind the listen address from `config`
    pub fn bind(config: Config, tablets: Arc<TabletServer>) -> Result<Self> {
        let listener = TcpListener::bind(&config.listen_addr)?;
        listener.set_nonblocking(true)?;
        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "listening");

        Ok(Self {
            config,
            tablets,
            listener,
            local_addr,
            shutdown: ShutdownSignal::new(),
            workers: Mutex::new(HashMap::new()),
            next_conn_id: AtomicU64::new(1),
        })
    }

    /// The bound address (useful when binding port 0)
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn active_connections(&self) -> usize {
        self.workers.lock().values().filter(|w| !w.handle.is_finished()).count()
    }

    /// Accept connections until `shutdown` is called (blocking)
    pub fn run(&self) -> Result<()> {
        while !self.shutdown.is_shutdown() {
            match self.listener.accept() {
                Ok((stream, peer)) => {
                    self.reap_finished();
                    if let Err(e) = self.spawn_connection(stream, peer) {
                        tracing::warn!(peer = %peer, error = %e, "failed to start connection");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    self.shutdown.wait_timeout(ACCEPT_POLL);
                }
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    tracing::error!(error = %e, "accept failed");
                    return Err(e.into());
                }
            }
        }
        self.close_all();
        tracing::info!("server stopped");
        Ok(())
    }

    /// Signal the accept loop to stop and disconnect every client
    pub fn shutdown(&self) {
        self.shutdown.shutdown();
        self.close_all();
    }

    fn spawn_connection(&self, stream: TcpStream, peer: SocketAddr) -> Result<()> {
        stream.set_nonblocking(false)?;

        if self.active_connections() >= self.config.max_connections {
            tracing::warn!(peer = %peer, max = self.config.max_connections, "connection limit reached");
            let mut stream = stream;
            let err = TabletError::Network("too many connections".to_string());
            let _ = write_response(&mut stream, &Response::error(&err));
            return Ok(());
        }

        let mut conn = Connection::new(stream.try_clone()?, Arc::clone(&self.tablets), self.shutdown.clone())?;
        conn.set_timeouts(self.config.read_timeout_ms, self.config.write_timeout_ms)?;

        let id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let handle = thread::Builder::new()
            .name(format!("conn-{}", id))
            .spawn(move || {
                if let Err(e) = conn.handle() {
                    tracing::debug!(peer = %conn.peer_addr(), error = %e, "connection closed with error");
                }
            })?;
        self.workers.lock().insert(id, Worker { stream, handle });
        Ok(())
    }

    fn reap_finished(&self) {
        let mut workers = self.workers.lock();
        let done: Vec<u64> = workers
            .iter()
            .filter(|(_, w)| w.handle.is_finished())
            .map(|(id, _)| *id)
            .collect();
        for id in done {
            if let Some(worker) = workers.remove(&id) {
                let _ = worker.handle.join();
            }
        }
    }

    fn close_all(&self) {
        let workers: Vec<Worker> = self.workers.lock().drain().map(|(_, w)| w).collect();
        for worker in workers {
            // Unblocks the reader with EOF
            let _ = worker.stream.shutdown(Shutdown::Both);
            if worker.handle.join().is_err() {
                tracing::error!("connection thread panicked");
            }
        }
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.shutdown();
    }
}
