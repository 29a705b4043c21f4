//! Connection Handler
//!
//! Handles individual client connections.

use std::io::{BufReader, BufWriter};
use std::net::TcpStream;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Result, WireError};
use crate::protocol::{read_command, write_response, Command, Response};
use crate::schema::Schema;
use crate::sync::ShutdownSignal;
use crate::tablet::TabletServer;
use crate::TabletError;

/// Handles a single client connection
pub struct Connection {
    /// TCP stream reader (buffered for efficiency)
    reader: BufReader<TcpStream>,

    /// TCP stream writer (buffered for efficiency)
    writer: BufWriter<TcpStream>,

    server: Arc<TabletServer>,

    shutdown: ShutdownSignal,

    /// Peer address for logging
    peer_addr: String,
}

impl Connection {
    /// Create a new connection handler
    ///
    /// Sets up buffered I/O and configures timeouts
    pub fn new(stream: TcpStream, server: Arc<TabletServer>, shutdown: ShutdownSignal) -> Result<Self> {
        let peer_addr = stream
            .peer_addr()
            .map(|a| a.to_string())
            .unwrap_or_else(|_| "unknown".to_string());

        // Disable Nagle's algorithm for low latency
        stream.set_nodelay(true)?;

        let read_stream = stream.try_clone()?;
        let write_stream = stream;

        Ok(Self {
            reader: BufReader::new(read_stream),
            writer: BufWriter::new(write_stream),
            server,
            shutdown,
            peer_addr,
        })
    }

    /// Configure connection timeouts
    pub fn set_timeouts(&mut self, read_ms: u64, write_ms: u64) -> Result<()> {
        if read_ms > 0 {
            self.reader
                .get_ref()
                .set_read_timeout(Some(Duration::from_millis(read_ms)))?;
        }
        if write_ms > 0 {
            self.writer
                .get_ref()
                .set_write_timeout(Some(Duration::from_millis(write_ms)))?;
        }
        Ok(())
    }

    /// Handle the connection (blocking until closed)
    ///
    /// Reads commands in a loop and sends responses.
    /// Returns when the client disconnects, the server shuts down, or an
    /// error occurs.
    pub fn handle(&mut self) -> Result<()> {
        tracing::debug!(peer = %self.peer_addr, "connection established");

        while !self.shutdown.is_shutdown() {
            let command = match read_command(&mut self.reader) {
                Ok(cmd) => cmd,
                Err(TabletError::Io(ref e)) if is_disconnect(e.kind()) => {
                    tracing::debug!(peer = %self.peer_addr, kind = ?e.kind(), "client disconnected");
                    return Ok(());
                }
                Err(TabletError::Io(ref e))
                    if matches!(e.kind(), std::io::ErrorKind::WouldBlock | std::io::ErrorKind::TimedOut) =>
                {
                    tracing::debug!(peer = %self.peer_addr, "read timeout");
                    return Ok(());
                }
                Err(e) => {
                    tracing::warn!(peer = %self.peer_addr, error = %e, "error reading command");
                    let _ = self.send_response(Response::error(&e));
                    return Err(e);
                }
            };

            tracing::trace!(peer = %self.peer_addr, command = ?command.command_type(), "received command");

            let response = self.execute_command(command);

            if let Err(e) = self.send_response(response) {
                if let TabletError::Io(ref io_err) = e {
                    if is_disconnect(io_err.kind()) {
                        tracing::debug!(peer = %self.peer_addr, error = %e, "client left before response");
                        return Ok(());
                    }
                }
                tracing::warn!(peer = %self.peer_addr, error = %e, "error writing response");
                return Err(e);
            }
        }
        Ok(())
    }

    /// Execute a command and return a response
    fn execute_command(&self, command: Command) -> Response {
        let result = match command {
            Command::CreateTable { name, schema } => self
                .server
                .create_table(&name, schema)
                .map(|s| Response::Schema(Schema::clone(&s))),
            Command::OpenTable { name } => self
                .server
                .open_table(&name)
                .map(|s| Response::Schema(Schema::clone(&s))),
            Command::Write { table, ops } => self.server.write(&table, &ops).map(|outcome| {
                Response::Written {
                    applied: outcome.applied as u32,
                    row_errors: outcome
                        .row_errors
                        .iter()
                        .map(|(idx, e)| (*idx as u32, WireError::from(e)))
                        .collect(),
                }
            }),
            Command::ScanOpen { table, batch_rows } => self
                .server
                .scan_open(&table, batch_rows.map(|n| n as usize))
                .map(Response::Scan),
            Command::ScanNext {
                scanner_id,
                batch_rows,
            } => self
                .server
                .scan_next(scanner_id, batch_rows.map(|n| n as usize))
                .map(Response::Scan),
            Command::ScanClose { scanner_id } => Ok(Response::Closed(self.server.scan_close(scanner_id))),
            Command::Ping => self.server.ping().map(|_| Response::Pong),
        };
        result.unwrap_or_else(|e| Response::error(&e))
    }

    /// Send a response to the client
    fn send_response(&mut self, response: Response) -> Result<()> {
        write_response(&mut self.writer, &response)
    }

    /// Get the peer address string
    pub fn peer_addr(&self) -> &str {
        &self.peer_addr
    }
}

fn is_disconnect(kind: std::io::ErrorKind) -> bool {
    matches!(
        kind,
        std::io::ErrorKind::UnexpectedEof
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::NotConnected
    )
}
