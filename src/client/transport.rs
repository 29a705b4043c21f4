//! Request/response transports
//!
//! `LocalTransport` calls a `TabletServer` in the same process.
//! `TcpTransport` speaks the frame protocol to a `network::Server`.

use std::io::{BufReader, BufWriter};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::error::Result;
use crate::mutation::RowOperation;
use crate::protocol::{read_response, write_command, Command, Response};
use crate::schema::Schema;
use crate::tablet::{ScanBatch, TabletServer, WriteOutcome};
use crate::TabletError;

/// One request, one response
pub trait Transport: Send + Sync {
    fn create_table(&self, name: &str, schema: &Schema) -> Result<Schema>;

    fn open_table(&self, name: &str) -> Result<Schema>;

    /// Apply `ops` in order; per-row failures are in the outcome
    fn write(&self, table: &str, ops: Vec<RowOperation>) -> Result<WriteOutcome>;

    fn scan_open(&self, table: &str, batch_rows: Option<usize>) -> Result<ScanBatch>;

    fn scan_next(&self, scanner_id: u64, batch_rows: Option<usize>) -> Result<ScanBatch>;

    fn scan_close(&self, scanner_id: u64) -> Result<bool>;

    fn ping(&self) -> Result<()>;
}

// =============================================================================
// In-process
// =============================================================================

pub struct LocalTransport {
    server: Arc<TabletServer>,
}

impl LocalTransport {
    pub fn new(server: Arc<TabletServer>) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Arc<TabletServer> {
        &self.server
    }
}

impl Transport for LocalTransport {
    fn create_table(&self, name: &str, schema: &Schema) -> Result<Schema> {
        self.server.create_table(name, schema.clone()).map(|s| Schema::clone(&s))
    }

    fn open_table(&self, name: &str) -> Result<Schema> {
        self.server.open_table(name).map(|s| Schema::clone(&s))
    }

    fn write(&self, table: &str, ops: Vec<RowOperation>) -> Result<WriteOutcome> {
        self.server.write(table, &ops)
    }

    fn scan_open(&self, table: &str, batch_rows: Option<usize>) -> Result<ScanBatch> {
        self.server.scan_open(table, batch_rows)
    }

    fn scan_next(&self, scanner_id: u64, batch_rows: Option<usize>) -> Result<ScanBatch> {
        self.server.scan_next(scanner_id, batch_rows)
    }

    fn scan_close(&self, scanner_id: u64) -> Result<bool> {
        Ok(self.server.scan_close(scanner_id))
    }

    fn ping(&self) -> Result<()> {
        self.server.ping()
    }
}

// =============================================================================
// TCP
// =============================================================================

type Stream = (BufReader<TcpStream>, BufWriter<TcpStream>);

pub struct TcpTransport {
    addr: SocketAddr,
    timeout: Duration,
    /// Dropped after an I/O error and re-established on the next request
    stream: Mutex<Option<Stream>>,
}

impl TcpTransport {
    /// Connect to `addr`, failing after `timeout`
    pub fn connect(addr: &str, timeout: Duration) -> Result<Self> {
        let addr = addr
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| TabletError::Network(format!("no address for '{}'", addr)))?;
        let transport = Self {
            addr,
            timeout,
            stream: Mutex::new(None),
        };
        *transport.stream.lock() = Some(transport.open_stream()?);
        Ok(transport)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    fn open_stream(&self) -> Result<Stream> {
        let stream = if self.timeout.is_zero() {
            TcpStream::connect(self.addr)?
        } else {
            TcpStream::connect_timeout(&self.addr, self.timeout)?
        };
        stream.set_nodelay(true)?;
        if !self.timeout.is_zero() {
            stream.set_read_timeout(Some(self.timeout))?;
            stream.set_write_timeout(Some(self.timeout))?;
        }
        Ok((BufReader::new(stream.try_clone()?), BufWriter::new(stream)))
    }

    fn request(&self, command: &Command) -> Result<Response> {
        let mut guard = self.stream.lock();
        if guard.is_none() {
            *guard = Some(self.open_stream()?);
        }
        let exchanged = match guard.as_mut() {
            Some((reader, writer)) => {
                write_command(writer, command).and_then(|_| read_response(reader))
            }
            None => Err(TabletError::Network("not connected".to_string())),
        };
        match exchanged {
            Ok(Response::Error(e)) => Err(e.into()),
            Ok(response) => Ok(response),
            Err(e) => {
                *guard = None;
                Err(e)
            }
        }
    }
}

fn unexpected(response: Response) -> TabletError {
    TabletError::Protocol(format!("unexpected response: {:?}", response.status()))
}

impl Transport for TcpTransport {
    fn create_table(&self, name: &str, schema: &Schema) -> Result<Schema> {
        match self.request(&Command::CreateTable {
            name: name.to_string(),
            schema: schema.clone(),
        })? {
            Response::Schema(schema) => Ok(schema),
            other => Err(unexpected(other)),
        }
    }

    fn open_table(&self, name: &str) -> Result<Schema> {
        match self.request(&Command::OpenTable {
            name: name.to_string(),
        })? {
            Response::Schema(schema) => Ok(schema),
            other => Err(unexpected(other)),
        }
    }

    fn write(&self, table: &str, ops: Vec<RowOperation>) -> Result<WriteOutcome> {
        match self.request(&Command::Write {
            table: table.to_string(),
            ops,
        })? {
            Response::Written {
                applied,
                row_errors,
            } => Ok(WriteOutcome {
                applied: applied as usize,
                row_errors: row_errors
                    .into_iter()
                    .map(|(idx, e)| (idx as usize, TabletError::from(e)))
                    .collect(),
            }),
            other => Err(unexpected(other)),
        }
    }

    fn scan_open(&self, table: &str, batch_rows: Option<usize>) -> Result<ScanBatch> {
        match self.request(&Command::ScanOpen {
            table: table.to_string(),
            batch_rows: batch_rows.map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
        })? {
            Response::Scan(batch) => Ok(batch),
            other => Err(unexpected(other)),
        }
    }

    fn scan_next(&self, scanner_id: u64, batch_rows: Option<usize>) -> Result<ScanBatch> {
        match self.request(&Command::ScanNext {
            scanner_id,
            batch_rows: batch_rows.map(|n| u32::try_from(n).unwrap_or(u32::MAX)),
        })? {
            Response::Scan(batch) => Ok(batch),
            other => Err(unexpected(other)),
        }
    }

    fn scan_close(&self, scanner_id: u64) -> Result<bool> {
        match self.request(&Command::ScanClose { scanner_id })? {
            Response::Closed(found) => Ok(found),
            other => Err(unexpected(other)),
        }
    }

    fn ping(&self) -> Result<()> {
        match self.request(&Command::Ping)? {
            Response::Pong => Ok(()),
            other => Err(unexpected(other)),
        }
    }
}
