//! Client handle, builder and table handles

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::Result;
use crate::mutation::{Mutation, MutationKind};
use crate::schema::{PartialRow, Schema};
use crate::tablet::TabletServer;
use crate::util::backoff::BackoffPolicy;
use crate::TabletError;

use super::scanner::Scanner;
use super::session::WriteSession;
use super::transport::{LocalTransport, TcpTransport, Transport};

/// Anything that can construct a `Client`; the bootstrap retries `build`
pub trait BuildClient: Send + 'static {
    fn build(&self) -> Result<Client>;
}

impl<F> BuildClient for F
where
    F: Fn() -> Result<Client> + Send + 'static,
{
    fn build(&self) -> Result<Client> {
        self()
    }
}

/// Configures and connects a `Client`
#[derive(Clone)]
pub struct ClientBuilder {
    addrs: Vec<String>,
    local: Option<Arc<TabletServer>>,
    default_timeout_ms: u64,
    backoff: BackoffPolicy,
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self {
            addrs: Vec::new(),
            local: None,
            default_timeout_ms: 10_000,
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ClientBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a server endpoint (`host:port`); tried in order
    pub fn add_server_addr(mut self, addr: impl Into<String>) -> Self {
        self.addrs.push(addr.into());
        self
    }

    /// Talk to a server in this process instead of over TCP
    pub fn local_server(mut self, server: Arc<TabletServer>) -> Self {
        self.local = Some(server);
        self
    }

    /// Timeout for connecting and for each request (milliseconds)
    pub fn default_timeout_ms(mut self, ms: u64) -> Self {
        self.default_timeout_ms = ms;
        self
    }

    /// Retry policy used by `connect`
    pub fn backoff(mut self, policy: BackoffPolicy) -> Self {
        self.backoff = policy;
        self
    }

    pub fn backoff_policy(&self) -> BackoffPolicy {
        self.backoff
    }

    /// Connect once to the first reachable endpoint
    pub fn build_client(&self) -> Result<Client> {
        let timeout = Duration::from_millis(self.default_timeout_ms);
        if let Some(server) = &self.local {
            return Ok(Client::with_transport(Arc::new(LocalTransport::new(Arc::clone(server))), timeout));
        }
        if self.addrs.is_empty() {
            return Err(TabletError::Config("no server addresses configured".to_string()));
        }

        let mut last_err = None;
        for addr in &self.addrs {
            match TcpTransport::connect(addr, timeout).and_then(|t| t.ping().map(|_| t)) {
                Ok(transport) => {
                    debug!(addr = %addr, "connected");
                    return Ok(Client::with_transport(Arc::new(transport), timeout));
                }
                Err(e) => {
                    warn!(addr = %addr, error = %e, "connect failed");
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| TabletError::Network("no server reachable".to_string())))
    }

    /// Connect, retrying transient failures per the backoff policy
    pub fn connect(&self) -> Result<Client> {
        self.backoff.retry(None, |_| self.build_client())
    }
}

impl BuildClient for ClientBuilder {
    fn build(&self) -> Result<Client> {
        self.build_client()
    }
}

/// A connected client; cheap to clone
#[derive(Clone)]
pub struct Client {
    transport: Arc<dyn Transport>,
    default_timeout: Duration,
}

impl Client {
    pub fn with_transport(transport: Arc<dyn Transport>, default_timeout: Duration) -> Self {
        Self {
            transport,
            default_timeout,
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub fn ping(&self) -> Result<()> {
        self.transport.ping()
    }

    pub fn create_table(&self, name: &str, schema: Schema) -> Result<Table> {
        let schema = self.transport.create_table(name, &schema)?;
        Ok(Table::new(name, schema))
    }

    pub fn open_table(&self, name: &str) -> Result<Table> {
        let schema = self.transport.open_table(name)?;
        Ok(Table::new(name, schema))
    }

    pub fn new_session(&self) -> WriteSession {
        WriteSession::new(Arc::clone(&self.transport), self.default_timeout)
    }

    /// An unopened scanner over `table`
    pub fn new_scanner(&self, table: &Table) -> Scanner {
        Scanner::new(Arc::clone(&self.transport), table.clone())
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("default_timeout", &self.default_timeout)
            .finish()
    }
}

/// A table handle: name plus schema
#[derive(Debug, Clone)]
pub struct Table {
    name: String,
    schema: Arc<Schema>,
}

impl Table {
    pub fn new(name: impl Into<String>, schema: Schema) -> Self {
        Self {
            name: name.into(),
            schema: Arc::new(schema),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Arc<Schema> {
        &self.schema
    }

    pub fn new_insert(&self) -> Mutation {
        self.new_mutation(MutationKind::Insert)
    }

    pub fn new_update(&self) -> Mutation {
        self.new_mutation(MutationKind::Update)
    }

    pub fn new_delete(&self) -> Mutation {
        self.new_mutation(MutationKind::Delete)
    }

    fn new_mutation(&self, kind: MutationKind) -> Mutation {
        Mutation::new(kind, self.name.clone(), PartialRow::new(Arc::clone(&self.schema)))
    }
}
