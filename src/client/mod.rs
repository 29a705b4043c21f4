//! Client Module
//!
//! The client library: connection bootstrap, table handles, write sessions
//! and scanners.
//!
//! ## Responsibilities
//! - Connect to a tablet server over TCP or in-process (`Transport`)
//! - Build the client once in the background (`AsyncClientInitializer`)
//! - Buffer and batch mutations with at most one outstanding flush
//!   (`WriteSession`)
//! - Fetch snapshot scans batch by batch (`Scanner`)
//!
//! ## Typical write loop
//!
//! ```text
//!   sync = Synchronizer::resolved()
//!   for each mutation:
//!       session.apply(m)
//!       every K applies:
//!           sync.wait()          previous flush done
//!           sync.reset()
//!           session.flush_async(sync.callback())
//!   sync.wait(); session.close()
//! ```

#[allow(clippy::module_inception)]
mod client;
mod initializer;
mod scanner;
mod session;
mod transport;

pub use client::{BuildClient, Client, ClientBuilder, Table};
pub use initializer::AsyncClientInitializer;
pub use scanner::Scanner;
pub use session::{FlushMode, RowError, SessionStats, WriteSession};
pub use transport::{LocalTransport, TcpTransport, Transport};
