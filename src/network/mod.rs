//! Network Module
//!
//! TCP server and client connection handling.
//!
//! ## Architecture
//! - Single acceptor thread (`Server::run`)
//! - One thread per connection, capped at `max_connections`
//! - Commands routed to the `TabletServer`
//! - Shutdown disconnects every client and joins its thread

mod connection;
mod server;

pub use connection::Connection;
pub use server::Server;
