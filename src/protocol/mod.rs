//! Protocol Module
//!
//! Defines the wire protocol between clients and a tablet server.
//!
//! ## Frame Format
//!
//! ### Request
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │ Cmd (1)  │ Len (4)  │     Payload (bincode)       │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Commands
//! - 0x01: CREATE_TABLE - name, schema
//! - 0x02: OPEN_TABLE   - name
//! - 0x03: WRITE        - table, row operations
//! - 0x04: SCAN_OPEN    - table, batch size
//! - 0x05: SCAN_NEXT    - scanner id, batch size
//! - 0x06: SCAN_CLOSE   - scanner id
//! - 0x07: PING         - empty
//!
//! ### Response
//! ```text
//! ┌──────────┬──────────┬─────────────────────────────┐
//! │Status(1) │ Len (4)  │     Payload (bincode)       │
//! └──────────┴──────────┴─────────────────────────────┘
//! ```
//!
//! ### Status Codes
//! - 0x00: OK
//! - 0x01: ERROR (payload carries a `WireError`)

mod codec;
mod command;
mod response;

pub use codec::{
    decode_command, decode_response, encode_command, encode_response, read_command,
    read_response, write_command, write_response, HEADER_SIZE, MAX_PAYLOAD_SIZE,
};
pub use command::{Command, CommandType};
pub use response::{Response, Status};
