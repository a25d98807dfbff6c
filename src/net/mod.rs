//! Network layer subsystem.
//!
//! # Data Flow
//! ```text
//! Incoming TCP connection
//!     → listener.rs (accept loop)
//!     → connection.rs (ID, lifecycle tracking)
//!     → adapter.rs (socket read half drained into a bounded pipe)
//!     → Hand off to HTTP layer (parsers read from the pipe)
//! ```
//!
//! # Design Decisions
//! - One task per connection, one pump task per readable socket
//! - Each connection tracked for graceful shutdown
//! - Parsers never touch sockets directly; they read pipes

pub mod adapter;
pub mod connection;
pub mod listener;
