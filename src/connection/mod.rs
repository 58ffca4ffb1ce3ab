//! Connection Management
//!
//! Each accepted TCP connection is serviced by one async task that owns
//! the connection's read/write buffers, its RESP parser, and its session
//! state (selected database, subscription lists, push channel). Tasks
//! across connections run concurrently; pipelined commands within one
//! connection run in order.

pub mod handler;

pub use handler::{handle_connection, ConnectionError, ConnectionHandler};
