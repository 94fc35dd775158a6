//! dird-client: The directord client worker
//!
//! Connects out to the server, emits heartbeats, ingests jobs into a FIFO,
//! executes components (serially by default, on a bounded pool for
//! non-blocking components), and returns results over the return channel.

pub mod client;
pub mod heartbeat;
pub mod transfer;
pub mod worker;

pub use client::Client;
