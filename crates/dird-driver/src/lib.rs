//! dird-driver: Transport drivers for directord
//!
//! A driver is a symmetric, connection-like channel between the server
//! process and each identified client. The coordinator and the worker only
//! depend on the contract in this crate; the reference implementation is a
//! framed TCP transport. Drivers may present a session-oriented or a
//! datagram model; the only ordering promise is per `(identity, channel)`.

pub mod backoff;
pub mod contract;
pub mod error;
pub mod tcp;

pub use backoff::{ExponentialBackoff, RetryPolicy};
pub use contract::{ClientDriver, Delivery, ServerDriver};
pub use error::DriverError;
pub use tcp::{TcpClientDriver, TcpServerDriver};
