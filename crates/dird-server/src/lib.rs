//! dird-server: The directord server coordinator
//!
//! One process: a transport driver accepting client connections, a heartbeat
//! tracker feeding the worker registry, a dispatcher with one FIFO lane per
//! identity, a return manager folding client results into the job board, a
//! transfer responder serving file chunks, and a UNIX-socket control RPC for
//! the user CLI. Every long-running role is a task on a typed queue,
//! cancelled through one token.

pub mod analyze;
pub mod board;
pub mod control;
pub mod dispatch;
pub mod heartbeat;
pub mod registry;
pub mod returns;
pub mod server;
pub mod transfer;

pub use board::JobBoard;
pub use registry::WorkerRegistry;
pub use server::Server;
