//! dird-cli: The directord user CLI
//!
//! Compiles orchestrations and one-shot execs into job submissions, talks
//! to the server over its UNIX control socket, and renders node, job, and
//! profiling reports.

pub mod control;
pub mod output;
