//! dird-components: Components and the orchestration compiler
//!
//! A component is a named unit of work invoked by jobs: it declares its
//! argument surface for DSL binding, normalizes submissions on the server
//! side, and executes on the client side. This crate carries the component
//! ABI, the built-in verb set, the shell-like tokenizer and argument binder
//! used by the DSL, the `{{ var }}` blueprint renderer, and the compiler
//! that turns orchestration YAML into a stream of typed jobs.

pub mod abi;
pub mod argspec;
pub mod blueprint;
pub mod builtin;
pub mod compiler;
pub mod error;
pub mod proc;
pub mod registry;
pub mod tokenizer;

pub use abi::{Component, TaskContext, TaskOutcome, Transfer};
pub use argspec::{ArgSpec, BoundArgs};
pub use compiler::{
    compile_exec, compile_orchestrations, parse_orchestrations, CompileOptions, Orchestration,
};
pub use error::ComponentError;
pub use registry::Registry;
