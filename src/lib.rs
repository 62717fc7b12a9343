//! Loxide - a bytecode compiler and virtual machine for Lox
//!
//! This library provides the single-pass compiler, the stack VM and its
//! garbage-collected heap.

pub mod compiler;
pub mod config;
pub mod error;
pub mod vm;

// Re-export commonly used types
pub use config::RuntimeConfig;
pub use error::{CompileError, InterpretError, InterpretResult, RuntimeError};
pub use vm::{Chunk, VM, Value};
