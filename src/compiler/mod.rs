pub mod lexer;
mod parser;
pub mod rules;
mod scope;

pub use lexer::{Lexer, Token, TokenKind};
pub use parser::Parser;

use crate::config::RuntimeConfig;
use crate::error::CompileError;
use crate::vm::{GcRef, Heap};

/// Compile a program into its top-level script function.
///
/// Collections triggered while compiling keep `host_roots` alive. The
/// returned function is not rooted; the caller must root it before its
/// next allocation.
pub fn compile(
    source: &str,
    heap: &mut Heap,
    host_roots: &[GcRef],
    config: &RuntimeConfig,
) -> Result<GcRef, CompileError> {
    Parser::new(source, heap, host_roots, config).compile_script()
}

/// Compile a single expression into a script function returning its value.
pub fn compile_expression(
    source: &str,
    heap: &mut Heap,
    host_roots: &[GcRef],
    config: &RuntimeConfig,
) -> Result<GcRef, CompileError> {
    Parser::new(source, heap, host_roots, config).compile_expression()
}
