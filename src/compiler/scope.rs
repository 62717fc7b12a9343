//! Per-function compile state: locals, upvalues and block depth.

use super::lexer::Token;
use crate::vm::{Chunk, GcRef, UpvalueCapture};

/// Locals and upvalues are addressed by a 1-byte operand.
pub const MAX_LOCALS: usize = u8::MAX as usize + 1;
pub const MAX_UPVALUES: usize = u8::MAX as usize + 1;

#[derive(Debug, Clone)]
pub struct Local<'a> {
    pub name: Token<'a>,
    /// `None` while the initializer is being compiled.
    pub depth: Option<usize>,
    pub is_captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

/// A function being compiled.
pub struct FunctionScope<'a> {
    pub kind: FunctionKind,
    pub name: Option<GcRef>,
    pub arity: usize,
    pub chunk: Chunk,
    pub locals: Vec<Local<'a>>,
    pub upvalues: Vec<UpvalueCapture>,
    pub scope_depth: usize,
}

impl<'a> FunctionScope<'a> {
    pub fn new(kind: FunctionKind, name: Option<GcRef>) -> Self {
        // Slot 0 holds the callee, or the receiver in methods.
        let slot_zero = match kind {
            FunctionKind::Method | FunctionKind::Initializer => "this",
            FunctionKind::Script | FunctionKind::Function => "",
        };
        Self {
            kind,
            name,
            arity: 0,
            chunk: Chunk::new(),
            locals: vec![Local {
                name: Token::synthetic(slot_zero),
                depth: Some(0),
                is_captured: false,
            }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }

    /// Find a local by name, innermost first.
    ///
    /// Returns the slot and whether the local has finished initializing.
    pub fn resolve_local(&self, name: &str) -> Option<(u8, bool)> {
        self.locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name.lexeme == name)
            .map(|(slot, local)| (slot as u8, local.depth.is_some()))
    }

    /// Add an upvalue capture, reusing an identical one.
    pub fn add_upvalue(&mut self, capture: UpvalueCapture) -> Result<u8, &'static str> {
        if let Some(existing) = self.upvalues.iter().position(|u| *u == capture) {
            return Ok(existing as u8);
        }
        if self.upvalues.len() == MAX_UPVALUES {
            return Err("Too many closure variables in function.");
        }
        self.upvalues.push(capture);
        Ok((self.upvalues.len() - 1) as u8)
    }
}

/// Resolve `name` as an upvalue of the innermost scope in `scopes`.
///
/// Walks outward through the enclosing functions, marking the captured local
/// and threading an upvalue through every function in between.
pub fn resolve_upvalue(
    scopes: &mut [FunctionScope<'_>],
    name: &str,
) -> Result<Option<u8>, &'static str> {
    let Some((current, enclosing)) = scopes.split_last_mut() else {
        return Ok(None);
    };
    let Some(parent) = enclosing.last_mut() else {
        return Ok(None);
    };

    if let Some((slot, _)) = parent.resolve_local(name) {
        parent.locals[slot as usize].is_captured = true;
        let index = current.add_upvalue(UpvalueCapture {
            is_local: true,
            index: slot,
        })?;
        return Ok(Some(index));
    }

    match resolve_upvalue(enclosing, name)? {
        Some(index) => {
            let index = current.add_upvalue(UpvalueCapture {
                is_local: false,
                index,
            })?;
            Ok(Some(index))
        }
        None => Ok(None),
    }
}

/// A class body being compiled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClassScope {
    pub has_superclass: bool,
}
