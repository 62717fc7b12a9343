use std::collections::HashMap;
use std::io::{self, Write};
use std::rc::Rc;

use super::debug::{disassemble_function, disassemble_instruction};
use crate::compiler::{compile, compile_expression};
use crate::config::RuntimeConfig;
use crate::error::{CompileError, InterpretError, RuntimeError, TraceFrame};
use crate::vm::{
    BoundMethod, Chunk, Class, Closure, GcRef, GcStats, Heap, Instance, NATIVES, Native, NativeFn,
    Object, ObjectType, OpCode, Upvalue, Value,
};

/// A call frame for the VM.
#[derive(Debug)]
struct CallFrame {
    closure: GcRef,
    /// The closure's chunk, shared so instructions can be read without borrowing the heap
    chunk: Rc<Chunk>,
    /// Offset of the next byte to execute
    ip: usize,
    /// Stack index of slot 0 (the callee or receiver)
    slot_base: usize,
}

enum ControlFlow {
    Continue,
    /// The top-level script returned this value.
    Exit(Value),
}

/// The Lox virtual machine.
///
/// Globals and interned strings persist across calls to [`VM::interpret`],
/// which is what the REPL relies on.
pub struct VM {
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    globals: HashMap<GcRef, Value>,
    /// Upvalues still pointing into the stack
    open_upvalues: Vec<GcRef>,
    heap: Heap,
    /// The string "init", looked up on every class call
    init_string: GcRef,
    config: RuntimeConfig,
    /// Output stream for print statements
    output: Box<dyn Write>,
}

impl VM {
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> Self {
        Self::with_config_and_output(config, Box::new(io::stdout()))
    }

    /// Create a VM with a custom output stream.
    pub fn with_output(output: Box<dyn Write>) -> Self {
        Self::with_config_and_output(RuntimeConfig::default(), output)
    }

    pub fn with_config_and_output(config: RuntimeConfig, output: Box<dyn Write>) -> Self {
        let mut heap = Heap::with_config(&config);
        let init_string = heap.intern("init");
        let mut vm = Self {
            stack: Vec::with_capacity(config.stack_capacity().min(1024)),
            frames: Vec::with_capacity(config.max_frames),
            globals: HashMap::new(),
            open_upvalues: Vec::new(),
            heap,
            init_string,
            config,
            output,
        };
        for &(name, arity, function) in NATIVES {
            vm.define_native(name, arity, function);
        }
        vm
    }

    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.config
    }

    pub fn gc_stats(&self) -> GcStats {
        self.heap.stats()
    }

    /// Compile and run a program.
    pub fn interpret(&mut self, source: &str) -> Result<(), InterpretError> {
        let roots = self.roots();
        let function = compile(source, &mut self.heap, &roots, &self.config)?;
        self.execute(function)?;
        Ok(())
    }

    /// Compile and run a single expression, returning its value.
    ///
    /// An object result is only guaranteed to stay alive until the next call
    /// into the VM.
    pub fn evaluate(&mut self, source: &str) -> Result<Value, InterpretError> {
        let roots = self.roots();
        let function = compile_expression(source, &mut self.heap, &roots, &self.config)?;
        Ok(self.execute(function)?)
    }

    /// Compile a program and return the disassembly of every function in it.
    pub fn disassemble(&mut self, source: &str) -> Result<String, CompileError> {
        let roots = self.roots();
        let function = compile(source, &mut self.heap, &roots, &self.config)?;
        Ok(disassemble_function(&self.heap, function))
    }

    /// Render a value the way `print` shows it.
    pub fn format_value(&self, value: Value) -> String {
        self.heap.format_value(value)
    }

    fn execute(&mut self, function: GcRef) -> Result<Value, RuntimeError> {
        let slot = self.stack.len();
        self.stack.push(Value::Obj(function));
        let closure = self.alloc(Object::Closure(Closure {
            function,
            upvalues: Vec::new(),
        }));
        self.stack[slot] = Value::Obj(closure);
        if let Err(message) = self.call(closure, 0) {
            return Err(self.runtime_error(message));
        }

        let result = self.run();
        if let Err(e) = self.output.flush() {
            return Err(self.runtime_error(format!("failed to flush output: {}", e)));
        }
        result
    }

    fn run(&mut self) -> Result<Value, RuntimeError> {
        loop {
            if self.config.trace_execution {
                self.trace_instruction();
            }

            let byte = self.read_byte();
            let Ok(op) = OpCode::try_from(byte) else {
                return Err(self.runtime_error(format!("Unknown opcode {}.", byte)));
            };

            match self.execute_op(op) {
                Ok(ControlFlow::Continue) => {}
                Ok(ControlFlow::Exit(value)) => return Ok(value),
                Err(message) => return Err(self.runtime_error(message)),
            }
        }
    }

    fn execute_op(&mut self, op: OpCode) -> Result<ControlFlow, String> {
        match op {
            OpCode::Constant => {
                let value = self.read_constant();
                self.push(value)?;
            }
            OpCode::Nil => self.push(Value::Nil)?,
            OpCode::True => self.push(Value::Bool(true))?,
            OpCode::False => self.push(Value::Bool(false))?,
            OpCode::Pop => {
                self.pop()?;
            }
            OpCode::GetLocal => {
                let slot = self.local_slot();
                self.push(self.stack[slot])?;
            }
            OpCode::SetLocal => {
                let slot = self.local_slot();
                self.stack[slot] = self.peek(0);
            }
            OpCode::GetGlobal => {
                let name = self.read_string();
                match self.globals.get(&name) {
                    Some(&value) => self.push(value)?,
                    None => return Err(self.undefined_variable(name)),
                }
            }
            OpCode::DefineGlobal => {
                let name = self.read_string();
                let value = self.pop()?;
                self.globals.insert(name, value);
            }
            OpCode::SetGlobal => {
                let name = self.read_string();
                let value = self.peek(0);
                match self.globals.get_mut(&name) {
                    Some(slot) => *slot = value,
                    None => return Err(self.undefined_variable(name)),
                }
            }
            OpCode::GetUpvalue => {
                let index = self.read_byte();
                let upvalue = self.current_upvalue(index);
                let value = match self.heap.upvalue(upvalue) {
                    Upvalue::Open(slot) => self.stack[slot],
                    Upvalue::Closed(value) => value,
                };
                self.push(value)?;
            }
            OpCode::SetUpvalue => {
                let index = self.read_byte();
                let upvalue = self.current_upvalue(index);
                let value = self.peek(0);
                match self.heap.upvalue(upvalue) {
                    Upvalue::Open(slot) => self.stack[slot] = value,
                    Upvalue::Closed(_) => *self.heap.upvalue_mut(upvalue) = Upvalue::Closed(value),
                }
            }
            OpCode::GetProperty => {
                let name = self.read_string();
                let receiver = self.peek(0);
                let Some(instance) = self.as_kind(receiver, ObjectType::Instance) else {
                    return Err("Only instances have properties.".to_string());
                };
                let instance = self.heap.instance(instance);
                if let Some(&value) = instance.fields.get(&name) {
                    self.pop()?;
                    self.push(value)?;
                } else {
                    let class = instance.class;
                    let bound = self.bind_method(class, name, receiver)?;
                    self.pop()?;
                    self.push(Value::Obj(bound))?;
                }
            }
            OpCode::SetProperty => {
                let name = self.read_string();
                let Some(instance) = self.as_kind(self.peek(1), ObjectType::Instance) else {
                    return Err("Only instances have fields.".to_string());
                };
                let value = self.pop()?;
                self.heap.set_field(instance, name, value);
                self.pop()?;
                self.push(value)?;
            }
            OpCode::GetSuper => {
                let name = self.read_string();
                let superclass = self.peek_obj(0);
                let receiver = self.peek(1);
                let bound = self.bind_method(superclass, name, receiver)?;
                self.pop()?;
                self.pop()?;
                self.push(Value::Obj(bound))?;
            }
            OpCode::Equal => {
                let b = self.pop()?;
                let a = self.pop()?;
                self.push(Value::Bool(a == b))?;
            }
            OpCode::Greater => {
                let (a, b) = self.pop_numbers()?;
                self.push(Value::Bool(a > b))?;
            }
            OpCode::Less => {
                let (a, b) = self.pop_numbers()?;
                self.push(Value::Bool(a < b))?;
            }
            OpCode::Add => self.add()?,
            OpCode::Subtract => {
                let (a, b) = self.pop_numbers()?;
                self.push(Value::Number(a - b))?;
            }
            OpCode::Multiply => {
                let (a, b) = self.pop_numbers()?;
                self.push(Value::Number(a * b))?;
            }
            OpCode::Divide => {
                let (a, b) = self.pop_numbers()?;
                self.push(Value::Number(a / b))?;
            }
            OpCode::Not => {
                let value = self.pop()?;
                self.push(Value::Bool(value.is_falsey()))?;
            }
            OpCode::Negate => {
                let Value::Number(n) = self.peek(0) else {
                    return Err("Operand must be a number.".to_string());
                };
                self.pop()?;
                self.push(Value::Number(-n))?;
            }
            OpCode::Print => {
                let value = self.pop()?;
                let text = self.heap.format_value(value);
                writeln!(self.output, "{}", text)
                    .map_err(|e| format!("failed to write output: {}", e))?;
            }
            OpCode::Jump => {
                let offset = self.read_short();
                self.frame_mut().ip += offset;
            }
            OpCode::JumpIfFalse => {
                let offset = self.read_short();
                if self.peek(0).is_falsey() {
                    self.frame_mut().ip += offset;
                }
            }
            OpCode::Loop => {
                let offset = self.read_short();
                self.frame_mut().ip -= offset;
            }
            OpCode::Call => {
                let argc = self.read_byte() as usize;
                self.call_value(self.peek(argc), argc)?;
            }
            OpCode::Invoke => {
                let name = self.read_string();
                let argc = self.read_byte() as usize;
                self.invoke(name, argc)?;
            }
            OpCode::SuperInvoke => {
                let name = self.read_string();
                let argc = self.read_byte() as usize;
                let superclass = self.peek_obj(0);
                self.pop()?;
                self.invoke_from_class(superclass, name, argc)?;
            }
            OpCode::Closure => self.make_closure()?,
            OpCode::CloseUpvalue => {
                self.close_upvalues(self.stack.len() - 1);
                self.pop()?;
            }
            OpCode::Return => {
                let result = self.pop()?;
                let Some(frame) = self.frames.pop() else {
                    return Err("Return outside of a call frame.".to_string());
                };
                self.close_upvalues(frame.slot_base);
                self.stack.truncate(frame.slot_base);
                if self.frames.is_empty() {
                    return Ok(ControlFlow::Exit(result));
                }
                self.push(result)?;
            }
            OpCode::Class => {
                let name = self.read_string();
                let class = self.alloc(Object::Class(Class {
                    name,
                    methods: HashMap::new(),
                }));
                self.push(Value::Obj(class))?;
            }
            OpCode::Inherit => {
                let Some(superclass) = self.as_kind(self.peek(1), ObjectType::Class) else {
                    return Err("Superclass must be a class.".to_string());
                };
                let subclass = self.peek_obj(0);
                // Copied down now, so methods the subclass defines next override them.
                self.heap.inherit_methods(superclass, subclass);
                self.pop()?;
            }
            OpCode::Method => {
                let name = self.read_string();
                let method = self.peek(0);
                let class = self.peek_obj(1);
                self.heap.set_method(class, name, method);
                self.pop()?;
            }
        }
        Ok(ControlFlow::Continue)
    }

    // =========================================================================
    // Instruction stream
    // =========================================================================

    fn frame(&self) -> &CallFrame {
        self.frames.last().expect("no active call frame")
    }

    fn frame_mut(&mut self) -> &mut CallFrame {
        self.frames.last_mut().expect("no active call frame")
    }

    fn read_byte(&mut self) -> u8 {
        let frame = self.frame_mut();
        let byte = frame.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    fn read_short(&mut self) -> usize {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo]) as usize
    }

    fn read_constant(&mut self) -> Value {
        let index = self.read_byte() as usize;
        self.frame().chunk.constants[index]
    }

    fn read_string(&mut self) -> GcRef {
        match self.read_constant() {
            Value::Obj(r) => r,
            other => unreachable!("expected a name constant, found {:?}", other),
        }
    }

    /// Read a local slot operand and resolve it against the frame's base.
    fn local_slot(&mut self) -> usize {
        let index = self.read_byte() as usize;
        self.frame().slot_base + index
    }

    fn current_upvalue(&self, index: u8) -> GcRef {
        self.heap.closure(self.frame().closure).upvalues[index as usize]
    }

    // =========================================================================
    // Value stack
    // =========================================================================

    fn push(&mut self, value: Value) -> Result<(), String> {
        if self.stack.len() >= self.config.stack_capacity() {
            return Err("Stack overflow.".to_string());
        }
        self.stack.push(value);
        Ok(())
    }

    fn pop(&mut self) -> Result<Value, String> {
        self.stack.pop().ok_or_else(|| "Stack underflow.".to_string())
    }

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    /// Peek at a slot the bytecode guarantees holds an object.
    fn peek_obj(&self, distance: usize) -> GcRef {
        match self.peek(distance) {
            Value::Obj(r) => r,
            other => unreachable!("expected an object on the stack, found {:?}", other),
        }
    }

    fn as_kind(&self, value: Value, kind: ObjectType) -> Option<GcRef> {
        match value {
            Value::Obj(r) if self.heap.kind(r) == kind => Some(r),
            _ => None,
        }
    }

    fn pop_numbers(&mut self) -> Result<(f64, f64), String> {
        match (self.peek(1), self.peek(0)) {
            (Value::Number(a), Value::Number(b)) => {
                self.stack.truncate(self.stack.len() - 2);
                Ok((a, b))
            }
            _ => Err("Operands must be numbers.".to_string()),
        }
    }

    fn add(&mut self) -> Result<(), String> {
        let (a, b) = (self.peek(1), self.peek(0));
        match (a, b) {
            (Value::Number(a), Value::Number(b)) => {
                self.stack.truncate(self.stack.len() - 2);
                self.push(Value::Number(a + b))
            }
            _ if self.heap.is(a, ObjectType::String) || self.heap.is(b, ObjectType::String) => {
                let mut text = self.heap.format_value(a);
                text.push_str(&self.heap.format_value(b));
                // Operands stay on the stack until the result is interned.
                let result = self.intern(text);
                self.stack.truncate(self.stack.len() - 2);
                self.push(Value::Obj(result))
            }
            _ => Err("Operands must be two numbers or at least one string.".to_string()),
        }
    }

    fn undefined_variable(&self, name: GcRef) -> String {
        format!("Undefined variable '{}'.", self.heap.str(name))
    }

    // =========================================================================
    // Calls
    // =========================================================================

    fn call_value(&mut self, callee: Value, argc: usize) -> Result<(), String> {
        if let Value::Obj(r) = callee {
            match self.heap.kind(r) {
                ObjectType::Closure => return self.call(r, argc),
                ObjectType::Class => {
                    let instance = self.alloc(Object::Instance(Instance {
                        class: r,
                        fields: HashMap::new(),
                    }));
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = Value::Obj(instance);
                    return match self.heap.class(r).methods.get(&self.init_string) {
                        Some(&Value::Obj(init)) => self.call(init, argc),
                        _ if argc != 0 => Err(format!("Expected 0 arguments but got {}.", argc)),
                        _ => Ok(()),
                    };
                }
                ObjectType::BoundMethod => {
                    let BoundMethod { receiver, method } = *self.heap.bound_method(r);
                    let slot = self.stack.len() - argc - 1;
                    self.stack[slot] = receiver;
                    return self.call(method, argc);
                }
                ObjectType::Native => return self.call_native(r, argc),
                _ => {}
            }
        }
        Err("Can only call functions and classes.".to_string())
    }

    fn call(&mut self, closure: GcRef, argc: usize) -> Result<(), String> {
        let function = self.heap.function(self.heap.closure(closure).function);
        if argc != function.arity {
            return Err(format!(
                "Expected {} arguments but got {}.",
                function.arity, argc
            ));
        }
        if self.frames.len() >= self.config.max_frames {
            return Err("Stack overflow.".to_string());
        }
        let chunk = Rc::clone(&function.chunk);
        self.frames.push(CallFrame {
            closure,
            chunk,
            ip: 0,
            slot_base: self.stack.len() - argc - 1,
        });
        Ok(())
    }

    fn call_native(&mut self, native: GcRef, argc: usize) -> Result<(), String> {
        let Native {
            arity, function, ..
        } = *self.heap.native(native);
        if argc != arity {
            return Err(format!("Expected {} arguments but got {}.", arity, argc));
        }
        let args_start = self.stack.len() - argc;
        let result = function(&mut self.heap, &self.stack[args_start..])?;
        self.stack.truncate(args_start - 1);
        self.push(result)
    }

    fn invoke(&mut self, name: GcRef, argc: usize) -> Result<(), String> {
        let Some(receiver) = self.as_kind(self.peek(argc), ObjectType::Instance) else {
            return Err("Only instances have methods.".to_string());
        };
        let instance = self.heap.instance(receiver);
        // A field holding a callable shadows a method of the same name.
        if let Some(&field) = instance.fields.get(&name) {
            let slot = self.stack.len() - argc - 1;
            self.stack[slot] = field;
            return self.call_value(field, argc);
        }
        let class = instance.class;
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(&mut self, class: GcRef, name: GcRef, argc: usize) -> Result<(), String> {
        match self.heap.class(class).methods.get(&name) {
            Some(&Value::Obj(method)) => self.call(method, argc),
            _ => Err(format!("Undefined property '{}'.", self.heap.str(name))),
        }
    }

    fn bind_method(&mut self, class: GcRef, name: GcRef, receiver: Value) -> Result<GcRef, String> {
        let Some(&Value::Obj(method)) = self.heap.class(class).methods.get(&name) else {
            return Err(format!("Undefined property '{}'.", self.heap.str(name)));
        };
        Ok(self.alloc(Object::BoundMethod(BoundMethod { receiver, method })))
    }

    // =========================================================================
    // Closures and upvalues
    // =========================================================================

    fn make_closure(&mut self) -> Result<(), String> {
        let Value::Obj(function) = self.read_constant() else {
            return Err("Closure constant is not a function.".to_string());
        };
        let count = self.heap.function(function).upvalue_count;
        let mut upvalues = Vec::with_capacity(count);
        for _ in 0..count {
            let is_local = self.read_byte() != 0;
            let index = self.read_byte();
            let upvalue = if is_local {
                let slot = self.frame().slot_base + index as usize;
                self.capture_upvalue(slot)
            } else {
                self.current_upvalue(index)
            };
            upvalues.push(upvalue);
        }
        // Every captured upvalue is rooted through `open_upvalues` or the enclosing closure.
        let closure = self.alloc(Object::Closure(Closure { function, upvalues }));
        self.push(Value::Obj(closure))
    }

    /// Reuse the open upvalue for `slot`, or open a new one.
    fn capture_upvalue(&mut self, slot: usize) -> GcRef {
        let existing = self
            .open_upvalues
            .iter()
            .copied()
            .find(|&r| self.heap.upvalue(r) == Upvalue::Open(slot));
        if let Some(upvalue) = existing {
            return upvalue;
        }
        let upvalue = self.alloc(Object::Upvalue(Upvalue::Open(slot)));
        self.open_upvalues.push(upvalue);
        upvalue
    }

    /// Close every open upvalue pointing at `last` or above.
    fn close_upvalues(&mut self, last: usize) {
        let heap = &mut self.heap;
        let stack = &self.stack;
        self.open_upvalues.retain(|&r| match heap.upvalue(r) {
            Upvalue::Open(slot) if slot >= last => {
                *heap.upvalue_mut(r) = Upvalue::Closed(stack[slot]);
                false
            }
            _ => true,
        });
    }

    // =========================================================================
    // Allocation
    // =========================================================================

    fn roots(&self) -> Vec<GcRef> {
        let mut roots: Vec<GcRef> = self.stack.iter().filter_map(Value::as_obj).collect();
        roots.extend(self.frames.iter().map(|frame| frame.closure));
        roots.extend(self.open_upvalues.iter().copied());
        for (&name, value) in &self.globals {
            roots.push(name);
            roots.extend(value.as_obj());
        }
        roots.push(self.init_string);
        roots
    }

    fn collect_garbage(&mut self) {
        let roots = self.roots();
        self.heap.collect(roots);
    }

    /// Allocate, collecting first if the heap asks for it.
    ///
    /// Anything the caller holds only in a local is not a root.
    fn alloc(&mut self, object: Object) -> GcRef {
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.alloc(object)
    }

    fn intern(&mut self, chars: String) -> GcRef {
        if let Some(existing) = self.heap.find_interned(&chars) {
            return existing;
        }
        if self.heap.should_collect() {
            self.collect_garbage();
        }
        self.heap.intern_owned(chars)
    }

    fn define_native(&mut self, name: &str, arity: usize, function: NativeFn) {
        let name = self.intern(name.to_string());
        self.stack.push(Value::Obj(name));
        let native = self.alloc(Object::Native(Native {
            name,
            arity,
            function,
        }));
        self.globals.insert(name, Value::Obj(native));
        self.stack.pop();
    }

    // =========================================================================
    // Errors and tracing
    // =========================================================================

    /// Build the error with a call trace, then reset the stacks.
    fn runtime_error(&mut self, message: String) -> RuntimeError {
        let trace = self
            .frames
            .iter()
            .rev()
            .map(|frame| {
                let function = self.heap.function(self.heap.closure(frame.closure).function);
                TraceFrame {
                    line: frame.chunk.line(frame.ip.saturating_sub(1)),
                    function: function.name.map(|name| self.heap.str(name).to_string()),
                }
            })
            .collect();
        self.reset_stack();
        RuntimeError { message, trace }
    }

    fn reset_stack(&mut self) {
        // Closures that escaped the failed call keep the values they captured.
        self.close_upvalues(0);
        self.stack.clear();
        self.frames.clear();
    }

    fn trace_instruction(&self) {
        let mut stack = String::from("          ");
        for value in &self.stack {
            stack.push_str(&format!("[ {} ]", self.heap.format_value(*value)));
        }
        eprintln!("{}", stack);
        let frame = self.frame();
        let (text, _) = disassemble_instruction(&self.heap, &frame.chunk, frame.ip);
        eprintln!("{}", text);
    }
}

impl Default for VM {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[derive(Clone, Default)]
    struct Capture(Rc<RefCell<Vec<u8>>>);

    impl Write for Capture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.borrow_mut().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Capture {
        fn text(&self) -> String {
            String::from_utf8(self.0.borrow().clone()).unwrap()
        }
    }

    fn vm_with(config: RuntimeConfig) -> (VM, Capture) {
        let capture = Capture::default();
        let vm = VM::with_config_and_output(config, Box::new(capture.clone()));
        (vm, capture)
    }

    fn run(source: &str) -> String {
        let (mut vm, out) = vm_with(RuntimeConfig::default());
        vm.interpret(source).unwrap();
        out.text()
    }

    fn run_stressed(source: &str) -> String {
        let (mut vm, out) = vm_with(RuntimeConfig {
            stress_gc: true,
            ..RuntimeConfig::default()
        });
        vm.interpret(source).unwrap();
        out.text()
    }

    fn runtime_error(source: &str) -> RuntimeError {
        let (mut vm, _) = vm_with(RuntimeConfig::default());
        match vm.interpret(source) {
            Err(InterpretError::Runtime(e)) => e,
            other => panic!("expected runtime error, got {:?}", other),
        }
    }

    #[test]
    fn test_arithmetic() {
        assert_eq!(run("print 1 + 2 * 3; print (1 + 2) * 3; print -4 / 2;"), "7\n9\n-2\n");
        assert_eq!(run("print 0.1 + 0.2; print 1 / 0; print 10 / 4;"), "0.30000000000000004\ninf\n2.5\n");
    }

    #[test]
    fn test_comparison_and_equality() {
        assert_eq!(
            run("print 1 < 2; print 2 <= 1; print 1 == 1; print \"a\" != \"a\"; print nil == false;"),
            "true\nfalse\ntrue\nfalse\nfalse\n"
        );
    }

    #[test]
    fn test_truthiness() {
        assert_eq!(run("print !nil; print !0; print !\"\";"), "true\nfalse\nfalse\n");
        assert_eq!(run("print nil or \"x\"; print 1 and 2; print false and 1;"), "x\n2\nfalse\n");
    }

    #[test]
    fn test_string_concatenation() {
        assert_eq!(run("var a = \"con\"; print a + \"cat\";"), "concat\n");
        assert_eq!(run("print \"n=\" + 3; print 1.5 + \"!\";"), "n=3\n1.5!\n");
    }

    #[test]
    fn test_concatenated_strings_are_interned() {
        assert_eq!(run("print \"ab\" == \"a\" + \"b\";"), "true\n");
    }

    #[test]
    fn test_globals_and_locals() {
        assert_eq!(
            run("var a = 1; { var a = 2; print a; } print a; a = 3; print a;"),
            "2\n1\n3\n"
        );
    }

    #[test]
    fn test_control_flow() {
        assert_eq!(
            run("for (var i = 0; i < 3; i = i + 1) print i; var n = 0; while (n < 2) n = n + 1; print n;"),
            "0\n1\n2\n2\n"
        );
        assert_eq!(run("if (false) print 1; else print 2;"), "2\n");
    }

    #[test]
    fn test_functions() {
        let source = "fun fib(n) { if (n < 2) return n; return fib(n - 1) + fib(n - 2); } print fib(15); print fib;";
        assert_eq!(run(source), "610\n<fn fib>\n");
        assert_eq!(run("fun f() {} print f();"), "nil\n");
        assert_eq!(run("print clock;"), "<native fn>\n");
    }

    #[test]
    fn test_closures() {
        let source = "
            fun counter() {
                var count = 0;
                fun inc() { count = count + 1; return count; }
                return inc;
            }
            var c = counter();
            c(); c();
            print c();
        ";
        assert_eq!(run(source), "3\n");
        assert_eq!(run_stressed(source), "3\n");
    }

    #[test]
    fn test_shared_upvalue() {
        let source = "
            var get; var set;
            {
                var x = \"before\";
                fun g() { return x; }
                fun s(v) { x = v; }
                get = g; set = s;
            }
            set(\"after\");
            print get();
        ";
        assert_eq!(run_stressed(source), "after\n");
    }

    #[test]
    fn test_loop_closures_capture_fresh_variable() {
        let source = "
            var fs = nil;
            {
                var i = 1;
                fun show() { print i; }
                fs = show;
                i = 2;
            }
            fs();
        ";
        assert_eq!(run(source), "2\n");
    }

    #[test]
    fn test_classes() {
        let source = "
            class Point {
                init(x, y) { this.x = x; this.y = y; }
                sum() { return this.x + this.y; }
            }
            var p = Point(1, 2);
            print p.sum();
            p.x = 10;
            print p.sum();
            print p;
            print Point;
            var m = p.sum;
            print m();
            print p.init(0, 0).x;
        ";
        assert_eq!(run_stressed(source), "3\n12\nPoint instance\nPoint\n12\n0\n");
    }

    #[test]
    fn test_inheritance_and_super() {
        let source = "
            class A { greet() { return \"A\"; } name() { return \"a\"; } }
            class B < A {
                greet() { return \"B\" + super.greet(); }
                name() { var f = super.name; return f() + \"b\"; }
            }
            var b = B();
            print b.greet();
            print b.name();
        ";
        assert_eq!(run_stressed(source), "BA\nab\n");
    }

    #[test]
    fn test_field_shadows_method() {
        let source = "
            class A { f() { return 1; } }
            fun two() { return 2; }
            var a = A();
            a.f = two;
            print a.f();
        ";
        assert_eq!(run(source), "2\n");
    }

    #[test]
    fn test_runtime_errors() {
        assert_eq!(runtime_error("print -\"a\";").message, "Operand must be a number.");
        assert_eq!(runtime_error("print 1 < \"a\";").message, "Operands must be numbers.");
        assert_eq!(
            runtime_error("print nil + 1;").message,
            "Operands must be two numbers or at least one string."
        );
        assert_eq!(runtime_error("print x;").message, "Undefined variable 'x'.");
        assert_eq!(runtime_error("x = 1;").message, "Undefined variable 'x'.");
        assert_eq!(runtime_error("\"s\"();").message, "Can only call functions and classes.");
        assert_eq!(runtime_error("var a = 1; a.b;").message, "Only instances have properties.");
        assert_eq!(runtime_error("var a = 1; a.b = 2;").message, "Only instances have fields.");
        assert_eq!(runtime_error("var a = 1; a.b();").message, "Only instances have methods.");
        assert_eq!(runtime_error("class A {} A().b;").message, "Undefined property 'b'.");
        assert_eq!(runtime_error("var B = 1; class A < B {}").message, "Superclass must be a class.");
        assert_eq!(runtime_error("class A {} A(1);").message, "Expected 0 arguments but got 1.");
    }

    #[test]
    fn test_arity_mismatch() {
        let source = |args: &str| format!("fun f(a, b) {{}} f({});", args);
        assert_eq!(runtime_error(&source("1")).message, "Expected 2 arguments but got 1.");
        assert_eq!(runtime_error(&source("1, 2, 3")).message, "Expected 2 arguments but got 3.");
        assert_eq!(runtime_error("clock(1);").message, "Expected 0 arguments but got 1.");
    }

    #[test]
    fn test_stack_trace() {
        let error = runtime_error("fun inner() {\n  return nil + 1;\n}\nfun outer() { inner(); }\nouter();");
        assert_eq!(
            error.to_string(),
            "Operands must be two numbers or at least one string.\n\
             [line 2] in inner()\n\
             [line 4] in outer()\n\
             [line 5] in script"
        );
    }

    #[test]
    fn test_deep_recursion_overflows() {
        let error = runtime_error("fun f() { f(); } f();");
        assert_eq!(error.message, "Stack overflow.");
        assert_eq!(error.trace.len(), 64);
    }

    #[test]
    fn test_state_survives_errors() {
        let (mut vm, out) = vm_with(RuntimeConfig::default());
        vm.interpret("var kept = \"yes\";").unwrap();
        assert!(vm.interpret("print undefined;").is_err());
        assert!(vm.interpret("print ;").is_err());
        vm.interpret("print kept;").unwrap();
        assert_eq!(out.text(), "yes\n");
    }

    #[test]
    fn test_escaped_closure_survives_runtime_error() {
        let (mut vm, out) = vm_with(RuntimeConfig::default());
        let failed = vm.interpret(
            "var g;
             fun f() { var x = \"captured\"; fun h() { return x; } g = h; nil + 1; }
             f();",
        );
        assert!(failed.is_err());
        vm.interpret("print g();").unwrap();
        vm.interpret("fun w(a, b) { return g(); } print w(\"wrong1\", \"wrong2\");")
            .unwrap();
        assert_eq!(out.text(), "captured\ncaptured\n");
    }

    #[test]
    fn test_evaluate() {
        let (mut vm, _) = vm_with(RuntimeConfig::default());
        assert_eq!(vm.evaluate("1 + 2 * 3").unwrap(), Value::Number(7.0));
        vm.interpret("var greeting = \"hi\";").unwrap();
        let value = vm.evaluate("greeting + \"!\"").unwrap();
        assert_eq!(vm.format_value(value), "hi!");
    }

    #[test]
    fn test_disassemble() {
        let (mut vm, _) = vm_with(RuntimeConfig::default());
        let text = vm.disassemble("fun f() { return 1; } print f();").unwrap();
        assert!(text.starts_with("== <script> ==\n"), "{}", text);
        assert!(text.contains("== f ==\n"), "{}", text);
        assert!(text.contains("OP_CLOSURE"), "{}", text);
    }

    #[test]
    fn test_garbage_is_collected() {
        let (mut vm, _) = vm_with(RuntimeConfig {
            gc_initial_threshold: 4096,
            ..RuntimeConfig::default()
        });
        vm.interpret(
            "class Node { init(next) { this.next = next; } }
             for (var i = 0; i < 2000; i = i + 1) { var n = Node(Node(nil)); }",
        )
        .unwrap();
        let stats = vm.gc_stats();
        assert!(stats.collections > 0);
        assert!(stats.objects_freed > 0);
        assert!(vm.heap().object_count() < 1000);
    }
}
