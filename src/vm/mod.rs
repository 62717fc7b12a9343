mod chunk;
mod heap;
mod native;
mod object;
mod ops;
mod value;
mod vm;
pub mod debug;

pub use chunk::{Chunk, MAX_CONSTANTS};
pub use debug::{Instruction, UpvalueCapture};
pub use heap::{GcRef, GcStats, Heap};
pub use native::NATIVES;
pub use object::{
    BoundMethod, Class, Closure, Function, Instance, LoxString, Native, NativeFn, Object,
    ObjectType, Upvalue,
};
pub use ops::OpCode;
pub use value::{Value, format_number};
pub use vm::VM;
