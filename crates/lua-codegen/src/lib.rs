//! The lowering pass and the Cranelift JIT wrapper that together turn an
//! AST chunk into a callable `__main` entry point driving `lua-runtime`.

pub mod jit;
pub mod lower;
pub mod pool;

pub use jit::CompiledProgram;
pub use lower::{lower, Instr, Program};

/// The JIT wrapper's entry point: lowers `chunk` and emits machine code for
/// its `__main`, ready for `CompiledProgram::run`.
pub fn compile_chunk(chunk: &lua_ast::Chunk) -> Result<CompiledProgram, lua_runtime::RuntimeError> {
    CompiledProgram::compile(chunk)
}

