//! Packages a lowered `Program` into machine code for a single entry point,
//! `__main(runcall_fn) -> ()`, using Cranelift as the JIT backend (the same
//! crate family `fullcodegen` reaches for in the teacher repo). The emitted
//! body is one basic block: an `iconst`/`iconst`/`call_indirect` triple per
//! `Instr`, calling through the function pointer `__main` receives as its
//! only argument, then a `return`.

use std::cell::RefCell;
use std::ffi::c_void;

use cranelift::prelude::*;
use cranelift_jit::{JITBuilder, JITModule};
use cranelift_module::{FuncId, Linkage, Module};
use tracing::debug;

use crate::lower::{lower, Instr, Program};
use lua_ast::Chunk;
use lua_runtime::{Runtime, RuntimeError};

thread_local! {
    /// Smuggles the active `Runtime` through `__main`'s single-argument
    /// ABI: the emitted code only knows how to call a bare function
    /// pointer of type `(i32, *mut c_void) -> ()`, so the receiving
    /// `Runtime` has to travel out-of-band. Re-architected from the
    /// teacher's file-scope statics (see spec.md §9) into a thread-local,
    /// since this runtime is explicitly single-threaded (§5) but still
    /// must not leak into other threads' state.
    static CURRENT_RUNTIME: RefCell<Option<*mut Runtime>> = RefCell::new(None);
}

extern "C" fn trampoline(op: i32, arg: *mut c_void) {
    let ptr = CURRENT_RUNTIME
        .with(|cell| *cell.borrow())
        .expect("trampoline called without an active Runtime");
    // SAFETY: set and cleared by CompiledProgram::run around the one call
    // into emitted code that can invoke this trampoline.
    let runtime = unsafe { &mut *ptr };
    lua_runtime::runcall_or_abort(runtime, op, arg);
}

/// A lowered program with machine code generated for its `__main` entry
/// point. Holds the pools the lowering pass allocated (their addresses are
/// baked into the emitted code) and the `JITModule` that owns the code
/// itself — both must outlive every call into `run`.
pub struct CompiledProgram {
    module: JITModule,
    main_id: FuncId,
    _pools: Program,
}

type MainFn = extern "C" fn(extern "C" fn(i32, *mut c_void));

impl CompiledProgram {
    /// Lowers `chunk` and compiles its `runcall` sequence into a callable
    /// `__main`.
    pub fn compile(chunk: &Chunk) -> Result<Self, RuntimeError> {
        let program = lower(chunk)?;
        debug!(instrs = program.instrs.len(), "lowered chunk");

        let mut flag_builder = settings::builder();
        flag_builder.set("use_colocated_libcalls", "false").unwrap();
        flag_builder.set("is_pic", "false").unwrap();
        let isa_builder = cranelift_native::builder().expect("host architecture is not supported by cranelift_native");
        let isa = isa_builder
            .finish(settings::Flags::new(flag_builder))
            .expect("failed to build target ISA");
        let jit_builder = JITBuilder::with_isa(isa, cranelift_module::default_libcall_names());
        let mut module = JITModule::new(jit_builder);

        let mut callee_sig = module.make_signature();
        callee_sig.params.push(AbiParam::new(types::I32));
        callee_sig.params.push(AbiParam::new(module.target_config().pointer_type()));

        let mut main_sig = module.make_signature();
        main_sig.params.push(AbiParam::new(module.target_config().pointer_type()));

        let main_id = module
            .declare_function("__main", Linkage::Export, &main_sig)
            .expect("declare __main");

        let mut ctx = module.make_context();
        ctx.func.signature = main_sig;
        let mut builder_ctx = FunctionBuilderContext::new();
        {
            let mut builder = FunctionBuilder::new(&mut ctx.func, &mut builder_ctx);
            let entry = builder.create_block();
            builder.append_block_params_for_function_params(entry);
            builder.switch_to_block(entry);
            builder.seal_block(entry);

            let runcall_fn = builder.block_params(entry)[0];
            let sig_ref = builder.import_signature(callee_sig);
            let pointer_ty = module.target_config().pointer_type();

            for instr in &program.instrs {
                let op_val = builder.ins().iconst(types::I32, instr.op as i32 as i64);
                let arg_val = builder.ins().iconst(pointer_ty, instr.arg);
                builder.ins().call_indirect(sig_ref, runcall_fn, &[op_val, arg_val]);
            }

            builder.ins().return_(&[]);
            builder.finalize();
        }

        module
            .define_function(main_id, &mut ctx)
            .expect("define __main");
        module.clear_context(&mut ctx);
        module.finalize_definitions();

        Ok(CompiledProgram {
            module,
            main_id,
            _pools: program,
        })
    }

    /// Binds `runtime` as the context the trampoline smuggles through
    /// `__main`'s function-pointer argument, then invokes the emitted code.
    pub fn run(&self, runtime: &mut Runtime) {
        let code = self.module.get_finalized_function(self.main_id);
        let main_fn: MainFn = unsafe { std::mem::transmute(code) };

        CURRENT_RUNTIME.with(|cell| *cell.borrow_mut() = Some(runtime as *mut Runtime));
        main_fn(trampoline);
        CURRENT_RUNTIME.with(|cell| *cell.borrow_mut() = None);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lua_ast::{Assignment, Expr, LValue, Stmt};

    fn chunk_assigning_one_plus_two_to_x() -> Chunk {
        Chunk {
            statements: vec![Stmt::Assignment(Assignment {
                vars: vec![LValue::Name("x".into())],
                exprs: vec![Expr::binop(lua_ast::BinOpKind::Plus, Expr::int(1), Expr::int(2))],
            })],
        }
    }

    #[test]
    fn compiles_and_runs_a_constant_fold() {
        let chunk = chunk_assigning_one_plus_two_to_x();
        let compiled = CompiledProgram::compile(&chunk).unwrap();
        let mut runtime = Runtime::new();
        compiled.run(&mut runtime);
    }
}
