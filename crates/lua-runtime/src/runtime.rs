use std::cell::RefCell;
use std::ffi::c_void;
use std::rc::Rc;

use tracing::{trace, warn};

use crate::builtins::{self, OutputSink};
use crate::error::RuntimeError;
use crate::opcode::Opcode;
use crate::ops::{execute_binop, execute_unop, BinOpKind, UnOpKind};
use crate::rvalue::RValueCell;
use crate::scope::ScopeStack;
use crate::table::Table;
use crate::value::Value;

/// The data stack: a LIFO sequence of opaque pointers. Every entry is one
/// of two things, distinguished only by opcode-position discipline (per
/// the design note: no tag rides along with the pointer, so the caller
/// must know what it pushed):
///
/// - a small integer encoded as a pointer-sized value (argument counts,
///   field counts, operator codes), or
/// - a `*mut RValueCell` into the code generator's pool.
///
/// These typed helpers are the "wrap pushes and pops" discipline the data
/// model calls for.
#[derive(Default)]
struct DataStack {
    entries: Vec<*mut c_void>,
}

impl DataStack {
    fn push_raw(&mut self, arg: *mut c_void) {
        self.entries.push(arg);
    }

    fn pop_raw(&mut self) -> *mut c_void {
        self.entries
            .pop()
            .expect("data stack underflow: malformed runcall sequence")
    }

    fn push_int(&mut self, v: i64) {
        self.push_raw(v as usize as *mut c_void);
    }

    fn pop_int(&mut self) -> i64 {
        self.pop_raw() as usize as i64
    }

    fn pop_cell<'a>(&mut self) -> &'a mut RValueCell {
        let ptr = self.pop_raw() as *mut RValueCell;
        // SAFETY: the code generator's pool outlives every runcall sequence
        // that references it; see the pool-stability invariant in §3.
        unsafe { &mut *ptr }
    }

    fn depth(&self) -> usize {
        self.entries.len()
    }
}

/// The runtime context threaded through every `runcall`: the scope stack,
/// the data stack, and the table/variable store's moving parts. Owns no
/// pool — pool entries (RValue cells, interned strings) are owned by the
/// code generator and simply referenced here by pointer.
pub struct Runtime {
    scope: ScopeStack,
    stack: DataStack,
}

impl Runtime {
    /// A fresh runtime with every builtin bound in the outermost scope;
    /// `print` writes to the real process stdout.
    pub fn new() -> Self {
        Self::with_output(Rc::new(RefCell::new(std::io::stdout())))
    }

    /// Like `new`, but `print` writes to `output` instead of stdout — how
    /// tests capture and assert on a program's printed output.
    pub fn with_output(output: OutputSink) -> Self {
        let mut scope = ScopeStack::new();
        for (name, value) in builtins::builtins(output) {
            scope.init_variable(name, value);
        }
        Runtime {
            scope,
            stack: DataStack::default(),
        }
    }

    /// Pushes a raw `arg` as emitted code's `PUSH` runcall. `arg` is either
    /// a small integer (cast through a pointer) or a pointer into the code
    /// generator's pool — this is the one opcode that does not interpret
    /// its payload.
    pub fn push(&mut self, arg: *mut c_void) {
        self.stack.push_raw(arg);
    }

    /// Pushes the interned name `name`'s address. Convenience for callers
    /// that have a stable `*const String` (e.g. from a string pool) rather
    /// than going through `push` directly.
    pub fn push_name(&mut self, name: *const String) {
        self.stack.push_raw(name as *mut c_void);
    }

    /// Dispatches one `runcall(op, arg)`. This is the function the JIT
    /// entry point's function pointer resolves to.
    pub fn runcall(&mut self, op: i32, arg: *mut c_void) -> Result<(), RuntimeError> {
        let opcode = Opcode::from_i32(op).ok_or(RuntimeError::InternalInvariant { opcode: op })?;
        trace!(?opcode, stack_depth = self.stack.depth(), "runcall");

        match opcode {
            Opcode::ScopePush => self.scope.push(),
            Opcode::ScopePop => self.scope.pop(),
            Opcode::Push => self.stack.push_raw(arg),
            Opcode::InitVariable => self.init_variable(),
            Opcode::ResolveName => self.resolve_name(),
            Opcode::Assign => self.assign()?,
            Opcode::UnOp => self.unop(arg)?,
            Opcode::BinOp => self.binop(arg)?,
            Opcode::FunctionCall => self.function_call()?,
            Opcode::TableCtor => self.table_ctor()?,
            Opcode::TableAccess => self.table_access()?,
        }
        Ok(())
    }

    fn name_arg(&mut self) -> &str {
        let ptr = self.stack.pop_raw() as *const String;
        // SAFETY: name handles are string-pool addresses; the pool outlives
        // the program (§3's pool-stability invariant).
        unsafe { &*ptr }
    }

    fn init_variable(&mut self) {
        let name = self.name_arg().to_owned();
        self.scope.init_variable(&name, Value::Nil);
    }

    fn resolve_name(&mut self) {
        let name = self.name_arg().to_owned();
        let dest = self.stack.pop_cell();
        let slot = self.scope.resolve_or_create(&name);
        dest.set_lvalue(slot);
    }

    fn assign(&mut self) -> Result<(), RuntimeError> {
        let dest = self.stack.pop_cell();
        let src = self.stack.pop_cell();
        if !dest.is_lvalue() {
            return Err(RuntimeError::NotAnLValue);
        }
        let value = src.read();
        dest.write(value).map_err(|()| RuntimeError::NotAnLValue)
    }

    fn unop(&mut self, arg: *mut c_void) -> Result<(), RuntimeError> {
        let op = UnOpKind::from_i32(arg as usize as i32)
            .ok_or(RuntimeError::InternalInvariant { opcode: arg as usize as i32 })?;
        let dest = self.stack.pop_cell();
        let operand = self.stack.pop_cell();
        let result = execute_unop(op, operand.read())?;
        dest.set_temporary(result);
        Ok(())
    }

    fn binop(&mut self, arg: *mut c_void) -> Result<(), RuntimeError> {
        let op = BinOpKind::from_i32(arg as usize as i32)
            .ok_or(RuntimeError::InternalInvariant { opcode: arg as usize as i32 })?;
        let dest = self.stack.pop_cell();
        let left = self.stack.pop_cell();
        let right = self.stack.pop_cell();
        let result = execute_binop(op, left.read(), right.read())?;
        dest.set_temporary(result);
        Ok(())
    }

    fn function_call(&mut self) -> Result<(), RuntimeError> {
        let callee = self.stack.pop_cell();
        let callee_value = callee.read();
        let Value::Function(f) = callee_value else {
            return Err(RuntimeError::NotCallable {
                kind: callee_value.kind(),
            });
        };
        let n = self.stack.pop_int();
        let args: Vec<Value> = (0..n).map(|_| self.stack.pop_cell().read()).collect();
        let dest = self.stack.pop_cell();

        let mut result = Value::Nil;
        f.call(&args, &mut result);
        dest.set_temporary(result);
        Ok(())
    }

    fn table_ctor(&mut self) -> Result<(), RuntimeError> {
        let k = self.stack.pop_int();
        let mut pairs = Vec::with_capacity(k as usize);
        for _ in 0..k {
            let key = self.stack.pop_cell().read();
            let value = self.stack.pop_cell().read();
            pairs.push((key, value));
        }
        let dest = self.stack.pop_cell();

        // `pairs` was collected in pop order, the reverse of emission
        // order; re-reversing restores emission order so a later-emitted
        // (named) field overwrites an earlier-emitted (positional) one
        // sharing the same key, per the table-constructor contract.
        let mut table = Table::new();
        for (key, value) in pairs.into_iter().rev() {
            table.set(&key, value).map_err(|()| RuntimeError::InvalidTableKey)?;
        }
        dest.set_temporary(Value::new_table(table));
        Ok(())
    }

    fn table_access(&mut self) -> Result<(), RuntimeError> {
        let table_cell = self.stack.pop_cell();
        let key_cell = self.stack.pop_cell();
        let dest = self.stack.pop_cell();

        let table_value = table_cell.read();
        let Value::Table(table) = table_value else {
            return Err(RuntimeError::TypeMismatch {
                left: table_value.kind(),
                right: crate::value::ValueKind::Table,
            });
        };
        let key = key_cell.read();
        let slot = table
            .borrow_mut()
            .slot(&key)
            .map_err(|()| RuntimeError::InvalidTableKey)?;
        dest.set_lvalue(slot);
        Ok(())
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

/// Trampoline the JIT wrapper hands to emitted code: a `runcall` that logs
/// and converts any `RuntimeError` into the fail-fast abort spec.md §7
/// prescribes for this core. The codegen crate's entry point registers
/// this (or an equivalent closure) as the function pointer `__main` calls
/// through.
pub fn runcall_or_abort(runtime: &mut Runtime, op: i32, arg: *mut c_void) {
    if let Err(err) = runtime.runcall(op, arg) {
        warn!(%err, "runtime error, aborting");
        eprintln!("{}", err);
        std::process::exit(1);
    }
}
