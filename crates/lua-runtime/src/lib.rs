//! The value model, scope/variable store, table heap, and runcall
//! dispatcher that an emitted `__main` function drives. Shared between the
//! lowering pass (constant folding reuses `execute_binop`/`execute_unop`)
//! and the runtime executing the compiled program.

pub mod builtins;
pub mod error;
pub mod opcode;
pub mod ops;
pub mod rvalue;
pub mod runtime;
pub mod scope;
pub mod table;
pub mod value;

pub use builtins::OutputSink;
pub use error::RuntimeError;
pub use opcode::Opcode;
pub use ops::{execute_binop, execute_unop, is_binop_applicable, is_unop_applicable, match_types, BinOpKind, UnOpKind};
pub use rvalue::{RValueCell, RValueKind};
pub use runtime::{runcall_or_abort, Runtime};
pub use scope::ScopeStack;
pub use table::{Table, TableKey};
pub use value::{NativeFn, TableHandle, Value, ValueKind};
