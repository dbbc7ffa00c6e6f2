//! AST -> runcall lowering. A recursive walk over `lua_ast::Chunk` that
//! either folds an expression to an `Immediate` at lowering time or emits
//! the `runcall` sequence the runtime must execute to produce it, per the
//! per-node-kind contract in the data model this crate implements against.

use lua_ast::{Assignment, Chunk, Expr, Field, FunctionCall, LValue, Literal, Stmt, TableCtor};
use lua_runtime::{execute_binop, execute_unop, opcode::Opcode, RValueCell, RuntimeError, Value};
use tracing::debug;

use crate::pool::Pool;

/// One `runcall(op, arg)` the lowering pass emits. `arg` is always a
/// pointer-sized payload: a pool address for `Push`, an operator code for
/// `UnOp`/`BinOp`, or unused (`0`) for every other opcode — exactly the
/// external ABI's "small-integer or pointer, cast through an integer-sized
/// slot" contract (§6).
#[derive(Debug, Clone, Copy)]
pub struct Instr {
    pub op: Opcode,
    pub arg: i64,
}

impl Instr {
    fn simple(op: Opcode) -> Self {
        Instr { op, arg: 0 }
    }

    fn push_int(n: i64) -> Self {
        Instr { op: Opcode::Push, arg: n }
    }

    fn push_ptr<T>(ptr: *mut T) -> Self {
        Instr {
            op: Opcode::Push,
            arg: ptr as i64,
        }
    }

    fn binop(op: lua_ast::BinOpKind) -> Self {
        Instr {
            op: Opcode::BinOp,
            arg: op as i32 as i64,
        }
    }

    fn unop(op: lua_ast::UnOpKind) -> Self {
        Instr {
            op: Opcode::UnOp,
            arg: op as i32 as i64,
        }
    }
}

/// The result of lowering an expression: a value already known at lowering
/// time (never reaches a cell or a runcall), a pointer to a freshly
/// computed, unaliased cell, or a pointer to a cell that aliases a live
/// variable or table slot (the result of resolving an l-value). The `Alias`
/// distinction matters to `lower_assignment`: only an aliased cell can be
/// mutated out from under a read by another destination's `ASSIGN` in the
/// same statement.
enum Lowered {
    Immediate(Value),
    Cell(*mut RValueCell),
    Alias(*mut RValueCell),
}

/// Owns the stable pools the emitted `Instr` sequence's addresses point
/// into, plus the sequence itself. This is "the code generator" in the
/// data model's lifecycle table — pools live exactly as long as this does.
pub struct Program {
    pub instrs: Vec<Instr>,
    pub cells: Pool<RValueCell>,
    pub strings: Pool<String>,
}

struct Lowerer {
    instrs: Vec<Instr>,
    cells: Pool<RValueCell>,
    strings: Pool<String>,
}

impl Lowerer {
    fn new() -> Self {
        Lowerer {
            instrs: Vec::new(),
            cells: Pool::new(),
            strings: Pool::new(),
        }
    }

    fn emit(&mut self, instr: Instr) {
        self.instrs.push(instr);
    }

    fn intern(&mut self, name: &str) -> *mut String {
        self.strings.alloc(name.to_owned())
    }

    /// Forces a `Lowered` into a pool cell, allocating an `Immediate` cell
    /// if it was folded. Every operand position a runcall reads from needs
    /// a cell, even a folded constant that never got the chance to
    /// participate in further folding.
    fn materialize(&mut self, value: Lowered) -> *mut RValueCell {
        match value {
            Lowered::Immediate(v) => self.cells.alloc(RValueCell::immediate(v)),
            Lowered::Cell(ptr) | Lowered::Alias(ptr) => ptr,
        }
    }

    /// Like `materialize`, but for a right-hand side of an assignment: an
    /// `Alias` cell is copied into a fresh scratch cell via a runtime
    /// `ASSIGN` before being handed back, so its value is captured at this
    /// point in the statement rather than re-read later through a live slot
    /// some other destination in the same assignment may have since
    /// overwritten. `Immediate` and `Cell` need no such copy: an `Immediate`
    /// is a lowering-time constant and a `Cell` already owns fresh,
    /// unaliased storage.
    fn snapshot(&mut self, value: Lowered) -> *mut RValueCell {
        match value {
            Lowered::Immediate(v) => self.cells.alloc(RValueCell::immediate(v)),
            Lowered::Cell(ptr) => ptr,
            Lowered::Alias(src) => {
                let scratch = self.cells.alloc(RValueCell::temporary(Value::Nil));
                // SAFETY: `scratch` is a pool address, stable for the
                // pool's lifetime; aliasing its own storage here, before
                // any other pointer to it escapes, is sound.
                unsafe { (*scratch).alias_self() };
                self.emit(Instr::push_ptr(src));
                self.emit(Instr::push_ptr(scratch));
                self.emit(Instr::simple(Opcode::Assign));
                scratch
            }
        }
    }

    fn lower_chunk(&mut self, chunk: &Chunk) -> Result<(), RuntimeError> {
        self.emit(Instr::simple(Opcode::ScopePush));
        for stmt in &chunk.statements {
            self.lower_stmt(stmt)?;
        }
        Ok(())
    }

    fn lower_stmt(&mut self, stmt: &Stmt) -> Result<(), RuntimeError> {
        match stmt {
            Stmt::Assignment(a) => self.lower_assignment(a),
            Stmt::Call(call) => {
                self.lower_function_call(call)?;
                Ok(())
            }
        }
    }

    fn lower_assignment(&mut self, a: &Assignment) -> Result<(), RuntimeError> {
        let dests: Vec<*mut RValueCell> = a
            .vars
            .iter()
            .map(|v| self.lower_lvalue(v))
            .collect::<Result<_, _>>()?;

        // All right-hand sides evaluate left-to-right before any assignment
        // happens, including excess expressions kept only for their side
        // effects. Each one is snapshotted right away: an `Alias` result
        // must be copied out of its live slot before any destination below
        // starts mutating slots, or a later ASSIGN could read a value an
        // earlier ASSIGN in this same statement already overwrote (e.g.
        // `x, y = y, x`).
        let mut srcs: Vec<*mut RValueCell> = Vec::with_capacity(a.exprs.len());
        for expr in &a.exprs {
            let lowered = self.lower_expr(expr)?;
            srcs.push(self.snapshot(lowered));
        }

        for (i, dest) in dests.iter().enumerate() {
            let src_cell = match srcs.get(i) {
                Some(&cell) => cell,
                // Fewer expressions than variables: excess variables get Nil.
                None => self.cells.alloc(RValueCell::immediate(Value::Nil)),
            };
            self.emit(Instr::push_ptr(src_cell));
            self.emit(Instr::push_ptr(*dest));
            self.emit(Instr::simple(Opcode::Assign));
        }
        Ok(())
    }

    fn lower_lvalue(&mut self, lv: &LValue) -> Result<*mut RValueCell, RuntimeError> {
        match lv {
            LValue::Name(name) => {
                let dest = self.cells.alloc(RValueCell::temporary(Value::Nil));
                let handle = self.intern(name);
                self.emit(Instr::push_ptr(dest));
                self.emit(Instr::push_ptr(handle));
                self.emit(Instr::simple(Opcode::ResolveName));
                Ok(dest)
            }
            LValue::Dot(table_expr, field) => {
                self.lower_bracket(table_expr, &Expr::string(field.clone()))
            }
            LValue::Bracket(table_expr, key_expr) => self.lower_bracket(table_expr, key_expr),
        }
    }

    fn lower_bracket(&mut self, table_expr: &Expr, key_expr: &Expr) -> Result<*mut RValueCell, RuntimeError> {
        let table_lowered = self.lower_expr(table_expr)?;
        let table_cell = self.materialize(table_lowered);
        let key_lowered = self.lower_expr(key_expr)?;
        let key_cell = self.materialize(key_lowered);
        let dest = self.cells.alloc(RValueCell::temporary(Value::Nil));

        self.emit(Instr::push_ptr(dest));
        self.emit(Instr::push_ptr(key_cell));
        self.emit(Instr::push_ptr(table_cell));
        self.emit(Instr::simple(Opcode::TableAccess));
        Ok(dest)
    }

    fn lower_expr(&mut self, expr: &Expr) -> Result<Lowered, RuntimeError> {
        Ok(match expr {
            Expr::Literal(lit) => Lowered::Immediate(literal_value(lit)),
            Expr::LValue(lv) => Lowered::Alias(self.lower_lvalue(lv)?),
            Expr::Call(call) => Lowered::Cell(self.lower_function_call(call)?),
            Expr::Table(tc) => Lowered::Cell(self.lower_table_ctor(tc)?),
            Expr::BinOp(b) => self.lower_binop(b)?,
            Expr::UnOp(u) => self.lower_unop(u)?,
        })
    }

    fn lower_function_call(&mut self, call: &FunctionCall) -> Result<*mut RValueCell, RuntimeError> {
        let callee = self.lower_expr(&call.callee)?;
        let callee_cell = self.materialize(callee);

        let mut arg_cells = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            let lowered = self.lower_expr(arg)?;
            arg_cells.push(self.materialize(lowered));
        }

        let dest = self.cells.alloc(RValueCell::temporary(Value::Nil));
        self.emit(Instr::push_ptr(dest));
        for &cell in arg_cells.iter().rev() {
            self.emit(Instr::push_ptr(cell));
        }
        self.emit(Instr::push_int(arg_cells.len() as i64));
        self.emit(Instr::push_ptr(callee_cell));
        self.emit(Instr::simple(Opcode::FunctionCall));
        Ok(dest)
    }

    fn lower_table_ctor(&mut self, tc: &TableCtor) -> Result<*mut RValueCell, RuntimeError> {
        let dest = self.cells.alloc(RValueCell::temporary(Value::Nil));
        self.emit(Instr::push_ptr(dest));

        let positional = tc.fields.iter().filter(|f| matches!(f, Field::Positional(_)));
        let rest = tc.fields.iter().filter(|f| !matches!(f, Field::Positional(_)));

        let mut next_index: i32 = 1;
        let mut count = 0i64;
        for field in positional.chain(rest) {
            let (key, value) = match field {
                Field::Positional(value_expr) => {
                    let key = Lowered::Immediate(Value::Integer(next_index));
                    next_index += 1;
                    (key, self.lower_expr(value_expr)?)
                }
                Field::Named(name, value_expr) => (
                    Lowered::Immediate(Value::String(name.clone())),
                    self.lower_expr(value_expr)?,
                ),
                Field::Indexed(key_expr, value_expr) => {
                    (self.lower_expr(key_expr)?, self.lower_expr(value_expr)?)
                }
            };
            let value_cell = self.materialize(value);
            let key_cell = self.materialize(key);
            self.emit(Instr::push_ptr(value_cell));
            self.emit(Instr::push_ptr(key_cell));
            count += 1;
        }

        self.emit(Instr::push_int(count));
        self.emit(Instr::simple(Opcode::TableCtor));
        Ok(dest)
    }

    fn lower_binop(&mut self, b: &lua_ast::BinOp) -> Result<Lowered, RuntimeError> {
        let left = self.lower_expr(&b.left)?;
        let right = self.lower_expr(&b.right)?;

        if let (Lowered::Immediate(l), Lowered::Immediate(r)) = (&left, &right) {
            let folded = execute_binop(b.op, l.clone(), r.clone())?;
            debug!(op = b.op.as_str(), "constant-folded binop");
            return Ok(Lowered::Immediate(folded));
        }

        let right_cell = self.materialize(right);
        let left_cell = self.materialize(left);
        let dest = self.cells.alloc(RValueCell::temporary(Value::Nil));
        self.emit(Instr::push_ptr(right_cell));
        self.emit(Instr::push_ptr(left_cell));
        self.emit(Instr::push_ptr(dest));
        self.emit(Instr::binop(b.op));
        Ok(Lowered::Cell(dest))
    }

    fn lower_unop(&mut self, u: &lua_ast::UnOp) -> Result<Lowered, RuntimeError> {
        let operand = self.lower_expr(&u.operand)?;

        if let Lowered::Immediate(v) = &operand {
            let folded = execute_unop(u.op, v.clone())?;
            return Ok(Lowered::Immediate(folded));
        }

        let operand_cell = self.materialize(operand);
        let dest = self.cells.alloc(RValueCell::temporary(Value::Nil));
        self.emit(Instr::push_ptr(operand_cell));
        self.emit(Instr::push_ptr(dest));
        self.emit(Instr::unop(u.op));
        Ok(Lowered::Cell(dest))
    }
}

fn literal_value(lit: &Literal) -> Value {
    match lit {
        Literal::Nil => Value::Nil,
        Literal::Boolean(b) => Value::Boolean(*b),
        Literal::Integer(i) => Value::Integer(*i),
        Literal::Real(r) => Value::Real(*r),
        Literal::String(s) => Value::String(s.clone()),
    }
}

/// Lowers an entire chunk, returning the `runcall` sequence plus the pools
/// backing every pointer it carries.
pub fn lower(chunk: &Chunk) -> Result<Program, RuntimeError> {
    let mut lowerer = Lowerer::new();
    lowerer.lower_chunk(chunk)?;
    Ok(Program {
        instrs: lowerer.instrs,
        cells: lowerer.cells,
        strings: lowerer.strings,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use lua_ast::{Assignment, BinOpKind, Stmt};

    #[test]
    fn constant_arithmetic_folds_to_zero_runcalls_beyond_scope_push() {
        let chunk = Chunk {
            statements: vec![Stmt::Assignment(Assignment {
                vars: vec![LValue::Name("x".into())],
                exprs: vec![Expr::binop(BinOpKind::Plus, Expr::int(1), Expr::int(2))],
            })],
        };
        let program = lower(&chunk).unwrap();
        // ScopePush, then resolve-name (2 pushes + op), then assign (2 pushes + op) = 1 + 3 + 3
        assert_eq!(program.instrs.len(), 7);
    }

    #[test]
    fn folding_a_type_mismatch_fails_at_lowering_time() {
        let chunk = Chunk {
            statements: vec![Stmt::Assignment(Assignment {
                vars: vec![LValue::Name("x".into())],
                exprs: vec![Expr::binop(BinOpKind::Plus, Expr::int(1), Expr::boolean(true))],
            })],
        };
        assert!(lower(&chunk).is_err());
    }

    #[test]
    fn table_ctor_emits_positional_then_named_fields() {
        let chunk = Chunk {
            statements: vec![Stmt::Assignment(Assignment {
                vars: vec![LValue::Name("t".into())],
                exprs: vec![Expr::Table(TableCtor {
                    fields: vec![
                        Field::Named("k".into(), Expr::int(30)),
                        Field::Positional(Expr::int(10)),
                        Field::Positional(Expr::int(20)),
                    ],
                })],
            })],
        };
        let program = lower(&chunk).unwrap();
        // field count pushed just before TableCtor
        let ctor_idx = program
            .instrs
            .iter()
            .position(|i| i.op == lua_runtime::Opcode::TableCtor)
            .unwrap();
        assert_eq!(program.instrs[ctor_idx - 1].arg, 3);
    }

    #[test]
    fn multi_assignment_snapshots_each_aliased_source_before_any_destination_assign() {
        // x, y = y, x
        let chunk = Chunk {
            statements: vec![Stmt::Assignment(Assignment {
                vars: vec![LValue::Name("x".into()), LValue::Name("y".into())],
                exprs: vec![Expr::name("y"), Expr::name("x")],
            })],
        };
        let program = lower(&chunk).unwrap();
        // One ASSIGN per snapshotted source (2) plus one per destination (2).
        let assign_count = program
            .instrs
            .iter()
            .filter(|i| i.op == lua_runtime::Opcode::Assign)
            .count();
        assert_eq!(assign_count, 4);

        // Every snapshot ASSIGN (there are 2) must appear before either
        // destination ASSIGN, or a later destination write could still
        // race an earlier read of the same live slot.
        let assign_positions: Vec<usize> = program
            .instrs
            .iter()
            .enumerate()
            .filter(|(_, i)| i.op == lua_runtime::Opcode::Assign)
            .map(|(idx, _)| idx)
            .collect();
        assert!(assign_positions[1] < assign_positions[2]);
    }
}
