//! Tree shape produced by an external parser and consumed, read-only, by the
//! lowering pass in `lua-codegen`. Nothing in this crate parses source text;
//! it only names the node kinds the lowering pass must handle.

pub use lua_runtime::{BinOpKind, UnOpKind};

/// A literal value known at parse time.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    Nil,
    Boolean(bool),
    Integer(i32),
    Real(f64),
    String(String),
}

/// An assignable location: a variable name or a table entry.
#[derive(Debug, Clone, PartialEq)]
pub enum LValue {
    /// Unqualified identifier.
    Name(String),
    /// `table.field`, sugar for `Bracket(table, String(field))`.
    Dot(Box<Expr>, String),
    /// `table[key]`.
    Bracket(Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinOp {
    pub op: BinOpKind,
    pub left: Box<Expr>,
    pub right: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnOp {
    pub op: UnOpKind,
    pub operand: Box<Expr>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FunctionCall {
    pub callee: Box<Expr>,
    pub args: Vec<Expr>,
}

/// One entry of a table constructor. Order within `TableCtor::fields` is
/// source order; the lowering pass re-sorts positional-before-named when it
/// emits `runcall`s (see lua-codegen).
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Positional(Expr),
    Named(String, Expr),
    Indexed(Expr, Expr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct TableCtor {
    pub fields: Vec<Field>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Literal),
    LValue(LValue),
    Call(FunctionCall),
    Table(TableCtor),
    BinOp(BinOp),
    UnOp(UnOp),
}

/// `vars[0..m] = exprs[0..n]`.
#[derive(Debug, Clone, PartialEq)]
pub struct Assignment {
    pub vars: Vec<LValue>,
    pub exprs: Vec<Expr>,
}

/// A statement at chunk level: only assignments and calls exist in this
/// subset (no control flow, no declarations with bodies).
#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Assignment(Assignment),
    Call(FunctionCall),
}

/// The whole program. Owns every node transitively; dropping it drops the
/// tree.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Chunk {
    pub statements: Vec<Stmt>,
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::LValue(LValue::Name(name.into()))
    }

    pub fn int(v: i32) -> Self {
        Expr::Literal(Literal::Integer(v))
    }

    pub fn real(v: f64) -> Self {
        Expr::Literal(Literal::Real(v))
    }

    pub fn string(v: impl Into<String>) -> Self {
        Expr::Literal(Literal::String(v.into()))
    }

    pub fn boolean(v: bool) -> Self {
        Expr::Literal(Literal::Boolean(v))
    }

    pub fn nil() -> Self {
        Expr::Literal(Literal::Nil)
    }

    pub fn binop(op: BinOpKind, left: Expr, right: Expr) -> Self {
        Expr::BinOp(BinOp {
            op,
            left: Box::new(left),
            right: Box::new(right),
        })
    }

    pub fn unop(op: UnOpKind, operand: Expr) -> Self {
        Expr::UnOp(UnOp {
            op,
            operand: Box::new(operand),
        })
    }
}
