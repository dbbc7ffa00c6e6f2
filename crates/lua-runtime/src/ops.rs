//! The value model's coercion and operator dispatch. This is the single
//! code path the lowering pass's constant folder and the runtime's `BINOP`/
//! `UNOP` handlers both call — keeping folding and execution behaviourally
//! identical is the whole point of factoring it out here.

use crate::error::RuntimeError;
use crate::value::{Value, ValueKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum BinOpKind {
    Or = 0,
    And = 1,
    Equals = 2,
    NotEqual = 3,
    Less = 4,
    LessEqual = 5,
    Greater = 6,
    GreaterEqual = 7,
    Concat = 8,
    Plus = 9,
    Minus = 10,
    Times = 11,
    Divide = 12,
    Modulo = 13,
}

impl BinOpKind {
    /// Decodes the small-integer `arg` a `BINOP` runcall carries.
    pub fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            0 => BinOpKind::Or,
            1 => BinOpKind::And,
            2 => BinOpKind::Equals,
            3 => BinOpKind::NotEqual,
            4 => BinOpKind::Less,
            5 => BinOpKind::LessEqual,
            6 => BinOpKind::Greater,
            7 => BinOpKind::GreaterEqual,
            8 => BinOpKind::Concat,
            9 => BinOpKind::Plus,
            10 => BinOpKind::Minus,
            11 => BinOpKind::Times,
            12 => BinOpKind::Divide,
            13 => BinOpKind::Modulo,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            BinOpKind::Or => "or",
            BinOpKind::And => "and",
            BinOpKind::Equals => "==",
            BinOpKind::NotEqual => "~=",
            BinOpKind::Less => "<",
            BinOpKind::LessEqual => "<=",
            BinOpKind::Greater => ">",
            BinOpKind::GreaterEqual => ">=",
            BinOpKind::Concat => "..",
            BinOpKind::Plus => "+",
            BinOpKind::Minus => "-",
            BinOpKind::Times => "*",
            BinOpKind::Divide => "/",
            BinOpKind::Modulo => "%",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum UnOpKind {
    Negate = 0,
    Not = 1,
    /// Parsed, never implemented: applying it always fails
    /// `OperationNotApplicable` (spec reserves `#`).
    Length = 2,
}

impl UnOpKind {
    /// Decodes the small-integer `arg` a `UNOP` runcall carries.
    pub fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            0 => UnOpKind::Negate,
            1 => UnOpKind::Not,
            2 => UnOpKind::Length,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            UnOpKind::Negate => "-",
            UnOpKind::Not => "not",
            UnOpKind::Length => "#",
        }
    }
}

/// Promotes `Integer` against `Real` to `Real` by numeric widening. Fails if
/// the kinds still disagree afterwards. Commutative up to operand order:
/// `(Int, Real)` and `(Real, Int)` promote to the same pair of kinds.
pub fn match_types(left: Value, right: Value) -> Result<(Value, Value), RuntimeError> {
    let (left, right) = match (left, right) {
        (Value::Integer(l), Value::Real(r)) => (Value::Real(l as f64), Value::Real(r)),
        (Value::Real(l), Value::Integer(r)) => (Value::Real(l), Value::Real(r as f64)),
        pair => pair,
    };

    if left.kind() != right.kind() {
        return Err(RuntimeError::TypeMismatch {
            left: left.kind(),
            right: right.kind(),
        });
    }

    Ok((left, right))
}

/// Total predicate the lowering pass uses to reject impossible folds before
/// ever emitting a runcall.
pub fn is_binop_applicable(op: BinOpKind, kind: ValueKind) -> bool {
    use BinOpKind::*;
    use ValueKind::*;
    match op {
        Plus | Minus | Times | Divide => matches!(kind, Integer | Real),
        Modulo => matches!(kind, Integer),
        Concat => matches!(kind, String),
        Equals | NotEqual => matches!(kind, Boolean | Integer | Real | String),
        Less | LessEqual | Greater | GreaterEqual => matches!(kind, Integer | Real | String),
        Or | And => false,
    }
}

pub fn is_unop_applicable(op: UnOpKind, kind: ValueKind) -> bool {
    match op {
        UnOpKind::Negate => matches!(kind, ValueKind::Integer | ValueKind::Real),
        UnOpKind::Not => matches!(kind, ValueKind::Boolean),
        UnOpKind::Length => false,
    }
}

fn not_applicable(op: &'static str, kind: ValueKind) -> RuntimeError {
    RuntimeError::OperationNotApplicable { op, kind }
}

/// Runs a binary operator on two already-`match_types`d operands. Shared
/// verbatim by the constant folder (lowering time, both operands
/// `Immediate`) and `BINOP`'s runtime handler.
pub fn execute_binop(op: BinOpKind, left: Value, right: Value) -> Result<Value, RuntimeError> {
    let (left, right) = match_types(left, right)?;
    let kind = left.kind();

    if !is_binop_applicable(op, kind) {
        return Err(not_applicable(op.as_str(), kind));
    }

    Ok(match (op, left, right) {
        (BinOpKind::Plus, Value::Integer(l), Value::Integer(r)) => Value::Integer(l.wrapping_add(r)),
        (BinOpKind::Minus, Value::Integer(l), Value::Integer(r)) => Value::Integer(l.wrapping_sub(r)),
        (BinOpKind::Times, Value::Integer(l), Value::Integer(r)) => Value::Integer(l.wrapping_mul(r)),
        (BinOpKind::Divide, Value::Integer(l), Value::Integer(r)) => {
            Value::Integer(l.checked_div(r).ok_or(RuntimeError::DivisionByZero)?)
        }
        (BinOpKind::Modulo, Value::Integer(l), Value::Integer(r)) => {
            Value::Integer(l.checked_rem(r).ok_or(RuntimeError::DivisionByZero)?)
        }
        (BinOpKind::Plus, Value::Real(l), Value::Real(r)) => Value::Real(l + r),
        (BinOpKind::Minus, Value::Real(l), Value::Real(r)) => Value::Real(l - r),
        (BinOpKind::Times, Value::Real(l), Value::Real(r)) => Value::Real(l * r),
        (BinOpKind::Divide, Value::Real(l), Value::Real(r)) => Value::Real(l / r),

        (BinOpKind::Plus, Value::String(l), Value::String(r)) | (BinOpKind::Concat, Value::String(l), Value::String(r)) => {
            Value::String(l + &r)
        }

        (BinOpKind::Equals, l, r) => Value::Boolean(values_equal(&l, &r)),
        (BinOpKind::NotEqual, l, r) => Value::Boolean(!values_equal(&l, &r)),

        (BinOpKind::Less, Value::Integer(l), Value::Integer(r)) => Value::Boolean(l < r),
        (BinOpKind::LessEqual, Value::Integer(l), Value::Integer(r)) => Value::Boolean(l <= r),
        (BinOpKind::Greater, Value::Integer(l), Value::Integer(r)) => Value::Boolean(l > r),
        (BinOpKind::GreaterEqual, Value::Integer(l), Value::Integer(r)) => Value::Boolean(l >= r),
        (BinOpKind::Less, Value::Real(l), Value::Real(r)) => Value::Boolean(l < r),
        (BinOpKind::LessEqual, Value::Real(l), Value::Real(r)) => Value::Boolean(l <= r),
        (BinOpKind::Greater, Value::Real(l), Value::Real(r)) => Value::Boolean(l > r),
        (BinOpKind::GreaterEqual, Value::Real(l), Value::Real(r)) => Value::Boolean(l >= r),
        (BinOpKind::Less, Value::String(l), Value::String(r)) => Value::Boolean(l < r),
        (BinOpKind::LessEqual, Value::String(l), Value::String(r)) => Value::Boolean(l <= r),
        (BinOpKind::Greater, Value::String(l), Value::String(r)) => Value::Boolean(l > r),
        (BinOpKind::GreaterEqual, Value::String(l), Value::String(r)) => Value::Boolean(l >= r),

        // match_types already forced left.kind() == right.kind() here.
        (op, left, _right) => return Err(not_applicable(op.as_str(), left.kind())),
    })
}

/// Kind-then-payload equality, used by `==`/`~=`. Integer/Real comparisons
/// already went through `match_types` by the time this runs.
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Nil, Value::Nil) => true,
        (Value::Boolean(l), Value::Boolean(r)) => l == r,
        (Value::Integer(l), Value::Integer(r)) => l == r,
        (Value::Real(l), Value::Real(r)) => l == r,
        (Value::String(l), Value::String(r)) => l == r,
        (Value::Table(l), Value::Table(r)) => std::rc::Rc::ptr_eq(l, r),
        _ => false,
    }
}

pub fn execute_unop(op: UnOpKind, operand: Value) -> Result<Value, RuntimeError> {
    let kind = operand.kind();
    if !is_unop_applicable(op, kind) {
        return Err(not_applicable(op.as_str(), kind));
    }

    Ok(match (op, operand) {
        (UnOpKind::Negate, Value::Integer(i)) => Value::Integer(i.wrapping_neg()),
        (UnOpKind::Negate, Value::Real(r)) => Value::Real(-r),
        (UnOpKind::Not, Value::Boolean(b)) => Value::Boolean(!b),
        (op, operand) => return Err(not_applicable(op.as_str(), operand.kind())),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_real_promotion_is_commutative() {
        let (a, b) = match_types(Value::Integer(1), Value::Real(2.5)).unwrap();
        let (c, d) = match_types(Value::Real(2.5), Value::Integer(1)).unwrap();
        assert_eq!(a.kind(), c.kind());
        assert_eq!(b.kind(), d.kind());
    }

    #[test]
    fn real_promotion_arithmetic() {
        let v = execute_binop(BinOpKind::Plus, Value::Integer(1), Value::Real(2.5)).unwrap();
        assert_eq!(v, Value::Real(3.5));
    }

    #[test]
    fn string_concat_both_spellings() {
        let plus = execute_binop(
            BinOpKind::Plus,
            Value::String("a".into()),
            Value::String("b".into()),
        )
        .unwrap();
        let concat = execute_binop(
            BinOpKind::Concat,
            Value::String("a".into()),
            Value::String("b".into()),
        )
        .unwrap();
        assert_eq!(plus, Value::String("ab".into()));
        assert_eq!(concat, plus);
    }

    #[test]
    fn integer_division_truncates_and_stays_integer() {
        let v = execute_binop(BinOpKind::Divide, Value::Integer(7), Value::Integer(2)).unwrap();
        assert_eq!(v, Value::Integer(3));
    }

    #[test]
    fn real_division_stays_real() {
        let v = execute_binop(BinOpKind::Divide, Value::Real(7.0), Value::Real(2.0)).unwrap();
        assert_eq!(v, Value::Real(3.5));
    }

    #[test]
    fn modulo_by_zero_is_an_error_not_a_panic() {
        let err = execute_binop(BinOpKind::Modulo, Value::Integer(1), Value::Integer(0)).unwrap_err();
        assert_eq!(err, RuntimeError::DivisionByZero);
    }

    #[test]
    fn mismatched_kinds_fail() {
        let err = execute_binop(BinOpKind::Plus, Value::Integer(1), Value::Boolean(true)).unwrap_err();
        assert!(matches!(err, RuntimeError::TypeMismatch { .. }));
    }

    #[test]
    fn or_and_are_unimplemented_by_design() {
        let err = execute_binop(BinOpKind::And, Value::Boolean(true), Value::Boolean(false)).unwrap_err();
        assert!(matches!(err, RuntimeError::OperationNotApplicable { .. }));
    }

    #[test]
    fn length_is_reserved() {
        let err = execute_unop(UnOpKind::Length, Value::Integer(1)).unwrap_err();
        assert!(matches!(err, RuntimeError::OperationNotApplicable { .. }));
    }

    #[test]
    fn unary_negate_and_not() {
        assert_eq!(
            execute_unop(UnOpKind::Negate, Value::Integer(5)).unwrap(),
            Value::Integer(-5)
        );
        assert_eq!(
            execute_unop(UnOpKind::Not, Value::Boolean(true)).unwrap(),
            Value::Boolean(false)
        );
    }
}
