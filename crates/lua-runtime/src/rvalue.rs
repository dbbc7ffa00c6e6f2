use crate::value::Value;

/// Tag of an [`RValueCell`]. `Immediate` is folded away entirely by the
/// lowering pass (it never reaches a cell); `LValue` and `Temporary` are
/// the two kinds that do travel through the data stack at run time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RValueKind {
    /// Known at lowering time; never materialised as a cell.
    Immediate,
    /// Aliases a variable or table slot — writes through it are visible to
    /// later lookups of the same name/key.
    LValue,
    /// Exists only at run time, carried by value.
    Temporary,
}

/// The run-time representation of an RValue: a kind tag, the `Value`
/// itself, and — when `kind` is `LValue` — the slot it aliases. Allocated
/// out of a stable-address pool by the code generator; the data stack only
/// ever carries pointers to these, never the cells themselves, so a cell's
/// address baked into one `runcall`'s `arg` stays valid for every later
/// `runcall` that reads it.
#[derive(Debug)]
pub struct RValueCell {
    pub kind: RValueKind,
    pub value: Value,
    pub slot: Option<*mut Value>,
}

impl RValueCell {
    pub fn immediate(value: Value) -> Self {
        RValueCell {
            kind: RValueKind::Immediate,
            value,
            slot: None,
        }
    }

    pub fn temporary(value: Value) -> Self {
        RValueCell {
            kind: RValueKind::Temporary,
            value,
            slot: None,
        }
    }

    pub fn lvalue(slot: *mut Value) -> Self {
        RValueCell {
            // SAFETY: `slot` must outlive every read through this cell;
            // callers derive it from a scope or table entry that is kept
            // alive for at least as long (see ScopeStack::resolve, Table::slot).
            kind: RValueKind::LValue,
            value: unsafe { (*slot).clone() },
            slot: Some(slot),
        }
    }

    /// The value to read: for an `LValue`, re-reads through the slot so a
    /// write that happened after construction is observed.
    pub fn read(&self) -> Value {
        match self.slot {
            Some(slot) => unsafe { (*slot).clone() },
            None => self.value.clone(),
        }
    }

    /// Writes `value` through this cell's slot. Returns `Err` if this cell
    /// is not an `LValue` — `ASSIGN`'s `NotAnLValue` failure mode.
    pub fn write(&mut self, value: Value) -> Result<(), ()> {
        match self.slot {
            Some(slot) => {
                unsafe { *slot = value.clone() };
                self.value = value;
                Ok(())
            }
            None => Err(()),
        }
    }

    pub fn is_lvalue(&self) -> bool {
        self.kind == RValueKind::LValue
    }

    /// `RESOLVE_NAME`/`TABLE_ACCESS` rewrite a freshly-pushed result-slot
    /// cell in place to alias `slot`, picking up its current value.
    pub fn set_lvalue(&mut self, slot: *mut Value) {
        self.kind = RValueKind::LValue;
        self.value = unsafe { (*slot).clone() };
        self.slot = Some(slot);
    }

    /// `BINOP`/`UNOP`/`FUNCTION_CALL`/`TABLE_CTOR` rewrite a result-slot
    /// cell in place to carry a freshly computed value with no backing slot.
    pub fn set_temporary(&mut self, value: Value) {
        self.kind = RValueKind::Temporary;
        self.value = value;
        self.slot = None;
    }

    /// Turns this cell into an l-value aliasing its own embedded storage.
    /// Used by the lowering pass to build an ASSIGN destination that is
    /// guaranteed not to alias any variable or table slot — a scratch cell
    /// a right-hand side value can be copied into and read back from
    /// unaffected by any other ASSIGN in the same statement.
    pub fn alias_self(&mut self) {
        self.kind = RValueKind::LValue;
        // SAFETY: valid as long as this cell does not move after this call;
        // the lowering pass only calls this through a pool-stable pointer.
        self.slot = Some(&mut self.value as *mut Value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn temporary_reads_back_its_value() {
        let cell = RValueCell::temporary(Value::Integer(9));
        assert_eq!(cell.read(), Value::Integer(9));
    }

    #[test]
    fn lvalue_reads_through_the_slot_live() {
        let mut backing = Value::Integer(1);
        let cell = RValueCell::lvalue(&mut backing as *mut Value);
        assert_eq!(cell.read(), Value::Integer(1));
        backing = Value::Integer(2);
        assert_eq!(cell.read(), Value::Integer(2));
    }

    #[test]
    fn writing_through_an_lvalue_mutates_the_slot() {
        let mut backing = Value::Integer(1);
        let mut cell = RValueCell::lvalue(&mut backing as *mut Value);
        cell.write(Value::Integer(42)).unwrap();
        assert_eq!(backing, Value::Integer(42));
    }

    #[test]
    fn aliasing_self_lets_a_scratch_cell_act_as_an_assign_destination() {
        let mut cell = Box::new(RValueCell::temporary(Value::Integer(1)));
        cell.alias_self();
        assert!(cell.is_lvalue());
        cell.write(Value::Integer(7)).unwrap();
        assert_eq!(cell.read(), Value::Integer(7));
    }

    #[test]
    fn writing_through_a_non_lvalue_fails() {
        let mut cell = RValueCell::temporary(Value::Integer(1));
        assert!(cell.write(Value::Integer(2)).is_err());
    }
}
