/// The runcall opcode set, stable integer codes per the external ABI
/// (§6's opcode table) — both the lowering pass and the JIT entry point
/// encode/decode these as raw `i32`s, so the numbering here is load-bearing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum Opcode {
    ScopePush = 0,
    ScopePop = 1,
    Push = 2,
    InitVariable = 3,
    ResolveName = 4,
    Assign = 5,
    UnOp = 6,
    BinOp = 7,
    FunctionCall = 8,
    TableCtor = 9,
    TableAccess = 10,
}

impl Opcode {
    pub fn from_i32(code: i32) -> Option<Self> {
        Some(match code {
            0 => Opcode::ScopePush,
            1 => Opcode::ScopePop,
            2 => Opcode::Push,
            3 => Opcode::InitVariable,
            4 => Opcode::ResolveName,
            5 => Opcode::Assign,
            6 => Opcode::UnOp,
            7 => Opcode::BinOp,
            8 => Opcode::FunctionCall,
            9 => Opcode::TableCtor,
            10 => Opcode::TableAccess,
            _ => return None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_every_documented_code() {
        for code in 0..=10 {
            assert!(Opcode::from_i32(code).is_some(), "code {code} should decode");
        }
    }

    #[test]
    fn unknown_code_is_none() {
        assert!(Opcode::from_i32(11).is_none());
        assert!(Opcode::from_i32(-1).is_none());
    }
}
