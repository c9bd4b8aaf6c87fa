//! Opcode table
//!
//! Byte values are part of the program cache key format; never renumber.

use crate::error::DqxError;
use std::fmt;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Opcode {
    Halt = 0x00,
    And = 0x01,
    Or = 0x02,
    Lt = 0x05,
    Lte = 0x06,
    Gt = 0x07,
    Gte = 0x08,
    All = 0x09,
    In = 0x0A,
    Nin = 0x0B,
    Eq = 0x0C,
    Ne = 0x0D,
    Size = 0x0E,
    Exists = 0x0F,
    Within = 0x10,
    Near = 0x11,
    Set = 0x12,
    Unset = 0x13,
    Inc = 0x14,
    Pull = 0x15,
    PullAll = 0x16,
    Pop = 0x17,
    Push = 0x18,
    PushAll = 0x19,
    Break = 0x1A,
    Find = 0x1B,
    Scan = 0x1C,
    Range = 0x1D,
    Shift = 0x20,
    Store = 0x21,
    Intersect = 0x23,
    Start = 0x24,
    Jump = 0x25,
    Goto = 0x26,
    Read = 0x27,
    Transpose = 0x28,
    Limit = 0x29,
    Sort = 0x2A,
    RRead = 0x2B,
    RIndex = 0x2C,
}

const ALL_OPCODES: [Opcode; 40] = [
    Opcode::Halt,
    Opcode::And,
    Opcode::Or,
    Opcode::Lt,
    Opcode::Lte,
    Opcode::Gt,
    Opcode::Gte,
    Opcode::All,
    Opcode::In,
    Opcode::Nin,
    Opcode::Eq,
    Opcode::Ne,
    Opcode::Size,
    Opcode::Exists,
    Opcode::Within,
    Opcode::Near,
    Opcode::Set,
    Opcode::Unset,
    Opcode::Inc,
    Opcode::Pull,
    Opcode::PullAll,
    Opcode::Pop,
    Opcode::Push,
    Opcode::PushAll,
    Opcode::Break,
    Opcode::Find,
    Opcode::Scan,
    Opcode::Range,
    Opcode::Shift,
    Opcode::Store,
    Opcode::Intersect,
    Opcode::Start,
    Opcode::Jump,
    Opcode::Goto,
    Opcode::Read,
    Opcode::Transpose,
    Opcode::Limit,
    Opcode::Sort,
    Opcode::RRead,
    Opcode::RIndex,
];

impl Opcode {
    /// Assembly mnemonic used by `explain`.
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Halt => "halt",
            Opcode::And => "and",
            Opcode::Or => "or",
            Opcode::Lt => "lt",
            Opcode::Lte => "lte",
            Opcode::Gt => "gt",
            Opcode::Gte => "gte",
            Opcode::All => "all",
            Opcode::In => "in",
            Opcode::Nin => "nin",
            Opcode::Eq => "eq",
            Opcode::Ne => "ne",
            Opcode::Size => "size",
            Opcode::Exists => "exists",
            Opcode::Within => "within",
            Opcode::Near => "near",
            Opcode::Set => "set",
            Opcode::Unset => "unset",
            Opcode::Inc => "inc",
            Opcode::Pull => "opull",
            Opcode::PullAll => "opullall",
            Opcode::Pop => "opop",
            Opcode::Push => "opush",
            Opcode::PushAll => "opushall",
            Opcode::Break => "break",
            Opcode::Find => "find",
            Opcode::Scan => "scan",
            Opcode::Range => "range",
            Opcode::Shift => "shift",
            Opcode::Store => "store",
            Opcode::Intersect => "intersect",
            Opcode::Start => "start",
            Opcode::Jump => "jump",
            Opcode::Goto => "goto",
            Opcode::Read => "read",
            Opcode::Transpose => "transpose",
            Opcode::Limit => "limit",
            Opcode::Sort => "sort",
            Opcode::RRead => "rread",
            Opcode::RIndex => "rindex",
        }
    }

    /// Whether the opcode rewrites documents (mutate phase only).
    pub fn is_mutation(self) -> bool {
        matches!(
            self,
            Opcode::Set
                | Opcode::Unset
                | Opcode::Inc
                | Opcode::Pull
                | Opcode::PullAll
                | Opcode::Pop
                | Opcode::Push
                | Opcode::PushAll
        )
    }
}

impl From<Opcode> for u8 {
    fn from(op: Opcode) -> u8 {
        op as u8
    }
}

impl TryFrom<u8> for Opcode {
    type Error = DqxError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        ALL_OPCODES
            .iter()
            .copied()
            .find(|op| *op as u8 == byte)
            .ok_or_else(|| DqxError::execution("decode", format!("unknown opcode 0x{byte:02X}")))
    }
}

impl fmt::Display for Opcode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.mnemonic())
    }
}
