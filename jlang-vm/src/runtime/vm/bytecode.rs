//! Opcode numbering, operand encodings and the decoded [`Instruction`] form.
//!
//! Every instruction starts with a single opcode byte followed by fixed-width
//! little-endian operands. `slot` operands are signed frame indices, see
//! [`super::frame`].

use itertools::Itertools;

use super::image::BytecodeImage;
use crate::runtime::ExecutionError;

/// Frame slot index. Non-negative values are locals, negative values arguments.
pub type Slot = i8;

pub mod opcode {
    use super::{Condition, Width};

    pub const PUSH: u8 = 0x01;
    pub const PUSH_I32: u8 = 0x02;
    pub const PUSH_I64: u8 = 0x03;
    pub const PUSH_I32_0: u8 = 0x04;
    pub const PUSH_I64_0: u8 = 0x05;
    pub const POP_I32: u8 = 0x06;
    pub const POP_I64: u8 = 0x07;
    pub const ADD_SP: u8 = 0x08;
    pub const ADD_SP_4: u8 = 0x09;
    pub const SUB_SP: u8 = 0x0A;

    pub const LOAD: u8 = 0x10;
    pub const LOAD_EAX: u8 = 0x11;
    pub const MOVE_TO_EAX: u8 = 0x12;
    pub const COPY_TO_EAX: u8 = 0x13;
    pub const MOVE: u8 = 0x14;

    pub const INC: u8 = 0x20;
    pub const DEC: u8 = 0x21;
    pub const ADD: u8 = 0x22;
    pub const ADD_IMM: u8 = 0x23;
    pub const ADD_EAX: u8 = 0x24;
    pub const ADD_EAX_IMM: u8 = 0x25;
    pub const SUB: u8 = 0x26;
    pub const SUB_IMM: u8 = 0x27;
    pub const SUB_EAX: u8 = 0x28;
    pub const SUB_EAX_IMM: u8 = 0x29;

    pub const CMP_I32: u8 = 0x30;
    pub const CMP_U32: u8 = 0x31;
    pub const CMP_IMM_I32: u8 = 0x32;
    pub const CMP_IMM_U32: u8 = 0x33;

    pub const BRANCH_FIRST: u8 = 0x40;
    pub const BRANCH_LAST: u8 = BRANCH_FIRST + (Condition::COUNT * Width::COUNT) as u8 - 1;

    pub const CALL_NEAR: u8 = 0x70;
    pub const CALL_SHORT: u8 = 0x71;
    pub const CALL_LONG: u8 = 0x72;
    pub const CALL: u8 = 0x73;

    pub const RET: u8 = 0x78;
    pub const RET_N_SM: u8 = 0x79;
    pub const RET_N: u8 = 0x7A;
    pub const RET_EAX: u8 = 0x7B;
    pub const RET_EAX_N: u8 = 0x7C;

    pub const NOP: u8 = 0x90;
    pub const NOP_N: u8 = 0x91;

    pub const EXIT: u8 = 0xFF;

    /// Opcode byte of the branch testing `cond` with a `width` target.
    pub const fn branch(cond: Condition, width: Width) -> u8 {
        BRANCH_FIRST + (cond as u8) * (Width::COUNT as u8) + width as u8
    }

    pub const JMP_NEAR: u8 = branch(Condition::Always, Width::Near);
    pub const JMP_SHORT: u8 = branch(Condition::Always, Width::Short);
    pub const JMP_LONG: u8 = branch(Condition::Always, Width::Long);
    pub const JMP: u8 = branch(Condition::Always, Width::Absolute);
    pub const JE_NEAR: u8 = branch(Condition::Equal, Width::Near);
    pub const JNE_NEAR: u8 = branch(Condition::NotEqual, Width::Near);
    pub const JL_NEAR: u8 = branch(Condition::Less, Width::Near);
    pub const JL_SHORT: u8 = branch(Condition::Less, Width::Short);
    pub const JL_LONG: u8 = branch(Condition::Less, Width::Long);
    pub const JL: u8 = branch(Condition::Less, Width::Absolute);
    pub const JGE_NEAR: u8 = branch(Condition::GreaterEqual, Width::Near);
}

/// Predicate selected by the branch that follows a compare.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Condition {
    Always = 0,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    Sign,
    NotSign,
}

impl Condition {
    pub const COUNT: usize = 9;
    const ALL: [Condition; Self::COUNT] = [
        Condition::Always,
        Condition::Equal,
        Condition::NotEqual,
        Condition::Less,
        Condition::LessEqual,
        Condition::Greater,
        Condition::GreaterEqual,
        Condition::Sign,
        Condition::NotSign,
    ];
    /// Branch condition and target width encoded by `byte`, if it is a branch opcode.
    pub fn from_branch_opcode(byte: u8) -> Option<(Condition, Width)> {
        if !(opcode::BRANCH_FIRST..=opcode::BRANCH_LAST).contains(&byte) {
            return None;
        }
        let rel = (byte - opcode::BRANCH_FIRST) as usize;
        Some((
            Self::ALL[rel / Width::COUNT],
            Width::ALL[rel % Width::COUNT],
        ))
    }
    /// Sign tests only look at the left operand.
    pub fn evaluate<T: Ord + Default>(&self, lhs: T, rhs: T) -> bool {
        match self {
            Condition::Always => true,
            Condition::Equal => lhs == rhs,
            Condition::NotEqual => lhs != rhs,
            Condition::Less => lhs < rhs,
            Condition::LessEqual => lhs <= rhs,
            Condition::Greater => lhs > rhs,
            Condition::GreaterEqual => lhs >= rhs,
            Condition::Sign => lhs > T::default(),
            Condition::NotSign => lhs <= T::default(),
        }
    }
}

/// Encoding of a branch or call target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Width {
    /// 1-byte signed relative offset.
    Near = 0,
    /// 2-byte signed relative offset.
    Short,
    /// 4-byte signed relative offset.
    Long,
    /// 4-byte unsigned image offset.
    Absolute,
}

impl Width {
    pub const COUNT: usize = 4;
    const ALL: [Width; Self::COUNT] = [Width::Near, Width::Short, Width::Long, Width::Absolute];
    pub fn operand_size(&self) -> usize {
        match self {
            Width::Near => 1,
            Width::Short => 2,
            Width::Long | Width::Absolute => 4,
        }
    }
}

/// Decoded branch/call target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Target {
    Relative(i32),
    Absolute(u32),
}

impl Target {
    fn decode(width: Width, image: &BytecodeImage, at: usize) -> Result<Self, ExecutionError> {
        Ok(match width {
            Width::Near => Target::Relative(image.read_i8(at)? as i32),
            Width::Short => Target::Relative(image.read_i16(at)? as i32),
            Width::Long => Target::Relative(image.read_i32(at)?),
            Width::Absolute => Target::Absolute(image.read_u32(at)?),
        })
    }
    /// Resolve against the offset just past the instruction.
    /// Returns `Err(raw)` when the result would lie before the image start.
    pub fn resolve(&self, next: usize) -> Result<usize, i64> {
        match *self {
            Target::Absolute(addr) => Ok(addr as usize),
            Target::Relative(rel) => {
                next.checked_add_signed(rel as isize)
                    .ok_or(next as i64 + rel as i64)
            }
        }
    }
}

impl std::fmt::Display for Target {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Target::Relative(rel) => write!(f, "{rel:+}"),
            Target::Absolute(addr) => write!(f, "{addr:#010x}"),
        }
    }
}

/// One decoded instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Instruction {
    Push(Slot),
    PushI32(i32),
    PushI64(i64),
    PushI32Zero,
    PushI64Zero,
    PopI32,
    PopI64,
    AddSp(u8),
    AddSp4,
    SubSp(u8),

    Load(Slot, u32),
    LoadEax(u32),
    MoveToEax(Slot),
    CopyToEax(Slot),
    Move(Slot, Slot),

    Inc(Slot),
    Dec(Slot),
    Add(Slot, Slot),
    AddImm(Slot, u32),
    AddEax(Slot),
    AddEaxImm(u32),
    Sub(Slot, Slot),
    SubImm(Slot, u32),
    SubEax(Slot),
    SubEaxImm(u32),

    CmpI32(Slot, Slot),
    CmpU32(Slot, Slot),
    CmpImmI32(Slot, i32),
    CmpImmU32(Slot, u32),

    Jump(Condition, Width, Target),
    Call(Width, Target),

    Ret,
    RetNSm(u8),
    RetN(u16),
    RetEax(u32),
    RetEaxN(u16, u32),

    Nop,
    NopN(u8),
    Exit,
}

impl Instruction {
    /// Decode the instruction at `offset`. Returns the instruction with its
    /// encoded length.
    pub fn decode(image: &BytecodeImage, offset: usize) -> Result<(Self, usize), ExecutionError> {
        use opcode::*;
        let byte = image.read_u8(offset)?;
        let at = offset + 1;
        let slot = |i: usize| image.read_i8(at + i);
        let instr = match byte {
            PUSH => Instruction::Push(slot(0)?),
            PUSH_I32 => Instruction::PushI32(image.read_i32(at)?),
            PUSH_I64 => Instruction::PushI64(image.read_i64(at)?),
            PUSH_I32_0 => Instruction::PushI32Zero,
            PUSH_I64_0 => Instruction::PushI64Zero,
            POP_I32 => Instruction::PopI32,
            POP_I64 => Instruction::PopI64,
            ADD_SP => Instruction::AddSp(image.read_u8(at)?),
            ADD_SP_4 => Instruction::AddSp4,
            SUB_SP => Instruction::SubSp(image.read_u8(at)?),
            LOAD => Instruction::Load(slot(0)?, image.read_u32(at + 1)?),
            LOAD_EAX => Instruction::LoadEax(image.read_u32(at)?),
            MOVE_TO_EAX => Instruction::MoveToEax(slot(0)?),
            COPY_TO_EAX => Instruction::CopyToEax(slot(0)?),
            MOVE => Instruction::Move(slot(0)?, slot(1)?),
            INC => Instruction::Inc(slot(0)?),
            DEC => Instruction::Dec(slot(0)?),
            ADD => Instruction::Add(slot(0)?, slot(1)?),
            ADD_IMM => Instruction::AddImm(slot(0)?, image.read_u32(at + 1)?),
            ADD_EAX => Instruction::AddEax(slot(0)?),
            ADD_EAX_IMM => Instruction::AddEaxImm(image.read_u32(at)?),
            SUB => Instruction::Sub(slot(0)?, slot(1)?),
            SUB_IMM => Instruction::SubImm(slot(0)?, image.read_u32(at + 1)?),
            SUB_EAX => Instruction::SubEax(slot(0)?),
            SUB_EAX_IMM => Instruction::SubEaxImm(image.read_u32(at)?),
            CMP_I32 => Instruction::CmpI32(slot(0)?, slot(1)?),
            CMP_U32 => Instruction::CmpU32(slot(0)?, slot(1)?),
            CMP_IMM_I32 => Instruction::CmpImmI32(slot(0)?, image.read_i32(at + 1)?),
            CMP_IMM_U32 => Instruction::CmpImmU32(slot(0)?, image.read_u32(at + 1)?),
            CALL_NEAR => Instruction::Call(Width::Near, Target::decode(Width::Near, image, at)?),
            CALL_SHORT => Instruction::Call(Width::Short, Target::decode(Width::Short, image, at)?),
            CALL_LONG => Instruction::Call(Width::Long, Target::decode(Width::Long, image, at)?),
            CALL => Instruction::Call(
                Width::Absolute,
                Target::decode(Width::Absolute, image, at)?,
            ),
            RET => Instruction::Ret,
            RET_N_SM => Instruction::RetNSm(image.read_u8(at)?),
            RET_N => Instruction::RetN(image.read_u16(at)?),
            RET_EAX => Instruction::RetEax(image.read_u32(at)?),
            RET_EAX_N => Instruction::RetEaxN(image.read_u16(at)?, image.read_u32(at + 2)?),
            NOP => Instruction::Nop,
            NOP_N => Instruction::NopN(image.read_u8(at)?),
            EXIT => Instruction::Exit,
            _ => match Condition::from_branch_opcode(byte) {
                Some((cond, width)) => {
                    Instruction::Jump(cond, width, Target::decode(width, image, at)?)
                }
                None => {
                    return Err(ExecutionError::IllegalOpcode {
                        opcode: byte,
                        offset,
                    });
                }
            },
        };
        Ok((instr, instr.encoded_len()))
    }

    /// Number of bytes the instruction occupies, opcode included. `nop_n`
    /// counts the bytes it skips.
    pub fn encoded_len(&self) -> usize {
        1 + match self {
            Instruction::PushI32Zero
            | Instruction::PushI64Zero
            | Instruction::PopI32
            | Instruction::PopI64
            | Instruction::AddSp4
            | Instruction::Ret
            | Instruction::Nop
            | Instruction::Exit => 0,
            Instruction::Push(_)
            | Instruction::AddSp(_)
            | Instruction::SubSp(_)
            | Instruction::MoveToEax(_)
            | Instruction::CopyToEax(_)
            | Instruction::Inc(_)
            | Instruction::Dec(_)
            | Instruction::AddEax(_)
            | Instruction::SubEax(_)
            | Instruction::RetNSm(_) => 1,
            Instruction::Move(..)
            | Instruction::Add(..)
            | Instruction::Sub(..)
            | Instruction::CmpI32(..)
            | Instruction::CmpU32(..)
            | Instruction::RetN(_) => 2,
            Instruction::PushI32(_)
            | Instruction::LoadEax(_)
            | Instruction::AddEaxImm(_)
            | Instruction::SubEaxImm(_)
            | Instruction::RetEax(_) => 4,
            Instruction::Load(..)
            | Instruction::AddImm(..)
            | Instruction::SubImm(..)
            | Instruction::CmpImmI32(..)
            | Instruction::CmpImmU32(..) => 5,
            Instruction::RetEaxN(..) => 6,
            Instruction::PushI64(_) => 8,
            Instruction::Jump(_, width, _) | Instruction::Call(width, _) => width.operand_size(),
            Instruction::NopN(n) => 1 + *n as usize,
        }
    }

    pub fn mnemonic(&self) -> &'static str {
        match self {
            Instruction::Push(_) => "push",
            Instruction::PushI32(_) => "push_i32",
            Instruction::PushI64(_) => "push_i64",
            Instruction::PushI32Zero => "push_i32_0",
            Instruction::PushI64Zero => "push_i64_0",
            Instruction::PopI32 => "pop_i32",
            Instruction::PopI64 => "pop_i64",
            Instruction::AddSp(_) => "add_sp",
            Instruction::AddSp4 => "add_sp_4",
            Instruction::SubSp(_) => "sub_sp",
            Instruction::Load(..) => "load",
            Instruction::LoadEax(_) => "load_eax",
            Instruction::MoveToEax(_) => "move_to_eax",
            Instruction::CopyToEax(_) => "copy_to_eax",
            Instruction::Move(..) => "move",
            Instruction::Inc(_) => "inc",
            Instruction::Dec(_) => "dec",
            Instruction::Add(..) => "add",
            Instruction::AddImm(..) => "add_imm",
            Instruction::AddEax(_) => "add_eax",
            Instruction::AddEaxImm(_) => "add_eax_imm",
            Instruction::Sub(..) => "sub",
            Instruction::SubImm(..) => "sub_imm",
            Instruction::SubEax(_) => "sub_eax",
            Instruction::SubEaxImm(_) => "sub_eax_imm",
            Instruction::CmpI32(..) => "cmp_i32",
            Instruction::CmpU32(..) => "cmp_u32",
            Instruction::CmpImmI32(..) => "cmp_imm_i32",
            Instruction::CmpImmU32(..) => "cmp_imm_u32",
            Instruction::Jump(cond, width, _) => BRANCH_MNEMONICS[*cond as usize][*width as usize],
            Instruction::Call(width, _) => match width {
                Width::Near => "call_near",
                Width::Short => "call_short",
                Width::Long => "call_long",
                Width::Absolute => "call",
            },
            Instruction::Ret => "ret",
            Instruction::RetNSm(_) => "ret_n_sm",
            Instruction::RetN(_) => "ret_n",
            Instruction::RetEax(_) => "ret_eax",
            Instruction::RetEaxN(..) => "ret_eax_n",
            Instruction::Nop => "nop",
            Instruction::NopN(_) => "nop_n",
            Instruction::Exit => "exit",
        }
    }

    /// Operands rendered for listings and trace records.
    pub fn operands(&self) -> String {
        match *self {
            Instruction::Push(s)
            | Instruction::MoveToEax(s)
            | Instruction::CopyToEax(s)
            | Instruction::Inc(s)
            | Instruction::Dec(s) => format_slot(s),
            Instruction::AddEax(s) | Instruction::SubEax(s) => format!("eax, {}", format_slot(s)),
            Instruction::PushI32(v) => format!("{v:#010x}"),
            Instruction::PushI64(v) => format!("{v:#018x}"),
            Instruction::AddSp(n)
            | Instruction::SubSp(n)
            | Instruction::RetNSm(n)
            | Instruction::NopN(n) => n.to_string(),
            Instruction::RetN(n) => n.to_string(),
            Instruction::LoadEax(v)
            | Instruction::RetEax(v)
            | Instruction::AddEaxImm(v)
            | Instruction::SubEaxImm(v) => format!("eax, {v:#010x}"),
            Instruction::RetEaxN(n, v) => format!("{n}, eax, {v:#010x}"),
            Instruction::Load(s, v)
            | Instruction::AddImm(s, v)
            | Instruction::SubImm(s, v)
            | Instruction::CmpImmU32(s, v) => format!("{}, {v:#010x}", format_slot(s)),
            Instruction::CmpImmI32(s, v) => format!("{}, {v}", format_slot(s)),
            Instruction::Move(a, b)
            | Instruction::Add(a, b)
            | Instruction::Sub(a, b)
            | Instruction::CmpI32(a, b)
            | Instruction::CmpU32(a, b) => [a, b].into_iter().map(format_slot).join(", "),
            Instruction::Jump(_, _, target) | Instruction::Call(_, target) => target.to_string(),
            Instruction::PushI32Zero
            | Instruction::PushI64Zero
            | Instruction::PopI32
            | Instruction::PopI64
            | Instruction::AddSp4
            | Instruction::Ret
            | Instruction::Nop
            | Instruction::Exit => String::new(),
        }
    }
}

const BRANCH_MNEMONICS: [[&str; Width::COUNT]; Condition::COUNT] = [
    ["jmp_near", "jmp_short", "jmp_long", "jmp"],
    ["je_near", "je_short", "je_long", "je"],
    ["jne_near", "jne_short", "jne_long", "jne"],
    ["jl_near", "jl_short", "jl_long", "jl"],
    ["jle_near", "jle_short", "jle_long", "jle"],
    ["jg_near", "jg_short", "jg_long", "jg"],
    ["jge_near", "jge_short", "jge_long", "jge"],
    ["js_near", "js_short", "js_long", "js"],
    ["jns_near", "jns_short", "jns_long", "jns"],
];

fn format_slot(slot: Slot) -> String {
    if slot < 0 {
        format!("arg{}", -(slot as i16) - 1)
    } else {
        format!("var{slot}")
    }
}

impl std::fmt::Display for Instruction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let operands = self.operands();
        if operands.is_empty() {
            write!(f, "{}", self.mnemonic())
        } else {
            write!(f, "{:<12} {}", self.mnemonic(), operands)
        }
    }
}
