pub mod bytecode;
pub mod disasm;
pub mod frame;
pub mod image;
pub mod registers;
pub mod stack;
pub mod threaded;
pub mod trace;

pub use bytecode::{Condition, Instruction, Slot, Target, Width, opcode};
pub use image::BytecodeImage;
pub use registers::RegisterFile;
pub use stack::{GrowthDirection, Stack};
pub use trace::{LogTraceSink, TraceRecord, TraceSink};

use crate::runtime::ExecutionError;
use frame::NO_CALLER;

/// Counters of one run. Both dispatch strategies produce the same values.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ExecStats {
    pub instructions: u64,
    /// Calls executed, excluding the engine's entry into the image.
    pub calls: u64,
    /// Returns to a caller inside the image. The final return to the
    /// engine is not counted, so a balanced run ends with `calls == returns`.
    pub returns: u64,
    /// Deepest operand stack use in bytes.
    pub max_stack_depth: usize,
}

/// Where control goes after one instruction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Flow {
    Next,
    Branch(usize),
    Call(usize),
    Return(ReturnTo),
    Halt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReturnTo {
    Caller(usize),
    Engine,
}

/// Machine state of one engine: the image, both stacks, the registers and
/// the cursors.
///
/// Opcode handlers live in [`ExecutionContext::execute`] and are shared by
/// the generic loop in [`ExecutionContext::run`] and by the threaded code in
/// [`threaded`], which only differ in how they find the next instruction.
pub struct ExecutionContext {
    image: BytecodeImage,
    pub(crate) stack: Stack,
    pub(crate) continuations: Stack,
    pub registers: RegisterFile,
    ip: usize,
    fp: usize,
    /// Set by a compare, consumed by the branch that follows it.
    fused: bool,
    stats: ExecStats,
    trace: Option<Box<dyn TraceSink + Send>>,
}

impl std::fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("image_size", &self.image.size())
            .field("registers", &self.registers)
            .field("ip", &self.ip)
            .field("fp", &self.fp)
            .field("top", &self.stack.top_addr())
            .field("stats", &self.stats)
            .finish_non_exhaustive()
    }
}

macro_rules! slot_op {
    ($self:ident, $at:expr, $slot:expr, |$v:ident| $e:expr) => {{
        let pos = $self.slot_position($slot, $at)?;
        let $v = $self.stack.read_u32_at(pos)?;
        $self.stack.write_u32_at(pos, $e)?;
    }};
}

impl ExecutionContext {
    /// The continuation stack is sized from `stack_size`: one id per frame
    /// the operand stack can hold, plus the engine's root id.
    pub fn new(image: BytecodeImage, stack_size: usize, growth: GrowthDirection) -> Self {
        let continuation_size = (stack_size / frame::HEADER_SIZE + 1) * threaded::ID_SIZE;
        Self {
            image,
            stack: Stack::new(stack_size, growth),
            continuations: Stack::new(continuation_size, growth),
            registers: RegisterFile::default(),
            ip: 0,
            fp: 0,
            fused: false,
            stats: ExecStats::default(),
            trace: None,
        }
    }
    pub fn image(&self) -> &BytecodeImage {
        &self.image
    }
    pub fn stats(&self) -> ExecStats {
        self.stats
    }
    pub fn set_trace_sink(&mut self, sink: Option<Box<dyn TraceSink + Send>>) {
        self.trace = sink;
    }

    /// Reset all state, push `argument` and the sentinel frame, and point the
    /// cursor at the entry offset.
    pub fn prepare(&mut self, argument: u32) -> Result<(), ExecutionError> {
        self.stack.reset();
        self.continuations.reset();
        self.registers.reset();
        self.fused = false;
        self.stats = ExecStats::default();
        self.stack.push_u32(argument)?;
        self.fp = frame::push_frame(&mut self.stack, 0, NO_CALLER)?;
        self.ip = self.image.entry_offset();
        self.stats.max_stack_depth = self.stack.top_addr();
        Ok(())
    }

    /// Generic fetch-decode-execute loop. Returns the accumulator on halt.
    pub fn run(&mut self) -> Result<u32, ExecutionError> {
        loop {
            let (instr, len) = Instruction::decode(&self.image, self.ip)?;
            match self.execute(&instr, self.ip, len)? {
                Flow::Next => self.ip += len,
                Flow::Branch(target) | Flow::Call(target) => self.ip = target,
                Flow::Return(ReturnTo::Caller(addr)) => self.ip = addr,
                Flow::Return(ReturnTo::Engine) | Flow::Halt => {
                    return Ok(self.registers.accumulator);
                }
            }
        }
    }

    fn slot_position(&self, slot: Slot, at: usize) -> Result<usize, ExecutionError> {
        frame::slot_position(self.fp, self.stack.top_addr(), slot)
            .ok_or(ExecutionError::InvalidFrameSlot { offset: at, index: slot })
    }
    fn read_slot(&self, slot: Slot, at: usize) -> Result<u32, ExecutionError> {
        let pos = self.slot_position(slot, at)?;
        self.stack.read_u32_at(pos)
    }
    fn write_slot(&mut self, slot: Slot, at: usize, v: u32) -> Result<(), ExecutionError> {
        let pos = self.slot_position(slot, at)?;
        self.stack.write_u32_at(pos, v)
    }
    /// Releasing `n` bytes must not reach into the frame header.
    fn check_local_pop(&self, n: usize) -> Result<(), ExecutionError> {
        let locals = self.stack.top_addr().saturating_sub(self.fp);
        if n > locals {
            Err(ExecutionError::StackUnderflow {
                requested: n,
                available: locals,
            })
        } else {
            Ok(())
        }
    }

    /// Peek the branch that follows a compare at `at`, evaluate its predicate
    /// and arm the fused branch.
    fn fuse_compare<T: Ord + Default>(
        &mut self,
        at: usize,
        len: usize,
        lhs: T,
        rhs: T,
    ) -> Result<(), ExecutionError> {
        let offset = at + len;
        let opcode = self.image.read_u8(offset)?;
        let (cond, _) = Condition::from_branch_opcode(opcode)
            .ok_or(ExecutionError::IllegalOpcode { opcode, offset })?;
        self.registers.flags = cond.evaluate(lhs, rhs);
        self.fused = true;
        Ok(())
    }

    fn branch(
        &mut self,
        cond: Condition,
        width: Width,
        target: Target,
        at: usize,
        len: usize,
    ) -> Result<Flow, ExecutionError> {
        let taken = match cond {
            Condition::Always => true,
            _ if self.fused => self.registers.flags,
            _ => {
                return Err(ExecutionError::IllegalOpcode {
                    opcode: opcode::branch(cond, width),
                    offset: at,
                });
            }
        };
        self.fused = false;
        if !taken {
            return Ok(Flow::Next);
        }
        target
            .resolve(at + len)
            .map(Flow::Branch)
            .map_err(|target| ExecutionError::InvalidJumpTarget { offset: at, target })
    }

    fn call(&mut self, target: Target, at: usize, len: usize) -> Result<Flow, ExecutionError> {
        let next = at + len;
        let dest = target
            .resolve(next)
            .map_err(|target| ExecutionError::InvalidJumpTarget { offset: at, target })?;
        self.fp = frame::push_frame(&mut self.stack, self.fp, next as stack::Addr)?;
        self.stats.calls += 1;
        Ok(Flow::Call(dest))
    }

    fn ret(&mut self, dealloc: usize, at: usize) -> Result<Flow, ExecutionError> {
        let unwound = frame::pop_frame(&mut self.stack, self.fp, dealloc, self.image.size(), at)?;
        self.fp = unwound.saved_fp;
        if unwound.return_addr == NO_CALLER {
            Ok(Flow::Return(ReturnTo::Engine))
        } else {
            self.stats.returns += 1;
            Ok(Flow::Return(ReturnTo::Caller(unwound.return_addr as usize)))
        }
    }

    /// Run the handler of `instr`, decoded at `at` with encoded length `len`.
    pub(crate) fn execute(
        &mut self,
        instr: &Instruction,
        at: usize,
        len: usize,
    ) -> Result<Flow, ExecutionError> {
        self.stats.instructions += 1;
        let acc = self.registers.accumulator;
        let flow = match *instr {
            Instruction::Push(s) => {
                let v = self.read_slot(s, at)?;
                self.stack.push_u32(v)?;
                Flow::Next
            }
            Instruction::PushI32(v) => {
                self.stack.push_i32(v)?;
                Flow::Next
            }
            Instruction::PushI64(v) => {
                self.stack.push_i64(v)?;
                Flow::Next
            }
            Instruction::PushI32Zero => {
                self.stack.push_i32(0)?;
                Flow::Next
            }
            Instruction::PushI64Zero => {
                self.stack.push_i64(0)?;
                Flow::Next
            }
            Instruction::PopI32 => {
                self.check_local_pop(4)?;
                self.stack.pop_i32()?;
                Flow::Next
            }
            Instruction::PopI64 => {
                self.check_local_pop(8)?;
                self.stack.pop_i64()?;
                Flow::Next
            }
            Instruction::AddSp(n) => {
                self.stack.reserve(n as usize)?;
                Flow::Next
            }
            Instruction::AddSp4 => {
                self.stack.reserve(4)?;
                Flow::Next
            }
            Instruction::SubSp(n) => {
                self.check_local_pop(n as usize)?;
                self.stack.advance(n as usize)?;
                Flow::Next
            }

            Instruction::Load(s, v) => {
                self.write_slot(s, at, v)?;
                Flow::Next
            }
            Instruction::LoadEax(v) => {
                self.registers.accumulator = v;
                Flow::Next
            }
            Instruction::MoveToEax(s) => {
                self.registers.accumulator = self.read_slot(s, at)?;
                Flow::Next
            }
            Instruction::CopyToEax(s) => {
                self.write_slot(s, at, acc)?;
                Flow::Next
            }
            Instruction::Move(dst, src) => {
                let v = self.read_slot(src, at)?;
                self.write_slot(dst, at, v)?;
                Flow::Next
            }

            Instruction::Inc(s) => {
                slot_op!(self, at, s, |v| v.wrapping_add(1));
                Flow::Next
            }
            Instruction::Dec(s) => {
                slot_op!(self, at, s, |v| v.wrapping_sub(1));
                Flow::Next
            }
            Instruction::Add(a, b) => {
                let rhs = self.read_slot(b, at)?;
                slot_op!(self, at, a, |v| v.wrapping_add(rhs));
                Flow::Next
            }
            Instruction::AddImm(s, imm) => {
                slot_op!(self, at, s, |v| v.wrapping_add(imm));
                Flow::Next
            }
            Instruction::AddEax(s) => {
                self.registers.accumulator = acc.wrapping_add(self.read_slot(s, at)?);
                Flow::Next
            }
            Instruction::AddEaxImm(imm) => {
                self.registers.accumulator = acc.wrapping_add(imm);
                Flow::Next
            }
            Instruction::Sub(a, b) => {
                let rhs = self.read_slot(b, at)?;
                slot_op!(self, at, a, |v| v.wrapping_sub(rhs));
                Flow::Next
            }
            Instruction::SubImm(s, imm) => {
                slot_op!(self, at, s, |v| v.wrapping_sub(imm));
                Flow::Next
            }
            Instruction::SubEax(s) => {
                self.registers.accumulator = acc.wrapping_sub(self.read_slot(s, at)?);
                Flow::Next
            }
            Instruction::SubEaxImm(imm) => {
                self.registers.accumulator = acc.wrapping_sub(imm);
                Flow::Next
            }

            Instruction::CmpI32(a, b) => {
                let (lhs, rhs) = (self.read_slot(a, at)?, self.read_slot(b, at)?);
                self.fuse_compare(at, len, lhs as i32, rhs as i32)?;
                Flow::Next
            }
            Instruction::CmpU32(a, b) => {
                let (lhs, rhs) = (self.read_slot(a, at)?, self.read_slot(b, at)?);
                self.fuse_compare(at, len, lhs, rhs)?;
                Flow::Next
            }
            Instruction::CmpImmI32(s, imm) => {
                let lhs = self.read_slot(s, at)? as i32;
                self.fuse_compare(at, len, lhs, imm)?;
                Flow::Next
            }
            Instruction::CmpImmU32(s, imm) => {
                let lhs = self.read_slot(s, at)?;
                self.fuse_compare(at, len, lhs, imm)?;
                Flow::Next
            }

            Instruction::Jump(cond, width, target) => self.branch(cond, width, target, at, len)?,
            Instruction::Call(_, target) => self.call(target, at, len)?,

            Instruction::Ret => self.ret(0, at)?,
            Instruction::RetNSm(n) => self.ret(n as usize, at)?,
            Instruction::RetN(n) => self.ret(n as usize, at)?,
            Instruction::RetEax(v) => {
                self.registers.accumulator = v;
                self.ret(0, at)?
            }
            Instruction::RetEaxN(n, v) => {
                self.registers.accumulator = v;
                self.ret(n as usize, at)?
            }

            Instruction::Nop | Instruction::NopN(_) => Flow::Next,
            Instruction::Exit => Flow::Halt,
        };
        self.stats.max_stack_depth = self.stats.max_stack_depth.max(self.stack.top_addr());
        if let Some(sink) = self.trace.as_mut() {
            sink.record(&TraceRecord {
                offset: at,
                mnemonic: instr.mnemonic(),
                operands: instr.operands(),
                accumulator: self.registers.accumulator,
                flags: self.registers.flags,
            });
        }
        Ok(flow)
    }
}
