//! Direct-threaded dispatch.
//!
//! The image is translated once into a table of pre-decoded operations,
//! each carrying the table indices of its successors. Running the table never
//! decodes or looks up an offset: control moves through the resolved links,
//! and returns resume through the continuation id that the matching call
//! pushed onto the continuation stack.
//!
//! Bytes that fail to decode are kept as fault operations holding the decode
//! error, so an image fails at the same instruction and with the same error
//! as under the generic loop.

use std::collections::{HashMap, VecDeque};

use super::{ExecutionContext, Flow, Instruction, ReturnTo, image::BytecodeImage};
use crate::runtime::{ExecutionError, FrameFault};

/// Continuation id naming the engine itself.
pub const ROOT: u32 = 0;
/// Bytes a continuation id takes on the continuation stack.
pub const ID_SIZE: usize = std::mem::size_of::<u32>();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadedOp {
    pub offset: usize,
    pub len: usize,
    pub decoded: Result<Instruction, ExecutionError>,
    /// Fall-through successor.
    pub next: Option<usize>,
    /// Branch or call destination.
    pub taken: Option<usize>,
    /// Continuation id pushed by a call, `ROOT` for every other operation.
    pub continuation: u32,
}

/// Where a continuation id resumes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resume {
    pub return_offset: usize,
    pub op: usize,
}

/// Translated form of one image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadedCode {
    ops: Vec<ThreadedOp>,
    /// Indexed by continuation id minus one.
    resume: Vec<Resume>,
    entry: usize,
}

struct Translator<'a> {
    image: &'a BytecodeImage,
    ops: Vec<ThreadedOp>,
    index: HashMap<usize, usize>,
    pending: VecDeque<usize>,
}

impl Translator<'_> {
    /// Table index of the operation at `offset`, queuing it for decoding on
    /// first sight.
    fn op_at(&mut self, offset: usize) -> usize {
        if let Some(&i) = self.index.get(&offset) {
            return i;
        }
        let i = self.ops.len();
        self.ops.push(ThreadedOp {
            offset,
            len: 0,
            decoded: Err(ExecutionError::UnexpectedEndOfImage { offset }),
            next: None,
            taken: None,
            continuation: ROOT,
        });
        self.index.insert(offset, i);
        self.pending.push_back(i);
        i
    }

    fn translate(&mut self, i: usize) {
        let offset = self.ops[i].offset;
        let (instr, len) = match Instruction::decode(self.image, offset) {
            Ok(decoded) => decoded,
            Err(e) => {
                self.ops[i].decoded = Err(e);
                return;
            }
        };
        let next = offset + len;
        let falls_through = !matches!(
            instr,
            Instruction::Jump(super::Condition::Always, ..)
                | Instruction::Ret
                | Instruction::RetNSm(_)
                | Instruction::RetN(_)
                | Instruction::RetEax(_)
                | Instruction::RetEaxN(..)
                | Instruction::Exit
        );
        let destination = match instr {
            Instruction::Jump(_, _, target) | Instruction::Call(_, target) => {
                target.resolve(next).ok()
            }
            _ => None,
        };
        let next_op = falls_through.then(|| self.op_at(next));
        let taken_op = destination.map(|d| self.op_at(d));
        let op = &mut self.ops[i];
        op.len = len;
        op.decoded = Ok(instr);
        op.next = next_op;
        op.taken = taken_op;
    }
}

impl ThreadedCode {
    /// Translate everything reachable from the entry offset of `image`.
    pub fn translate(image: &BytecodeImage) -> Self {
        let mut tr = Translator {
            image,
            ops: vec![],
            index: HashMap::new(),
            pending: VecDeque::new(),
        };
        let entry = tr.op_at(image.entry_offset());
        while let Some(i) = tr.pending.pop_front() {
            tr.translate(i);
        }
        let mut ops = tr.ops;
        let mut resume = vec![];
        for op in ops.iter_mut() {
            if let (Ok(Instruction::Call(..)), Some(next)) = (&op.decoded, op.next) {
                resume.push(Resume {
                    return_offset: op.offset + op.len,
                    op: next,
                });
                op.continuation = resume.len() as u32;
            }
        }
        log::debug!(
            "translated {} ops with {} call sites",
            ops.len(),
            resume.len()
        );
        Self { ops, resume, entry }
    }
    pub fn ops(&self) -> &[ThreadedOp] {
        &self.ops
    }
    pub fn resume(&self, id: u32) -> Option<&Resume> {
        (id as usize).checked_sub(1).and_then(|i| self.resume.get(i))
    }
}

fn follow(link: Option<usize>, offset: usize) -> Result<usize, ExecutionError> {
    link.ok_or(ExecutionError::UnexpectedEndOfImage { offset })
}

/// Run translated code on a prepared context. Returns the accumulator on halt.
pub fn run(ctx: &mut ExecutionContext, code: &ThreadedCode) -> Result<u32, ExecutionError> {
    ctx.continuations.push_u32(ROOT)?;
    let mut pc = code.entry;
    loop {
        let op = &code.ops[pc];
        let instr = op.decoded.clone()?;
        pc = match ctx.execute(&instr, op.offset, op.len)? {
            Flow::Next => follow(op.next, op.offset + op.len)?,
            Flow::Branch(target) => follow(op.taken, target)?,
            Flow::Call(target) => {
                let dest = follow(op.taken, target)?;
                ctx.continuations.push_u32(op.continuation)?;
                dest
            }
            Flow::Return(to) => {
                let id = ctx.continuations.pop_u32()?;
                match (to, code.resume(id)) {
                    (ReturnTo::Engine, None) if id == ROOT => {
                        return Ok(ctx.registers.accumulator);
                    }
                    (ReturnTo::Caller(addr), Some(resume)) if resume.return_offset == addr => {
                        resume.op
                    }
                    _ => {
                        return Err(ExecutionError::MalformedCallFrame {
                            offset: op.offset,
                            fault: FrameFault::Continuation(id),
                        });
                    }
                }
            }
            Flow::Halt => return Ok(ctx.registers.accumulator),
        };
    }
}
