//! Call frame layout on the operand stack.
//!
//! ```text
//!   ... | arg1 | arg0 | saved fp (8) | return addr (8) | var0 | var1 | ...
//!                                                     ^ fp
//! ```
//!
//! Positions are logical stack depths. Slot `i >= 0` is local `i` at
//! `fp + 4*i`, slot `i < 0` is argument `-i-1` at `fp - 16 + 4*i`.

use super::bytecode::Slot;
use super::stack::{ADDR_SIZE, Addr, Stack};
use crate::runtime::{ExecutionError, FrameFault};

pub const HEADER_SIZE: usize = 2 * ADDR_SIZE;
pub const SLOT_SIZE: usize = 4;
/// Return address of the frame the engine pushes before entering the image.
pub const NO_CALLER: Addr = Addr::MAX;

/// Logical position of `slot` in the frame at `fp`, or `None` if the slot
/// does not lie inside the stack in use.
pub fn slot_position(fp: usize, top: usize, slot: Slot) -> Option<usize> {
    if slot >= 0 {
        let pos = fp + SLOT_SIZE * slot as usize;
        (pos + SLOT_SIZE <= top).then_some(pos)
    } else {
        let below = HEADER_SIZE + SLOT_SIZE * slot.unsigned_abs() as usize;
        fp.checked_sub(below)
    }
}

/// Push a frame header and return the new frame pointer.
pub fn push_frame(stack: &mut Stack, fp: usize, return_addr: Addr) -> Result<usize, ExecutionError> {
    stack.push_addr(fp as Addr)?;
    stack.push_addr(return_addr)?;
    Ok(stack.top_addr())
}

/// What a return found in the frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unwound {
    pub saved_fp: usize,
    pub return_addr: Addr,
}

/// Release `dealloc` bytes of locals and pop the frame header at `fp`.
///
/// `offset` is the image offset of the returning instruction and only feeds
/// the error. `image_size` bounds the popped return address.
pub fn pop_frame(
    stack: &mut Stack,
    fp: usize,
    dealloc: usize,
    image_size: usize,
    offset: usize,
) -> Result<Unwound, ExecutionError> {
    let malformed = |fault| ExecutionError::MalformedCallFrame { offset, fault };
    let locals = stack.top_addr().saturating_sub(fp);
    if dealloc > locals {
        return Err(malformed(FrameFault::DeallocPastFrame {
            requested: dealloc,
            locals,
        }));
    }
    stack.advance(dealloc)?;
    if stack.top_addr() != fp {
        return Err(malformed(FrameFault::LocalsRemaining(
            stack.top_addr().saturating_sub(fp),
        )));
    }
    let return_addr = stack.pop_addr()?;
    let saved_fp = stack.pop_addr()?;
    if saved_fp > stack.top_addr() as Addr {
        return Err(malformed(FrameFault::SavedFramePointer(saved_fp)));
    }
    if return_addr != NO_CALLER && return_addr >= image_size as Addr {
        return Err(malformed(FrameFault::ReturnAddress(return_addr)));
    }
    Ok(Unwound {
        saved_fp: saved_fp as usize,
        return_addr,
    })
}
