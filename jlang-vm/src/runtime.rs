use thiserror::Error;

pub mod vm;

/// Why a return could not unwind the current frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameFault {
    /// Deallocating the requested bytes would eat into the frame header.
    DeallocPastFrame { requested: usize, locals: usize },
    /// Locals were still on the stack when the frame was popped.
    LocalsRemaining(usize),
    /// The saved frame pointer lies above the stack top after the pop.
    SavedFramePointer(u64),
    /// The return address is neither the sentinel nor inside the image.
    ReturnAddress(u64),
    /// The continuation id on the side stack does not name the frame's return point.
    Continuation(u32),
}

impl std::fmt::Display for FrameFault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrameFault::DeallocPastFrame { requested, locals } => write!(
                f,
                "deallocating {requested} bytes but the frame only holds {locals} bytes of locals"
            ),
            FrameFault::LocalsRemaining(n) => write!(f, "{n} bytes of locals left on return"),
            FrameFault::SavedFramePointer(fp) => {
                write!(f, "saved frame pointer {fp:#x} is out of stack bounds")
            }
            FrameFault::ReturnAddress(addr) => {
                write!(f, "return address {addr:#x} is outside the image")
            }
            FrameFault::Continuation(id) => {
                write!(f, "continuation id {id} does not match the frame")
            }
        }
    }
}

/// Fatal conditions of a run. None of them is retried: each one means the
/// image is malformed or the configured stacks are too small.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    #[error("image too small: entry offset {entry:#x} is outside an image of {size} bytes")]
    ImageTooSmall { entry: usize, size: usize },
    #[error("illegal opcode 0x{opcode:02X} at {offset:#010x}")]
    IllegalOpcode { opcode: u8, offset: usize },
    #[error("stack overflow: {requested} bytes requested, {available} available")]
    StackOverflow { requested: usize, available: usize },
    #[error("stack underflow: {requested} bytes requested, {available} available")]
    StackUnderflow { requested: usize, available: usize },
    #[error("malformed call frame at {offset:#010x}: {fault}")]
    MalformedCallFrame { offset: usize, fault: FrameFault },
    #[error("unexpected end of image at {offset:#010x}")]
    UnexpectedEndOfImage { offset: usize },
    #[error("jump from {offset:#010x} lands before the image start ({target})")]
    InvalidJumpTarget { offset: usize, target: i64 },
    #[error("frame slot {index} at {offset:#010x} is outside the current frame")]
    InvalidFrameSlot { offset: usize, index: i8 },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ReturnKind {
    #[default]
    Basic,
}

/// Tagged scalar passed into a run as its argument and handed back as its result.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct ReturnValue {
    pub kind: ReturnKind,
    pub value: u32,
}

impl ReturnValue {
    pub fn basic(value: u32) -> Self {
        Self {
            kind: ReturnKind::Basic,
            value,
        }
    }
    pub fn as_i32(&self) -> i32 {
        self.value as i32
    }
}

impl From<u32> for ReturnValue {
    fn from(value: u32) -> Self {
        Self::basic(value)
    }
}

impl From<i32> for ReturnValue {
    fn from(value: i32) -> Self {
        Self::basic(value as u32)
    }
}

impl std::fmt::Display for ReturnValue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.kind {
            ReturnKind::Basic => write!(f, "{}", self.value),
        }
    }
}
