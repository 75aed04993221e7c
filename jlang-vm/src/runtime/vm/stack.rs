use crate::runtime::ExecutionError;

/// Saved frame pointers and return addresses are stored with this width on
/// every host.
pub type Addr = u64;
pub const ADDR_SIZE: usize = std::mem::size_of::<Addr>();

/// Which way the physical cursor moves when values are pushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum GrowthDirection {
    /// Pushing increases the buffer index.
    #[default]
    Upward,
    /// Pushing decreases the buffer index, starting from the end of the buffer.
    Downward,
}

/// Fixed-capacity byte stack.
///
/// Positions handed out by the stack (`top_addr`, the `*_at` accessors) are
/// logical depths: the number of bytes between the stack base and the start
/// of a value, counted in push order. Logical byte `p` is stored at buffer
/// index `p` when growing upward and at `capacity - 1 - p` when growing
/// downward, so a value reads the same through any logical position in
/// either direction. Only [`Stack::store`] and [`Stack::load`] know about
/// the growth direction.
#[derive(Debug, Clone)]
pub struct Stack {
    buffer: Vec<u8>,
    top: usize,
    direction: GrowthDirection,
}

macro_rules! push_pop {
    ($push:ident, $pop:ident, $t:ty) => {
        pub fn $push(&mut self, v: $t) -> Result<(), ExecutionError> {
            self.push_bytes(&v.to_le_bytes())
        }
        pub fn $pop(&mut self) -> Result<$t, ExecutionError> {
            const N: usize = std::mem::size_of::<$t>();
            let mut raw = [0u8; N];
            self.pop_bytes(&mut raw)?;
            Ok(<$t>::from_le_bytes(raw))
        }
    };
}

impl Stack {
    pub fn new(capacity: usize, direction: GrowthDirection) -> Self {
        Self {
            buffer: vec![0; capacity],
            top: 0,
            direction,
        }
    }
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
    pub fn direction(&self) -> GrowthDirection {
        self.direction
    }
    /// Logical position of the next free byte, which is also the number of
    /// bytes in use.
    pub fn top_addr(&self) -> usize {
        self.top
    }
    pub fn is_empty(&self) -> bool {
        self.top == 0
    }
    pub fn reset(&mut self) {
        self.top = 0;
    }
    /// Whether pushing `n` more bytes would run past the capacity.
    pub fn is_overflow(&self, n: usize) -> bool {
        n > self.capacity() - self.top
    }
    /// Whether removing `n` bytes would run below the base.
    pub fn is_underflow(&self, n: usize) -> bool {
        n > self.top
    }

    fn physical(&self, pos: usize, len: usize) -> std::ops::Range<usize> {
        match self.direction {
            GrowthDirection::Upward => pos..pos + len,
            GrowthDirection::Downward => {
                let end = self.capacity() - pos;
                end - len..end
            }
        }
    }
    fn store(&mut self, pos: usize, bytes: &[u8]) {
        let range = self.physical(pos, bytes.len());
        let dst = &mut self.buffer[range];
        dst.copy_from_slice(bytes);
        if self.direction == GrowthDirection::Downward {
            dst.reverse();
        }
    }
    fn load(&self, pos: usize, out: &mut [u8]) {
        let range = self.physical(pos, out.len());
        out.copy_from_slice(&self.buffer[range]);
        if self.direction == GrowthDirection::Downward {
            out.reverse();
        }
    }

    fn check_push(&self, n: usize) -> Result<(), ExecutionError> {
        if self.is_overflow(n) {
            Err(ExecutionError::StackOverflow {
                requested: n,
                available: self.capacity() - self.top,
            })
        } else {
            Ok(())
        }
    }
    fn check_pop(&self, n: usize) -> Result<(), ExecutionError> {
        if self.is_underflow(n) {
            Err(ExecutionError::StackUnderflow {
                requested: n,
                available: self.top,
            })
        } else {
            Ok(())
        }
    }

    fn push_bytes(&mut self, bytes: &[u8]) -> Result<(), ExecutionError> {
        self.check_push(bytes.len())?;
        self.store(self.top, bytes);
        self.top += bytes.len();
        Ok(())
    }
    fn pop_bytes(&mut self, out: &mut [u8]) -> Result<(), ExecutionError> {
        self.check_pop(out.len())?;
        self.top -= out.len();
        self.load(self.top, out);
        Ok(())
    }

    push_pop!(push_u32, pop_u32, u32);
    push_pop!(push_i32, pop_i32, i32);
    push_pop!(push_u64, pop_u64, u64);
    push_pop!(push_i64, pop_i64, i64);

    pub fn push_addr(&mut self, addr: Addr) -> Result<(), ExecutionError> {
        self.push_u64(addr)
    }
    pub fn pop_addr(&mut self) -> Result<Addr, ExecutionError> {
        self.pop_u64()
    }

    /// Grow by `n` zeroed bytes without supplying values.
    pub fn reserve(&mut self, n: usize) -> Result<(), ExecutionError> {
        self.check_push(n)?;
        let range = self.physical(self.top, n);
        self.buffer[range].fill(0);
        self.top += n;
        Ok(())
    }
    /// Release `n` bytes without reading them.
    pub fn advance(&mut self, n: usize) -> Result<(), ExecutionError> {
        self.check_pop(n)?;
        self.top -= n;
        Ok(())
    }

    /// Read the 4 bytes starting at logical position `pos`. The value must lie
    /// entirely below the top.
    pub fn read_u32_at(&self, pos: usize) -> Result<u32, ExecutionError> {
        self.check_in_use(pos, 4)?;
        let mut raw = [0u8; 4];
        self.load(pos, &mut raw);
        Ok(u32::from_le_bytes(raw))
    }
    pub fn write_u32_at(&mut self, pos: usize, v: u32) -> Result<(), ExecutionError> {
        self.check_in_use(pos, 4)?;
        self.store(pos, &v.to_le_bytes());
        Ok(())
    }
    fn check_in_use(&self, pos: usize, len: usize) -> Result<(), ExecutionError> {
        match pos.checked_add(len) {
            Some(end) if end <= self.top => Ok(()),
            _ => Err(ExecutionError::StackUnderflow {
                requested: len,
                available: self.top.saturating_sub(pos),
            }),
        }
    }
}
