use std::sync::Arc;

use crate::runtime::ExecutionError;

/// Immutable bytecode buffer with its entry point.
///
/// The bytes are reference counted so that one loaded image can back any
/// number of engines, on any number of threads. Nothing in the machine ever
/// writes to them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BytecodeImage {
    bytes: Arc<[u8]>,
    entry_offset: usize,
}

macro_rules! read_le {
    ($name:ident, $t:ty) => {
        pub fn $name(&self, offset: usize) -> Result<$t, ExecutionError> {
            const N: usize = std::mem::size_of::<$t>();
            let raw = self.read_exact::<N>(offset)?;
            Ok(<$t>::from_le_bytes(raw))
        }
    };
}

impl BytecodeImage {
    /// Load `bytes` with execution starting at `entry_offset`.
    pub fn load(bytes: impl Into<Arc<[u8]>>, entry_offset: usize) -> Result<Self, ExecutionError> {
        let bytes = bytes.into();
        if entry_offset >= bytes.len() {
            return Err(ExecutionError::ImageTooSmall {
                entry: entry_offset,
                size: bytes.len(),
            });
        }
        Ok(Self {
            bytes,
            entry_offset,
        })
    }
    pub fn size(&self) -> usize {
        self.bytes.len()
    }
    pub fn entry_offset(&self) -> usize {
        self.entry_offset
    }
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    fn read_exact<const N: usize>(&self, offset: usize) -> Result<[u8; N], ExecutionError> {
        offset
            .checked_add(N)
            .and_then(|end| self.bytes.get(offset..end))
            .and_then(|s| s.try_into().ok())
            .ok_or(ExecutionError::UnexpectedEndOfImage { offset })
    }

    pub fn read_u8(&self, offset: usize) -> Result<u8, ExecutionError> {
        self.bytes
            .get(offset)
            .copied()
            .ok_or(ExecutionError::UnexpectedEndOfImage { offset })
    }
    pub fn read_i8(&self, offset: usize) -> Result<i8, ExecutionError> {
        self.read_u8(offset).map(|b| b as i8)
    }
    read_le!(read_u16, u16);
    read_le!(read_i16, i16);
    read_le!(read_u32, u32);
    read_le!(read_i32, i32);
    read_le!(read_i64, i64);
}
