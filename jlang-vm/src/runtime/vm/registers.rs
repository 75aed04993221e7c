/// Accumulator and the flag written by the last compare.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegisterFile {
    pub accumulator: u32,
    pub flags: bool,
}

impl RegisterFile {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
