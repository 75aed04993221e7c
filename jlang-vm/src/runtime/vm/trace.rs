use std::sync::mpsc::Sender;

/// One executed instruction, as seen after its effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceRecord {
    pub offset: usize,
    pub mnemonic: &'static str,
    pub operands: String,
    pub accumulator: u32,
    pub flags: bool,
}

impl std::fmt::Display for TraceRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{:08x}: {:<12} {:<24} eax={:#010x} flags={}",
            self.offset, self.mnemonic, self.operands, self.accumulator, self.flags as u8
        )
    }
}

/// Receiver of per-instruction trace records. Diagnostic only: a sink can
/// not influence execution.
pub trait TraceSink {
    fn record(&mut self, record: &TraceRecord);
}

/// Writes every record to the `log` facade at trace level.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogTraceSink;

impl TraceSink for LogTraceSink {
    fn record(&mut self, record: &TraceRecord) {
        log::trace!("{record}");
    }
}

impl TraceSink for Sender<TraceRecord> {
    fn record(&mut self, record: &TraceRecord) {
        // the receiver going away only ends the trace
        let _ = self.send(record.clone());
    }
}
