//! Bytecode machine for **jlang** images.
//!
//! An image is a flat byte buffer of fixed-width little-endian instructions
//! with an entry offset. [`ExecutionEngine`] loads one and runs it to a single
//! [`ReturnValue`], either with the generic fetch-decode loop
//! ([`ExecutionEngine::run`]) or with pre-translated threaded code
//! ([`ExecutionEngine::run_threaded`]). Both produce the same results,
//! errors, statistics and traces.

pub mod runtime;
pub mod samples;

pub use log;
pub use runtime::{ExecutionError, FrameFault, ReturnKind, ReturnValue};

use runtime::vm::{
    self, BytecodeImage, ExecStats, ExecutionContext, GrowthDirection, LogTraceSink, TraceSink,
    threaded::{self, ThreadedCode},
};

/// Configuration of an [`ExecutionEngine`].
#[derive(Debug, Clone, Copy)]
pub struct Config {
    /// Operand stack capacity in bytes.
    pub stack_size: usize,
    pub growth: GrowthDirection,
    /// Send a trace of every executed instruction to the `log` facade.
    pub trace: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stack_size: 8 * 1024 * 1024,
            growth: GrowthDirection::default(),
            trace: false,
        }
    }
}

/// A loaded image together with the machine state that runs it.
///
/// Threaded code is translated on the first call to
/// [`run_threaded`](Self::run_threaded) and kept for later runs.
#[derive(Debug)]
pub struct ExecutionEngine {
    image: BytecodeImage,
    ctx: ExecutionContext,
    threaded: Option<ThreadedCode>,
    config: Config,
}

impl ExecutionEngine {
    /// Load `bytes` with execution starting at `entry_offset`.
    pub fn create(
        bytes: impl Into<std::sync::Arc<[u8]>>,
        entry_offset: usize,
        config: Config,
    ) -> Result<Self, ExecutionError> {
        let image = BytecodeImage::load(bytes, entry_offset)?;
        Ok(Self::new(image, config))
    }
    pub fn new(image: BytecodeImage, config: Config) -> Self {
        let mut ctx = ExecutionContext::new(image.clone(), config.stack_size, config.growth);
        if config.trace {
            ctx.set_trace_sink(Some(Box::new(LogTraceSink)));
        }
        log::debug!(
            "loaded image of {} bytes, entry {:#x}, {:?}",
            image.size(),
            image.entry_offset(),
            config
        );
        Self {
            image,
            ctx,
            threaded: None,
            config,
        }
    }
    pub fn image(&self) -> &BytecodeImage {
        &self.image
    }
    pub fn config(&self) -> &Config {
        &self.config
    }
    /// Statistics of the last run.
    pub fn stats(&self) -> ExecStats {
        self.ctx.stats()
    }
    pub fn context(&self) -> &ExecutionContext {
        &self.ctx
    }
    /// Replace the trace sink. Overrides [`Config::trace`].
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink + Send>) {
        self.ctx.set_trace_sink(Some(sink));
    }
    pub fn clear_trace_sink(&mut self) {
        self.ctx.set_trace_sink(None);
    }

    /// Run with the generic dispatch loop.
    pub fn run(&mut self, argument: ReturnValue) -> Result<ReturnValue, ExecutionError> {
        self.ctx.prepare(argument.value)?;
        let res = self.ctx.run();
        self.finish("generic", res)
    }

    /// Run with threaded dispatch.
    pub fn run_threaded(&mut self, argument: ReturnValue) -> Result<ReturnValue, ExecutionError> {
        let code = self
            .threaded
            .get_or_insert_with(|| ThreadedCode::translate(&self.image));
        self.ctx.prepare(argument.value)?;
        let res = threaded::run(&mut self.ctx, code);
        self.finish("threaded", res)
    }

    /// Threaded code of the image, if a threaded run has translated it.
    pub fn threaded_code(&self) -> Option<&ThreadedCode> {
        self.threaded.as_ref()
    }

    fn finish(
        &self,
        mode: &str,
        res: Result<u32, ExecutionError>,
    ) -> Result<ReturnValue, ExecutionError> {
        match res {
            Ok(v) => {
                log::debug!("{mode} run finished: {v}, {:?}", self.ctx.stats());
                Ok(ReturnValue::basic(v))
            }
            Err(e) => {
                log::debug!("{mode} run failed: {e}");
                Err(e)
            }
        }
    }
}

/// Shorthand for [`vm::disasm::disassemble`].
pub fn disassemble(image: &BytecodeImage) -> String {
    vm::disasm::disassemble(image)
}
