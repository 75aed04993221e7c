use std::time::Instant;

use clap::ValueEnum;
use jlang_vm::{
    Config, ExecutionEngine, ExecutionError, ReturnValue, log,
    samples,
    runtime::vm::{BytecodeImage, GrowthDirection},
};

#[derive(clap::Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    #[command(flatten)]
    pub mode: Mode,

    /// Built-in image to run
    #[arg(value_enum, default_value_t = Sample::Fibonacci)]
    pub program: Sample,

    /// Initial argument passed to the image
    #[arg(long, short, default_value_t = 20)]
    pub arg: u32,

    /// Use threaded dispatch instead of the generic loop
    #[arg(long, default_value_t = false)]
    pub threaded: bool,

    /// Direction in which both stacks grow
    #[arg(long, value_enum, default_value_t = Growth::Upward)]
    pub growth: Growth,

    /// Operand stack size in bytes
    #[arg(long)]
    pub stack_size: Option<usize>,

    /// Log every executed instruction at trace level
    #[arg(long, default_value_t = false)]
    pub trace: bool,

    /// How many times to run the image. Timing is printed when more than one.
    #[arg(long, default_value_t = 1)]
    pub repeat: usize,
}

impl Args {
    pub fn to_config(&self) -> Config {
        let default = Config::default();
        Config {
            stack_size: self.stack_size.unwrap_or(default.stack_size),
            growth: self.growth.into(),
            trace: self.trace,
        }
    }
}

#[derive(clap::Args, Debug, Clone, Copy)]
#[group(required = false, multiple = false)]
pub struct Mode {
    /// Print the disassembled image and exit
    #[arg(long, default_value_t = false)]
    pub disasm: bool,

    /// Print execution statistics after the run
    #[arg(long, default_value_t = false)]
    pub stats: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Sample {
    /// Recursive Fibonacci of the argument
    Fibonacci,
    /// Sum of 1..=argument with a loop
    Countdown,
    /// A lone exit
    Halt,
}

impl Sample {
    pub fn bytes(&self) -> &'static [u8] {
        match self {
            Sample::Fibonacci => &samples::FIBONACCI,
            Sample::Countdown => &samples::COUNTDOWN_SUM,
            Sample::Halt => &samples::HALT_ONLY,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum Growth {
    Upward,
    Downward,
}

impl From<Growth> for GrowthDirection {
    fn from(value: Growth) -> Self {
        match value {
            Growth::Upward => GrowthDirection::Upward,
            Growth::Downward => GrowthDirection::Downward,
        }
    }
}

/// Run the selected image as described by `args`. Returns the value of the
/// last run, or `None` when only a listing was requested.
pub fn run(args: &Args) -> Result<Option<ReturnValue>, ExecutionError> {
    let image = BytecodeImage::load(args.program.bytes(), 0)?;
    if args.mode.disasm {
        println!("{}", jlang_vm::disassemble(&image));
        return Ok(None);
    }
    let mut engine = ExecutionEngine::new(image, args.to_config());
    let argument = ReturnValue::basic(args.arg);
    let mut last = None;
    let start = Instant::now();
    for _ in 0..args.repeat.max(1) {
        let res = if args.threaded {
            engine.run_threaded(argument)?
        } else {
            engine.run(argument)?
        };
        last = Some(res);
    }
    let elapsed = start.elapsed();
    if args.repeat > 1 {
        log::info!(
            "{} runs in {:?} ({:?} per run)",
            args.repeat,
            elapsed,
            elapsed / args.repeat as u32
        );
    }
    if args.mode.stats {
        let stats = engine.stats();
        println!(
            "instructions: {}, calls: {}, returns: {}, max stack depth: {} bytes",
            stats.instructions, stats.calls, stats.returns, stats.max_stack_depth
        );
    }
    Ok(last)
}

#[cfg(test)]
mod test {
    use clap::Parser;

    use super::*;

    #[test]
    fn parse_and_run() {
        let args = Args::parse_from(["jlang-cli", "fibonacci", "--arg", "10", "--threaded"]);
        assert_eq!(run(&args), Ok(Some(ReturnValue::basic(55))));
        let args = Args::parse_from(["jlang-cli", "countdown", "-a", "4", "--growth", "downward"]);
        assert_eq!(args.to_config().growth, GrowthDirection::Downward);
        assert_eq!(run(&args), Ok(Some(ReturnValue::basic(10))));
    }

    #[test]
    fn disasm_only() {
        let args = Args::parse_from(["jlang-cli", "halt", "--disasm"]);
        assert_eq!(run(&args), Ok(None));
    }
}
