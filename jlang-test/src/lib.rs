//! Fixture images and helpers for the cross-strategy integration tests.

use jlang_vm::{
    Config, ExecutionEngine, ExecutionError, ReturnValue,
    runtime::vm::{ExecStats, GrowthDirection, TraceRecord, opcode::*},
};

pub use jlang_vm::samples::{COUNTDOWN_SUM, FIBONACCI, HALT_ONLY, PUSH_FOREVER};

pub const ARG0: u8 = 0xFF;
pub const VAR0: u8 = 0x00;
pub const VAR1: u8 = 0x01;

/// Compares `lhs` with `rhs` using `cmp` and the branch opcode `branch`.
/// Returns 2 when the branch is taken and 1 when it falls through.
pub fn compare_image(cmp: u8, lhs: u32, rhs: u32, branch: u8) -> Vec<u8> {
    let mut bytes = vec![PUSH_I32];
    bytes.extend(lhs.to_le_bytes());
    bytes.push(PUSH_I32);
    bytes.extend(rhs.to_le_bytes());
    bytes.extend([cmp, VAR0, VAR1, branch, 0x07]);
    bytes.extend([RET_EAX_N, 0x08, 0x00, 0x01, 0x00, 0x00, 0x00]);
    bytes.extend([RET_EAX_N, 0x08, 0x00, 0x02, 0x00, 0x00, 0x00]);
    bytes
}

/// Reference value for [`FIBONACCI`].
pub fn fib(n: u32) -> u32 {
    if n < 3 { 1 } else { fib(n - 1) + fib(n - 2) }
}

/// Outcome of one run, compared as a whole between dispatch strategies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub result: Result<ReturnValue, ExecutionError>,
    pub stats: ExecStats,
    pub trace: Vec<TraceRecord>,
}

fn run_traced(
    bytes: &[u8],
    entry: usize,
    arg: u32,
    config: Config,
    threaded: bool,
) -> Result<Outcome, ExecutionError> {
    let mut engine = ExecutionEngine::create(bytes.to_vec(), entry, config)?;
    let (tx, rx) = std::sync::mpsc::channel();
    engine.set_trace_sink(Box::new(tx));
    let result = if threaded {
        engine.run_threaded(arg.into())
    } else {
        engine.run(arg.into())
    };
    engine.clear_trace_sink();
    Ok(Outcome {
        result,
        stats: engine.stats(),
        trace: rx.into_iter().collect(),
    })
}

/// Run `bytes` with both dispatch strategies and both growth directions,
/// panicking if any of the runs disagrees with the generic upward one.
pub fn run_both(bytes: &[u8], entry: usize, arg: u32, config: Config) -> Outcome {
    let reference = run_traced(bytes, entry, arg, config, false).unwrap();
    for growth in [GrowthDirection::Upward, GrowthDirection::Downward] {
        let config = Config { growth, ..config };
        for threaded in [false, true] {
            let outcome = run_traced(bytes, entry, arg, config, threaded).unwrap();
            assert_eq!(
                outcome, reference,
                "{growth:?} threaded={threaded} disagrees with the generic loop"
            );
        }
    }
    reference
}

/// [`run_both`] with the default configuration, returning only the result.
pub fn run_image(bytes: &[u8], arg: u32) -> Result<ReturnValue, ExecutionError> {
    run_both(bytes, 0, arg, Config::default()).result
}
