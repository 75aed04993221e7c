use jlang_test::*;
use jlang_vm::{
    Config, ExecutionEngine, ExecutionError, FrameFault, ReturnValue,
    runtime::vm::{Condition, GrowthDirection, Width, opcode::*, threaded::ROOT},
};
use wasm_bindgen_test::*;

#[wasm_bindgen_test(unsupported = test)]
fn fibonacci_20() {
    let outcome = run_both(&FIBONACCI, 0, 20, Config::default());
    assert_eq!(outcome.result, Ok(ReturnValue::basic(6765)));
    // one call per fib invocation
    let invocations = 2 * fib(20) as u64 - 1;
    assert_eq!(outcome.stats.calls, invocations);
    assert_eq!(outcome.stats.returns, invocations);
    assert_eq!(outcome.trace.len() as u64, outcome.stats.instructions);
    // entry frame, 18 fib frames holding two locals, one leaf frame
    let entry = 4 + 16 + 4;
    let per_call = 16 + 8;
    assert_eq!(outcome.stats.max_stack_depth, entry + 18 * per_call + 16);
}

#[wasm_bindgen_test(unsupported = test)]
fn fibonacci_small() {
    for n in 1..=12 {
        assert_eq!(run_image(&FIBONACCI, n), Ok(ReturnValue::basic(fib(n))), "fib({n})");
    }
}

#[wasm_bindgen_test(unsupported = test)]
fn halt_only() {
    assert_eq!(run_image(&HALT_ONLY, 42), Ok(ReturnValue::basic(0)));
}

#[wasm_bindgen_test(unsupported = test)]
fn illegal_opcode_at_entry() {
    assert_eq!(
        run_image(&[0x00, EXIT], 0),
        Err(ExecutionError::IllegalOpcode {
            opcode: 0,
            offset: 0
        })
    );
}

#[wasm_bindgen_test(unsupported = test)]
fn entry_offset_outside_image() {
    assert_eq!(
        ExecutionEngine::create(HALT_ONLY.to_vec(), 1, Config::default()).err(),
        Some(ExecutionError::ImageTooSmall { entry: 1, size: 1 })
    );
}

#[wasm_bindgen_test(unsupported = test)]
fn non_zero_entry() {
    let image = [0x00, 0x00, LOAD_EAX, 0x05, 0x00, 0x00, 0x00, EXIT];
    let outcome = run_both(&image, 2, 0, Config::default());
    assert_eq!(outcome.result, Ok(ReturnValue::basic(5)));
}

#[wasm_bindgen_test(unsupported = test)]
fn fused_compare_and_branch() {
    assert_eq!(run_image(&compare_image(CMP_I32, 3, 3, JE_NEAR), 0), Ok(ReturnValue::basic(2)));
    assert_eq!(run_image(&compare_image(CMP_I32, 3, 4, JE_NEAR), 0), Ok(ReturnValue::basic(1)));
    let jle = branch(Condition::LessEqual, Width::Near);
    assert_eq!(run_image(&compare_image(CMP_I32, 3, 4, jle), 0), Ok(ReturnValue::basic(2)));
    let jg = branch(Condition::Greater, Width::Near);
    assert_eq!(run_image(&compare_image(CMP_U32, 3, 4, jg), 0), Ok(ReturnValue::basic(1)));
}

#[wasm_bindgen_test(unsupported = test)]
fn compare_against_immediate() {
    let image = [
        CMP_IMM_U32, ARG0, 0x0A, 0x00, 0x00, 0x00, JL_SHORT, 0x05, 0x00, RET_EAX, 0x01, 0x00, 0x00,
        0x00, RET_EAX, 0x02, 0x00, 0x00, 0x00,
    ];
    assert_eq!(run_image(&image, 9), Ok(ReturnValue::basic(2)));
    assert_eq!(run_image(&image, 10), Ok(ReturnValue::basic(1)));
    assert_eq!(run_image(&image, (-1i32) as u32), Ok(ReturnValue::basic(1)));
}

#[wasm_bindgen_test(unsupported = test)]
fn countdown_loop() {
    assert_eq!(run_image(&COUNTDOWN_SUM, 100), Ok(ReturnValue::basic(5050)));
}

#[wasm_bindgen_test(unsupported = test)]
fn stack_overflow() {
    let config = Config {
        stack_size: 256,
        ..Config::default()
    };
    let outcome = run_both(&PUSH_FOREVER, 0, 0, config);
    assert_eq!(
        outcome.result,
        Err(ExecutionError::StackOverflow {
            requested: 4,
            available: 0
        })
    );
    assert_eq!(outcome.stats.max_stack_depth, 256);
}

#[wasm_bindgen_test(unsupported = test)]
fn recursion_overflows_small_stack() {
    let config = Config {
        stack_size: 128,
        ..Config::default()
    };
    let outcome = run_both(&FIBONACCI, 0, 20, config);
    assert!(matches!(
        outcome.result,
        Err(ExecutionError::StackOverflow { .. })
    ));
}

#[wasm_bindgen_test(unsupported = test)]
fn stack_underflow() {
    assert_eq!(
        run_image(&[POP_I64, EXIT], 0),
        Err(ExecutionError::StackUnderflow {
            requested: 8,
            available: 0
        })
    );
}

#[wasm_bindgen_test(unsupported = test)]
fn extra_return() {
    // the callee returns, then runs into a second return with its caller's
    // local still on the stack
    #[rustfmt::skip]
    let image = [
        PUSH_I32_0,
        CALL_NEAR, 0x00,
        RET,
    ];
    assert_eq!(
        run_image(&image, 0),
        Err(ExecutionError::MalformedCallFrame {
            offset: 3,
            fault: FrameFault::LocalsRemaining(4)
        })
    );
}

#[wasm_bindgen_test(unsupported = test)]
fn leftover_locals() {
    #[rustfmt::skip]
    let image = [
        CALL_NEAR, 0x01,
        EXIT,
        ADD_SP, 0x0C,
        RET_N_SM, 0x08,
    ];
    assert_eq!(
        run_image(&image, 0),
        Err(ExecutionError::MalformedCallFrame {
            offset: 5,
            fault: FrameFault::LocalsRemaining(4)
        })
    );
}

#[wasm_bindgen_test(unsupported = test)]
fn threaded_code_is_cached() {
    let mut engine = ExecutionEngine::create(FIBONACCI.to_vec(), 0, Config::default()).unwrap();
    assert!(engine.threaded_code().is_none());
    assert_eq!(engine.run_threaded(ReturnValue::basic(10)), Ok(ReturnValue::basic(55)));
    let ops = engine.threaded_code().map(|code| code.ops().len());
    assert_eq!(engine.run_threaded(ReturnValue::basic(12)), Ok(ReturnValue::basic(144)));
    assert_eq!(engine.threaded_code().map(|code| code.ops().len()), ops);
    let code = engine.threaded_code().unwrap();
    assert!(code.resume(ROOT).is_none());
    // three call sites
    assert!(code.resume(3).is_some());
    assert!(code.resume(4).is_none());
}

#[wasm_bindgen_test(unsupported = test)]
fn engine_is_reusable() {
    let mut engine = ExecutionEngine::create(FIBONACCI.to_vec(), 0, Config::default()).unwrap();
    assert_eq!(engine.run(ReturnValue::basic(15)), Ok(ReturnValue::basic(610)));
    let stats = engine.stats();
    assert_eq!(engine.run_threaded(ReturnValue::basic(15)), Ok(ReturnValue::basic(610)));
    assert_eq!(engine.stats(), stats);
    assert_eq!(
        engine.run(ReturnValue::basic(5)).map(|v| v.value),
        Ok(fib(5))
    );
}

#[wasm_bindgen_test(unsupported = test)]
fn engines_share_an_image() {
    let image = jlang_vm::runtime::vm::BytecodeImage::load(FIBONACCI.to_vec(), 0).unwrap();
    let handles = [GrowthDirection::Upward, GrowthDirection::Downward].map(|growth| {
        let image = image.clone();
        std::thread::spawn(move || {
            let config = Config {
                growth,
                ..Config::default()
            };
            let mut engine = ExecutionEngine::new(image, config);
            engine.run_threaded(ReturnValue::basic(16))
        })
    });
    for h in handles {
        assert_eq!(h.join().unwrap(), Ok(ReturnValue::basic(987)));
    }
}

#[wasm_bindgen_test(unsupported = test)]
fn disassembly_of_fibonacci() {
    let image = jlang_vm::runtime::vm::BytecodeImage::load(FIBONACCI.to_vec(), 0).unwrap();
    let listing = jlang_vm::disassemble(&image);
    let lines = listing.lines().collect::<Vec<_>>();
    assert_eq!(lines[0], ">00000000: push         arg0");
    assert!(lines.contains(&" 00000010: cmp_imm_i32  arg0, 3"));
    assert!(lines.contains(&" 00000016: jl_near      +24"));
    assert_eq!(lines.last(), Some(&" 0000003f: exit"));
}
