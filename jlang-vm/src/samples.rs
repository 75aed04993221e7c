//! Built-in sample images, run by `jlang-cli` and the integration tests.

use crate::runtime::vm::{
    Condition, Width,
    opcode::{self, *},
};

const ARG0: u8 = 0xFF;
const VAR0: u8 = 0x00;
const VAR1: u8 = 0x01;

/// Recursive Fibonacci of the run argument: `fib(1) = fib(2) = 1`.
///
/// ```text
/// 00000000:  push         arg0
/// 00000002:  call_short   +11        ; fib
/// 00000005:  pop_i32
/// 00000006:  ret
/// 00000010:  cmp_imm_i32  arg0, 3    ; fib
/// 00000016:  jl_near      +24
/// 00000018:  add_sp_4                ; var0
/// 00000019:  push         arg0       ; var1
/// 0000001b:  dec          var1
/// 0000001d:  call_near    -15
/// 0000001f:  copy_to_eax  var0
/// 00000021:  dec          var1
/// 00000023:  call_near    -21
/// 00000025:  add_eax      eax, var0
/// 00000027:  ret_n        8
/// 00000030:  ret_eax      eax, 0x00000001
/// 0000003f:  exit
/// ```
#[rustfmt::skip]
pub const FIBONACCI: [u8; 0x40] = [
    PUSH, ARG0,
    CALL_SHORT, 0x0B, 0x00,
    POP_I32,
    RET,
    NOP, NOP, NOP, NOP, NOP, NOP, NOP, NOP, NOP,

    CMP_IMM_I32, ARG0, 0x03, 0x00, 0x00, 0x00,
    JL_NEAR, 0x18,

    ADD_SP_4,
    PUSH, ARG0,
    DEC, VAR1,
    CALL_NEAR, 0xF1,

    COPY_TO_EAX, VAR0,
    DEC, VAR1,
    CALL_NEAR, 0xEB,

    ADD_EAX, VAR0,
    RET_N, 0x08, 0x00,

    NOP, NOP, NOP, NOP, NOP, NOP,

    RET_EAX, 0x01, 0x00, 0x00, 0x00,

    NOP, NOP, NOP, NOP, NOP, NOP, NOP, NOP, NOP, NOP,
    EXIT,
];

/// Stops at once with the accumulator untouched.
pub const HALT_ONLY: [u8; 1] = [EXIT];

/// Pushes zeros forever.
pub const PUSH_FOREVER: [u8; 3] = [PUSH_I32_0, JMP_NEAR, 0xFD];

/// Sums `arg0 + (arg0 - 1) + ... + 1` with a counting loop.
#[rustfmt::skip]
pub const COUNTDOWN_SUM: [u8; 15] = [
    CMP_IMM_I32, ARG0, 0x00, 0x00, 0x00, 0x00,
    opcode::branch(Condition::LessEqual, Width::Near), 0x06,
    ADD_EAX, ARG0,
    DEC, ARG0,
    JMP_NEAR, 0xF2,
    RET,
];
