//! End-to-end tests: build GAPL programs and execute them in the interpreter.

use gapl_core::{OpCode, Program, ProgramBuilder, SequenceValue, Timestamp, Value, ValueKind, WindowBound};
use gapl_vm::{CaptureHost, Interpreter, VariableEnvironment, VmError};

/// Helper: run `program` against `env`, return captured output.
fn run(program: &Program, env: &mut VariableEnvironment) -> Vec<String> {
    let mut host = CaptureHost::new();
    Interpreter::new()
        .run(program, env, &mut host, "Test")
        .expect("program should execute");
    host.output
}

/// Helper: run and return the error.
fn run_err(program: &Program, env: &mut VariableEnvironment) -> VmError {
    let mut host = CaptureHost::new();
    Interpreter::new()
        .run(program, env, &mut host, "Test")
        .expect_err("program should fail")
}

// ─── Arithmetic ───

#[test]
fn e2e_precedence_is_in_the_bytecode() {
    // 2 + 3 * 4
    let program = ProgramBuilder::new()
        .constant(Value::Int(2))
        .constant(Value::Int(3))
        .constant(Value::Int(4))
        .op(OpCode::Mul)
        .op(OpCode::Add)
        .print()
        .finish()
        .unwrap();
    assert_eq!(run(&program, &mut VariableEnvironment::new()), vec!["14"]);
}

#[test]
fn e2e_int_plus_float_is_type_error() {
    let program = ProgramBuilder::new()
        .constant(Value::Int(1))
        .constant(Value::Float(2.0))
        .op(OpCode::Add)
        .print()
        .finish()
        .unwrap();
    assert!(run_err(&program, &mut VariableEnvironment::new()).is_type_error());
}

#[test]
fn e2e_float_arithmetic_prints_eight_places() {
    let program = ProgramBuilder::new()
        .constant(Value::Int(7))
        .call_function("float", 1)
        .constant(Value::Float(2.0))
        .op(OpCode::Div)
        .print()
        .finish()
        .unwrap();
    assert_eq!(run(&program, &mut VariableEnvironment::new()), vec!["3.50000000"]);
}

#[test]
fn e2e_division_by_zero_aborts() {
    let program = ProgramBuilder::new()
        .constant(Value::Int(1))
        .constant(Value::Int(0))
        .op(OpCode::Div)
        .print()
        .finish()
        .unwrap();
    assert!(run_err(&program, &mut VariableEnvironment::new()).is_arithmetic());
}

// ─── Windows ───

#[test]
fn e2e_average_of_window() {
    let mut env = VariableEnvironment::new();
    env.declare("w", ValueKind::Window);
    let mut b = ProgramBuilder::new();
    b.new_window(ValueKind::Int, WindowBound::Rows(3)).assign("w");
    for i in 1..=3 {
        b.eval("w").constant(Value::Int(i)).call_procedure("append", 2);
    }
    b.eval("w").call_function("average", 1).print();
    let program = b.finish().unwrap();
    assert_eq!(run(&program, &mut env), vec!["2.00000000"]);
}

#[test]
fn e2e_row_window_never_exceeds_bound() {
    let mut env = VariableEnvironment::new();
    env.declare("w", ValueKind::Window).declare("i", ValueKind::Int);
    let program = ProgramBuilder::new()
        .new_window(ValueKind::Int, WindowBound::Rows(4))
        .assign("w")
        .emit_while(
            |b| {
                b.eval("i").constant(Value::Int(50)).op(OpCode::Lt);
            },
            |b| {
                b.eval("w").eval("i").call_procedure("append", 2);
                b.eval("i").constant(Value::Int(1)).op(OpCode::Add).assign("i");
            },
        )
        .eval("w")
        .call_function("average", 1)
        .print()
        .finish()
        .unwrap();
    assert_eq!(run(&program, &mut env), vec!["47.50000000"]);
    match env.get("w").unwrap() {
        Value::Window(w) => assert_eq!(w.lock().len(), 4),
        other => panic!("expected window, got {:?}", other),
    }
}

#[test]
fn e2e_time_window_uses_event_time() {
    let mut env = VariableEnvironment::new();
    env.declare("w", ValueKind::Window);
    let mut b = ProgramBuilder::new();
    b.new_window(ValueKind::Float, WindowBound::Seconds(10)).assign("w");
    for (secs, x) in [(0u64, 100.0), (5, 1.0), (12, 3.0)] {
        b.eval("w")
            .constant(Value::Float(x))
            .constant(Value::Timestamp(Timestamp::from_secs(1_000 + secs)))
            .call_procedure("append", 3);
    }
    b.eval("w").call_function("average", 1).print();
    let program = b.finish().unwrap();
    assert_eq!(run(&program, &mut env), vec!["2.00000000"]);
}

// ─── Maps of windows ───

#[test]
fn e2e_map_of_windows_shares_stored_window() {
    let mut env = VariableEnvironment::new();
    env.declare("m", ValueKind::Map).declare("w", ValueKind::Window);
    let key = Value::Identifier("alpha".into());
    let program = ProgramBuilder::new()
        .new_map(ValueKind::Window)
        .assign("m")
        .eval("m")
        .constant(key.clone())
        .new_window(ValueKind::Int, WindowBound::Rows(5))
        .call_procedure("insert", 3)
        // w = lookup(m, 'alpha'); append(w, 7)
        .eval("m")
        .constant(key.clone())
        .call_function("lookup", 2)
        .assign("w")
        .eval("w")
        .constant(Value::Int(7))
        .call_procedure("append", 2)
        // the window inside the map sees the append
        .eval("m")
        .constant(key)
        .call_function("lookup", 2)
        .call_function("average", 1)
        .print()
        .finish()
        .unwrap();
    assert_eq!(run(&program, &mut env), vec!["7.00000000"]);
}

#[test]
fn e2e_iterate_map_keys() {
    let mut env = VariableEnvironment::new();
    env.declare("m", ValueKind::Map).declare("it", ValueKind::Iterator);
    let mut b = ProgramBuilder::new();
    b.new_map(ValueKind::Int).assign("m");
    for (k, v) in [("b", 2), ("a", 1), ("c", 3)] {
        b.eval("m")
            .constant(Value::Identifier(k.into()))
            .constant(Value::Int(v))
            .call_procedure("insert", 3);
    }
    b.eval("m").call_function("Iterator", 1).assign("it");
    b.emit_while(
        |b| {
            b.eval("it").call_function("hasNext", 1);
        },
        |b| {
            b.eval("it").call_function("next", 1).print();
        },
    );
    let program = b.finish().unwrap();
    assert_eq!(run(&program, &mut env), vec!["a", "b", "c"]);
}

// ─── Sequences ───

#[test]
fn e2e_seq_element_out_of_range() {
    let mut env = VariableEnvironment::new();
    env.define(
        "s",
        Value::new_sequence(SequenceValue::from_values([Value::Int(1), Value::Int(2)]).unwrap()),
    );
    let program = ProgramBuilder::new()
        .eval("s")
        .constant(Value::Int(5))
        .call_function("seqElement", 2)
        .print()
        .finish()
        .unwrap();
    assert!(run_err(&program, &mut env).is_index_out_of_range());
}

#[test]
fn e2e_sequence_builder_and_send() {
    let mut env = VariableEnvironment::new();
    env.declare("s", ValueKind::Sequence);
    let program = ProgramBuilder::new()
        .constant(Value::String("x".into()))
        .constant(Value::Int(1))
        .call_function("Sequence", 2)
        .assign("s")
        .eval("s")
        .constant(Value::Bool(true))
        .call_procedure("append", 2)
        .eval("s")
        .call_procedure("send", 1)
        .finish()
        .unwrap();
    let mut host = CaptureHost::new();
    Interpreter::new().run(&program, &mut env, &mut host, "T").unwrap();
    assert_eq!(host.sent.len(), 1);
    // now-timestamp + three sequence columns
    assert_eq!(host.sent[0].len(), 4);
    assert!(host.sent[0].to_string().ends_with("<|>x<|>1<|>true"));
}

// ─── Control flow ───

#[test]
fn e2e_nested_if_inside_while() {
    let mut env = VariableEnvironment::new();
    env.declare("i", ValueKind::Int).declare("evens", ValueKind::Int);
    let program = ProgramBuilder::new()
        .emit_while(
            |b| {
                b.eval("i").constant(Value::Int(10)).op(OpCode::Lt);
            },
            |b| {
                b.emit_if(
                    |b| {
                        b.eval("i")
                            .constant(Value::Int(2))
                            .op(OpCode::Mod)
                            .constant(Value::Int(0))
                            .op(OpCode::Eq);
                    },
                    |b| {
                        b.eval("evens").constant(Value::Int(1)).op(OpCode::Add).assign("evens");
                    },
                );
                b.eval("i").constant(Value::Int(1)).op(OpCode::Add).assign("i");
            },
        )
        .eval("evens")
        .print()
        .finish()
        .unwrap();
    assert_eq!(run(&program, &mut env), vec!["5"]);
}

#[test]
fn e2e_boolean_logic() {
    let program = ProgramBuilder::new()
        .constant(Value::Bool(true))
        .constant(Value::Bool(false))
        .op(OpCode::Or)
        .op(OpCode::Not)
        .print()
        .finish()
        .unwrap();
    assert_eq!(run(&program, &mut VariableEnvironment::new()), vec!["false"]);
}

#[test]
fn e2e_error_leaves_earlier_effects() {
    let mut env = VariableEnvironment::new();
    env.declare("x", ValueKind::Int);
    let program = ProgramBuilder::new()
        .constant(Value::Int(1))
        .assign("x")
        .constant(Value::Int(1))
        .constant(Value::Int(0))
        .op(OpCode::Mod)
        .assign("x")
        .finish()
        .unwrap();
    assert!(run_err(&program, &mut env).is_arithmetic());
    assert_eq!(env.get("x").unwrap(), &Value::Int(1));
}
