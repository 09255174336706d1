//! Integration tests for loops, switch and try

use kestrel::{Engine, EngineConfig, ErrorKind, KestrelError, Value};
use pretty_assertions::assert_eq;

fn run(source: &str) -> Result<Value, KestrelError> {
    let engine = Engine::with_config(EngineConfig {
        echo_print: false,
        ..EngineConfig::default()
    });
    engine.execute(source)
}

fn run_ok(source: &str) -> Value {
    run(source).expect("execution failed")
}

#[test]
fn test_if_else_chain() {
    let result = run_ok(r#"
        fun grade(n) {
            if (n >= 90) return "A"
            else if (n >= 80) return "B"
            else return "C"
        }
        [grade(95), grade(85), grade(10)]
    "#);
    assert_eq!(result.to_string(), "[A, B, C]");
}

#[test]
fn test_while_with_break_and_continue() {
    let result = run_ok(r#"
        var i = 0
        var sum = 0
        while (true) {
            i += 1
            if (i > 10) break
            if (i % 2 == 0) continue
            sum += i
        }
        sum
    "#);
    assert_eq!(result, Value::Number(25.0));
}

#[test]
fn test_for_in_over_strings_and_objects() {
    let result = run_ok(r#"
        var letters = []
        for (c in "abc") { listPush(letters, c) }
        var keys = []
        for (k in {b: 2, a: 1}) { listPush(keys, k) }
        [listJoin(letters, "-"), keys]
    "#);
    assert_eq!(result.to_string(), "[a-b-c, [b, a]]");
}

#[test]
fn test_for_in_iterates_a_snapshot() {
    let result = run_ok(r#"
        var items = [1, 2]
        var seen = 0
        for (x in items) {
            listPush(items, x)
            seen += 1
        }
        [seen, len(items)]
    "#);
    assert_eq!(result.to_string(), "[2, 4]");
}

#[test]
fn test_for_in_rejects_numbers() {
    let err = run("for (x in 5) {}").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch(_)));
}

#[test]
fn test_return_from_nested_loops() {
    let result = run_ok(r#"
        fun find(grid, target) {
            for (row in grid) {
                for (cell in row) {
                    if (cell == target) return cell * 10
                }
            }
            return -1
        }
        [find([[1, 2], [3, 4]], 3), find([[1]], 9)]
    "#);
    assert_eq!(result.to_string(), "[30, -1]");
}

#[test]
fn test_switch_falls_through_until_break() {
    let result = run_ok(r#"
        fun trace(n) {
            var out = []
            switch (n) {
                case 1:
                    listPush(out, "one")
                case 2, 3:
                    listPush(out, "two-three")
                    break
                case 4:
                    listPush(out, "four")
                default:
                    listPush(out, "default")
            }
            return listJoin(out, ",")
        }
        [trace(1), trace(3), trace(4), trace(9)]
    "#);
    assert_eq!(result.to_string(), "[one,two-three, two-three, four,default, default]");
}

#[test]
fn test_default_only_when_no_case_matches() {
    let result = run_ok(r#"
        var hit = ""
        switch ("b") {
            default:
                hit = "default"
                break
            case "b":
                hit = "b"
        }
        hit
    "#);
    assert_eq!(result, Value::string("b"));
}

#[test]
fn test_break_in_switch_inside_loop_leaves_only_the_switch() {
    let result = run_ok(r#"
        var count = 0
        for (i in [1, 2, 3]) {
            switch (i) {
                case 2:
                    break
                default:
                    count += 1
            }
        }
        count
    "#);
    assert_eq!(result, Value::Number(2.0));
}

#[test]
fn test_continue_inside_switch_continues_the_loop() {
    let result = run_ok(r#"
        var out = []
        for (i in [1, 2, 3]) {
            switch (i) {
                case 2:
                    continue
            }
            listPush(out, i)
        }
        out
    "#);
    assert_eq!(result.to_string(), "[1, 3]");
}

#[test]
fn test_misplaced_signals_are_errors() {
    assert_eq!(run("break").unwrap_err().kind, ErrorKind::BreakOutsideLoop);
    assert_eq!(run("continue").unwrap_err().kind, ErrorKind::ContinueOutsideLoop);
    assert_eq!(run("return 1").unwrap_err().kind, ErrorKind::ReturnOutsideFunction);
    assert_eq!(
        run("switch (1) { case 1: continue }").unwrap_err().kind,
        ErrorKind::ContinueOutsideLoop
    );
}

#[test]
fn test_loop_depth_does_not_leak_into_functions() {
    let err = run(r#"
        fun f() { break }
        while (true) { f() }
    "#)
    .unwrap_err();
    assert_eq!(err.kind, ErrorKind::BreakOutsideLoop);
}

#[test]
fn test_try_catch_exposes_message_and_line() {
    let result = run_ok(r#"
        var caught = null
        try {
            var x = 1
            x = x / 0
        } catch (e) {
            caught = e
        }
        [caught.message, caught.line]
    "#);
    assert_eq!(result.to_string(), "[division by zero, 5]");
}

#[test]
fn test_throw_is_catchable() {
    let result = run_ok(r#"
        fun risky() { throw("bad input") }
        var msg = ""
        try { risky() } catch (e) { msg = e.message }
        msg
    "#);
    assert_eq!(result, Value::string("bad input"));
}

#[test]
fn test_finally_always_runs() {
    let result = run_ok(r#"
        var log = []
        fun attempt(fail) {
            try {
                if (fail) throw("x")
                listPush(log, "ok")
            } catch (e) {
                listPush(log, "caught")
            } finally {
                listPush(log, "finally")
            }
        }
        attempt(false)
        attempt(true)
        log
    "#);
    assert_eq!(result.to_string(), "[ok, finally, caught, finally]");
}

#[test]
fn test_finally_runs_on_return_and_uncaught_errors() {
    let engine = Engine::with_config(EngineConfig {
        echo_print: false,
        ..EngineConfig::default()
    });
    let result = engine.execute(r#"
        var log = []
        fun early() {
            try { return "body" } finally { listPush(log, "cleanup") }
        }
        early()
    "#);
    assert_eq!(result.unwrap(), Value::string("body"));

    let err = engine
        .execute(r#"try { throw("boom") } finally { listPush(log, "after boom") }"#)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::Thrown("boom".to_string()));
    assert_eq!(engine.global("log").unwrap().to_string(), "[cleanup, after boom]");
}

#[test]
fn test_return_from_finally_overrides() {
    let result = run_ok(r#"
        fun f() {
            try { throw("lost") } finally { return "finally wins" }
        }
        f()
    "#);
    assert_eq!(result, Value::string("finally wins"));
}

#[test]
fn test_break_passes_through_try() {
    let result = run_ok(r#"
        var n = 0
        while (true) {
            try {
                n += 1
                if (n == 3) break
            } catch (e) {
                n = -100
            }
        }
        n
    "#);
    assert_eq!(result, Value::Number(3.0));
}
