//! Integration tests for expressions, bindings and literals

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
fn test_arithmetic_precedence() {
    assert_eq!(run_ok("1 + 2 * 3 - 4 / 2"), Value::Number(5.0));
    assert_eq!(run_ok("(1 + 2) * 3"), Value::Number(9.0));
    assert_eq!(run_ok("-3 + 10 % 4"), Value::Number(-1.0));
}

#[test]
fn test_float_literals_stay_float() {
    assert_eq!(run_ok("1.5f + 1.0f"), Value::Float(2.5));
    assert_eq!(run_ok("1.5f + 1"), Value::Number(2.5));
    assert_eq!(run_ok("typeof(2.0f)"), Value::string("Float"));
}

#[test]
fn test_statement_terminators() {
    let result = run_ok("var a = 1; var b = 2\nvar c = a + b; c");
    assert_eq!(result, Value::Number(3.0));
}

#[test]
fn test_comments_are_ignored() {
    let result = run_ok(r#"
        // line comment
        var x = 1 /* inline */ + 2
        /* a block
           spanning lines */
        x
    "#);
    assert_eq!(result, Value::Number(3.0));
}

#[test]
fn test_constants_cannot_be_reassigned() {
    let err = run("val limit = 3\nlimit = 4").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ConstantReassignment("limit".to_string()));
    assert_eq!(err.line(), 2);
}

#[test]
fn test_shadowing_in_inner_scope() {
    let result = run_ok(r#"
        val x = 1
        var seen = 0
        {
            var x = 10
            seen = x
        }
        seen + x
    "#);
    assert_eq!(result, Value::Number(11.0));
}

#[test]
fn test_undefined_variable() {
    let err = run("missing + 1").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedVariable("missing".to_string()));
}

#[test]
fn test_string_operations() {
    assert_eq!(run_ok(r#""ab" + "cd""#), Value::string("abcd"));
    assert_eq!(run_ok(r#""n=" + 4"#), Value::string("n=4"));
    assert_eq!(run_ok(r#""ab" * 3"#), Value::string("ababab"));
    assert_eq!(run_ok(r#""héllo".length"#), Value::Number(5.0));
    assert_eq!(run_ok(r#""kestrel"[2]"#), Value::string("s"));
}

#[test]
fn test_fstring_interpolation() {
    let result = run_ok(r#"
        var name = "Kes"
        var items = [1, 2]
        f"{name} has {len(items)} items: {items} and {items[0] + 1}"
    "#);
    assert_eq!(result, Value::string("Kes has 2 items: [1, 2] and 2"));
}

#[test]
fn test_list_literals_and_aliasing() {
    let result = run_ok(r#"
        var a = [1, 2, 3]
        var b = a
        b[0] = 100
        b[3] = 4
        a
    "#);
    assert_eq!(result.to_string(), "[100, 2, 3, 4]");
}

#[test]
fn test_list_index_out_of_range() {
    assert_eq!(run_ok("[1, 2][5]"), Value::Null);
    let err = run("var a = [1]\na[3] = 2").unwrap_err();
    assert_eq!(err.kind, ErrorKind::IndexOutOfBounds { index: 3, len: 1 });
}

#[test]
fn test_list_concatenation_and_repetition() {
    assert_eq!(run_ok("[1] + [2, 3]").to_string(), "[1, 2, 3]");
    assert_eq!(run_ok("[0] * 3").to_string(), "[0, 0, 0]");
}

#[test]
fn test_repetition_edge_cases() {
    assert_eq!(run_ok(r#""" * 5"#), Value::string(""));
    assert_eq!(run_ok(r#""ab" * -1"#), Value::string(""));
    assert_eq!(run_ok(r#"3 * "ab""#), Value::string("ababab"));
    assert_eq!(run_ok("[1, 2] * -3").to_string(), "[]");

    let err = run("[1, 2] * 10000000000000000000").unwrap_err();
    assert_eq!(err.message(), "repetition result is too large");
    let err = run(r#""ab" * 100000000000000000000000000000"#).unwrap_err();
    assert_eq!(err.message(), "repetition result is too large");
}

#[test]
fn test_fstring_with_map_literal_and_index() {
    assert_eq!(run_ok(r#"f"{ {"a":1}["a"] }""#), Value::string("1"));
    assert_eq!(run_ok(r#"f"[{ {b: 2}.b + 1 }]""#), Value::string("[3]"));
}

#[test]
fn test_map_literals() {
    let result = run_ok(r#"
        var point = {x: 1, "y": 2}
        point.z = point.x + point["y"]
        point["w"] = 0
        point
    "#);
    assert_eq!(result.to_string(), "{x: 1, y: 2, z: 3, w: 0}");
}

#[test]
fn test_missing_property_reads_null() {
    assert_eq!(run_ok("var o = {a: 1}\no.b"), Value::Null);
    let err = run("var o = {a: 1}\no.b += 1").unwrap_err();
    assert!(err.message().contains("undefined property 'b'"));
}

#[test]
fn test_structural_equality() {
    let result = run_ok(r#"
        [
            [1, [2]] == [1, [2]],
            {a: 1} == {a: 1},
            1 == 1.0f,
            null == false,
            "1" == 1
        ]
    "#);
    assert_eq!(result.to_string(), "[true, true, true, false, false]");
}

#[test]
fn test_object_keys_keep_insertion_order() {
    let result = run_ok(r#"
        var o = {zebra: 1, apple: 2}
        o.mango = 3
        o["banana"] = 4
        o.zebra = 5
        var keys = []
        for (k in o) { listPush(keys, k) }
        [o, keys, {b: 1, a: 2} == {a: 2, b: 1}]
    "#);
    assert_eq!(
        result.to_string(),
        "[{zebra: 5, apple: 2, mango: 3, banana: 4}, [zebra, apple, mango, banana], true]"
    );
}

#[test]
fn test_self_containing_values_display_and_compare() {
    let result = run_ok(r#"
        var a = [1]
        listPush(a, a)
        var b = [1]
        listPush(b, b)
        var o = {name: "o"}
        o.self = o
        [String(a), String(o), a == b, a == [1, 2]]
    "#);
    assert_eq!(result.to_string(), "[[1, [...]], {name: o, self: {...}}, true, false]");
}

#[test]
fn test_logical_operators_return_operands() {
    assert_eq!(run_ok(r#"null || "fallback""#), Value::string("fallback"));
    assert_eq!(run_ok(r#"0 && missing"#), Value::Number(0.0));
    assert_eq!(run_ok("!\"\""), Value::Bool(true));
}

#[test]
fn test_truthiness() {
    let result = run_ok(r#"
        var out = []
        for (v in [0, 1, "", "a", [], [0], null, {}]) {
            listPush(out, Boolean(v))
        }
        out
    "#);
    assert_eq!(result.to_string(), "[false, true, false, true, false, true, false, true]");
}

#[test]
fn test_comparison_type_error() {
    let err = run(r#""a" < 1"#).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch(_)));
    assert_eq!(err.line(), 1);
}

#[test]
fn test_division_by_zero() {
    let err = run("var x = 0\n10 / x").unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
    assert_eq!(err.line(), 2);
}

#[test]
fn test_large_and_special_numbers_display() {
    assert_eq!(run_ok("String(100000000000000000000)"), Value::string("100000000000000000000"));
    assert_eq!(run_ok("String(2.5)"), Value::string("2.5"));
    assert_eq!(run_ok("String(-7)"), Value::string("-7"));
}
