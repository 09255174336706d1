//! Integration tests for the built-in native library

use std::sync::Arc;

use kestrel::{Engine, EngineConfig, ErrorKind, KestrelError, Value};
use pretty_assertions::assert_eq;

fn engine() -> Engine {
    Engine::with_config(EngineConfig {
        echo_print: false,
        ..EngineConfig::default()
    })
}

fn run(source: &str) -> Result<Value, KestrelError> {
    engine().execute(source)
}

fn run_ok(source: &str) -> Value {
    run(source).expect("execution failed")
}

fn text(source: &str) -> String {
    run_ok(source).to_string()
}

#[test]
fn test_len_and_typeof() {
    assert_eq!(text(r#"[len("héllo"), len([1, 2]), len({a: 1, b: 2})]"#), "[5, 2, 2]");
    assert_eq!(
        text(r#"[typeof(1), typeof("s"), typeof(true), typeof(null), typeof([]), typeof({}), typeof(len)]"#),
        "[Number, String, Boolean, Null, List, Object, Callable]"
    );
    assert!(run("len(3)").is_err());
}

#[test]
fn test_number_parsing() {
    assert_eq!(text(r#"[parseInt(" 42 "), parseInt("ff", 16), parseInt("101", 2)]"#), "[42, 255, 5]");
    assert_eq!(run_ok(r#"isNaN(parseInt("abc"))"#), Value::Bool(true));
    assert_eq!(text(r#"[parseFloat("3.25kg"), parseFloat("-Infinity")]"#), "[3.25, -Infinity]");
    assert_eq!(run_ok(r#"isNaN(parseFloat("kg"))"#), Value::Bool(true));
    assert!(run(r#"parseInt("1", 99)"#).is_err());
}

#[test]
fn test_nan_and_finiteness() {
    assert_eq!(
        text(r#"[isNaN("x"), isNaN(1), isFinite(1), isFinite(parseFloat("Infinity")), isFinite("1")]"#),
        "[true, false, true, false, false]"
    );
}

#[test]
fn test_math() {
    assert_eq!(
        text("[sqrt(16), abs(-3), round(2.5), round(-2.5), floor(1.7), ceil(1.2), pow(2, 10)]"),
        "[4, 3, 3, -2, 1, 2, 1024]"
    );
    assert_eq!(text("[min(3, 1, 2), max(3, 1, 2)]"), "[1, 3]");
    assert_eq!(run_ok("PI > 3.14 && PI < 3.15 && E > 2.71"), Value::Bool(true));
    let r = run_ok("random()").as_number().unwrap();
    assert!((0.0..1.0).contains(&r));
}

#[test]
fn test_conversions() {
    assert_eq!(
        text(r#"[String(12), Number("3.5"), Number(true), Number(null), Boolean(""), Boolean("x")]"#),
        "[12, 3.5, 1, 0, false, true]"
    );
    assert_eq!(run_ok(r#"isNaN(Number("nope"))"#), Value::Bool(true));
}

#[test]
fn test_string_natives() {
    assert_eq!(
        text(r#"[toUpperCase("abc"), toLowerCase("ABC"), trim("  x  "), replace("a-b-c", "-", "+")]"#),
        "[ABC, abc, x, a+b+c]"
    );
    assert_eq!(
        text(r#"[startsWith("kestrel", "kes"), endsWith("kestrel", "rel"), stringContains("kestrel", "str")]"#),
        "[true, true, true]"
    );
    assert_eq!(text(r#"split("a,b,,c", ",")"#), "[a, b, , c]");
    assert_eq!(text(r#"split("abc", "")"#), "[a, b, c]");
    assert_eq!(text(r#"[substring("kestrel", 1, 3), substring("kestrel", 4)]"#), "[es, rel]");
    assert!(run(r#"substring("abc", 2, 9)"#).is_err());
    assert!(run("toUpperCase(1)").is_err());
}

#[test]
fn test_list_natives_mutate_in_place() {
    let result = run_ok(r#"
        var items = [2, 3]
        var a = listPush(items, 4, 5)
        var b = listUnshift(items, 1)
        var popped = listPop(items)
        var shifted = listShift(items)
        [a, b, popped, shifted, items]
    "#);
    assert_eq!(result.to_string(), "[4, 5, 5, 1, [2, 3, 4]]");
    assert_eq!(text("[listPop([]), listShift([])]"), "[null, null]");
}

#[test]
fn test_list_join_slice_reverse() {
    assert_eq!(run_ok("listJoin([1, 2, 3])"), Value::string("1,2,3"));
    assert_eq!(run_ok(r#"listJoin(["a", "b"], " | ")"#), Value::string("a | b"));
    assert_eq!(
        text("var l = [1, 2, 3, 4, 5]\n[listSlice(l, 1, 3), listSlice(l, -2), listSlice(l, 3, 1), listSlice(l, 0, 99)]"),
        "[[2, 3], [4, 5], [], [1, 2, 3, 4, 5]]"
    );
    assert_eq!(text("var l = [1, 2, 3]\nlistReverse(l)\nl"), "[3, 2, 1]");
}

#[test]
fn test_object_natives() {
    assert_eq!(
        text(r#"var o = {b: 2, a: 1}
[ObjectKeys(o), ObjectValues(o), ObjectHasProperty(o, "a"), ObjectHasProperty(o, "z")]"#),
        "[[b, a], [2, 1], true, false]"
    );
}

#[test]
fn test_json_round_trip() {
    let result = run_ok(r#"
        var data = JSON_parse('{"name": "kes", "tags": [1, 2.5, null], "ok": true}')
        [data.name, data.tags[1], data.ok, JSON_stringify(data)]
    "#);
    assert_eq!(
        result.to_string(),
        r#"[kes, 2.5, true, {"name":"kes","tags":[1,2.5,null],"ok":true}]"#
    );
}

#[test]
fn test_json_rejects_self_containing_values() {
    let err = run("var a = [1]\nlistPush(a, a)\nJSON_stringify(a)").unwrap_err();
    assert!(err.message().contains("contains itself"));

    // Shared but acyclic structure is fine
    assert_eq!(
        text("var inner = [1]\nJSON_stringify([inner, inner])"),
        "[[1],[1]]"
    );
}

#[test]
fn test_byte_encoding() {
    assert_eq!(
        text(r#"[bytesSize(getBytes("héllo")), bytesSize(getBytes("héllo", "ISO-8859-1")), bytesSize(getBytes("ab", "UTF-16"))]"#),
        "[6, 5, 6]"
    );
    assert_eq!(
        text(r#"
            var bytes = getBytes("hi", "utf-8")
            [typeof(bytes), bytes.size(), bytes.get(0), bytes.get(1), String(bytes)]
        "#),
        "[HostObject, 2, 104, 105, <ByteArray object>]"
    );
    assert_eq!(text(r#"getBytes("abc") == getBytes("abc")"#), "true");
}

#[test]
fn test_byte_encoding_errors() {
    let err = run("getBytes(1)").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::TypeMismatch(_)));
    let err = run(r#"getBytes("x", "EBCDIC")"#).unwrap_err();
    assert_eq!(err.message(), "unsupported charset 'EBCDIC'");
    let err = run(r#"bytesSize("x")"#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::TypeMismatch("'bytesSize' expects a ByteArray, got String".to_string()));
    assert!(run(r#"getBytes("x").get(5)"#).is_err());
}

#[test]
fn test_json_edge_cases() {
    assert!(run(r#"JSON_parse("42")"#).is_err());
    assert!(run(r#"JSON_parse("{broken")"#).is_err());
    assert_eq!(
        run_ok(r#"JSON_stringify([len, parseFloat("x")])"#),
        Value::string(r#"["<Callable>",null]"#)
    );
}

#[test]
fn test_assert_and_throw() {
    assert!(run_ok("assert(1 == 1)") == Value::Null);
    assert_eq!(
        run("assert(1 == 2)").unwrap_err().kind,
        ErrorKind::Thrown("assertion failed".to_string())
    );
    assert_eq!(
        run(r#"assert(false, "custom")"#).unwrap_err().kind,
        ErrorKind::Thrown("custom".to_string())
    );
    assert_eq!(run("throw(42)").unwrap_err().message(), "42");
}

#[test]
fn test_time_natives() {
    let result = run_ok(r#"
        var start = currentTimeMillis()
        delay(5)
        currentTimeMillis() - start
    "#);
    assert!(result.as_number().unwrap() >= 5.0);
}

#[test]
fn test_host_registered_native_and_context() {
    struct Config {
        greeting: String,
    }

    let engine = engine().with_context(Arc::new(Config {
        greeting: "hello".to_string(),
    }));
    engine
        .register_native("greet", 1..=1, |interp, args| {
            let config = interp
                .context::<Config>()
                .ok_or_else(|| KestrelError::runtime("no context", None))?;
            Ok(Value::String(format!("{}, {}", config.greeting, args[0])))
        })
        .unwrap();

    assert_eq!(engine.execute(r#"greet("kes")"#).unwrap(), Value::string("hello, kes"));
    assert!(engine.execute("greet()").is_err());
}

#[test]
fn test_enclosing_object_is_available_to_natives() {
    let engine = engine().with_enclosing(Value::string("activity"));
    engine
        .register_native("owner", 0..=0, |interp, _| Ok(interp.enclosing().unwrap_or(Value::Null)))
        .unwrap();
    assert_eq!(engine.execute("owner()").unwrap(), Value::string("activity"));
}

#[test]
fn test_stdlib_can_be_disabled() {
    let engine = Engine::with_config(EngineConfig {
        stdlib: false,
        ..EngineConfig::default()
    });
    let err = engine.execute("print(1)").unwrap_err();
    assert_eq!(err.kind, ErrorKind::UndefinedVariable("print".to_string()));
}
