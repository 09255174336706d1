//! Integration tests for classes and instances

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
fn test_class_instantiation() {
    let result = run_ok(r#"
        class Box {
            fun init(value) {
                this.value = value
            }
        }
        var b = Box(42)
        b.value
    "#);

    assert_eq!(result, Value::Number(42.0));
}

#[test]
fn test_class_method() {
    let result = run_ok(r#"
        class Counter {
            fun init() {
                this.count = 0
            }
            fun inc() {
                this.count += 1
                return this.count
            }
        }
        var c = Counter()
        c.inc()
        c.inc()
        c.inc()
    "#);

    assert_eq!(result, Value::Number(3.0));
}

#[test]
fn test_this_binding() {
    let result = run_ok(r#"
        class Person {
            fun init(name) {
                this.name = name
            }
            fun greet() {
                return "hi " + this.name
            }
        }
        var p = Person("Alice")
        var greet = p.greet
        greet()
    "#);

    assert_eq!(result, Value::string("hi Alice"));
}

#[test]
fn test_multiple_instances() {
    let result = run_ok(r#"
        class Counter {
            fun init(start) {
                this.total = start
            }
            fun add(n) {
                this.total = this.total + n
                return this.total
            }
        }
        var a = Counter(10)
        var b = Counter(20)
        a.add(5)
        b.add(3)
        a.total + b.total
    "#);

    assert_eq!(result, Value::Number(38.0));
}

#[test]
fn test_class_without_init() {
    let result = run_ok(r#"
        class Empty {}
        var e = Empty()
        e.x = 42
        e.x
    "#);

    assert_eq!(result, Value::Number(42.0));
}

#[test]
fn test_method_chaining() {
    let result = run_ok(r#"
        class Builder {
            fun init() {
                this.total = 0
            }
            fun add(n) {
                this.total += n
                return this
            }
            fun result() {
                return this.total
            }
        }
        Builder().add(1).add(2).add(3).result()
    "#);

    assert_eq!(result, Value::Number(6.0));
}

#[test]
fn test_inherited_and_overridden_methods() {
    let result = run_ok(r#"
        class Animal {
            fun init(name) { this.name = name }
            fun describe() { return this.name + " says " + this.sound() }
            fun sound() { return "..." }
        }
        class Dog < Animal {
            fun sound() { return "woof" }
        }
        Dog("Rex").describe()
    "#);

    assert_eq!(result, Value::string("Rex says woof"));
}

#[test]
fn test_static_block_values_are_baked() {
    let result = run_ok(r#"
        class Dog {
            static {
                val SOUND = "woof"
                var legs = 2 + 2
            }
        }
        var d = Dog()
        [d.SOUND, d.getSOUND(), d.legs, d.getLegs()]
    "#);

    assert_eq!(result.to_string(), "[woof, woof, 4, 4]");
}

#[test]
fn test_baked_values_are_read_only() {
    let err = run(r#"
        class Dog {
            static { val SOUND = "woof" }
        }
        var d = Dog()
        d.SOUND = "meow"
    "#)
    .unwrap_err();

    assert_eq!(err.kind, ErrorKind::ReadOnlyProperty("SOUND".to_string()));
}

#[test]
fn test_static_block_error_names_the_class() {
    let err = run(r#"
        class Broken {
            static { val x = 1 / 0 }
        }
        Broken()
    "#)
    .unwrap_err();

    assert!(err.message().contains("static block for class 'Broken'"));
}

#[test]
fn test_static_block_runs_outside_the_calling_function() {
    let err = run(r#"
        class Early {
            static { return 1 }
        }
        fun make() { return Early() }
        make()
    "#)
    .unwrap_err();
    assert!(err.message().contains("static block for class 'Early'"));
    assert!(err.message().contains("'return' is not inside a function"));
}

#[test]
fn test_static_block_runs_outside_the_enclosing_loop() {
    let err = run(r#"
        var made = 0
        while (made < 3) {
            class Looped {
                static { break }
            }
            Looped()
            made += 1
        }
    "#)
    .unwrap_err();
    assert!(err.message().contains("static block for class 'Looped'"));
    assert!(err.message().contains("'break' is not inside a loop or switch"));
}

#[test]
fn test_superclass_must_be_a_class() {
    let err = run(r#"
        var NotAClass = 3
        class Thing < NotAClass {}
    "#)
    .unwrap_err();

    assert!(matches!(err.kind, ErrorKind::TypeMismatch(_)));
}

#[test]
fn test_instance_display() {
    let result = run_ok(r#"
        class Point { fun init(x) { this.x = x } }
        String(Point(1))
    "#);

    assert_eq!(result, Value::string("<Point instance>"));
}
