//! Integration tests for host types and script subclasses of them

use std::sync::{Arc, OnceLock};

use kestrel::{Engine, EngineConfig, ErrorKind, HostClass, HostData, HostError, HostObject, HostRef, HostType, Value};
use parking_lot::Mutex;
use pretty_assertions::assert_eq;

struct Widget {
    label: Mutex<String>,
    width: Mutex<i32>,
}

impl Widget {
    fn new(label: &str) -> HostRef {
        HostRef::new(Widget {
            label: Mutex::new(label.to_string()),
            width: Mutex::new(10),
        })
    }
}

impl HostObject for Widget {
    fn host_class(&self) -> Arc<HostClass> {
        widget_class()
    }
}

fn widget(this: &HostRef) -> Result<&Widget, HostError> {
    this.downcast::<Widget>()
        .ok_or_else(|| HostError::WrongReceiver("Widget".to_string()))
}

fn text(data: &HostData) -> String {
    data.as_str().unwrap_or_default().to_string()
}

fn widget_class() -> Arc<HostClass> {
    static CLASS: OnceLock<Arc<HostClass>> = OnceLock::new();
    CLASS
        .get_or_init(|| {
            let style = HostClass::builder("Style")
                .static_field("DEFAULT", HostType::Str, HostData::Str("plain".into()))
                .build();

            HostClass::builder("Widget")
                .constructor(vec![], |_| Ok(Widget::new("widget")))
                .constructor(vec![HostType::Str], |args| Ok(Widget::new(&text(&args[0]))))
                .method("getLabel", vec![], HostType::Str, |this, _| {
                    Ok(HostData::Str(widget(this)?.label.lock().clone()))
                })
                .method("setLabel", vec![HostType::Str], HostType::Void, |this, args| {
                    *widget(this)?.label.lock() = text(&args[0]);
                    Ok(HostData::Null)
                })
                .method("isVisible", vec![], HostType::Bool, |_, _| Ok(HostData::Bool(true)))
                .method("getTheme", vec![], HostType::Str, |_, _| Ok(HostData::Str("light".into())))
                .method("draw", vec![], HostType::Str, |this, _| {
                    Ok(HostData::Str(format!("widget:{}", widget(this)?.label.lock())))
                })
                .method("render", vec![], HostType::Str, |this, _| {
                    let drawn = this.call_virtual("draw", &[])?;
                    let theme = this.call_virtual("getTheme", &[])?;
                    Ok(HostData::Str(format!("[{}|{}]", text(&drawn), text(&theme))))
                })
                .method("resize", vec![HostType::Int], HostType::Void, |this, args| {
                    *widget(this)?.width.lock() = args[0].as_i64().unwrap_or(0) as i32;
                    Ok(HostData::Null)
                })
                .method("resize", vec![HostType::Str], HostType::Str, |_, args| {
                    Ok(HostData::Str(format!("named size {}", text(&args[0]))))
                })
                .method("labelOf", vec![HostType::Object("Widget".into())], HostType::Str, |_, args| {
                    match args[0].as_object() {
                        Some(other) => other.get("label"),
                        None => Ok(HostData::Str("nobody".into())),
                    }
                })
                .final_method("id", vec![], HostType::Int, |_, _| Ok(HostData::Int(7)))
                .field_rw(
                    "width",
                    HostType::Int,
                    |this| Ok(HostData::Int(*widget(this)?.width.lock())),
                    |this, value| {
                        *widget(this)?.width.lock() = value.as_i64().unwrap_or(0) as i32;
                        Ok(())
                    },
                )
                .static_method("create", vec![HostType::Str], HostType::Object("Widget".into()), |args| {
                    Ok(HostData::Object(Widget::new(&text(&args[0]))))
                })
                .static_field("MAX", HostType::Int, HostData::Int(100))
                .nested(style)
                .build()
        })
        .clone()
}

fn engine() -> Engine {
    let engine = Engine::with_config(EngineConfig {
        echo_print: false,
        ..EngineConfig::default()
    });
    engine.register_host_class("gfx.Widget", widget_class());
    engine
}

fn run_ok(source: &str) -> Value {
    engine().execute(source).expect("execution failed")
}

fn host(value: Value) -> HostRef {
    match value {
        Value::Host(host) => host,
        other => panic!("expected a host object, got {:?}", other),
    }
}

#[test]
fn test_getters_setters_and_fields() {
    let result = run_ok(r#"
        import gfx.Widget
        var w = Widget("ok")
        var before = w.label
        w.label = "renamed"
        w.width = 30
        [before, w.label, w.width, w.visible, w.draw()]
    "#);
    assert_eq!(result.to_string(), "[ok, renamed, 30, true, widget:renamed]");
}

#[test]
fn test_overloads_are_selected_by_conversion() {
    let result = run_ok(r#"
        import gfx.Widget
        var w = Widget()
        var a = w.resize(5)
        [a, w.width, w.resize("large")]
    "#);
    assert_eq!(result.to_string(), "[null, 5, named size large]");
}

#[test]
fn test_no_matching_overload_or_constructor() {
    let engine = engine();
    engine.execute("import gfx.Widget\nvar w = Widget()").unwrap();

    let err = engine.execute("w.resize(true)").unwrap_err();
    assert!(matches!(err.kind, ErrorKind::Host(_)));
    assert!(err.message().contains("suitable overload for 'resize'"));

    let err = engine.execute("Widget(true)").unwrap_err();
    assert!(err.message().contains("no constructor of 'Widget'"));

    let err = engine.execute("w.missing()").unwrap_err();
    assert_eq!(err.kind, ErrorKind::NotCallable("Null".to_string()));
}

#[test]
fn test_static_members_and_nested_classes() {
    let result = run_ok(r#"
        import gfx.Widget
        import gfx.Widget.Style
        [Widget.MAX, Widget.create("made").label, Widget.Style.DEFAULT, Style.DEFAULT]
    "#);
    assert_eq!(result.to_string(), "[100, made, plain, plain]");
}

#[test]
fn test_unknown_import() {
    let err = engine().execute("import gfx.Nothing").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ImportNotFound("gfx.Nothing".to_string()));
}

#[test]
fn test_host_values_type_and_display() {
    let result = run_ok(r#"
        import gfx.Widget
        var w = Widget()
        [typeof(w), typeof(Widget), String(w), w == w, w == Widget()]
    "#);
    assert_eq!(result.to_string(), "[HostObject, HostClass, <Widget object>, true, false]");
}

#[test]
fn test_script_override_is_seen_by_host_code() {
    let result = run_ok(r#"
        import gfx.Widget
        class Fancy < Widget {
            static { val theme = "dark" }
            fun init(label) { this.stars = 3 }
            fun draw() { return "fancy:" + this.label + ":" + this.stars }
        }
        Fancy("x").render()
    "#);
    assert_eq!(result, Value::string("[fancy:x:3|dark]"));
}

#[test]
fn test_super_implementation_used_when_not_overridden() {
    let result = run_ok(r#"
        import gfx.Widget
        class Plain < Widget {}
        var p = Plain("y")
        [p.render(), p.id(), String(p)]
    "#);
    assert_eq!(result.to_string(), "[[widget:y|light], 7, <Plain instance>]");
}

#[test]
fn test_baked_values_on_subclass_instances() {
    let engine = engine();
    let value = engine
        .execute(r#"
            import gfx.Widget
            class Fancy < Widget {
                static { val theme = "dark" }
            }
            var f = Fancy()
            [f.theme, f.getTheme()]
        "#)
        .unwrap();
    assert_eq!(value.to_string(), "[dark, dark]");

    let err = engine.execute(r#"f.theme = "light""#).unwrap_err();
    assert_eq!(err.kind, ErrorKind::ReadOnlyProperty("theme".to_string()));
}

#[test]
fn test_host_drives_subclass_instances() {
    let value = run_ok(r#"
        import gfx.Widget
        class Fancy < Widget {
            static { val theme = "dark" }
            fun draw() { return "fancy" }
            fun sparkle(n) { return n * 2 }
        }
        Fancy("inner")
    "#);
    let fancy = host(value);

    assert_eq!(fancy.class().name, "Fancy$Proxy");
    assert!(fancy.class().is_a("Widget"));
    assert_eq!(text(&fancy.call_virtual("draw", &[]).unwrap()), "fancy");
    assert_eq!(text(&fancy.call_virtual("getTheme", &[]).unwrap()), "dark");
    assert_eq!(text(&fancy.get("theme").unwrap()), "dark");
    assert_eq!(text(&fancy.get("label").unwrap()), "inner");
    assert!(matches!(
        fancy.call_virtual("sparkle", &[HostData::Int(4)]).unwrap(),
        HostData::Int(8)
    ));

    let inner = fancy.downcast::<Widget>().expect("proxy wraps a Widget");
    assert_eq!(*inner.label.lock(), "inner");

    assert!(matches!(
        fancy.call_virtual("nothing", &[]),
        Err(HostError::MethodNotFound { .. })
    ));
}

#[test]
fn test_proxy_class_is_built_once_per_script_class() {
    let engine = engine();
    engine
        .execute("import gfx.Widget\nclass Fancy < Widget {}\nvar a = Fancy()\nvar b = Fancy()")
        .unwrap();
    let a = host(engine.global("a").unwrap());
    let b = host(engine.global("b").unwrap());
    assert!(Arc::ptr_eq(&a.class(), &b.class()));
    assert!(!a.ptr_eq(&b));
}

#[test]
fn test_subclass_instances_convert_to_host_parameters() {
    let result = run_ok(r#"
        import gfx.Widget
        class Fancy < Widget {}
        var w = Widget()
        [w.labelOf(Fancy("child")), w.labelOf(null)]
    "#);
    assert_eq!(result.to_string(), "[child, nobody]");
}

#[test]
fn test_script_errors_cross_the_host_boundary_intact() {
    let err = engine()
        .execute(r#"
            import gfx.Widget
            class Broken < Widget {
                fun draw() { return 1 / 0 }
            }
            Broken().render()
        "#)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::DivisionByZero);
    assert_eq!(err.line(), 4);
}

#[test]
fn test_script_subclass_of_subclass_keeps_host_base() {
    let result = run_ok(r#"
        import gfx.Widget
        class Base < Widget {
            fun draw() { return "base" }
        }
        class Leaf < Base {
            fun getTheme() { return "leafy" }
        }
        Leaf().render()
    "#);
    assert_eq!(result, Value::string("[base|leafy]"));
}

#[test]
fn test_call_depth_spans_host_overrides() {
    let engine = Engine::with_config(EngineConfig {
        max_call_depth: 40,
        echo_print: false,
        ..EngineConfig::default()
    });
    engine.register_host_class("gfx.Widget", widget_class());
    let err = engine
        .execute(r#"
            import gfx.Widget
            class Echo < Widget {
                fun draw() { return this.render() }
            }
            Echo().render()
        "#)
        .unwrap_err();
    assert_eq!(err.kind, ErrorKind::StackOverflow(40));

    let result = engine
        .execute(r#"
            fun count(n) {
                if (n == 0) { return 0 }
                return count(n - 1) + 1
            }
            count(35)
        "#)
        .unwrap();
    assert_eq!(result, Value::Number(35.0));
}
