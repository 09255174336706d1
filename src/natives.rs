//! Built-in native functions
//!
//! Installed through [`Engine::register_native`], the same path hosts use
//! for their own functions.

use std::sync::{Arc, OnceLock};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{error, info};

use crate::engine::{Engine, Handoff, Task};
use crate::error::{ErrorKind, KestrelError, Result};
use crate::host::{HostClass, HostData, HostError, HostObject, HostRef, HostType};
use crate::interpreter::Interpreter;
use crate::value::{Fields, Value};

const VARIADIC: usize = usize::MAX;

pub fn install(engine: &Engine) -> Result<()> {
    install_core(engine)?;
    install_math(engine)?;
    install_conversions(engine)?;
    install_strings(engine)?;
    install_lists(engine)?;
    install_objects(engine)?;
    install_json(engine)?;
    install_bytes(engine)?;
    engine.register_native("runOn", 2..=2, run_on)?;
    Ok(())
}

fn type_error(message: String) -> KestrelError {
    KestrelError::new(ErrorKind::TypeMismatch(message), None)
}

fn number(name: &str, args: &[Value], i: usize) -> Result<f64> {
    args[i].as_number().ok_or_else(|| {
        type_error(format!(
            "'{}' expects a number as argument {}, got {}",
            name,
            i + 1,
            args[i].type_name()
        ))
    })
}

fn string<'a>(name: &str, args: &'a [Value], i: usize) -> Result<&'a str> {
    args[i].as_str().ok_or_else(|| {
        type_error(format!(
            "'{}' expects a string as argument {}, got {}",
            name,
            i + 1,
            args[i].type_name()
        ))
    })
}

fn list(name: &str, args: &[Value], i: usize) -> Result<Arc<RwLock<Vec<Value>>>> {
    match &args[i] {
        Value::List(items) => Ok(items.clone()),
        other => Err(type_error(format!(
            "'{}' expects a list as argument {}, got {}",
            name,
            i + 1,
            other.type_name()
        ))),
    }
}

fn joined(args: &[Value]) -> String {
    args.iter().map(Value::to_string).collect::<Vec<_>>().join(" ")
}

fn install_core(engine: &Engine) -> Result<()> {
    engine.register_native("print", 0..=VARIADIC, |interp, args| {
        let line = joined(args);
        if interp.runtime().config().echo_print {
            println!("{}", line);
        }
        info!(target: "kestrel::script", "{}", line);
        Ok(Value::Null)
    })?;

    engine.register_native("error", 0..=VARIADIC, |interp, args| {
        let line = joined(args);
        if interp.runtime().config().echo_print {
            eprintln!("{}", line);
        }
        error!(target: "kestrel::script", "{}", line);
        Ok(Value::Null)
    })?;

    engine.register_native("len", 1..=1, |_, args| match &args[0] {
        Value::String(s) => Ok(Value::Number(s.chars().count() as f64)),
        Value::List(items) => Ok(Value::Number(items.read().len() as f64)),
        Value::Object(obj) => Ok(Value::Number(obj.field_names().len() as f64)),
        other => Err(type_error(format!(
            "'len' expects a string, list or object, got {}",
            other.type_name()
        ))),
    })?;

    engine.register_native("typeof", 1..=1, |_, args| {
        Ok(Value::string(args[0].type_name()))
    })?;

    engine.register_native("currentTimeMillis", 0..=0, |_, _| {
        let millis = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as f64)
            .unwrap_or(0.0);
        Ok(Value::Number(millis))
    })?;

    engine.register_native("delay", 1..=1, |_, args| {
        let millis = number("delay", args, 0)?.max(0.0);
        std::thread::sleep(Duration::from_millis(millis as u64));
        Ok(Value::Null)
    })?;

    engine.register_native("throw", 0..=1, |_, args| {
        let message = args
            .first()
            .map(Value::to_string)
            .unwrap_or_else(|| "error".to_string());
        Err(KestrelError::new(ErrorKind::Thrown(message), None))
    })?;

    engine.register_native("assert", 1..=2, |_, args| {
        if args[0].is_truthy() {
            return Ok(Value::Null);
        }
        let message = args
            .get(1)
            .map(Value::to_string)
            .unwrap_or_else(|| "assertion failed".to_string());
        Err(KestrelError::new(ErrorKind::Thrown(message), None))
    })?;

    Ok(())
}

fn install_math(engine: &Engine) -> Result<()> {
    let unary: [(&'static str, fn(f64) -> f64); 5] = [
        ("sqrt", f64::sqrt),
        ("abs", f64::abs),
        ("floor", f64::floor),
        ("ceil", f64::ceil),
        // Halves round towards positive infinity
        ("round", |n| (n + 0.5).floor()),
    ];
    for (name, op) in unary {
        engine.register_native(name, 1..=1, move |_, args| {
            Ok(Value::Number(op(number(name, args, 0)?)))
        })?;
    }

    engine.register_native("isNaN", 1..=1, |_, args| {
        Ok(Value::Bool(args[0].as_number().map_or(true, f64::is_nan)))
    })?;
    engine.register_native("isFinite", 1..=1, |_, args| {
        Ok(Value::Bool(args[0].as_number().is_some_and(f64::is_finite)))
    })?;
    engine.register_native("random", 0..=0, |_, _| Ok(Value::Number(rand::random::<f64>())))?;
    engine.register_native("pow", 2..=2, |_, args| {
        Ok(Value::Number(number("pow", args, 0)?.powf(number("pow", args, 1)?)))
    })?;
    engine.register_native("min", 1..=VARIADIC, |_, args| {
        let mut result = f64::INFINITY;
        for i in 0..args.len() {
            result = result.min(number("min", args, i)?);
        }
        Ok(Value::Number(result))
    })?;
    engine.register_native("max", 1..=VARIADIC, |_, args| {
        let mut result = f64::NEG_INFINITY;
        for i in 0..args.len() {
            result = result.max(number("max", args, i)?);
        }
        Ok(Value::Number(result))
    })?;

    engine.define_global("PI", Value::Number(std::f64::consts::PI))?;
    engine.define_global("E", Value::Number(std::f64::consts::E))?;
    Ok(())
}

fn install_conversions(engine: &Engine) -> Result<()> {
    engine.register_native("parseInt", 1..=2, |_, args| {
        let text = string("parseInt", args, 0)?.trim();
        let radix = match args.get(1) {
            Some(_) => number("parseInt", args, 1)? as u32,
            None => 10,
        };
        if !(2..=36).contains(&radix) {
            return Err(KestrelError::runtime(
                format!("'parseInt' radix must be between 2 and 36, got {}", radix),
                None,
            ));
        }
        Ok(Value::Number(
            i64::from_str_radix(text, radix).map_or(f64::NAN, |n| n as f64),
        ))
    })?;

    engine.register_native("parseFloat", 1..=1, |_, args| {
        Ok(Value::Number(float_prefix(string("parseFloat", args, 0)?)))
    })?;

    engine.register_native("String", 1..=1, |_, args| Ok(Value::String(args[0].to_string())))?;

    engine.register_native("Number", 1..=1, |_, args| {
        Ok(Value::Number(match &args[0] {
            Value::Number(n) => *n,
            Value::Float(f) => *f as f64,
            Value::String(s) => s.trim().parse::<f64>().unwrap_or(f64::NAN),
            Value::Bool(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Null => 0.0,
            _ => f64::NAN,
        }))
    })?;

    engine.register_native("Boolean", 1..=1, |_, args| Ok(Value::Bool(args[0].is_truthy())))?;
    Ok(())
}

/// Longest numeric prefix of `text`, NaN when there is none
fn float_prefix(text: &str) -> f64 {
    let text = text.trim();
    for (word, value) in [
        ("Infinity", f64::INFINITY),
        ("+Infinity", f64::INFINITY),
        ("-Infinity", f64::NEG_INFINITY),
    ] {
        if text.starts_with(word) {
            return value;
        }
    }
    let end = text
        .find(|c: char| !(c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')))
        .unwrap_or(text.len());
    (1..=end)
        .rev()
        .find_map(|e| text[..e].parse::<f64>().ok())
        .unwrap_or(f64::NAN)
}

fn install_strings(engine: &Engine) -> Result<()> {
    engine.register_native("toUpperCase", 1..=1, |_, args| {
        Ok(Value::String(string("toUpperCase", args, 0)?.to_uppercase()))
    })?;
    engine.register_native("toLowerCase", 1..=1, |_, args| {
        Ok(Value::String(string("toLowerCase", args, 0)?.to_lowercase()))
    })?;
    engine.register_native("trim", 1..=1, |_, args| {
        Ok(Value::string(string("trim", args, 0)?.trim()))
    })?;
    engine.register_native("startsWith", 2..=2, |_, args| {
        Ok(Value::Bool(string("startsWith", args, 0)?.starts_with(string("startsWith", args, 1)?)))
    })?;
    engine.register_native("endsWith", 2..=2, |_, args| {
        Ok(Value::Bool(string("endsWith", args, 0)?.ends_with(string("endsWith", args, 1)?)))
    })?;
    engine.register_native("stringContains", 2..=2, |_, args| {
        Ok(Value::Bool(
            string("stringContains", args, 0)?.contains(string("stringContains", args, 1)?),
        ))
    })?;
    engine.register_native("replace", 3..=3, |_, args| {
        let text = string("replace", args, 0)?;
        let from = string("replace", args, 1)?;
        let to = string("replace", args, 2)?;
        Ok(Value::String(text.replace(from, to)))
    })?;
    engine.register_native("split", 2..=2, |_, args| {
        let text = string("split", args, 0)?;
        let delimiter = string("split", args, 1)?;
        let parts: Vec<Value> = if delimiter.is_empty() {
            text.chars().map(|c| Value::String(c.to_string())).collect()
        } else {
            text.split(delimiter).map(Value::string).collect()
        };
        Ok(Value::list(parts))
    })?;
    engine.register_native("substring", 2..=3, |_, args| {
        let text = string("substring", args, 0)?;
        let chars: Vec<char> = text.chars().collect();
        let start = number("substring", args, 1)?;
        let end = match args.get(2) {
            Some(_) => number("substring", args, 2)?,
            None => chars.len() as f64,
        };
        if start < 0.0 || end > chars.len() as f64 || start > end {
            return Err(KestrelError::runtime(
                format!(
                    "substring range [{}, {}) is out of bounds for length {}",
                    start,
                    end,
                    chars.len()
                ),
                None,
            ));
        }
        Ok(Value::String(chars[start as usize..end as usize].iter().collect()))
    })?;
    Ok(())
}

fn install_lists(engine: &Engine) -> Result<()> {
    engine.register_native("listPush", 2..=VARIADIC, |interp, args| {
        let items = list("listPush", args, 0)?;
        let len = {
            let mut items = items.write();
            items.extend(args[1..].iter().cloned());
            items.len()
        };
        for pushed in &args[1..] {
            interp.runtime().collector().track_store(&args[0], pushed);
        }
        Ok(Value::Number(len as f64))
    })?;
    engine.register_native("listPop", 1..=1, |_, args| {
        let items = list("listPop", args, 0)?;
        let popped = items.write().pop();
        Ok(popped.unwrap_or(Value::Null))
    })?;
    engine.register_native("listShift", 1..=1, |_, args| {
        let items = list("listShift", args, 0)?;
        let mut items = items.write();
        if items.is_empty() {
            Ok(Value::Null)
        } else {
            Ok(items.remove(0))
        }
    })?;
    engine.register_native("listUnshift", 2..=VARIADIC, |interp, args| {
        let items = list("listUnshift", args, 0)?;
        let len = {
            let mut items = items.write();
            items.splice(0..0, args[1..].iter().cloned());
            items.len()
        };
        for pushed in &args[1..] {
            interp.runtime().collector().track_store(&args[0], pushed);
        }
        Ok(Value::Number(len as f64))
    })?;
    engine.register_native("listJoin", 1..=2, |_, args| {
        let items = list("listJoin", args, 0)?;
        let separator = match args.get(1) {
            Some(_) => string("listJoin", args, 1)?,
            None => ",",
        };
        let items = items.read().clone();
        Ok(Value::String(
            items.iter().map(Value::to_string).collect::<Vec<_>>().join(separator),
        ))
    })?;
    engine.register_native("listSlice", 2..=3, |_, args| {
        let items = list("listSlice", args, 0)?;
        let items = items.read().clone();
        let len = items.len() as i64;
        let clamp = |index: f64| -> usize {
            let index = index as i64;
            let index = if index < 0 { len + index } else { index };
            index.clamp(0, len) as usize
        };
        let start = clamp(number("listSlice", args, 1)?);
        let end = match args.get(2) {
            Some(_) => clamp(number("listSlice", args, 2)?),
            None => items.len(),
        };
        if start >= end {
            return Ok(Value::list(Vec::new()));
        }
        Ok(Value::list(items[start..end].to_vec()))
    })?;
    engine.register_native("listReverse", 1..=1, |_, args| {
        list("listReverse", args, 0)?.write().reverse();
        Ok(args[0].clone())
    })?;
    Ok(())
}

fn install_objects(engine: &Engine) -> Result<()> {
    fn fields(name: &str, value: &Value) -> Result<Fields> {
        match value {
            Value::Object(obj) => Ok(obj.fields_snapshot()),
            other => Err(type_error(format!(
                "'{}' expects an object, got {}",
                name,
                other.type_name()
            ))),
        }
    }

    engine.register_native("ObjectKeys", 1..=1, |_, args| {
        let fields = fields("ObjectKeys", &args[0])?;
        Ok(Value::list(fields.into_keys().map(Value::String).collect()))
    })?;
    engine.register_native("ObjectValues", 1..=1, |_, args| {
        let fields = fields("ObjectValues", &args[0])?;
        Ok(Value::list(fields.into_values().collect()))
    })?;
    engine.register_native("ObjectHasProperty", 2..=2, |_, args| {
        let key = string("ObjectHasProperty", args, 1)?;
        match &args[0] {
            Value::Object(obj) => Ok(Value::Bool(obj.has_field(key))),
            other => Err(type_error(format!(
                "'ObjectHasProperty' expects an object, got {}",
                other.type_name()
            ))),
        }
    })?;
    Ok(())
}

fn install_json(engine: &Engine) -> Result<()> {
    engine.register_native("JSON_parse", 1..=1, |_, args| {
        let text = string("JSON_parse", args, 0)?;
        let json: serde_json::Value = serde_json::from_str(text).map_err(|e| {
            KestrelError::runtime(format!("invalid JSON: {}", e), None).with_cause(e)
        })?;
        if !(json.is_object() || json.is_array()) {
            return Err(KestrelError::runtime(
                "'JSON_parse' expects an object or array at the root",
                None,
            ));
        }
        Ok(from_json(json))
    })?;

    engine.register_native("JSON_stringify", 1..=1, |_, args| {
        let json = to_json(&args[0], &mut Vec::new())?;
        serde_json::to_string(&json)
            .map(Value::String)
            .map_err(|e| KestrelError::runtime(format!("cannot serialize: {}", e), None).with_cause(e))
    })?;
    Ok(())
}

fn from_json(json: serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::Null,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
        serde_json::Value::String(s) => Value::String(s),
        serde_json::Value::Array(items) => Value::list(items.into_iter().map(from_json).collect()),
        serde_json::Value::Object(map) => {
            Value::object(map.into_iter().map(|(k, v)| (k, from_json(v))).collect())
        }
    }
}

fn json_number(n: f64) -> serde_json::Value {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        serde_json::Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

/// `path` holds the lists and objects being serialized; JSON has no way to
/// express one containing itself
fn to_json(value: &Value, path: &mut Vec<usize>) -> Result<serde_json::Value> {
    let id = value.identity();
    if let Some(id) = id {
        if path.contains(&id) {
            return Err(KestrelError::runtime(
                "'JSON_stringify' cannot serialize a value that contains itself",
                None,
            ));
        }
        path.push(id);
    }
    let json = match value {
        Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => json_number(*n),
        Value::Float(f) => json_number(*f as f64),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::List(items) => {
            let items = items.read().clone();
            serde_json::Value::Array(
                items
                    .iter()
                    .map(|item| to_json(item, path))
                    .collect::<Result<_>>()?,
            )
        }
        Value::Object(obj) => serde_json::Value::Object(
            obj.fields_snapshot()
                .iter()
                .map(|(k, v)| Ok((k.clone(), to_json(v, path)?)))
                .collect::<Result<_>>()?,
        ),
        Value::Host(host) => serde_json::Value::String(host.object().describe()),
        _ => serde_json::Value::String("<Callable>".to_string()),
    };
    if id.is_some() {
        path.pop();
    }
    Ok(json)
}

/// Encoded text returned by `getBytes`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ByteArray(Vec<u8>);

impl ByteArray {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn class() -> Arc<HostClass> {
        static CLASS: OnceLock<Arc<HostClass>> = OnceLock::new();
        CLASS
            .get_or_init(|| {
                HostClass::builder("ByteArray")
                    .final_method("size", vec![], HostType::Int, |this, _| {
                        Ok(HostData::Int(bytes_of(this)?.len() as i32))
                    })
                    .final_method("get", vec![HostType::Int], HostType::Int, |this, args| {
                        let bytes = bytes_of(this)?;
                        let index = args[0].as_i64().unwrap_or(-1);
                        usize::try_from(index)
                            .ok()
                            .and_then(|i| bytes.as_bytes().get(i))
                            .map(|byte| HostData::Int(i32::from(*byte)))
                            .ok_or_else(|| {
                                HostError::failed(format!(
                                    "byte index {} out of bounds for length {}",
                                    index,
                                    bytes.len()
                                ))
                            })
                    })
                    .build()
            })
            .clone()
    }
}

impl HostObject for ByteArray {
    fn host_class(&self) -> Arc<HostClass> {
        Self::class()
    }

    fn host_eq(&self, other: &HostRef) -> bool {
        other.downcast::<ByteArray>() == Some(self)
    }
}

fn bytes_of(this: &HostRef) -> std::result::Result<&ByteArray, HostError> {
    this.downcast::<ByteArray>()
        .ok_or_else(|| HostError::WrongReceiver("ByteArray".to_string()))
}

/// Encode `text` in a named charset. Characters a single-byte charset
/// cannot represent become `?`.
fn encode(text: &str, charset: &str) -> Option<Vec<u8>> {
    let single_byte = |limit: u32| -> Vec<u8> {
        text.chars()
            .map(|c| if (c as u32) < limit { c as u8 } else { b'?' })
            .collect()
    };
    let bytes = match charset.to_ascii_uppercase().replace('_', "-").as_str() {
        "UTF-8" | "UTF8" => text.as_bytes().to_vec(),
        "UTF-16" => [0xFE, 0xFF]
            .into_iter()
            .chain(text.encode_utf16().flat_map(u16::to_be_bytes))
            .collect(),
        "UTF-16BE" => text.encode_utf16().flat_map(u16::to_be_bytes).collect(),
        "UTF-16LE" => text.encode_utf16().flat_map(u16::to_le_bytes).collect(),
        "ISO-8859-1" | "LATIN1" => single_byte(0x100),
        "US-ASCII" | "ASCII" => single_byte(0x80),
        _ => return None,
    };
    Some(bytes)
}

fn install_bytes(engine: &Engine) -> Result<()> {
    engine.register_native("getBytes", 1..=2, |_, args| {
        let text = string("getBytes", args, 0)?;
        let charset = match args.get(1) {
            Some(_) => string("getBytes", args, 1)?,
            None => "UTF-8",
        };
        let bytes = encode(text, charset).ok_or_else(|| {
            KestrelError::runtime(format!("unsupported charset '{}'", charset), None)
        })?;
        Ok(Value::Host(HostRef::new(ByteArray::new(bytes))))
    })?;
    engine.register_native("bytesSize", 1..=1, |_, args| {
        if let Some(bytes) = args[0].as_host().and_then(|host| host.downcast::<ByteArray>()) {
            return Ok(Value::Number(bytes.len() as f64));
        }
        Err(type_error(format!(
            "'bytesSize' expects a ByteArray, got {}",
            args[0].type_name()
        )))
    })?;
    Ok(())
}

/// `runOn(scheduler, fnOrSource)`: run in the current scope on another
/// interpreter, scheduled by the host
fn run_on(interp: &mut Interpreter, args: &[Value]) -> Result<Value> {
    let target = string("runOn", args, 0)?;
    let scheduler = interp.runtime().scheduler(target).ok_or_else(|| {
        KestrelError::runtime(format!("no scheduler registered under '{}'", target), None)
    })?;
    let task = match &args[1] {
        Value::String(source) => Task::Source(source.clone()),
        callable if callable.is_callable() => Task::Call(callable.clone()),
        other => {
            return Err(type_error(format!(
                "'runOn' expects a function or source text, got {}",
                other.type_name()
            )))
        }
    };
    let handoff = Handoff::new(interp.runtime().clone(), interp.scope().clone(), task);
    scheduler.schedule(handoff.into_job());
    Ok(Value::Null)
}
