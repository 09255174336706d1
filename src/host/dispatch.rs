//! Member dispatch on host objects
//!
//! Reads try a `getX`/`isX` getter, then a field, then a method of that
//! name. Writes try `setX` setters, then a writable field. Method calls
//! collect candidates by name and arity, most derived class first, and run
//! the first one whose arguments convert.

use std::sync::Arc;

use tracing::{debug, trace, warn};

use super::convert::{coerce_args, describe_args, from_host, to_host, to_host_args};
use super::{accessor_name, FieldAccess, HostClass, HostData, HostError, HostMethodDef, HostRef, HostType};
use crate::error::{ErrorKind, KestrelError, Result};
use crate::interpreter::Interpreter;
use crate::value::{BoundMethod, HostMethod, HostReceiver, Value};

/// Script-side property read on a host object. Unknown names read as Null.
pub fn get_property(interp: &mut Interpreter, host: &HostRef, name: &str) -> Result<Value> {
    let proxy = host.proxy();
    if let Some(value) = proxy.and_then(|p| p.baked_property(name)) {
        return Ok(value);
    }

    let class = host.class();
    for getter in [accessor_name("get", name), accessor_name("is", name)] {
        if let Some(method) = proxy.and_then(|p| p.script_method(&getter)) {
            return interp.call_function(&method, Some(Value::Host(host.clone())), Vec::new());
        }
        if let Some(method) = class.methods_named(&getter, 0, false).first() {
            trace!(class = %class.name, getter = %getter, "host getter");
            return Ok(from_host(method.invoke(Some(host), &[])?));
        }
    }

    if let Some(field) = class.find_field(name, false) {
        if let FieldAccess::Instance { get, .. } = &field.access {
            return Ok(from_host(get(host)?));
        }
    }

    if let Some(proxy) = proxy {
        if let Some(value) = proxy.script_object().get_field(name) {
            return Ok(value);
        }
        if let Some(method) = proxy.script_method(name) {
            return Ok(Value::BoundMethod(Arc::new(BoundMethod {
                receiver: Value::Host(host.clone()),
                method,
            })));
        }
    }

    if class.has_method(name, false) {
        return Ok(Value::HostMethod(Arc::new(HostMethod {
            target: HostReceiver::Instance(host.clone()),
            name: name.to_string(),
        })));
    }
    Ok(Value::Null)
}

/// Script-side property write on a host object
pub fn set_property(interp: &mut Interpreter, host: &HostRef, name: &str, value: Value) -> Result<()> {
    let proxy = host.proxy();
    if proxy.is_some_and(|p| p.baked_property(name).is_some()) {
        return Err(KestrelError::new(ErrorKind::ReadOnlyProperty(name.to_string()), None));
    }

    let class = host.class();
    let setter = accessor_name("set", name);
    if let Some(method) = proxy.and_then(|p| p.script_method(&setter)) {
        interp.call_function(&method, Some(Value::Host(host.clone())), vec![value])?;
        return Ok(());
    }

    let candidates = class.methods_named(&setter, 1, false);
    for method in &candidates {
        if let Ok(args) = to_host_args(std::slice::from_ref(&value), &method.params) {
            trace!(class = %class.name, setter = %setter, "host setter");
            method.invoke(Some(host), &args)?;
            return Ok(());
        }
    }

    if let Some(field) = class.find_field(name, false) {
        if let FieldAccess::Instance { set: Some(set), .. } = &field.access {
            set(host, to_host(&value, &field.ty)?)?;
            return Ok(());
        }
    }

    if let Some(proxy) = proxy {
        proxy.script_object().set_field(name, value);
        return Ok(());
    }

    if !candidates.is_empty() {
        warn!(class = %class.name, setter = %setter, "no setter overload accepts the value");
        return Err(HostError::NoMatchingOverload {
            name: setter,
            args: value.type_name().to_string(),
        }
        .into());
    }
    Err(KestrelError::new(ErrorKind::UnwritableProperty(name.to_string()), None))
}

/// Static member read through a class handle: nested class, static field,
/// then static method
pub fn get_static(class: &Arc<HostClass>, name: &str) -> Result<Value> {
    if let Some(nested) = class.find_nested(name) {
        return Ok(Value::HostClass(nested));
    }
    if let Some(field) = class.find_field(name, true) {
        if let FieldAccess::Static(data) = &field.access {
            return Ok(from_host(data.clone()));
        }
    }
    if class.has_method(name, true) {
        return Ok(Value::HostMethod(Arc::new(HostMethod {
            target: HostReceiver::Static(class.clone()),
            name: name.to_string(),
        })));
    }
    Ok(Value::Null)
}

/// Call a bound host method from script
pub fn call_host_method(interp: &mut Interpreter, method: &HostMethod, args: Vec<Value>) -> Result<Value> {
    match &method.target {
        HostReceiver::Instance(host) => call_method(interp, host, &method.name, args),
        HostReceiver::Static(class) => {
            let candidates = class.methods_named(&method.name, args.len(), true);
            invoke_first(class, &method.name, &candidates, None, &args)
        }
    }
}

/// Call an instance method by name. On synthesized subclasses baked values
/// and script overrides win over the host implementation.
pub fn call_method(interp: &mut Interpreter, host: &HostRef, name: &str, args: Vec<Value>) -> Result<Value> {
    if let Some(proxy) = host.proxy() {
        if args.is_empty() {
            if let Some(value) = proxy.baked(name) {
                return Ok(value);
            }
        }
        if let Some(method) = proxy.script_method(name) {
            return interp.call_function(&method, Some(Value::Host(host.clone())), args);
        }
    }
    let class = host.class();
    let candidates = class.methods_named(name, args.len(), false);
    invoke_first(&class, name, &candidates, Some(host), &args)
}

fn invoke_first(
    class: &HostClass,
    name: &str,
    candidates: &[&HostMethodDef],
    receiver: Option<&HostRef>,
    args: &[Value],
) -> Result<Value> {
    if candidates.is_empty() {
        return Err(HostError::MethodNotFound {
            class: class.name.clone(),
            name: name.to_string(),
            arity: args.len(),
        }
        .into());
    }
    for method in candidates {
        match to_host_args(args, &method.params) {
            Ok(converted) => {
                trace!(class = %class.name, method = %name, "host call");
                return Ok(from_host(method.invoke(receiver, &converted)?));
            }
            Err(err) => trace!(method = %name, error = %err, "overload rejected"),
        }
    }
    warn!(class = %class.name, method = %name, "no overload accepts the arguments");
    Err(HostError::NoMatchingOverload {
        name: name.to_string(),
        args: describe_args(args),
    }
    .into())
}

/// Construct a host object through the first constructor overload whose
/// parameters accept `args`
pub fn construct(class: &HostClass, args: &[Value]) -> std::result::Result<HostRef, HostError> {
    for ctor in class.constructors.iter().filter(|c| c.params.len() == args.len()) {
        if let Ok(converted) = to_host_args(args, &ctor.params) {
            debug!(class = %class.name, arity = args.len(), "constructing host object");
            return (ctor.body)(&converted);
        }
    }
    Err(HostError::NoMatchingConstructor {
        class: class.name.clone(),
        args: describe_args(args),
    })
}

/// Host-side virtual call. Candidate slots on synthesized subclasses route
/// to baked values and script overrides before the super implementation.
pub fn call_virtual(host: &HostRef, name: &str, args: &[HostData]) -> std::result::Result<HostData, HostError> {
    let proxy = host.proxy();
    if args.is_empty() {
        if let Some(value) = proxy.and_then(|p| p.baked(name)) {
            return to_host(&value, &HostType::Any);
        }
    }

    let class = host.class();
    let candidates = class.methods_named(name, args.len(), false);
    for method in &candidates {
        if let Ok(converted) = coerce_args(args, &method.params) {
            return method.invoke(Some(host), &converted);
        }
    }

    // Script-only methods are reachable from the host too
    if let Some(proxy) = proxy {
        if proxy.script_method(name).is_some() {
            return proxy.invoke_script(host, name, args, &HostType::Any);
        }
    }

    if candidates.is_empty() {
        Err(HostError::MethodNotFound {
            class: class.name.clone(),
            name: name.to_string(),
            arity: args.len(),
        })
    } else {
        Err(HostError::NoMatchingOverload {
            name: name.to_string(),
            args: args.iter().map(HostData::type_name).collect::<Vec<_>>().join(", "),
        })
    }
}

/// Host-side property read, following the same getter and field rules
pub fn read_host(host: &HostRef, name: &str) -> std::result::Result<HostData, HostError> {
    let proxy = host.proxy();
    if let Some(value) = proxy.and_then(|p| p.baked_property(name)) {
        return to_host(&value, &HostType::Any);
    }

    let class = host.class();
    for getter in [accessor_name("get", name), accessor_name("is", name)] {
        if let Some(method) = class.methods_named(&getter, 0, false).first() {
            return method.invoke(Some(host), &[]);
        }
    }
    if let Some(field) = class.find_field(name, false) {
        if let FieldAccess::Instance { get, .. } = &field.access {
            return get(host);
        }
    }
    match proxy.and_then(|p| p.script_object().get_field(name)) {
        Some(value) => to_host(&value, &HostType::Any),
        None => Ok(HostData::Null),
    }
}
