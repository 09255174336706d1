//! Value conversion across the host boundary
//!
//! Conversion is driven by the target type: a script value is first mapped
//! to its natural host shape and then coerced to whatever the parameter,
//! field or return slot asks for.

use std::collections::BTreeMap;

use super::{HostData, HostError, HostType};
use crate::value::{ScriptObject, Value};

/// Convert a script value for a host slot of type `ty`
pub fn to_host(value: &Value, ty: &HostType) -> Result<HostData, HostError> {
    coerce(natural(value)?, ty)
}

/// Convert each argument for the matching parameter type
pub fn to_host_args(args: &[Value], params: &[HostType]) -> Result<Vec<HostData>, HostError> {
    args.iter().zip(params).map(|(arg, ty)| to_host(arg, ty)).collect()
}

/// Coerce already-converted host data to each parameter type
pub fn coerce_args(args: &[HostData], params: &[HostType]) -> Result<Vec<HostData>, HostError> {
    args.iter()
        .zip(params)
        .map(|(arg, ty)| coerce(arg.clone(), ty))
        .collect()
}

/// The host shape a value takes when the target accepts anything
fn natural(value: &Value) -> Result<HostData, HostError> {
    Ok(match value {
        Value::Null => HostData::Null,
        Value::Number(n) => {
            if n.is_finite() && n.fract() == 0.0 {
                if *n >= i32::MIN as f64 && *n <= i32::MAX as f64 {
                    HostData::Int(*n as i32)
                } else if n.abs() < 9.2e18 {
                    HostData::Long(*n as i64)
                } else {
                    HostData::Double(*n)
                }
            } else {
                HostData::Double(*n)
            }
        }
        Value::Float(f) => HostData::Float(*f),
        Value::String(s) => HostData::Str(s.clone()),
        Value::Bool(b) => HostData::Bool(*b),
        Value::List(items) => {
            let items = items.read().clone();
            HostData::List(items.iter().map(natural).collect::<Result<_, _>>()?)
        }
        Value::Object(object) => {
            let fields = object.fields_snapshot();
            let mut map = BTreeMap::new();
            for (key, field) in fields {
                map.insert(key, natural(&field)?);
            }
            HostData::Map(map)
        }
        Value::Host(host) => HostData::Object(host.clone()),
        Value::HostClass(class) => HostData::Class(class.clone()),
        other => {
            return Err(HostError::Conversion {
                from: other.type_name().to_string(),
                to: "a host value".to_string(),
            })
        }
    })
}

/// Coerce host data to a target type. Null fits every slot.
pub fn coerce(data: HostData, ty: &HostType) -> Result<HostData, HostError> {
    match (ty, data) {
        (_, HostData::Null) => Ok(HostData::Null),
        (HostType::Any, data) => Ok(data),
        (HostType::Long, HostData::Long(l)) => Ok(HostData::Long(l)),
        (HostType::Int, data) if data.as_f64().is_some() => Ok(HostData::Int(numeric(&data) as i32)),
        (HostType::Long, data) if data.as_f64().is_some() => Ok(HostData::Long(numeric(&data) as i64)),
        (HostType::Float, data) if data.as_f64().is_some() => Ok(HostData::Float(numeric(&data) as f32)),
        (HostType::Double, data) if data.as_f64().is_some() => Ok(HostData::Double(numeric(&data))),
        (HostType::Bool, HostData::Bool(b)) => Ok(HostData::Bool(b)),
        (HostType::Str, HostData::Str(s)) => Ok(HostData::Str(s)),
        (HostType::List, HostData::List(items)) => Ok(HostData::List(items)),
        (HostType::Map, HostData::Map(map)) => Ok(HostData::Map(map)),
        (HostType::Object(name), HostData::Object(object)) if object.class().is_a(name) => {
            Ok(HostData::Object(object))
        }
        (ty, data) => Err(HostError::Conversion {
            from: data.type_name().to_string(),
            to: ty.to_string(),
        }),
    }
}

fn numeric(data: &HostData) -> f64 {
    data.as_f64().unwrap_or(f64::NAN)
}

/// Convert host data back into a script value
pub fn from_host(data: HostData) -> Value {
    match data {
        HostData::Null => Value::Null,
        HostData::Int(i) => Value::Number(i as f64),
        HostData::Long(l) => Value::Number(l as f64),
        HostData::Double(d) => Value::Number(d),
        HostData::Float(f) => Value::Float(f),
        HostData::Bool(b) => Value::Bool(b),
        HostData::Str(s) => Value::String(s),
        HostData::List(items) => Value::list(items.into_iter().map(from_host).collect()),
        HostData::Map(map) => Value::Object(ScriptObject::plain(
            map.into_iter().map(|(k, v)| (k, from_host(v))).collect(),
        )),
        HostData::Object(object) => Value::Host(object),
        HostData::Class(class) => Value::HostClass(class),
    }
}

/// Comma separated type names, for overload diagnostics
pub fn describe_args(args: &[Value]) -> String {
    args.iter().map(Value::type_name).collect::<Vec<_>>().join(", ")
}
