//! Runtime value types for Kestrel
//!
//! Lists and objects have reference semantics: every clone of a `Value`
//! aliases the same storage. All values are `Send + Sync` so a captured
//! scope can be handed to an interpreter on another thread.

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::RangeInclusive;
use std::sync::{Arc, OnceLock};

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::ast::{format_number, ClassDecl, FunctionDecl};
use crate::environment::Scope;
use crate::error::{ErrorKind, KestrelError, Result};
use crate::host::{HostClass, HostRef};
use crate::interpreter::Interpreter;

/// Fields of an object, in insertion order
pub type Fields = IndexMap<String, Value>;

/// Runtime values in Kestrel
#[derive(Clone)]
pub enum Value {
    Null,

    /// Double precision number
    Number(f64),

    /// Single precision number, kept apart for host overload selection
    Float(f32),

    String(String),

    Bool(bool),

    /// Mutable list shared by every alias
    List(Arc<RwLock<Vec<Value>>>),

    /// Class instance or plain map-like object
    Object(Arc<ScriptObject>),

    Class(Arc<ScriptClass>),

    /// Script function with its captured scope
    Function(Arc<ScriptFunction>),

    /// Built-in function
    Native(Arc<NativeFunction>),

    /// Script method bound to its receiver
    BoundMethod(Arc<BoundMethod>),

    /// Host method bound to an instance or class
    HostMethod(Arc<HostMethod>),

    /// Host constructor handle
    HostClass(Arc<HostClass>),

    /// Opaque host object
    Host(HostRef),
}

impl Value {
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Arc::new(RwLock::new(items)))
    }

    pub fn string(s: impl Into<String>) -> Self {
        Value::String(s.into())
    }

    /// A plain object with the given fields
    pub fn object(fields: Fields) -> Self {
        Value::Object(ScriptObject::plain(fields))
    }

    /// Name reported by `typeof`
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Null => "Null",
            Value::Number(_) => "Number",
            Value::Float(_) => "Float",
            Value::String(_) => "String",
            Value::Bool(_) => "Boolean",
            Value::List(_) => "List",
            Value::Object(_) => "Object",
            Value::Class(_) => "Class",
            Value::Function(_) | Value::Native(_) | Value::BoundMethod(_) | Value::HostMethod(_) => {
                "Callable"
            }
            Value::HostClass(_) => "HostClass",
            Value::Host(_) => "HostObject",
        }
    }

    /// Null, false, zero, "" and [] are falsy
    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::Float(f) => *f != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::List(items) => !items.read().is_empty(),
            _ => true,
        }
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            self,
            Value::Function(_)
                | Value::Native(_)
                | Value::BoundMethod(_)
                | Value::HostMethod(_)
                | Value::Class(_)
                | Value::HostClass(_)
        )
    }

    /// Numeric payload of Number or Float
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Float(f) => Some(*f as f64),
            _ => None,
        }
    }

    /// Integral numeric payload, used for indices and counts
    pub fn as_index(&self) -> Option<i64> {
        self.as_number()
            .filter(|n| n.is_finite() && n.fract() == 0.0)
            .map(|n| n as i64)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_host(&self) -> Option<&HostRef> {
        match self {
            Value::Host(host) => Some(host),
            _ => None,
        }
    }

    /// Address of the shared storage behind a list or object
    pub(crate) fn identity(&self) -> Option<usize> {
        match self {
            Value::List(items) => Some(Arc::as_ptr(items) as *const () as usize),
            Value::Object(object) => Some(Arc::as_ptr(object) as *const () as usize),
            _ => None,
        }
    }

    /// Debug form: strings quoted, floats suffixed
    pub fn repr(&self) -> String {
        let mut out = String::new();
        // Writing to a String cannot fail
        let _ = self.write(&mut out, true);
        out
    }

    fn write(&self, out: &mut impl fmt::Write, repr: bool) -> fmt::Result {
        self.write_nested(out, repr, &mut Vec::new())
    }

    /// `path` holds the containers being printed; meeting one again prints
    /// `[...]` or `{...}` instead of recursing forever
    fn write_nested(&self, out: &mut impl fmt::Write, repr: bool, path: &mut Vec<usize>) -> fmt::Result {
        if let Some(id) = self.identity() {
            if path.contains(&id) {
                return match self {
                    Value::List(_) => write!(out, "[...]"),
                    _ => write!(out, "{{...}}"),
                };
            }
        }
        match self {
            Value::Null => write!(out, "null"),
            Value::Number(n) => write!(out, "{}", format_number(*n)),
            Value::Float(v) => {
                let text = if v.is_infinite() {
                    format_number(*v as f64)
                } else {
                    v.to_string()
                };
                if repr {
                    write!(out, "{}f", text)
                } else {
                    write!(out, "{}", text)
                }
            }
            Value::String(s) if repr => write!(out, "\"{}\"", s),
            Value::String(s) => write!(out, "{}", s),
            Value::Bool(b) => write!(out, "{}", b),
            Value::List(cell) => {
                let items = cell.read().clone();
                path.push(Arc::as_ptr(cell) as *const () as usize);
                write!(out, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(out, ", ")?;
                    }
                    item.write_nested(out, repr, path)?;
                }
                path.pop();
                write!(out, "]")
            }
            Value::Object(object) => match &object.class {
                Some(class) => write!(out, "<{} instance>", class.name),
                None => {
                    let fields = object.fields_snapshot();
                    path.push(Arc::as_ptr(object) as *const () as usize);
                    write!(out, "{{")?;
                    for (i, (key, field)) in fields.iter().enumerate() {
                        if i > 0 {
                            write!(out, ", ")?;
                        }
                        write!(out, "{}: ", key)?;
                        field.write_nested(out, repr, path)?;
                    }
                    path.pop();
                    write!(out, "}}")
                }
            },
            Value::Class(class) => write!(out, "<class {}>", class.name),
            Value::Function(func) => write!(out, "<fn {}>", func.name()),
            Value::Native(native) => write!(out, "<native fn {}>", native.name),
            Value::BoundMethod(bound) => write!(out, "<method {}>", bound.method.name()),
            Value::HostMethod(method) => write!(out, "<host method {}>", method.name),
            Value::HostClass(class) => write!(out, "<host class {}>", class.name),
            Value::Host(host) => write!(out, "{}", host.object().describe()),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, false)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.write(f, true)
    }
}

/// Structural equality used by `==`
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other, &mut Vec::new())
    }
}

impl Value {
    /// Deep comparison. `assumed` holds the container pairs already being
    /// compared further up, which are taken as equal when met again.
    fn equals(&self, other: &Value, assumed: &mut Vec<(usize, usize)>) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                let pair = (Arc::as_ptr(a) as *const () as usize, Arc::as_ptr(b) as *const () as usize);
                if assumed.contains(&pair) {
                    return true;
                }
                let (a, b) = (a.read().clone(), b.read().clone());
                if a.len() != b.len() {
                    return false;
                }
                assumed.push(pair);
                let same = a.iter().zip(&b).all(|(x, y)| x.equals(y, assumed));
                assumed.pop();
                same
            }
            (Value::Object(a), Value::Object(b)) => {
                if Arc::ptr_eq(a, b) {
                    return true;
                }
                if a.class.is_some() || b.class.is_some() {
                    return false;
                }
                let pair = (Arc::as_ptr(a) as *const () as usize, Arc::as_ptr(b) as *const () as usize);
                if assumed.contains(&pair) {
                    return true;
                }
                let (a, b) = (a.fields_snapshot(), b.fields_snapshot());
                if a.len() != b.len() {
                    return false;
                }
                assumed.push(pair);
                let same = a
                    .iter()
                    .all(|(key, x)| b.get(key).is_some_and(|y| x.equals(y, assumed)));
                assumed.pop();
                same
            }
            (Value::Class(a), Value::Class(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Native(a), Value::Native(b)) => Arc::ptr_eq(a, b),
            (Value::BoundMethod(a), Value::BoundMethod(b)) => {
                Arc::ptr_eq(&a.method, &b.method) && a.receiver.same_reference(&b.receiver)
            }
            (Value::HostMethod(a), Value::HostMethod(b)) => a.name == b.name && a.target.same(&b.target),
            (Value::HostClass(a), Value::HostClass(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => a.host_eq(b),
            (a, b) => match (a, b) {
                (Value::Number(_) | Value::Float(_), Value::Number(_) | Value::Float(_)) => {
                    a.as_number() == b.as_number()
                }
                _ => false,
            },
        }
    }

    /// Identity comparison for receivers
    fn same_reference(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Host(a), Value::Host(b)) => a.ptr_eq(b),
            (a, b) => a == b,
        }
    }
}

/// A script function: declaration plus the scope it closed over
pub struct ScriptFunction {
    pub decl: Arc<FunctionDecl>,
    pub closure: Scope,
}

impl ScriptFunction {
    pub fn new(decl: Arc<FunctionDecl>, closure: Scope) -> Self {
        Self { decl, closure }
    }

    pub fn name(&self) -> &str {
        self.decl.display_name()
    }

    pub fn arity(&self) -> usize {
        self.decl.params.len()
    }
}

impl fmt::Debug for ScriptFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<fn {}>", self.name())
    }
}

/// Native function type
pub type NativeFn = Arc<dyn Fn(&mut Interpreter, &[Value]) -> Result<Value> + Send + Sync>;

/// Native/built-in function
pub struct NativeFunction {
    pub name: String,
    pub arity: RangeInclusive<usize>,
    pub func: NativeFn,
}

impl NativeFunction {
    pub fn new<F>(name: impl Into<String>, arity: RangeInclusive<usize>, func: F) -> Self
    where
        F: Fn(&mut Interpreter, &[Value]) -> Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            arity,
            func: Arc::new(func),
        }
    }

    pub fn check_arity(&self, got: usize) -> Result<()> {
        if self.arity.contains(&got) {
            Ok(())
        } else {
            Err(KestrelError::new(
                ErrorKind::WrongArity {
                    name: self.name.clone(),
                    expected: self.expected(),
                    got,
                },
                None,
            ))
        }
    }

    fn expected(&self) -> String {
        let (min, max) = (*self.arity.start(), *self.arity.end());
        if min == max {
            min.to_string()
        } else if max == usize::MAX {
            format!("at least {}", min)
        } else {
            format!("{} to {}", min, max)
        }
    }
}

impl fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<native fn {}>", self.name)
    }
}

/// A declared class. The method table never changes after declaration.
pub struct ScriptClass {
    pub name: String,
    pub decl: Arc<ClassDecl>,
    pub methods: HashMap<String, Arc<ScriptFunction>>,
    pub superclass: Option<Arc<ScriptClass>>,
    pub host_superclass: Option<Arc<HostClass>>,
    /// Synthesized host type, built on first instantiation
    pub proxy_class: OnceLock<Arc<HostClass>>,
}

impl ScriptClass {
    /// Look up a method here or in the script superclass chain
    pub fn find_method(&self, name: &str) -> Option<Arc<ScriptFunction>> {
        self.methods
            .get(name)
            .cloned()
            .or_else(|| self.superclass.as_ref().and_then(|s| s.find_method(name)))
    }

    /// The host type at the root of this class's inheritance chain
    pub fn host_base(&self) -> Option<Arc<HostClass>> {
        self.host_superclass
            .clone()
            .or_else(|| self.superclass.as_ref().and_then(|s| s.host_base()))
    }
}

impl fmt::Debug for ScriptClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<class {}>", self.name)
    }
}

/// An object: class instance, or a plain field map when `class` is None
pub struct ScriptObject {
    pub class: Option<Arc<ScriptClass>>,
    fields: RwLock<Fields>,
    /// Read-only values from the class's static block, keyed by getter name
    pub baked: BTreeMap<String, Value>,
}

impl ScriptObject {
    pub fn plain(fields: Fields) -> Arc<Self> {
        Arc::new(Self {
            class: None,
            fields: RwLock::new(fields),
            baked: BTreeMap::new(),
        })
    }

    pub fn instance(class: Arc<ScriptClass>, baked: BTreeMap<String, Value>) -> Arc<Self> {
        Arc::new(Self {
            class: Some(class),
            fields: RwLock::new(Fields::new()),
            baked,
        })
    }

    pub fn get_field(&self, name: &str) -> Option<Value> {
        self.fields.read().get(name).cloned()
    }

    pub fn set_field(&self, name: impl Into<String>, value: Value) {
        self.fields.write().insert(name.into(), value);
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.read().contains_key(name)
    }

    pub fn fields_snapshot(&self) -> Fields {
        self.fields.read().clone()
    }

    pub fn field_names(&self) -> Vec<String> {
        self.fields.read().keys().cloned().collect()
    }

    /// Visit every field and baked value
    pub(crate) fn for_each_value(&self, mut f: impl FnMut(&Value)) {
        self.fields.read().values().for_each(&mut f);
        self.baked.values().for_each(f);
    }

    /// Remove every field, handing the values back
    pub(crate) fn take_fields(&self) -> Vec<Value> {
        std::mem::take(&mut *self.fields.write()).into_values().collect()
    }
}

impl fmt::Debug for ScriptObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptObject")
            .field("class", &self.class.as_ref().map(|c| &c.name))
            .field("fields", &self.fields_snapshot())
            .finish()
    }
}

/// A script method bound to its receiver
#[derive(Debug)]
pub struct BoundMethod {
    pub receiver: Value,
    pub method: Arc<ScriptFunction>,
}

/// Who a host method is bound to
#[derive(Debug, Clone)]
pub enum HostReceiver {
    Instance(HostRef),
    Static(Arc<HostClass>),
}

impl HostReceiver {
    fn same(&self, other: &HostReceiver) -> bool {
        match (self, other) {
            (HostReceiver::Instance(a), HostReceiver::Instance(b)) => a.ptr_eq(b),
            (HostReceiver::Static(a), HostReceiver::Static(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[derive(Debug)]
pub struct HostMethod {
    pub target: HostReceiver,
    pub name: String,
}
