//! Host interop bridge
//!
//! Host applications describe their types with `HostClass` capability
//! tables: constructors, methods, fields and nested classes, each backed by
//! a closure. Scripts never look inside a host object directly; every
//! access goes through the dispatch rules in [`dispatch`], values cross the
//! boundary through [`convert`], and script classes that extend a host type
//! are turned into host-compatible types by [`proxy::ProxyFactory`].

pub mod convert;
pub mod dispatch;
pub mod proxy;

use std::any::Any;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{ErrorKind, KestrelError};

pub use convert::{coerce, from_host, to_host};
pub use proxy::{ProxyFactory, ProxyObject};

/// Failures raised on the host side of the bridge
#[derive(Debug, Clone, Error)]
pub enum HostError {
    #[error("cannot convert {from} to host type {to}")]
    Conversion { from: String, to: String },
    #[error("method '{name}' with {arity} arguments not found on '{class}' or any of its superclasses")]
    MethodNotFound {
        class: String,
        name: String,
        arity: usize,
    },
    #[error("could not find a suitable overload for '{name}' with argument types ({args})")]
    NoMatchingOverload { name: String, args: String },
    #[error("no constructor of '{class}' accepts argument types ({args})")]
    NoMatchingConstructor { class: String, args: String },
    #[error("receiver is not a '{0}'")]
    WrongReceiver(String),
    #[error("{0}")]
    Failed(String),
    #[error("{0}")]
    Script(Box<KestrelError>),
}

impl HostError {
    /// Convenience for host closures reporting a plain failure
    pub fn failed(message: impl Into<String>) -> Self {
        HostError::Failed(message.into())
    }
}

impl From<HostError> for KestrelError {
    fn from(err: HostError) -> Self {
        match err {
            // Script errors that crossed the host boundary keep their identity
            HostError::Script(inner) => *inner,
            other => KestrelError::new(ErrorKind::Host(other.to_string()), None).with_cause(other),
        }
    }
}

/// Host-side representation of a value
#[derive(Debug, Clone)]
pub enum HostData {
    Null,
    Int(i32),
    Long(i64),
    Float(f32),
    Double(f64),
    Bool(bool),
    Str(String),
    List(Vec<HostData>),
    Map(BTreeMap<String, HostData>),
    Object(HostRef),
    Class(Arc<HostClass>),
}

impl HostData {
    pub fn type_name(&self) -> &'static str {
        match self {
            HostData::Null => "null",
            HostData::Int(_) => "int",
            HostData::Long(_) => "long",
            HostData::Float(_) => "float",
            HostData::Double(_) => "double",
            HostData::Bool(_) => "bool",
            HostData::Str(_) => "string",
            HostData::List(_) => "list",
            HostData::Map(_) => "map",
            HostData::Object(_) => "object",
            HostData::Class(_) => "class",
        }
    }

    /// Numeric payload of any of the four number shapes
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostData::Int(i) => Some(*i as f64),
            HostData::Long(l) => Some(*l as f64),
            HostData::Float(f) => Some(*f as f64),
            HostData::Double(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            HostData::Int(i) => Some(*i as i64),
            HostData::Long(l) => Some(*l),
            HostData::Float(f) => Some(*f as i64),
            HostData::Double(d) => Some(*d as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostData::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostData::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HostRef> {
        match self {
            HostData::Object(r) => Some(r),
            _ => None,
        }
    }
}

impl PartialEq for HostData {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (HostData::Null, HostData::Null) => true,
            (HostData::Bool(a), HostData::Bool(b)) => a == b,
            (HostData::Str(a), HostData::Str(b)) => a == b,
            (HostData::List(a), HostData::List(b)) => a == b,
            (HostData::Map(a), HostData::Map(b)) => a == b,
            (HostData::Object(a), HostData::Object(b)) => a.host_eq(b),
            (HostData::Class(a), HostData::Class(b)) => Arc::ptr_eq(a, b),
            (a, b) => match (a.as_f64(), b.as_f64()) {
                (Some(x), Some(y)) => x == y,
                _ => false,
            },
        }
    }
}

impl From<i32> for HostData {
    fn from(v: i32) -> Self {
        HostData::Int(v)
    }
}

impl From<i64> for HostData {
    fn from(v: i64) -> Self {
        HostData::Long(v)
    }
}

impl From<f32> for HostData {
    fn from(v: f32) -> Self {
        HostData::Float(v)
    }
}

impl From<f64> for HostData {
    fn from(v: f64) -> Self {
        HostData::Double(v)
    }
}

impl From<bool> for HostData {
    fn from(v: bool) -> Self {
        HostData::Bool(v)
    }
}

impl From<&str> for HostData {
    fn from(v: &str) -> Self {
        HostData::Str(v.to_string())
    }
}

impl From<String> for HostData {
    fn from(v: String) -> Self {
        HostData::Str(v)
    }
}

impl From<HostRef> for HostData {
    fn from(v: HostRef) -> Self {
        HostData::Object(v)
    }
}

/// Target types named by host signatures
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostType {
    Any,
    Void,
    Int,
    Long,
    Float,
    Double,
    Bool,
    Str,
    List,
    Map,
    /// An instance of the named host class or one of its subclasses
    Object(String),
}

impl fmt::Display for HostType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HostType::Any => write!(f, "any"),
            HostType::Void => write!(f, "void"),
            HostType::Int => write!(f, "int"),
            HostType::Long => write!(f, "long"),
            HostType::Float => write!(f, "float"),
            HostType::Double => write!(f, "double"),
            HostType::Bool => write!(f, "bool"),
            HostType::Str => write!(f, "string"),
            HostType::List => write!(f, "list"),
            HostType::Map => write!(f, "map"),
            HostType::Object(name) => write!(f, "{}", name),
        }
    }
}

/// Blanket downcasting support for host objects
pub trait AsAny {
    fn as_any(&self) -> &dyn Any;
}

impl<T: Any> AsAny for T {
    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// An object owned by the host application
pub trait HostObject: AsAny + Send + Sync {
    /// The capability table describing this object
    fn host_class(&self) -> Arc<HostClass>;

    /// Host-defined equality, consulted after identity
    fn host_eq(&self, _other: &HostRef) -> bool {
        false
    }

    fn describe(&self) -> String {
        format!("<{} object>", self.host_class().name)
    }

    /// Synthesized subclass instances expose their parts here
    fn proxy(&self) -> Option<&ProxyObject> {
        None
    }
}

/// Shared reference to a host object
#[derive(Clone)]
pub struct HostRef(Arc<dyn HostObject>);

impl HostRef {
    pub fn new(object: impl HostObject + 'static) -> Self {
        Self(Arc::new(object))
    }

    pub fn from_arc(object: Arc<dyn HostObject>) -> Self {
        Self(object)
    }

    pub fn class(&self) -> Arc<HostClass> {
        self.0.host_class()
    }

    pub fn object(&self) -> &dyn HostObject {
        &*self.0
    }

    pub fn proxy(&self) -> Option<&ProxyObject> {
        self.0.proxy()
    }

    /// Borrow the concrete host type, looking through synthesized subclasses
    /// to the superclass instance they wrap
    pub fn downcast<T: Any>(&self) -> Option<&T> {
        let object: &dyn HostObject = &*self.0;
        if let Some(concrete) = AsAny::as_any(object).downcast_ref::<T>() {
            return Some(concrete);
        }
        object.proxy().and_then(|proxy| proxy.base().downcast::<T>())
    }

    pub fn ptr_eq(&self, other: &HostRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }

    pub(crate) fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub fn host_eq(&self, other: &HostRef) -> bool {
        self.ptr_eq(other) || self.0.host_eq(other)
    }

    /// Invoke a method the way the host would, honouring script overrides
    pub fn call_virtual(&self, name: &str, args: &[HostData]) -> Result<HostData, HostError> {
        dispatch::call_virtual(self, name, args)
    }

    /// Read a property through the getter/field conventions
    pub fn get(&self, name: &str) -> Result<HostData, HostError> {
        dispatch::read_host(self, name)
    }
}

impl fmt::Debug for HostRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.describe())
    }
}

pub type MethodFn = Arc<dyn Fn(&HostRef, &[HostData]) -> Result<HostData, HostError> + Send + Sync>;
pub type StaticFn = Arc<dyn Fn(&[HostData]) -> Result<HostData, HostError> + Send + Sync>;
pub type ConstructorFn = Arc<dyn Fn(&[HostData]) -> Result<HostRef, HostError> + Send + Sync>;
pub type GetterFn = Arc<dyn Fn(&HostRef) -> Result<HostData, HostError> + Send + Sync>;
pub type SetterFn = Arc<dyn Fn(&HostRef, HostData) -> Result<(), HostError> + Send + Sync>;

/// Implementation behind a host method
#[derive(Clone)]
pub enum HostCallable {
    Instance(MethodFn),
    Static(StaticFn),
}

impl HostCallable {
    pub fn invoke(&self, receiver: Option<&HostRef>, args: &[HostData]) -> Result<HostData, HostError> {
        match self {
            HostCallable::Instance(body) => match receiver {
                Some(this) => body(this, args),
                None => Err(HostError::failed("instance method called without a receiver")),
            },
            HostCallable::Static(body) => body(args),
        }
    }
}

#[derive(Clone)]
pub struct HostMethodDef {
    pub name: String,
    pub params: Vec<HostType>,
    pub returns: HostType,
    /// Whether a script subclass may override it
    pub is_virtual: bool,
    pub body: HostCallable,
}

impl HostMethodDef {
    pub fn arity(&self) -> usize {
        self.params.len()
    }

    pub fn is_static(&self) -> bool {
        matches!(self.body, HostCallable::Static(_))
    }

    /// Run the body and normalise the result against the declared return type
    pub fn invoke(&self, receiver: Option<&HostRef>, args: &[HostData]) -> Result<HostData, HostError> {
        let result = self.body.invoke(receiver, args)?;
        if self.returns == HostType::Void {
            Ok(HostData::Null)
        } else {
            Ok(result)
        }
    }
}

#[derive(Clone)]
pub struct HostConstructor {
    pub params: Vec<HostType>,
    pub body: ConstructorFn,
}

#[derive(Clone)]
pub enum FieldAccess {
    Instance { get: GetterFn, set: Option<SetterFn> },
    Static(HostData),
}

#[derive(Clone)]
pub struct HostField {
    pub name: String,
    pub ty: HostType,
    pub access: FieldAccess,
}

impl HostField {
    pub fn is_static(&self) -> bool {
        matches!(self.access, FieldAccess::Static(_))
    }
}

/// Capability table for one host type
pub struct HostClass {
    pub name: String,
    pub superclass: Option<Arc<HostClass>>,
    pub constructors: Vec<HostConstructor>,
    pub methods: Vec<HostMethodDef>,
    pub fields: Vec<HostField>,
    pub nested: Vec<Arc<HostClass>>,
}

impl HostClass {
    pub fn builder(name: impl Into<String>) -> HostClassBuilder {
        HostClassBuilder::new(name)
    }

    /// This class followed by its superclasses, most derived first
    pub fn ancestry(&self) -> impl Iterator<Item = &HostClass> {
        std::iter::successors(Some(self), |class| class.superclass.as_deref())
    }

    /// Overload candidates in declaration order, walking superclasses
    pub fn methods_named(&self, name: &str, arity: usize, want_static: bool) -> Vec<&HostMethodDef> {
        self.ancestry()
            .flat_map(|class| class.methods.iter())
            .filter(|m| m.name == name && m.arity() == arity && m.is_static() == want_static)
            .collect()
    }

    pub fn has_method(&self, name: &str, want_static: bool) -> bool {
        self.ancestry()
            .flat_map(|class| class.methods.iter())
            .any(|m| m.name == name && m.is_static() == want_static)
    }

    pub fn find_field(&self, name: &str, want_static: bool) -> Option<&HostField> {
        self.ancestry()
            .flat_map(|class| class.fields.iter())
            .find(|f| f.name == name && f.is_static() == want_static)
    }

    pub fn find_nested(&self, name: &str) -> Option<Arc<HostClass>> {
        self.nested.iter().find(|c| c.name == name).cloned()
    }

    /// Whether this class is `name` or inherits from it
    pub fn is_a(&self, name: &str) -> bool {
        self.ancestry().any(|class| class.name == name)
    }

    /// Overridable instance methods, the most derived definition of each
    /// signature first
    pub fn virtual_methods(&self) -> Vec<&HostMethodDef> {
        let mut seen: Vec<(&str, usize)> = Vec::new();
        let mut out = Vec::new();
        for method in self.ancestry().flat_map(|class| class.methods.iter()) {
            if method.is_static() || !method.is_virtual {
                continue;
            }
            let key = (method.name.as_str(), method.arity());
            if !seen.contains(&key) {
                seen.push(key);
                out.push(method);
            }
        }
        out
    }
}

impl fmt::Debug for HostClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostClass")
            .field("name", &self.name)
            .field("superclass", &self.superclass.as_ref().map(|s| &s.name))
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// Builder for [`HostClass`] tables
pub struct HostClassBuilder {
    class: HostClass,
}

impl HostClassBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            class: HostClass {
                name: name.into(),
                superclass: None,
                constructors: Vec::new(),
                methods: Vec::new(),
                fields: Vec::new(),
                nested: Vec::new(),
            },
        }
    }

    pub fn extends(mut self, superclass: Arc<HostClass>) -> Self {
        self.class.superclass = Some(superclass);
        self
    }

    pub fn constructor<F>(mut self, params: Vec<HostType>, body: F) -> Self
    where
        F: Fn(&[HostData]) -> Result<HostRef, HostError> + Send + Sync + 'static,
    {
        self.class.constructors.push(HostConstructor {
            params,
            body: Arc::new(body),
        });
        self
    }

    /// An overridable instance method
    pub fn method<F>(self, name: &str, params: Vec<HostType>, returns: HostType, body: F) -> Self
    where
        F: Fn(&HostRef, &[HostData]) -> Result<HostData, HostError> + Send + Sync + 'static,
    {
        self.push_method(name, params, returns, true, HostCallable::Instance(Arc::new(body)))
    }

    /// An instance method script subclasses cannot override
    pub fn final_method<F>(self, name: &str, params: Vec<HostType>, returns: HostType, body: F) -> Self
    where
        F: Fn(&HostRef, &[HostData]) -> Result<HostData, HostError> + Send + Sync + 'static,
    {
        self.push_method(name, params, returns, false, HostCallable::Instance(Arc::new(body)))
    }

    pub fn static_method<F>(self, name: &str, params: Vec<HostType>, returns: HostType, body: F) -> Self
    where
        F: Fn(&[HostData]) -> Result<HostData, HostError> + Send + Sync + 'static,
    {
        self.push_method(name, params, returns, false, HostCallable::Static(Arc::new(body)))
    }

    fn push_method(
        mut self,
        name: &str,
        params: Vec<HostType>,
        returns: HostType,
        is_virtual: bool,
        body: HostCallable,
    ) -> Self {
        self.class.methods.push(HostMethodDef {
            name: name.to_string(),
            params,
            returns,
            is_virtual,
            body,
        });
        self
    }

    /// A read-only instance field
    pub fn field<G>(mut self, name: &str, ty: HostType, get: G) -> Self
    where
        G: Fn(&HostRef) -> Result<HostData, HostError> + Send + Sync + 'static,
    {
        self.class.fields.push(HostField {
            name: name.to_string(),
            ty,
            access: FieldAccess::Instance {
                get: Arc::new(get),
                set: None,
            },
        });
        self
    }

    pub fn field_rw<G, S>(mut self, name: &str, ty: HostType, get: G, set: S) -> Self
    where
        G: Fn(&HostRef) -> Result<HostData, HostError> + Send + Sync + 'static,
        S: Fn(&HostRef, HostData) -> Result<(), HostError> + Send + Sync + 'static,
    {
        self.class.fields.push(HostField {
            name: name.to_string(),
            ty,
            access: FieldAccess::Instance {
                get: Arc::new(get),
                set: Some(Arc::new(set)),
            },
        });
        self
    }

    pub fn static_field(mut self, name: &str, ty: HostType, value: HostData) -> Self {
        self.class.fields.push(HostField {
            name: name.to_string(),
            ty,
            access: FieldAccess::Static(value),
        });
        self
    }

    pub fn nested(mut self, class: Arc<HostClass>) -> Self {
        self.class.nested.push(class);
        self
    }

    pub fn build(self) -> Arc<HostClass> {
        Arc::new(self.class)
    }
}

/// Fully qualified host type names visible to `import`
#[derive(Debug, Default)]
pub struct HostRegistry {
    classes: HashMap<String, Arc<HostClass>>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, path: impl Into<String>, class: Arc<HostClass>) {
        let path = path.into();
        tracing::debug!(path = %path, "registered host class");
        self.classes.insert(path, class);
    }

    /// Resolve `a.b.Outer.Inner`, descending into nested classes once the
    /// longest registered prefix is found
    pub fn resolve(&self, path: &str) -> Option<Arc<HostClass>> {
        if let Some(class) = self.classes.get(path) {
            return Some(class.clone());
        }
        let segments: Vec<&str> = path.split('.').collect();
        for split in (1..segments.len()).rev() {
            let prefix = segments[..split].join(".");
            if let Some(class) = self.classes.get(&prefix) {
                return segments[split..]
                    .iter()
                    .try_fold(class.clone(), |outer, name| outer.find_nested(name));
            }
        }
        None
    }

    pub fn paths(&self) -> Vec<&str> {
        let mut paths: Vec<&str> = self.classes.keys().map(String::as_str).collect();
        paths.sort_unstable();
        paths
    }
}

/// Accessor naming convention: `("get", "width")` becomes `getWidth`
pub fn accessor_name(prefix: &str, property: &str) -> String {
    let mut chars = property.chars();
    match chars.next() {
        Some(first) => format!("{}{}{}", prefix, first.to_uppercase(), chars.as_str()),
        None => prefix.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Plain;

    impl HostObject for Plain {
        fn host_class(&self) -> Arc<HostClass> {
            HostClass::builder("Plain").build()
        }
    }

    fn noop(_: &HostRef, _: &[HostData]) -> Result<HostData, HostError> {
        Ok(HostData::Null)
    }

    #[test]
    fn test_accessor_name() {
        assert_eq!(accessor_name("get", "width"), "getWidth");
        assert_eq!(accessor_name("is", "visible"), "isVisible");
        assert_eq!(accessor_name("get", "SOUND"), "getSOUND");
    }

    #[test]
    fn test_methods_walk_superclasses_in_order() {
        let base = HostClass::builder("Base")
            .method("draw", vec![HostType::Int], HostType::Void, noop)
            .method("draw", vec![HostType::Str], HostType::Void, noop)
            .build();
        let derived = HostClass::builder("Derived")
            .extends(base)
            .method("draw", vec![HostType::Double], HostType::Void, noop)
            .build();

        let candidates = derived.methods_named("draw", 1, false);
        let params: Vec<&HostType> = candidates.iter().map(|m| &m.params[0]).collect();
        assert_eq!(params, vec![&HostType::Double, &HostType::Int, &HostType::Str]);
        assert!(derived.is_a("Base"));
        assert!(derived.methods_named("draw", 0, false).is_empty());
    }

    #[test]
    fn test_virtual_methods_skip_final_and_static() {
        let class = HostClass::builder("Node")
            .method("update", vec![], HostType::Void, noop)
            .final_method("id", vec![], HostType::Int, noop)
            .static_method("create", vec![], HostType::Any, |_| Ok(HostData::Null))
            .build();
        let names: Vec<&str> = class.virtual_methods().iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["update"]);
    }

    #[test]
    fn test_registry_resolves_nested() {
        let inner = HostClass::builder("Inner").build();
        let outer = HostClass::builder("Outer").nested(inner).build();
        let mut registry = HostRegistry::new();
        registry.register("gfx.Outer", outer);

        assert_eq!(registry.resolve("gfx.Outer").map(|c| c.name.clone()), Some("Outer".into()));
        assert_eq!(
            registry.resolve("gfx.Outer.Inner").map(|c| c.name.clone()),
            Some("Inner".into())
        );
        assert!(registry.resolve("gfx.Missing").is_none());
    }

    #[test]
    fn test_host_error_becomes_runtime_error() {
        let err: KestrelError = HostError::failed("boom").into();
        assert_eq!(err.kind, ErrorKind::Host("boom".into()));
        assert!(err.cause.is_some());
    }

    #[test]
    fn test_downcast_and_identity() {
        let a = HostRef::new(Plain);
        let b = HostRef::new(Plain);
        assert!(a.downcast::<Plain>().is_some());
        assert!(a.host_eq(&a.clone()));
        assert!(!a.host_eq(&b));
    }
}
