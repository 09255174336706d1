//! Script classes extending host types
//!
//! `ProxyFactory` turns a script class with a host superclass into a
//! synthesized `HostClass` whose virtual slots consult, in order, the baked
//! values of the instance, the script override, and the superclass body.
//! Instances are `ProxyObject`s pairing the host superclass instance with
//! the script object that holds fields and baked values.

use std::sync::Arc;

use tracing::debug;

use super::convert::{from_host, to_host, to_host_args};
use super::{
    accessor_name, HostCallable, HostClass, HostData, HostError, HostMethodDef, HostObject, HostRef, HostType,
};
use crate::engine::Runtime;
use crate::error::Result;
use crate::interpreter::Interpreter;
use crate::value::{ScriptClass, ScriptFunction, ScriptObject, Value};

pub struct ProxyFactory;

impl ProxyFactory {
    /// The synthesized class for `script`, built once and cached on the class
    pub fn class_for(script: &Arc<ScriptClass>, base: &Arc<HostClass>) -> Arc<HostClass> {
        script
            .proxy_class
            .get_or_init(|| Self::synthesize(script, base))
            .clone()
    }

    fn synthesize(script: &ScriptClass, base: &Arc<HostClass>) -> Arc<HostClass> {
        let slots: Vec<HostMethodDef> = base
            .virtual_methods()
            .into_iter()
            .map(|method| Self::slot(script, method))
            .collect();
        debug!(
            class = %script.name,
            base = %base.name,
            slots = slots.len(),
            "synthesized proxy class"
        );
        Arc::new(HostClass {
            name: format!("{}$Proxy", script.name),
            superclass: Some(base.clone()),
            constructors: base.constructors.clone(),
            methods: slots,
            fields: Vec::new(),
            nested: Vec::new(),
        })
    }

    /// One virtual slot: baked value, then script override, then super
    fn slot(script: &ScriptClass, method: &HostMethodDef) -> HostMethodDef {
        let name = method.name.clone();
        let returns = method.returns.clone();
        let overridden = script.find_method(&name).is_some();
        let super_body = method.body.clone();

        let body = move |this: &HostRef, args: &[HostData]| -> std::result::Result<HostData, HostError> {
            if let Some(proxy) = this.proxy() {
                if args.is_empty() {
                    if let Some(value) = proxy.baked(&name) {
                        return to_host(&value, &returns);
                    }
                }
                if overridden {
                    return proxy.invoke_script(this, &name, args, &returns);
                }
            }
            super_body.invoke(Some(this), args)
        };

        HostMethodDef {
            name: method.name.clone(),
            params: method.params.clone(),
            returns: method.returns.clone(),
            is_virtual: true,
            body: HostCallable::Instance(Arc::new(body)),
        }
    }

    /// Build the host superclass instance and wrap it with the script object
    pub fn instantiate(
        interp: &Interpreter,
        script: &Arc<ScriptClass>,
        base: &Arc<HostClass>,
        object: Arc<ScriptObject>,
        args: &[Value],
    ) -> Result<HostRef> {
        let class = Self::class_for(script, base);
        let super_instance = Self::construct_super(&class, args)?;
        debug!(class = %class.name, "instantiated proxy");
        Ok(HostRef::new(ProxyObject {
            class,
            base: super_instance,
            object,
            runtime: interp.runtime().clone(),
        }))
    }

    /// Constructor overloads that accept the script arguments, falling back
    /// to the zero-argument constructor
    fn construct_super(class: &HostClass, args: &[Value]) -> std::result::Result<HostRef, HostError> {
        let matching = class
            .constructors
            .iter()
            .filter(|c| c.params.len() == args.len())
            .find_map(|c| to_host_args(args, &c.params).ok().map(|converted| (c, converted)));
        if let Some((ctor, converted)) = matching {
            return (ctor.body)(&converted);
        }
        if let Some(ctor) = class.constructors.iter().find(|c| c.params.is_empty()) {
            return (ctor.body)(&[]);
        }
        Err(HostError::NoMatchingConstructor {
            class: class.name.clone(),
            args: super::convert::describe_args(args),
        })
    }
}

/// Instance of a synthesized subclass
pub struct ProxyObject {
    class: Arc<HostClass>,
    base: HostRef,
    object: Arc<ScriptObject>,
    runtime: Arc<Runtime>,
}

impl ProxyObject {
    /// The host superclass instance
    pub fn base(&self) -> &HostRef {
        &self.base
    }

    /// Script-side state: fields, baked values and the class
    pub fn script_object(&self) -> &Arc<ScriptObject> {
        &self.object
    }

    /// The engine state overrides run against
    pub(crate) fn runtime(&self) -> &Arc<Runtime> {
        &self.runtime
    }

    pub fn script_class(&self) -> Option<&Arc<ScriptClass>> {
        self.object.class.as_ref()
    }

    pub fn script_method(&self, name: &str) -> Option<Arc<ScriptFunction>> {
        self.script_class().and_then(|class| class.find_method(name))
    }

    /// Baked value for a getter method name such as `getLayout`
    pub fn baked(&self, method: &str) -> Option<Value> {
        self.object.baked.get(method).cloned()
    }

    /// Baked value for a property name such as `layout`
    pub fn baked_property(&self, property: &str) -> Option<Value> {
        self.baked(&accessor_name("get", property))
    }

    /// Run a script override on a fresh interpreter sharing the globals
    pub(crate) fn invoke_script(
        &self,
        this: &HostRef,
        name: &str,
        args: &[HostData],
        returns: &HostType,
    ) -> std::result::Result<HostData, HostError> {
        let method = self.script_method(name).ok_or_else(|| HostError::MethodNotFound {
            class: self.class.name.clone(),
            name: name.to_string(),
            arity: args.len(),
        })?;
        let args: Vec<Value> = args.iter().cloned().map(from_host).collect();
        let mut interpreter = Interpreter::new(self.runtime.clone());
        let result = interpreter
            .call_function(&method, Some(Value::Host(this.clone())), args)
            .map_err(|err| HostError::Script(Box::new(err)))?;
        if *returns == HostType::Void {
            return Ok(HostData::Null);
        }
        to_host(&result, returns)
    }
}

impl HostObject for ProxyObject {
    fn host_class(&self) -> Arc<HostClass> {
        self.class.clone()
    }

    fn describe(&self) -> String {
        match self.script_class() {
            Some(class) => format!("<{} instance>", class.name),
            None => self.base.object().describe(),
        }
    }

    fn proxy(&self) -> Option<&ProxyObject> {
        Some(self)
    }
}
