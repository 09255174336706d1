//! Variable scopes for Kestrel
//!
//! A `Scope` is a cheap handle to one level of the lexical chain. Closures,
//! class methods and thread hand-offs keep their scope alive by cloning the
//! handle; lookups walk outwards through the parents.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::error::{ErrorKind, KestrelError, Result};
use crate::value::Value;

/// A binding in the environment
#[derive(Debug, Clone)]
struct Binding {
    value: Value,
    constant: bool, // true for 'val', false for 'var'
}

#[derive(Debug)]
struct ScopeInner {
    values: RwLock<HashMap<String, Binding>>,
    parent: Option<Scope>,
}

/// Shared handle to a scope with lexical parent linking
#[derive(Debug, Clone)]
pub struct Scope(Arc<ScopeInner>);

impl Scope {
    /// Create a new root scope
    pub fn new() -> Self {
        Self(Arc::new(ScopeInner {
            values: RwLock::new(HashMap::new()),
            parent: None,
        }))
    }

    /// Create a child scope of `parent`
    pub fn with_parent(parent: &Scope) -> Self {
        Self(Arc::new(ScopeInner {
            values: RwLock::new(HashMap::new()),
            parent: Some(parent.clone()),
        }))
    }

    pub fn parent(&self) -> Option<&Scope> {
        self.0.parent.as_ref()
    }

    /// Define a mutable binding in this scope, shadowing any outer one
    pub fn define(&self, name: impl Into<String>, value: Value) -> Result<()> {
        self.declare(name, value, false)
    }

    /// Define a constant binding in this scope
    pub fn define_constant(&self, name: impl Into<String>, value: Value) -> Result<()> {
        self.declare(name, value, true)
    }

    /// Insert or overwrite a binding in this scope. A constant can never be
    /// redeclared in the scope that owns it.
    pub fn declare(&self, name: impl Into<String>, value: Value, constant: bool) -> Result<()> {
        let name = name.into();
        let mut values = self.0.values.write();
        if values.get(&name).is_some_and(|b| b.constant) {
            return Err(KestrelError::new(ErrorKind::ConstantReassignment(name), None));
        }
        tracing::trace!(name = %name, constant, "define");
        values.insert(name, Binding { value, constant });
        Ok(())
    }

    /// Get a variable's value
    pub fn get(&self, name: &str) -> Result<Value> {
        self.lookup(name).ok_or_else(|| {
            KestrelError::new(ErrorKind::UndefinedVariable(name.to_string()), None)
        })
    }

    /// Get a variable's value, if any scope in the chain defines it
    pub fn lookup(&self, name: &str) -> Option<Value> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(binding) = current.0.values.read().get(name) {
                return Some(binding.value.clone());
            }
            scope = current.parent();
        }
        None
    }

    /// Whether `name` is bound in this scope itself, ignoring parents
    pub fn contains_local(&self, name: &str) -> bool {
        self.0.values.read().contains_key(name)
    }

    /// Whether the nearest binding of `name` is a constant
    pub fn is_constant(&self, name: &str) -> Option<bool> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(binding) = current.0.values.read().get(name) {
                return Some(binding.constant);
            }
            scope = current.parent();
        }
        None
    }

    /// Assign to the nearest existing binding. Never creates a new one.
    pub fn assign(&self, name: &str, value: Value) -> Result<()> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            let mut values = current.0.values.write();
            if let Some(binding) = values.get_mut(name) {
                if binding.constant {
                    return Err(KestrelError::new(
                        ErrorKind::ConstantReassignment(name.to_string()),
                        None,
                    ));
                }
                binding.value = value;
                return Ok(());
            }
            drop(values);
            scope = current.parent();
        }
        Err(KestrelError::new(
            ErrorKind::UndefinedVariable(name.to_string()),
            None,
        ))
    }

    /// Snapshot of the bindings owned by this scope, sorted by name
    pub fn local_bindings(&self) -> Vec<(String, Value)> {
        let mut bindings: Vec<(String, Value)> = self
            .0
            .values
            .read()
            .iter()
            .map(|(name, binding)| (name.clone(), binding.value.clone()))
            .collect();
        bindings.sort_by(|a, b| a.0.cmp(&b.0));
        bindings
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Arc::as_ptr(&self.0) as usize
    }

    pub(crate) fn strong_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    pub(crate) fn for_each_value(&self, mut f: impl FnMut(&Value)) {
        for binding in self.0.values.read().values() {
            f(&binding.value);
        }
    }

    /// Remove every binding, handing the values back
    pub(crate) fn take_values(&self) -> Vec<Value> {
        std::mem::take(&mut *self.0.values.write())
            .into_values()
            .map(|binding| binding.value)
            .collect()
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}
