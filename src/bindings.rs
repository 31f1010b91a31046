//! Read/write bindings handed to a language engine.
//!
//! [`ScriptBindings`] mediates between two tiers:
//!
//! ```text
//! read  key → resolver chain → engine-local defaults
//! write key → host scope      (storing enabled, key not unstored, scope present)
//!           → engine-local defaults (otherwise)
//! ```
//!
//! Engines inject bootstrap symbols (print functions, context handles) into
//! the same namespace as user variables. Keys in [`UnstoredKeys`] never reach
//! the host scope, so those symbols do not leak into host state across
//! evaluations.
//!
//! Enumeration only reflects the host scope snapshot. Operations without a
//! sensible mapping onto the two tiers fail with [`BindingsError::Unsupported`].

use std::collections::{BTreeMap, HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use lazy_static::lazy_static;
use thiserror::Error;
use tracing::trace;

use crate::resolver::{CompositeResolver, Resolver};
use crate::scope::VariableScope;
use crate::value::Value;

lazy_static! {
    /// Symbols scripting runtimes commonly inject into the binding namespace.
    static ref DEFAULT_UNSTORED_KEYS: HashSet<&'static str> = [
        "out",
        "out:print",
        "lang:import",
        "context",
        "elcontext",
        "console",
        "print",
        "println",
        "global",
    ]
    .into_iter()
    .collect();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum UnsupportedOperation {
    Clear,
    ContainsValue,
    IsEmpty,
    PutAll,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BindingsError {
    #[error("Operation '{0}' is not supported by script bindings")]
    Unsupported(UnsupportedOperation),
}

/// Keys whose writes are never persisted to the host scope.
///
/// The built-in defaults are immutable and shared; each instance adds its own
/// extra keys.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnstoredKeys {
    extra: HashSet<String>,
}

impl UnstoredKeys {
    pub fn new<I, S>(extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extra: extra.into_iter().map(Into::into).collect(),
        }
    }

    pub fn with_key<S: Into<String>>(mut self, key: S) -> Self {
        self.extra.insert(key.into());
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        DEFAULT_UNSTORED_KEYS.contains(key) || self.extra.contains(key)
    }

    pub fn defaults() -> impl Iterator<Item = &'static str> {
        DEFAULT_UNSTORED_KEYS.iter().copied()
    }
}

/// Bindings for a single evaluation. Never cached or shared across evaluations.
pub struct ScriptBindings {
    resolver: CompositeResolver,
    scope: Option<Arc<dyn VariableScope>>,
    store_script_variables: bool,
    unstored_keys: Arc<UnstoredKeys>,
    defaults: HashMap<String, Value>,
}

impl ScriptBindings {
    pub fn new(
        resolver: CompositeResolver,
        scope: Option<Arc<dyn VariableScope>>,
        store_script_variables: bool,
        unstored_keys: Arc<UnstoredKeys>,
    ) -> Self {
        Self {
            resolver,
            scope,
            store_script_variables,
            unstored_keys,
            defaults: HashMap::new(),
        }
    }

    pub fn stores_script_variables(&self) -> bool {
        self.store_script_variables
    }

    pub fn resolver(&self) -> &CompositeResolver {
        &self.resolver
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.resolver.contains_key(key) || self.defaults.contains_key(key)
    }

    pub fn get(&self, key: &str) -> Option<Value> {
        if self.resolver.contains_key(key) {
            return self.resolver.get(key);
        }
        self.defaults.get(key).cloned()
    }

    /// Writes `value` under `key` and returns the previous value of the tier written to.
    pub fn put<K: Into<String>>(&mut self, key: K, value: Value) -> Option<Value> {
        let key = key.into();
        if self.store_script_variables && !self.unstored_keys.contains(&key) {
            if let Some(scope) = &self.scope {
                let previous = scope.get_variable(&key);
                trace!(key = %key, "Storing script variable in host scope");
                scope.set_variable(&key, value);
                return previous;
            }
        }
        self.defaults.insert(key, value)
    }

    /// Removes from the engine-local tier only. Host state is never deleted.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        if self.unstored_keys.contains(key) {
            return None;
        }
        self.defaults.remove(key)
    }

    pub fn keys(&self) -> Vec<String> {
        self.entries().into_keys().collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.entries().into_values().collect()
    }

    pub fn entries(&self) -> BTreeMap<String, Value> {
        self.scope
            .as_ref()
            .map(|scope| scope.snapshot())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries().len()
    }

    pub fn clear(&mut self) -> Result<(), BindingsError> {
        Err(BindingsError::Unsupported(UnsupportedOperation::Clear))
    }

    pub fn contains_value(&self, _value: &Value) -> Result<bool, BindingsError> {
        Err(BindingsError::Unsupported(UnsupportedOperation::ContainsValue))
    }

    pub fn is_empty(&self) -> Result<bool, BindingsError> {
        Err(BindingsError::Unsupported(UnsupportedOperation::IsEmpty))
    }

    pub fn put_all<I>(&mut self, _values: I) -> Result<(), BindingsError>
    where
        I: IntoIterator<Item = (String, Value)>,
    {
        Err(BindingsError::Unsupported(UnsupportedOperation::PutAll))
    }

    /// Ends the evaluation: drops the host scope handle and the write path,
    /// keeping only what reads need.
    pub fn into_attributes(self) -> ScriptAttributes {
        ScriptAttributes {
            resolver: self.resolver,
            locals: self.defaults,
        }
    }
}

/// Read-only lookup left behind by a finished evaluation.
///
/// Same precedence as [`ScriptBindings::get`]: the resolver chain first, then
/// engine-local values. A resolver backed by the host scope still reads its
/// current state.
#[derive(Debug, Clone, Default)]
pub struct ScriptAttributes {
    resolver: CompositeResolver,
    locals: HashMap<String, Value>,
}

impl ScriptAttributes {
    pub fn get(&self, key: &str) -> Option<Value> {
        if self.resolver.contains_key(key) {
            return self.resolver.get(key);
        }
        self.locals.get(key).cloned()
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.resolver.contains_key(key) || self.locals.contains_key(key)
    }

    /// Values the script kept engine-local, unordered.
    pub fn locals(&self) -> &HashMap<String, Value> {
        &self.locals
    }
}

impl fmt::Debug for ScriptBindings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScriptBindings")
            .field("resolver", &self.resolver)
            .field("has_scope", &self.scope.is_some())
            .field("store_script_variables", &self.store_script_variables)
            .field("defaults", &self.defaults)
            .finish()
    }
}
