//! Host variable scopes.
//!
//! A [`VariableScope`] is the caller-owned key/value store a script reads
//! from and may write back to. The subsystem only ever holds it by shared
//! reference; synchronization of concurrent external mutation belongs to the
//! implementation.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{PoisonError, RwLock};

use crate::value::Value;

pub trait VariableScope: Send + Sync {
    fn get_variable(&self, name: &str) -> Option<Value>;

    fn set_variable(&self, name: &str, value: Value);

    fn has_variable(&self, name: &str) -> bool {
        self.get_variable(name).is_some()
    }

    /// Ordered copy of the variables currently visible in this scope.
    fn snapshot(&self) -> BTreeMap<String, Value>;
}

/// In-memory [`VariableScope`] backed by an ordered map.
#[derive(Default)]
pub struct InMemoryVariableScope {
    variables: RwLock<BTreeMap<String, Value>>,
}

impl InMemoryVariableScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_variables<I, K>(variables: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self {
            variables: RwLock::new(
                variables
                    .into_iter()
                    .map(|(name, value)| (name.into(), value))
                    .collect(),
            ),
        }
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, BTreeMap<String, Value>> {
        self.variables.read().unwrap_or_else(PoisonError::into_inner)
    }
}

impl VariableScope for InMemoryVariableScope {
    fn get_variable(&self, name: &str) -> Option<Value> {
        self.read().get(name).cloned()
    }

    fn set_variable(&self, name: &str, value: Value) {
        self.variables
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), value);
    }

    fn has_variable(&self, name: &str) -> bool {
        self.read().contains_key(name)
    }

    fn snapshot(&self) -> BTreeMap<String, Value> {
        self.read().clone()
    }
}

impl fmt::Debug for InMemoryVariableScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("InMemoryVariableScope")
            .field("variables", &*self.read())
            .finish()
    }
}
