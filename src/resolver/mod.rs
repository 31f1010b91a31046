//! Variable resolution for script evaluation.
//!
//! A script reads names through an ordered chain of [`Resolver`]s. The chain
//! for one evaluation is assembled from two parts:
//!
//! ```text
//! 1. additional resolvers supplied with the request   (highest precedence)
//! 2. resolvers produced by the configured factories    (in factory order)
//! ```
//!
//! The first resolver that claims a key supplies its value. Factories may
//! decline to produce a resolver for a given host scope, in which case they
//! are simply left out of the chain.

pub mod composite;
pub mod factory;

use std::collections::BTreeMap;

use crate::value::Value;

pub use composite::CompositeResolver;
pub use factory::{ResolverFactory, StaticValuesResolverFactory, VariableScopeResolverFactory};

/// A single named-value lookup source.
///
/// Resolvers are read-only views over some backing store. `get` is only
/// consulted after `contains_key` returned `true`.
#[cfg_attr(test, mockall::automock)]
pub trait Resolver: Send + Sync {
    fn contains_key(&self, key: &str) -> bool;

    fn get(&self, key: &str) -> Option<Value>;
}

/// Resolver over a fixed map of values.
#[derive(Debug, Clone, Default)]
pub struct MapResolver {
    values: BTreeMap<String, Value>,
}

impl MapResolver {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self { values }
    }

    pub fn with<K: Into<String>, V: Into<Value>>(mut self, key: K, value: V) -> Self {
        self.values.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for MapResolver {
    fn from_iter<T: IntoIterator<Item = (K, Value)>>(iter: T) -> Self {
        Self {
            values: iter.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        }
    }
}

impl Resolver for MapResolver {
    fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }
}
