use std::fmt;
use std::sync::Arc;

use super::Resolver;
use crate::value::Value;

/// Ordered chain of resolvers. Registration order is precedence order.
#[derive(Clone, Default)]
pub struct CompositeResolver {
    resolvers: Vec<Arc<dyn Resolver>>,
}

impl CompositeResolver {
    pub fn new<I>(resolvers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Resolver>>,
    {
        Self {
            resolvers: resolvers.into_iter().collect(),
        }
    }

    /// An absent list yields an empty chain.
    pub fn from_optional(resolvers: Option<Vec<Arc<dyn Resolver>>>) -> Self {
        Self {
            resolvers: resolvers.unwrap_or_default(),
        }
    }

    pub fn resolvers(&self) -> &[Arc<dyn Resolver>] {
        &self.resolvers
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }

    fn find(&self, key: &str) -> Option<&Arc<dyn Resolver>> {
        self.resolvers.iter().find(|resolver| resolver.contains_key(key))
    }
}

impl Resolver for CompositeResolver {
    fn contains_key(&self, key: &str) -> bool {
        self.find(key).is_some()
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.find(key).and_then(|resolver| resolver.get(key))
    }
}

impl fmt::Debug for CompositeResolver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompositeResolver")
            .field("resolvers", &self.resolvers.len())
            .finish()
    }
}
