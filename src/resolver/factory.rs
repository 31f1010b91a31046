use std::collections::BTreeMap;
use std::sync::Arc;

use super::{MapResolver, Resolver};
use crate::config::ScriptingConfig;
use crate::scope::VariableScope;
use crate::value::Value;

/// Builds one resolver of the chain from host configuration plus the caller's scope.
///
/// Factories are invoked once per evaluation in their configured order.
/// Returning `None` leaves the factory out of that evaluation's chain.
pub trait ResolverFactory: Send + Sync {
    fn create_resolver(&self, scope: Option<&Arc<dyn VariableScope>>)
    -> Option<Arc<dyn Resolver>>;
}

/// Resolves names against the live host scope.
#[derive(Debug, Clone, Copy, Default)]
pub struct VariableScopeResolverFactory;

impl ResolverFactory for VariableScopeResolverFactory {
    fn create_resolver(
        &self,
        scope: Option<&Arc<dyn VariableScope>>,
    ) -> Option<Arc<dyn Resolver>> {
        scope.map(|scope| {
            Arc::new(VariableScopeResolver {
                scope: scope.clone(),
            }) as Arc<dyn Resolver>
        })
    }
}

/// Read-through view of a host scope. Nothing is copied.
struct VariableScopeResolver {
    scope: Arc<dyn VariableScope>,
}

impl Resolver for VariableScopeResolver {
    fn contains_key(&self, key: &str) -> bool {
        self.scope.has_variable(key)
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.scope.get_variable(key)
    }
}

/// Exposes values registered in configuration to every script.
#[derive(Debug, Clone, Default)]
pub struct StaticValuesResolverFactory {
    resolver: Arc<MapResolver>,
}

impl StaticValuesResolverFactory {
    pub fn new(values: BTreeMap<String, Value>) -> Self {
        Self {
            resolver: Arc::new(MapResolver::new(values)),
        }
    }

    pub fn from_config(config: &ScriptingConfig) -> Self {
        Self::new(
            config
                .static_values
                .iter()
                .map(|(name, value)| (name.clone(), Value::from(value.clone())))
                .collect(),
        )
    }
}

impl ResolverFactory for StaticValuesResolverFactory {
    fn create_resolver(
        &self,
        _scope: Option<&Arc<dyn VariableScope>>,
    ) -> Option<Arc<dyn Resolver>> {
        if self.resolver.is_empty() {
            None
        } else {
            Some(self.resolver.clone() as Arc<dyn Resolver>)
        }
    }
}
