//! Language engines and their lookup.
//!
//! A [`ScriptEngine`] executes script text against [`ScriptBindings`]. Engines
//! are created by an [`EngineProvider`] registered under one or more
//! case-sensitive language names in the [`EngineRegistry`], and handed out by
//! the [`EngineCache`].
//!
//! ```text
//! EngineRegistry ("expr" → ExpressionEngineProvider, ...)
//!      ↓ create_engine(language)
//! EngineCache    (cached only if supports_concurrent_reuse())
//!      ↓
//! ScriptEngine::evaluate(script, bindings)
//! ```

pub mod cache;
pub mod expression;

use std::sync::Arc;

use dashmap::DashMap;
use tracing::debug;

use crate::bindings::ScriptBindings;
use crate::error::EngineError;
use crate::value::Value;

pub use cache::EngineCache;
pub use expression::{ExpressionEngine, ExpressionEngineProvider, NativeFunction};

pub trait ScriptEngine: Send + Sync {
    /// Language name this engine was created for.
    fn language(&self) -> &str;

    /// Executes `script` and returns its result value.
    fn evaluate(&self, script: &str, bindings: &mut ScriptBindings) -> Result<Value, EngineError>;

    /// Whether one instance may serve concurrent evaluations.
    ///
    /// Engines that cannot guarantee this are never cached.
    fn supports_concurrent_reuse(&self) -> bool {
        false
    }
}

pub trait EngineProvider: Send + Sync {
    /// Names this provider is registered under.
    fn language_names(&self) -> Vec<String>;

    fn create_engine(&self, language: &str) -> Result<Arc<dyn ScriptEngine>, EngineError>;
}

/// Maps language names to engine providers.
#[derive(Default)]
pub struct EngineRegistry {
    providers: DashMap<String, Arc<dyn EngineProvider>>,
}

impl EngineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in expression language.
    pub fn with_defaults() -> Self {
        let registry = Self::new();
        registry.register(Arc::new(ExpressionEngineProvider::default()));
        registry
    }

    /// Registers `provider` under every name it reports. Later registrations
    /// replace earlier ones for the same name.
    pub fn register(&self, provider: Arc<dyn EngineProvider>) {
        for name in provider.language_names() {
            debug!(language = %name, "Registering script engine provider");
            self.providers.insert(name, provider.clone());
        }
    }

    pub fn provider_for(&self, language: &str) -> Option<Arc<dyn EngineProvider>> {
        self.providers
            .get(language)
            .map(|entry| entry.value().clone())
    }

    pub fn contains(&self, language: &str) -> bool {
        self.providers.contains_key(language)
    }

    pub fn languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .providers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_registry_languages() {
        let registry = EngineRegistry::with_defaults();
        assert_eq!(registry.languages(), vec!["expr", "expression"]);
        assert!(registry.provider_for("expr").is_some());
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let registry = EngineRegistry::with_defaults();
        assert!(!registry.contains("EXPR"));
        assert!(registry.provider_for("Expr").is_none());
    }

    #[test]
    fn test_register_aliases() {
        let registry = EngineRegistry::new();
        registry.register(Arc::new(
            ExpressionEngineProvider::default().with_names(["lang1", "lang2"]),
        ));
        assert_eq!(registry.languages(), vec!["lang1", "lang2"]);
    }
}
