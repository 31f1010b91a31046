use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use tracing::{debug, instrument};

use super::{EngineProvider, EngineRegistry, ScriptEngine};
use crate::error::{ScriptError, ScriptResult};

/// Per-language engine cache.
///
/// Lookups of cached languages read the concurrent map directly. A miss takes
/// the guard for that language only, re-checks, and constructs the engine
/// once. Engines that do not declare concurrent reuse are never inserted and
/// are built fresh on every call. Entries are never evicted. Guards exist
/// only for registered languages, so unknown names leave nothing behind.
pub struct EngineCache {
    registry: Arc<EngineRegistry>,
    enabled: bool,
    engines: DashMap<String, Arc<dyn ScriptEngine>>,
    guards: DashMap<String, Arc<Mutex<()>>>,
}

impl EngineCache {
    pub fn new(registry: Arc<EngineRegistry>, enabled: bool) -> Self {
        Self {
            registry,
            enabled,
            engines: DashMap::new(),
            guards: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<EngineRegistry> {
        &self.registry
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    #[instrument(level = "debug", skip(self))]
    pub fn engine_for(&self, language: &str) -> ScriptResult<Arc<dyn ScriptEngine>> {
        if !self.enabled {
            return self.create_engine(language);
        }

        if let Some(engine) = self.cached(language) {
            debug!("Engine cache hit");
            return Ok(engine);
        }

        let provider = self.provider(language)?;
        let guard = self
            .guards
            .entry(language.to_string())
            .or_default()
            .value()
            .clone();
        let _lock = guard.lock().unwrap_or_else(PoisonError::into_inner);

        // 他のスレッドが先に生成している可能性がある
        if let Some(engine) = self.cached(language) {
            debug!("Engine cached while waiting for guard");
            return Ok(engine);
        }

        let engine = Self::construct(&provider, language)?;
        if engine.supports_concurrent_reuse() {
            debug!("Caching engine");
            self.engines.insert(language.to_string(), engine.clone());
        } else {
            debug!("Engine does not support concurrent reuse, not caching");
        }
        Ok(engine)
    }

    pub fn is_cached(&self, language: &str) -> bool {
        self.engines.contains_key(language)
    }

    pub fn cached_languages(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .engines
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }

    fn cached(&self, language: &str) -> Option<Arc<dyn ScriptEngine>> {
        self.engines
            .get(language)
            .map(|entry| entry.value().clone())
    }

    fn create_engine(&self, language: &str) -> ScriptResult<Arc<dyn ScriptEngine>> {
        Self::construct(&self.provider(language)?, language)
    }

    fn provider(&self, language: &str) -> ScriptResult<Arc<dyn EngineProvider>> {
        self.registry
            .provider_for(language)
            .ok_or_else(|| ScriptError::EngineNotFound(language.to_string()))
    }

    fn construct(
        provider: &Arc<dyn EngineProvider>,
        language: &str,
    ) -> ScriptResult<Arc<dyn ScriptEngine>> {
        provider
            .create_engine(language)
            .map_err(|source| ScriptError::EngineConstruction {
                language: language.to_string(),
                source,
            })
    }
}
