//! # Script evaluator
//!
//! Entry point of the crate. One call to [`ScriptEvaluator::evaluate`] runs
//! the whole pipeline once:
//!
//! ```text
//! validate → engine_for(language) → resolver chain → bindings
//!          → engine.evaluate(script) → trace → enhancers → listener
//!          → Ok(ScriptEvaluation) | Err(ScriptError)
//! ```
//!
//! Only the engine cache is shared between calls. Enhancer and listener
//! failures, including panics, are logged and dropped; panics raised by the
//! engine itself propagate to the caller.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use tracing::{debug, instrument, warn};

use crate::bindings::{ScriptAttributes, ScriptBindings, UnstoredKeys};
use crate::config::ScriptingConfig;
use crate::engine::{EngineCache, EngineProvider, EngineRegistry};
use crate::error::{
    DomainError, EngineError, ObserverError, ScriptError, ScriptEvaluationError, ScriptResult,
};
use crate::request::EvaluationRequest;
use crate::resolver::{
    CompositeResolver, ResolverFactory, StaticValuesResolverFactory, VariableScopeResolverFactory,
};
use crate::trace::{ScriptTrace, StaticTagsEnhancer, TraceEnhancer, TraceListener};
use crate::value::Value;

/// Classification of a failed evaluation by its innermost cause.
#[derive(Debug, Clone, PartialEq)]
pub enum RootCause {
    /// The root cause already carries host-domain meaning.
    Domain(DomainError),
    /// Anything else. Holds the complete error chain.
    Generic(EngineError),
}

impl RootCause {
    pub fn classify(error: EngineError) -> Self {
        match error.root_cause() {
            EngineError::Domain(domain) => RootCause::Domain(domain.clone()),
            _ => RootCause::Generic(error),
        }
    }
}

/// Successful evaluation: the script's value plus a read-only view of what it
/// could see. The bindings themselves do not outlive the call.
#[derive(Debug)]
pub struct ScriptEvaluation {
    result: Value,
    attributes: ScriptAttributes,
}

impl ScriptEvaluation {
    pub fn result(&self) -> &Value {
        &self.result
    }

    pub fn into_result(self) -> Value {
        self.result
    }

    /// Looks `key` up the way the script would have.
    pub fn attribute(&self, key: &str) -> Option<Value> {
        self.attributes.get(key)
    }

    pub fn attributes(&self) -> &ScriptAttributes {
        &self.attributes
    }
}

pub struct ScriptEvaluator {
    cache: EngineCache,
    resolver_factories: Vec<Arc<dyn ResolverFactory>>,
    unstored_keys: Arc<UnstoredKeys>,
    default_enhancer: Option<Arc<dyn TraceEnhancer>>,
    success_listener: Option<Arc<dyn TraceListener>>,
    error_listener: Option<Arc<dyn TraceListener>>,
}

impl ScriptEvaluator {
    pub fn new(config: ScriptingConfig) -> Self {
        Self::builder().config(config).build()
    }

    pub fn builder() -> ScriptEvaluatorBuilder {
        ScriptEvaluatorBuilder::default()
    }

    pub fn engine_cache(&self) -> &EngineCache {
        &self.cache
    }

    #[instrument(level = "debug", skip(self, request), fields(language = %request.language()))]
    pub fn evaluate(&self, request: EvaluationRequest) -> ScriptResult<ScriptEvaluation> {
        request.validate()?;
        let engine = self.cache.engine_for(request.language())?;

        let resolver = self.resolver_chain(&request);
        let mut bindings = ScriptBindings::new(
            resolver,
            request.host_container().cloned(),
            request.store_persistently(),
            self.unstored_keys.clone(),
        );

        debug!("Evaluating script");
        let started_at = Utc::now();
        let start = Instant::now();
        let outcome = engine.evaluate(request.script(), &mut bindings);
        let duration = start.elapsed();

        match outcome {
            Ok(result) => {
                debug!(?duration, "Script evaluation succeeded");
                let mut trace = ScriptTrace::success(request, started_at, duration);
                self.enhance(&mut trace);
                Self::notify(self.success_listener.as_deref(), &trace);
                Ok(ScriptEvaluation {
                    result,
                    attributes: bindings.into_attributes(),
                })
            }
            Err(error) => {
                debug!(?duration, %error, "Script evaluation failed");
                let mut trace = ScriptTrace::failure(request, started_at, duration, error.clone());
                self.enhance(&mut trace);
                Self::notify(self.error_listener.as_deref(), &trace);
                Err(Self::translate(error, trace))
            }
        }
    }

    /// Additional resolvers first, then one resolver per factory that accepts.
    fn resolver_chain(&self, request: &EvaluationRequest) -> CompositeResolver {
        let scope = request.host_container();
        CompositeResolver::new(
            request.additional_resolvers().iter().cloned().chain(
                self.resolver_factories
                    .iter()
                    .filter_map(|factory| factory.create_resolver(scope)),
            ),
        )
    }

    fn enhance(&self, trace: &mut ScriptTrace) {
        let request_enhancer = trace.request().enhancer().cloned();
        for enhancer in self.default_enhancer.iter().chain(request_enhancer.iter()) {
            let result = panic::catch_unwind(AssertUnwindSafe(|| enhancer.enhance(trace)));
            Self::log_observer_failure("Trace enhancer", result);
        }
    }

    fn notify(listener: Option<&dyn TraceListener>, trace: &ScriptTrace) {
        if let Some(listener) = listener {
            let result = panic::catch_unwind(AssertUnwindSafe(|| listener.on_trace(trace)));
            Self::log_observer_failure("Trace listener", result);
        }
    }

    fn log_observer_failure(
        observer: &str,
        result: Result<Result<(), ObserverError>, Box<dyn Any + Send>>,
    ) {
        match result {
            Ok(Ok(())) => {}
            Ok(Err(error)) => warn!(%error, "{} failed", observer),
            Err(payload) => {
                let message = panic_message(payload.as_ref());
                warn!(panic = %message, "{} panicked", observer);
            }
        }
    }

    fn translate(error: EngineError, trace: ScriptTrace) -> ScriptError {
        match RootCause::classify(error) {
            RootCause::Domain(domain) => ScriptError::Domain(domain),
            RootCause::Generic(error) => {
                ScriptError::Evaluation(Box::new(ScriptEvaluationError::new(error, trace)))
            }
        }
    }
}

impl Default for ScriptEvaluator {
    fn default() -> Self {
        Self::new(ScriptingConfig::default())
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[derive(Default)]
pub struct ScriptEvaluatorBuilder {
    config: ScriptingConfig,
    registry: Option<Arc<EngineRegistry>>,
    providers: Vec<Arc<dyn EngineProvider>>,
    resolver_factories: Vec<Arc<dyn ResolverFactory>>,
    default_enhancer: Option<Arc<dyn TraceEnhancer>>,
    success_listener: Option<Arc<dyn TraceListener>>,
    error_listener: Option<Arc<dyn TraceListener>>,
}

impl ScriptEvaluatorBuilder {
    pub fn config(mut self, config: ScriptingConfig) -> Self {
        self.config = config;
        self
    }

    /// Replaces the default registry (built-in expression language only).
    pub fn registry(mut self, registry: Arc<EngineRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Registers an additional provider on the registry in use.
    pub fn engine_provider(mut self, provider: Arc<dyn EngineProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    /// Adds a resolver factory. Setting any factory replaces the default set
    /// (host scope, then static values from configuration).
    pub fn resolver_factory(mut self, factory: Arc<dyn ResolverFactory>) -> Self {
        self.resolver_factories.push(factory);
        self
    }

    /// Replaces the default enhancer built from `default_tags`.
    pub fn default_enhancer(mut self, enhancer: Arc<dyn TraceEnhancer>) -> Self {
        self.default_enhancer = Some(enhancer);
        self
    }

    pub fn success_listener(mut self, listener: Arc<dyn TraceListener>) -> Self {
        self.success_listener = Some(listener);
        self
    }

    pub fn error_listener(mut self, listener: Arc<dyn TraceListener>) -> Self {
        self.error_listener = Some(listener);
        self
    }

    pub fn build(self) -> ScriptEvaluator {
        let registry = self
            .registry
            .unwrap_or_else(|| Arc::new(EngineRegistry::with_defaults()));
        for provider in self.providers {
            registry.register(provider);
        }

        let resolver_factories = if self.resolver_factories.is_empty() {
            vec![
                Arc::new(VariableScopeResolverFactory) as Arc<dyn ResolverFactory>,
                Arc::new(StaticValuesResolverFactory::from_config(&self.config)),
            ]
        } else {
            self.resolver_factories
        };

        let default_enhancer = self.default_enhancer.or_else(|| {
            let enhancer = StaticTagsEnhancer::from_config(&self.config);
            (!enhancer.is_empty()).then(|| Arc::new(enhancer) as Arc<dyn TraceEnhancer>)
        });

        debug!(
            languages = ?registry.languages(),
            factories = resolver_factories.len(),
            "Script evaluator created"
        );

        ScriptEvaluator {
            cache: EngineCache::new(registry, self.config.engine_cache_enabled),
            resolver_factories,
            unstored_keys: Arc::new(self.config.unstored_keys()),
            default_enhancer,
            success_listener: self.success_listener,
            error_listener: self.error_listener,
        }
    }
}
