use std::fmt;
use std::sync::Arc;

use crate::error::{ScriptError, ScriptResult};
use crate::resolver::Resolver;
use crate::scope::VariableScope;
use crate::trace::TraceEnhancer;

/// Everything needed for one evaluation. Immutable once built.
#[derive(Clone)]
pub struct EvaluationRequest {
    language: String,
    script: String,
    host_container: Option<Arc<dyn VariableScope>>,
    additional_resolvers: Vec<Arc<dyn Resolver>>,
    store_persistently: bool,
    enhancer: Option<Arc<dyn TraceEnhancer>>,
}

impl EvaluationRequest {
    pub fn builder() -> EvaluationRequestBuilder {
        EvaluationRequestBuilder::default()
    }

    pub fn language(&self) -> &str {
        &self.language
    }

    pub fn script(&self) -> &str {
        &self.script
    }

    pub fn host_container(&self) -> Option<&Arc<dyn VariableScope>> {
        self.host_container.as_ref()
    }

    /// Resolvers consulted before any factory-derived resolver, in order.
    pub fn additional_resolvers(&self) -> &[Arc<dyn Resolver>] {
        &self.additional_resolvers
    }

    pub fn store_persistently(&self) -> bool {
        self.store_persistently
    }

    pub fn enhancer(&self) -> Option<&Arc<dyn TraceEnhancer>> {
        self.enhancer.as_ref()
    }

    /// Fails with a configuration error naming every blank required field.
    pub fn validate(&self) -> ScriptResult<()> {
        check_required(&[
            ("language", self.language.as_str()),
            ("script", self.script.as_str()),
        ])
    }
}

impl fmt::Debug for EvaluationRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationRequest")
            .field("language", &self.language)
            .field("script", &self.script)
            .field("host_container", &self.host_container.is_some())
            .field("additional_resolvers", &self.additional_resolvers.len())
            .field("store_persistently", &self.store_persistently)
            .field("enhancer", &self.enhancer.is_some())
            .finish()
    }
}

fn check_required(fields: &[(&str, &str)]) -> ScriptResult<()> {
    let missing: Vec<&str> = fields
        .iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| *name)
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(ScriptError::configuration(format!(
            "Evaluation request is missing required field(s): {}",
            missing.join(", ")
        )))
    }
}

#[derive(Default)]
pub struct EvaluationRequestBuilder {
    language: Option<String>,
    script: Option<String>,
    host_container: Option<Arc<dyn VariableScope>>,
    additional_resolvers: Vec<Arc<dyn Resolver>>,
    store_persistently: bool,
    enhancer: Option<Arc<dyn TraceEnhancer>>,
}

impl EvaluationRequestBuilder {
    pub fn language<S: Into<String>>(mut self, language: S) -> Self {
        self.language = Some(language.into());
        self
    }

    pub fn script<S: Into<String>>(mut self, script: S) -> Self {
        self.script = Some(script.into());
        self
    }

    pub fn host_container(mut self, scope: Arc<dyn VariableScope>) -> Self {
        self.host_container = Some(scope);
        self
    }

    /// Appends a resolver. Earlier resolvers take precedence.
    pub fn additional_resolver(mut self, resolver: Arc<dyn Resolver>) -> Self {
        self.additional_resolvers.push(resolver);
        self
    }

    pub fn additional_resolvers<I>(mut self, resolvers: I) -> Self
    where
        I: IntoIterator<Item = Arc<dyn Resolver>>,
    {
        self.additional_resolvers.extend(resolvers);
        self
    }

    pub fn store_persistently(mut self, store: bool) -> Self {
        self.store_persistently = store;
        self
    }

    pub fn enhancer(mut self, enhancer: Arc<dyn TraceEnhancer>) -> Self {
        self.enhancer = Some(enhancer);
        self
    }

    pub fn build(self) -> ScriptResult<EvaluationRequest> {
        let request = EvaluationRequest {
            language: self.language.unwrap_or_default(),
            script: self.script.unwrap_or_default(),
            host_container: self.host_container,
            additional_resolvers: self.additional_resolvers,
            store_persistently: self.store_persistently,
            enhancer: self.enhancer,
        };
        request.validate()?;
        Ok(request)
    }
}
