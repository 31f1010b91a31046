//! # Embedded script execution
//!
//! Runs short scripts in a pluggable, named language against a host's
//! variable state and optionally writes the variables a script assigned back
//! into that state.
//!
//! ## Components
//!
//! - [`resolver`]: read-only variable lookup, composed into a precedence chain
//! - [`bindings`]: the read/write bridge handed to engines
//! - [`engine`]: engine providers, the registry and the per-language cache
//! - [`request`]: immutable evaluation requests and their builder
//! - [`trace`]: per-evaluation traces, enhancers and listeners
//! - [`evaluator`]: the façade tying everything together
//!
//! ```no_run
//! use std::sync::Arc;
//! use scripting::{EvaluationRequest, InMemoryVariableScope, ScriptEvaluator, Value};
//!
//! let evaluator = ScriptEvaluator::default();
//! let scope = Arc::new(InMemoryVariableScope::new());
//! let request = EvaluationRequest::builder()
//!     .language("expr")
//!     .script("total = 2 * 21; total")
//!     .host_container(scope.clone())
//!     .store_persistently(true)
//!     .build()?;
//! let evaluation = evaluator.evaluate(request)?;
//! assert_eq!(evaluation.result(), &Value::Integer(42));
//! # Ok::<(), scripting::ScriptError>(())
//! ```

pub mod bindings;
pub mod config;
pub mod engine;
pub mod error;
pub mod evaluator;
pub mod request;
pub mod resolver;
pub mod scope;
pub mod trace;
pub mod value;

// Re-exports
pub use bindings::{
    BindingsError, ScriptAttributes, ScriptBindings, UnstoredKeys, UnsupportedOperation,
};
pub use config::ScriptingConfig;
pub use engine::{
    EngineCache, EngineProvider, EngineRegistry, ExpressionEngine, ExpressionEngineProvider,
    NativeFunction, ScriptEngine,
};
pub use error::{
    DomainError, EngineError, ObserverError, ScriptError, ScriptEvaluationError, ScriptResult,
};
pub use evaluator::{RootCause, ScriptEvaluation, ScriptEvaluator, ScriptEvaluatorBuilder};
pub use request::{EvaluationRequest, EvaluationRequestBuilder};
pub use resolver::{
    CompositeResolver, MapResolver, Resolver, ResolverFactory, StaticValuesResolverFactory,
    VariableScopeResolverFactory,
};
pub use scope::{InMemoryVariableScope, VariableScope};
pub use trace::{
    ScriptTrace, StaticTagsEnhancer, TraceEnhancer, TraceListener, TraceOutcome, TraceSummary,
    TraceTags,
};
pub use value::Value;

#[cfg(test)]
mod tests {
    use tracing_subscriber::{EnvFilter, FmtSubscriber};

    #[ctor::ctor]
    fn init_tests() {
        // テストの前に一度だけ実行したい処理
        // tracing_subscriberの初期化
        let subscriber = FmtSubscriber::builder()
            .with_env_filter(EnvFilter::from_default_env())
            .finish();
        tracing::subscriber::set_global_default(subscriber)
            .expect("Failed to set tracing subscriber");
    }
}
