use thiserror::Error;

use crate::bindings::BindingsError;
use crate::trace::ScriptTrace;

/// A failure that already carries host-domain meaning.
///
/// Engines and native functions raise this when the host asked them to fail
/// with a specific error. The evaluator propagates it unwrapped so callers
/// can match on it directly.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{code}: {message}")]
pub struct DomainError {
    pub code: String,
    pub message: String,
}

impl DomainError {
    pub fn new<C: Into<String>, M: Into<String>>(code: C, message: M) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}

/// Errors raised at the language engine boundary.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error("Syntax error: {0}")]
    Syntax(String),
    #[error("Undefined variable: {0}")]
    UndefinedVariable(String),
    #[error("Script error: {0}")]
    Script(String),
    #[error("{message}: {cause}")]
    Wrapped {
        message: String,
        cause: Box<EngineError>,
    },
    #[error(transparent)]
    Bindings(#[from] BindingsError),
    #[error("Engine construction failed: {0}")]
    Construction(String),
}

impl EngineError {
    pub fn script<S: Into<String>>(message: S) -> Self {
        EngineError::Script(message.into())
    }

    pub fn wrap<S: Into<String>>(message: S, cause: EngineError) -> Self {
        EngineError::Wrapped {
            message: message.into(),
            cause: Box::new(cause),
        }
    }

    /// Innermost error of a `Wrapped` chain.
    pub fn root_cause(&self) -> &EngineError {
        let mut current = self;
        while let EngineError::Wrapped { cause, .. } = current {
            current = cause;
        }
        current
    }

    /// Message of the root cause without the variant prefix, if it has one.
    pub fn root_message(&self) -> Option<String> {
        let message = match self.root_cause() {
            EngineError::Script(message) | EngineError::Construction(message) => message.clone(),
            EngineError::Syntax(message) => format!("syntax error: {}", message),
            EngineError::UndefinedVariable(name) => format!("undefined variable '{}'", name),
            other => other.to_string(),
        };
        if message.trim().is_empty() {
            None
        } else {
            Some(message)
        }
    }
}

/// Failure raised by a trace enhancer or listener. Never leaves the evaluator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Observer failed: {0}")]
pub struct ObserverError(pub String);

impl ObserverError {
    pub fn new<S: Into<String>>(message: S) -> Self {
        Self(message.into())
    }
}

/// A script that raised during execution, together with the trace of the attempt.
#[derive(Error, Debug)]
#[error("{message}")]
pub struct ScriptEvaluationError {
    message: String,
    #[source]
    source: EngineError,
    trace: ScriptTrace,
}

impl ScriptEvaluationError {
    pub fn new(source: EngineError, trace: ScriptTrace) -> Self {
        let mut message = format!("{} script evaluation failed", trace.request().language());
        if let Some(root) = source.root_message() {
            message.push_str(": ");
            message.push_str(&root);
        }
        if !trace.tags().is_empty() {
            let tags = trace
                .tags()
                .iter()
                .map(|(key, value)| format!("{}={}", key, value))
                .collect::<Vec<_>>()
                .join(", ");
            message.push_str(" | Trace: ");
            message.push_str(&tags);
        }
        Self {
            message,
            source,
            trace,
        }
    }

    pub fn language(&self) -> &str {
        self.trace.request().language()
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn engine_error(&self) -> &EngineError {
        &self.source
    }

    pub fn trace(&self) -> &ScriptTrace {
        &self.trace
    }

    pub fn into_trace(self) -> ScriptTrace {
        self.trace
    }
}

#[derive(Error, Debug)]
pub enum ScriptError {
    #[error("Configuration error: {0}")]
    Configuration(String),
    #[error("No script engine registered for language '{0}'")]
    EngineNotFound(String),
    #[error("Failed to create script engine for language '{language}': {source}")]
    EngineConstruction {
        language: String,
        #[source]
        source: EngineError,
    },
    #[error(transparent)]
    Evaluation(Box<ScriptEvaluationError>),
    #[error(transparent)]
    Domain(DomainError),
    #[error(transparent)]
    Bindings(#[from] BindingsError),
}

pub type ScriptResult<T> = Result<T, ScriptError>;

impl ScriptError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        ScriptError::Configuration(message.into())
    }

    /// Trace of the failed attempt, for evaluation failures.
    pub fn trace(&self) -> Option<&ScriptTrace> {
        match self {
            ScriptError::Evaluation(error) => Some(error.trace()),
            _ => None,
        }
    }
}
