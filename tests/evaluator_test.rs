use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use pretty_assertions::assert_eq;
use scripting::{
    DomainError, EngineError, EngineRegistry, EvaluationRequest, ExpressionEngineProvider,
    InMemoryVariableScope, MapResolver, ObserverError, Resolver, ResolverFactory, ScriptError,
    ScriptEvaluator, ScriptTrace, ScriptingConfig, TraceOutcome, Value, VariableScope,
    VariableScopeResolverFactory,
};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

#[ctor::ctor]
fn init_tests() {
    // テストの前に一度だけ実行したい処理
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::from_default_env())
        .finish();
    tracing::subscriber::set_global_default(subscriber).expect("Failed to set tracing subscriber");
}

fn evaluator_with_lang1() -> ScriptEvaluator {
    ScriptEvaluator::builder()
        .engine_provider(Arc::new(
            ExpressionEngineProvider::default().with_names(["lang1"]),
        ))
        .build()
}

fn lang1_request(
    script: &str,
    scope: Arc<InMemoryVariableScope>,
    store: bool,
) -> EvaluationRequest {
    EvaluationRequest::builder()
        .language("lang1")
        .script(script)
        .host_container(scope)
        .store_persistently(store)
        .build()
        .unwrap()
}

/// Records every trace it receives.
#[derive(Default)]
struct RecordingListener {
    traces: Mutex<Vec<ScriptTrace>>,
}

impl scripting::TraceListener for RecordingListener {
    fn on_trace(&self, trace: &ScriptTrace) -> Result<(), ObserverError> {
        self.traces.lock().unwrap().push(trace.clone());
        Ok(())
    }
}

/// Resolver that claims a fixed set of keys and counts lookups.
struct CountingResolver {
    values: BTreeMap<String, Value>,
    lookups: AtomicUsize,
}

impl CountingResolver {
    fn new(values: &[(&str, &str)]) -> Self {
        Self {
            values: values
                .iter()
                .map(|(k, v)| (k.to_string(), Value::from(*v)))
                .collect(),
            lookups: AtomicUsize::new(0),
        }
    }
}

impl Resolver for CountingResolver {
    fn contains_key(&self, key: &str) -> bool {
        self.lookups.fetch_add(1, Ordering::SeqCst);
        self.values.contains_key(key)
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.values.get(key).cloned()
    }
}

#[test]
fn test_stored_assignment_reaches_host_scope() {
    let evaluator = evaluator_with_lang1();
    let scope = Arc::new(InMemoryVariableScope::new());

    let evaluation = evaluator
        .evaluate(lang1_request("x = 1 + 1; x", scope.clone(), true))
        .unwrap();

    assert_eq!(evaluation.result(), &Value::Integer(2));
    assert_eq!(scope.get_variable("x"), Some(Value::Integer(2)));
}

#[test]
fn test_unstored_assignment_leaves_host_scope_unchanged() {
    let evaluator = evaluator_with_lang1();
    let scope = Arc::new(InMemoryVariableScope::with_variables([("other", Value::from("kept"))]));
    let before = scope.snapshot();

    let evaluation = evaluator
        .evaluate(lang1_request("x = 1 + 1; x", scope.clone(), false))
        .unwrap();

    assert_eq!(evaluation.result(), &Value::Integer(2));
    assert_eq!(evaluation.attribute("x"), Some(Value::Integer(2)));
    assert!(!scope.has_variable("x"));
    assert_eq!(scope.snapshot(), before);
}

#[test]
fn test_unknown_language_fails_before_any_resolver_work() {
    struct CountingFactory(AtomicUsize);

    impl ResolverFactory for CountingFactory {
        fn create_resolver(
            &self,
            _scope: Option<&Arc<dyn VariableScope>>,
        ) -> Option<Arc<dyn Resolver>> {
            self.0.fetch_add(1, Ordering::SeqCst);
            None
        }
    }

    let factory = Arc::new(CountingFactory(AtomicUsize::new(0)));
    let success = Arc::new(RecordingListener::default());
    let error = Arc::new(RecordingListener::default());
    let evaluator = ScriptEvaluator::builder()
        .resolver_factory(factory.clone())
        .success_listener(success.clone())
        .error_listener(error.clone())
        .build();

    let request = EvaluationRequest::builder()
        .language("unknown-lang")
        .script("1")
        .build()
        .unwrap();
    let result = evaluator.evaluate(request);

    assert!(matches!(
        result,
        Err(ScriptError::EngineNotFound(ref name)) if name == "unknown-lang"
    ));
    assert_eq!(factory.0.load(Ordering::SeqCst), 0);
    assert!(success.traces.lock().unwrap().is_empty());
    assert!(error.traces.lock().unwrap().is_empty());
}

#[test]
fn test_failing_error_listener_does_not_mask_script_failure() {
    let calls = Arc::new(AtomicUsize::new(0));
    let listener_calls = calls.clone();
    let evaluator = ScriptEvaluator::builder()
        .engine_provider(Arc::new(
            ExpressionEngineProvider::default().with_names(["lang1"]),
        ))
        .error_listener(Arc::new(
            move |_: &ScriptTrace| -> Result<(), ObserverError> {
                listener_calls.fetch_add(1, Ordering::SeqCst);
                Err(ObserverError::new("listener is broken"))
            },
        ))
        .build();

    let scope = Arc::new(InMemoryVariableScope::new());
    let result = evaluator.evaluate(lang1_request("fail(\"kaboom\")", scope, false));

    assert_eq!(calls.load(Ordering::SeqCst), 1);
    match result {
        Err(ScriptError::Evaluation(error)) => {
            assert_eq!(error.language(), "lang1");
            assert_eq!(error.message(), "lang1 script evaluation failed: kaboom");
            assert_eq!(error.engine_error(), &EngineError::script("kaboom"));
            assert_eq!(error.trace().outcome(), TraceOutcome::Failure);
        }
        other => panic!("expected evaluation failure, got {:?}", other),
    }
}

#[test]
fn test_first_resolver_claiming_key_wins() {
    let evaluator = ScriptEvaluator::default();
    let a = Arc::new(CountingResolver::new(&[("z", "fromA")]));
    let b = Arc::new(CountingResolver::new(&[("y", "fromB")]));

    let request = EvaluationRequest::builder()
        .language("expr")
        .script("y")
        .additional_resolver(a.clone())
        .additional_resolver(b.clone())
        .build()
        .unwrap();
    let evaluation = evaluator.evaluate(request).unwrap();

    assert_eq!(evaluation.result(), &Value::from("fromB"));
    assert!(a.lookups.load(Ordering::SeqCst) >= 1);
}

#[test]
fn test_precedence_when_both_resolvers_claim_key() {
    let evaluator = ScriptEvaluator::default();
    let request = EvaluationRequest::builder()
        .language("expr")
        .script("y")
        .additional_resolver(Arc::new(MapResolver::default().with("y", "first")))
        .additional_resolver(Arc::new(MapResolver::default().with("y", "second")))
        .build()
        .unwrap();

    let evaluation = evaluator.evaluate(request).unwrap();
    assert_eq!(evaluation.result(), &Value::from("first"));
}

#[test]
fn test_unstored_keys_never_reach_host_scope() {
    let mut config = ScriptingConfig::default();
    config.unstored_keys.push("scratch".to_string());
    let evaluator = ScriptEvaluator::new(config);
    let scope = Arc::new(InMemoryVariableScope::new());

    let request = EvaluationRequest::builder()
        .language("expr")
        .script("print = 1; console = 2; scratch = 3; kept = print + console + scratch; kept")
        .host_container(scope.clone())
        .store_persistently(true)
        .build()
        .unwrap();
    let evaluation = evaluator.evaluate(request).unwrap();

    assert_eq!(evaluation.result(), &Value::Integer(6));
    assert_eq!(
        scope.snapshot(),
        BTreeMap::from([("kept".to_string(), Value::Integer(6))])
    );
}

#[test]
fn test_domain_error_is_propagated_unwrapped() {
    let provider =
        ExpressionEngineProvider::default().with_function("approve", |args: &[Value]| match args {
            [Value::Integer(amount)] if *amount > 100 => Err(EngineError::Domain(
                DomainError::new("ORDER_REJECTED", "credit limit exceeded"),
            )),
            _ => Ok(Value::Boolean(true)),
        });
    let registry = EngineRegistry::new();
    registry.register(Arc::new(provider));

    let error = Arc::new(RecordingListener::default());
    let evaluator = ScriptEvaluator::builder()
        .registry(Arc::new(registry))
        .error_listener(error.clone())
        .build();

    let request = EvaluationRequest::builder()
        .language("expr")
        .script("approve(500)")
        .build()
        .unwrap();
    let result = evaluator.evaluate(request);

    match result {
        Err(ScriptError::Domain(domain)) => {
            assert_eq!(domain, DomainError::new("ORDER_REJECTED", "credit limit exceeded"));
        }
        other => panic!("expected domain error, got {:?}", other),
    }
    let traces = error.traces.lock().unwrap();
    assert_eq!(traces.len(), 1);
    assert!(matches!(traces[0].error(), Some(EngineError::Wrapped { .. })));
}

#[test]
fn test_success_listener_receives_enhanced_trace() {
    let success = Arc::new(RecordingListener::default());
    let mut config = ScriptingConfig::default();
    config
        .default_tags
        .insert("tenant".to_string(), "acme".to_string());
    let evaluator = ScriptEvaluator::builder()
        .config(config)
        .success_listener(success.clone())
        .build();

    let request = EvaluationRequest::builder()
        .language("expr")
        .script("len(\"hello\")")
        .enhancer(Arc::new(
            |trace: &mut ScriptTrace| -> Result<(), ObserverError> {
                trace.add_tag("rule", "length-check");
                Ok(())
            },
        ))
        .build()
        .unwrap();
    let evaluation = evaluator.evaluate(request).unwrap();
    assert_eq!(evaluation.result(), &Value::Integer(5));

    let traces = success.traces.lock().unwrap();
    assert_eq!(traces.len(), 1);
    let summary = traces[0].summary();
    assert_eq!(summary.outcome, TraceOutcome::Success);
    assert_eq!(summary.language, "expr");
    let tags: Vec<_> = traces[0].tags().iter().collect();
    assert_eq!(tags, vec![("tenant", "acme"), ("rule", "length-check")]);
}

#[test]
fn test_engine_identity_follows_reuse_declaration() {
    let evaluator = ScriptEvaluator::builder()
        .engine_provider(Arc::new(
            ExpressionEngineProvider::default().with_names(["lang1"]),
        ))
        .engine_provider(Arc::new(
            ExpressionEngineProvider::default()
                .with_names(["lang2"])
                .with_concurrent_reuse(false),
        ))
        .build();
    let cache = evaluator.engine_cache();

    let first = cache.engine_for("lang1").unwrap();
    for _ in 0..3 {
        assert!(Arc::ptr_eq(&first, &cache.engine_for("lang1").unwrap()));
    }

    let a = cache.engine_for("lang2").unwrap();
    let b = cache.engine_for("lang2").unwrap();
    assert!(!Arc::ptr_eq(&a, &b));
    assert_eq!(cache.cached_languages(), vec!["lang1"]);
}

#[test]
fn test_host_scope_resolution_is_live() {
    let scope = Arc::new(InMemoryVariableScope::new());
    scope.set_variable("limit", Value::Integer(10));
    let evaluator = ScriptEvaluator::builder()
        .resolver_factory(Arc::new(VariableScopeResolverFactory))
        .build();

    let request = EvaluationRequest::builder()
        .language("expr")
        .script("limit = limit * 2; limit + 1")
        .host_container(scope.clone())
        .store_persistently(true)
        .build()
        .unwrap();
    let evaluation = evaluator.evaluate(request).unwrap();

    assert_eq!(evaluation.result(), &Value::Integer(21));
    assert_eq!(scope.get_variable("limit"), Some(Value::Integer(20)));
}

#[test]
fn test_config_from_json() {
    let config: ScriptingConfig = scripting::config::from_str(
        r#"{
            "engine_cache_enabled": false,
            "static_values": {"greeting": "hi"}
        }"#,
    )
    .unwrap();
    let evaluator = ScriptEvaluator::new(config);
    assert!(!evaluator.engine_cache().is_enabled());

    let request = EvaluationRequest::builder()
        .language("expr")
        .script("greeting + \" there\"")
        .build()
        .unwrap();
    let evaluation = evaluator.evaluate(request).unwrap();
    assert_eq!(evaluation.into_result(), Value::from("hi there"));
}

#[test]
fn test_long_and_deeply_nested_scripts() {
    let evaluator = ScriptEvaluator::default();
    let expr = |script: String| {
        EvaluationRequest::builder()
            .language("expr")
            .script(script)
            .build()
            .unwrap()
    };

    let evaluation = evaluator
        .evaluate(expr(vec!["1"; 10_000].join(" + ")))
        .unwrap();
    assert_eq!(evaluation.result(), &Value::Integer(10_000));

    let nested = format!("{}1{}", "(".repeat(1_000), ")".repeat(1_000));
    match evaluator.evaluate(expr(nested)) {
        Err(ScriptError::Evaluation(error)) => {
            assert_eq!(
                error.engine_error(),
                &EngineError::Syntax("expression nested too deeply".to_string())
            );
            assert_eq!(error.trace().outcome(), TraceOutcome::Failure);
        }
        other => panic!("expected evaluation error, got {:?}", other),
    }
}
