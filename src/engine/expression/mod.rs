//! Built-in expression language.
//!
//! A small statement language so the subsystem is usable without an external
//! runtime. Scripts are `;`-separated statements; the value of the last
//! statement is the result.
//!
//! ```text
//! total = price * quantity;
//! discount = total > 100 && member;
//! total - (discount * 10)
//! ```
//!
//! Assignments go through [`ScriptBindings::put`] and names are read through
//! [`ScriptBindings::get`], so resolver precedence and persistence rules apply
//! unchanged. Built-in functions: `fail(message)`, `len(value)`, `str(value)`.
//! Hosts add their own with [`ExpressionEngineProvider::with_function`].

pub mod parser;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use self::parser::{BinaryOperator, Expression, Statement, UnaryOperator, parse_program};
use super::{EngineProvider, ScriptEngine};
use crate::bindings::ScriptBindings;
use crate::error::EngineError;
use crate::value::Value;

pub type EvalResult<T> = Result<T, EngineError>;

/// Host function callable from expression scripts.
pub type NativeFunction = Arc<dyn Fn(&[Value]) -> EvalResult<Value> + Send + Sync>;

pub struct ExpressionEngine {
    language: String,
    concurrent_reuse: bool,
    functions: HashMap<String, NativeFunction>,
}

impl ExpressionEngine {
    pub fn new(language: &str) -> Self {
        Self {
            language: language.to_string(),
            concurrent_reuse: true,
            functions: HashMap::new(),
        }
    }

    fn eval_statement(
        &self,
        statement: &Statement,
        bindings: &mut ScriptBindings,
    ) -> EvalResult<Value> {
        match statement {
            Statement::Assign { name, value } => {
                let value = self.eval_expression(value, bindings)?;
                bindings.put(name.clone(), value.clone());
                Ok(value)
            }
            Statement::Expression(expression) => self.eval_expression(expression, bindings),
        }
    }

    fn eval_expression(
        &self,
        expression: &Expression,
        bindings: &mut ScriptBindings,
    ) -> EvalResult<Value> {
        match expression {
            Expression::Literal(value) => Ok(value.clone()),
            Expression::Variable(name) => bindings
                .get(name)
                .ok_or_else(|| EngineError::UndefinedVariable(name.clone())),
            Expression::Unary { op, operand } => {
                let value = self.eval_expression(operand, bindings)?;
                Self::eval_unary(*op, value)
            }
            Expression::Chain { first, rest } => {
                let mut accumulated = self.eval_expression(first, bindings)?;
                for (op, operand) in rest {
                    accumulated = match op {
                        // 短絡評価
                        BinaryOperator::And if !accumulated.is_truthy() => Value::Boolean(false),
                        BinaryOperator::Or if accumulated.is_truthy() => Value::Boolean(true),
                        BinaryOperator::And | BinaryOperator::Or => {
                            let right = self.eval_expression(operand, bindings)?;
                            Value::Boolean(right.is_truthy())
                        }
                        _ => {
                            let right = self.eval_expression(operand, bindings)?;
                            Self::eval_binary_op(*op, &accumulated, &right)?
                        }
                    };
                }
                Ok(accumulated)
            }
            Expression::Call {
                function,
                arguments,
            } => {
                let args = arguments
                    .iter()
                    .map(|argument| self.eval_expression(argument, bindings))
                    .collect::<EvalResult<Vec<_>>>()?;
                self.eval_function_call(function, &args)
            }
        }
    }

    fn eval_unary(op: UnaryOperator, value: Value) -> EvalResult<Value> {
        match (op, value) {
            (UnaryOperator::Not, value) => Ok(Value::Boolean(!value.is_truthy())),
            (UnaryOperator::Negate, Value::Integer(i)) => i
                .checked_neg()
                .map(Value::Integer)
                .ok_or_else(|| EngineError::script("integer overflow")),
            (UnaryOperator::Negate, Value::Float(f)) => Ok(Value::Float(-f)),
            (UnaryOperator::Negate, other) => Err(EngineError::script(format!(
                "cannot negate {}",
                other.type_name()
            ))),
        }
    }

    fn eval_binary_op(op: BinaryOperator, left: &Value, right: &Value) -> EvalResult<Value> {
        match op {
            BinaryOperator::Add => Self::eval_add(left, right),
            BinaryOperator::Subtract => {
                Self::eval_arithmetic(op, left, right, i64::checked_sub, |a, b| a - b)
            }
            BinaryOperator::Multiply => {
                Self::eval_arithmetic(op, left, right, i64::checked_mul, |a, b| a * b)
            }
            BinaryOperator::Divide => {
                if matches!(right, Value::Integer(0)) {
                    return Err(EngineError::script("division by zero"));
                }
                Self::eval_arithmetic(op, left, right, i64::checked_div, |a, b| a / b)
            }
            BinaryOperator::Modulo => {
                if matches!(right, Value::Integer(0)) {
                    return Err(EngineError::script("division by zero"));
                }
                Self::eval_arithmetic(op, left, right, i64::checked_rem, |a, b| a % b)
            }
            BinaryOperator::Equal => Ok(Value::Boolean(Self::values_equal(left, right))),
            BinaryOperator::NotEqual => Ok(Value::Boolean(!Self::values_equal(left, right))),
            BinaryOperator::LessThan => Self::eval_compare(op, left, right, |o| o.is_lt()),
            BinaryOperator::LessThanEqual => Self::eval_compare(op, left, right, |o| o.is_le()),
            BinaryOperator::GreaterThan => Self::eval_compare(op, left, right, |o| o.is_gt()),
            BinaryOperator::GreaterThanEqual => {
                Self::eval_compare(op, left, right, |o| o.is_ge())
            }
            BinaryOperator::And => Ok(Value::Boolean(left.is_truthy() && right.is_truthy())),
            BinaryOperator::Or => Ok(Value::Boolean(left.is_truthy() || right.is_truthy())),
        }
    }

    fn eval_add(left: &Value, right: &Value) -> EvalResult<Value> {
        match (left, right) {
            (Value::String(l), r) => Ok(Value::String(format!("{}{}", l, r))),
            (l, Value::String(r)) => Ok(Value::String(format!("{}{}", l, r))),
            (Value::List(l), Value::List(r)) => {
                Ok(Value::List(l.iter().chain(r.iter()).cloned().collect()))
            }
            _ => Self::eval_arithmetic(
                BinaryOperator::Add,
                left,
                right,
                i64::checked_add,
                |a, b| a + b,
            ),
        }
    }

    fn eval_arithmetic(
        op: BinaryOperator,
        left: &Value,
        right: &Value,
        int_op: fn(i64, i64) -> Option<i64>,
        float_op: fn(f64, f64) -> f64,
    ) -> EvalResult<Value> {
        match (left, right) {
            (Value::Integer(l), Value::Integer(r)) => int_op(*l, *r)
                .map(Value::Integer)
                .ok_or_else(|| EngineError::script("integer overflow")),
            _ => match (left.as_f64(), right.as_f64()) {
                (Some(l), Some(r)) => Ok(Value::Float(float_op(l, r))),
                _ => Err(Self::type_mismatch(op, left, right)),
            },
        }
    }

    fn eval_compare(
        op: BinaryOperator,
        left: &Value,
        right: &Value,
        accept: fn(std::cmp::Ordering) -> bool,
    ) -> EvalResult<Value> {
        let ordering = match (left, right) {
            (Value::String(l), Value::String(r)) => Some(l.cmp(r)),
            _ => match (left.as_f64(), right.as_f64()) {
                (Some(l), Some(r)) => l.partial_cmp(&r),
                _ => None,
            },
        };
        ordering
            .map(|o| Value::Boolean(accept(o)))
            .ok_or_else(|| Self::type_mismatch(op, left, right))
    }

    fn values_equal(left: &Value, right: &Value) -> bool {
        match (left.as_f64(), right.as_f64()) {
            (Some(l), Some(r)) => l == r,
            _ => left == right,
        }
    }

    fn type_mismatch(op: BinaryOperator, left: &Value, right: &Value) -> EngineError {
        EngineError::script(format!(
            "unsupported operand types for {:?}: {} and {}",
            op,
            left.type_name(),
            right.type_name()
        ))
    }

    // 以下、組み込み関数の実装
    fn eval_function_call(&self, function: &str, args: &[Value]) -> EvalResult<Value> {
        match function {
            "fail" => {
                let message = args
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(" ");
                Err(EngineError::Script(message))
            }
            "len" => Self::eval_len_function(args),
            "str" => match args {
                [value] => Ok(Value::String(value.to_string())),
                _ => Err(EngineError::script(
                    "str function requires exactly one argument",
                )),
            },
            name => match self.functions.get(name) {
                Some(native) => native(args).map_err(|e| {
                    EngineError::wrap(format!("Function '{}' failed", name), e)
                }),
                None => Err(EngineError::script(format!("unknown function '{}'", name))),
            },
        }
    }

    fn eval_len_function(args: &[Value]) -> EvalResult<Value> {
        if args.len() != 1 {
            return Err(EngineError::script(
                "len function requires exactly one argument",
            ));
        }

        match &args[0] {
            Value::String(s) => Ok(Value::Integer(s.chars().count() as i64)),
            Value::List(l) => Ok(Value::Integer(l.len() as i64)),
            Value::Map(m) => Ok(Value::Integer(m.len() as i64)),
            other => Err(EngineError::script(format!(
                "len function requires string, list, or map, but got {}",
                other.type_name()
            ))),
        }
    }
}

impl ScriptEngine for ExpressionEngine {
    fn language(&self) -> &str {
        &self.language
    }

    fn evaluate(&self, script: &str, bindings: &mut ScriptBindings) -> EvalResult<Value> {
        let statements = parse_program(script)?;
        debug!(
            language = %self.language,
            statements = statements.len(),
            "Evaluating expression script"
        );
        let mut result = Value::Null;
        for statement in &statements {
            result = self.eval_statement(statement, bindings)?;
        }
        Ok(result)
    }

    fn supports_concurrent_reuse(&self) -> bool {
        self.concurrent_reuse
    }
}

impl fmt::Debug for ExpressionEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExpressionEngine")
            .field("language", &self.language)
            .field("concurrent_reuse", &self.concurrent_reuse)
            .field("functions", &self.functions.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Creates [`ExpressionEngine`]s, by default under `expr` and `expression`.
#[derive(Clone)]
pub struct ExpressionEngineProvider {
    names: Vec<String>,
    concurrent_reuse: bool,
    functions: HashMap<String, NativeFunction>,
}

impl Default for ExpressionEngineProvider {
    fn default() -> Self {
        Self {
            names: vec!["expr".to_string(), "expression".to_string()],
            concurrent_reuse: true,
            functions: HashMap::new(),
        }
    }
}

impl ExpressionEngineProvider {
    pub fn with_names<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.names = names.into_iter().map(Into::into).collect();
        self
    }

    /// Whether created engines declare safe concurrent reuse.
    pub fn with_concurrent_reuse(mut self, concurrent_reuse: bool) -> Self {
        self.concurrent_reuse = concurrent_reuse;
        self
    }

    pub fn with_function<S, F>(mut self, name: S, function: F) -> Self
    where
        S: Into<String>,
        F: Fn(&[Value]) -> EvalResult<Value> + Send + Sync + 'static,
    {
        self.functions.insert(name.into(), Arc::new(function));
        self
    }
}

impl EngineProvider for ExpressionEngineProvider {
    fn language_names(&self) -> Vec<String> {
        self.names.clone()
    }

    fn create_engine(&self, language: &str) -> EvalResult<Arc<dyn ScriptEngine>> {
        Ok(Arc::new(ExpressionEngine {
            language: language.to_string(),
            concurrent_reuse: self.concurrent_reuse,
            functions: self.functions.clone(),
        }))
    }
}
