//! # Expression language parser
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! program    := statement (";" statement)* ";"?
//! statement  := identifier "=" expression | expression
//! expression := or
//! or         := and ("||" and)*
//! and        := equality ("&&" equality)*
//! equality   := comparison (("==" | "!=") comparison)*
//! comparison := additive (("<=" | ">=" | "<" | ">") additive)*
//! additive   := multiplicative (("+" | "-") multiplicative)*
//! multiplicative := unary (("*" | "/" | "%") unary)*
//! unary      := ("-" | "!") unary | primary
//! primary    := literal | call | identifier | "(" expression ")"
//! ```
//!
//! Operators of one precedence level parse into a flat [`Expression::Chain`]
//! evaluated left to right, so long operator runs never deepen the tree.
//! Parentheses, unary operators and call arguments each add one nesting
//! level, capped at [`MAX_NESTING_DEPTH`].

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{escaped_transform, is_not, tag},
    character::complete::{alpha1, alphanumeric1, char, digit1, multispace0, satisfy},
    combinator::{all_consuming, map, map_res, not, opt, recognize, value, verify},
    error::{VerboseError, VerboseErrorKind, context, convert_error},
    multi::{many0, many0_count, many1_count, separated_list0},
    sequence::{delimited, pair, terminated, tuple},
};

use crate::error::EngineError;
use crate::value::Value;

pub type ParserResult<'a, T> = IResult<&'a str, T, VerboseError<&'a str>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    LessThan,
    LessThanEqual,
    GreaterThan,
    GreaterThanEqual,
    And,
    Or,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Negate,
    Not,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    Literal(Value),
    Variable(String),
    Unary {
        op: UnaryOperator,
        operand: Box<Expression>,
    },
    /// Left-associative run of same-precedence operators:
    /// `first op1 rest[0] op2 rest[1] ...`.
    Chain {
        first: Box<Expression>,
        rest: Vec<(BinaryOperator, Expression)>,
    },
    Call {
        function: String,
        arguments: Vec<Expression>,
    },
}

impl Expression {
    fn chain(first: Expression, rest: Vec<(BinaryOperator, Expression)>) -> Self {
        if rest.is_empty() {
            first
        } else {
            Expression::Chain {
                first: Box::new(first),
                rest,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    Assign { name: String, value: Expression },
    Expression(Expression),
}

const KEYWORDS: [&str; 3] = ["true", "false", "null"];

/// Deepest nesting of parentheses, unary operators and call arguments
/// accepted by the parser.
pub const MAX_NESTING_DEPTH: usize = 64;

const TOO_DEEP: &str = "expression nested too deeply";

/// Parses a whole script into statements.
pub fn parse_program(input: &str) -> Result<Vec<Statement>, EngineError> {
    match all_consuming(program)(input) {
        Ok((_, statements)) => Ok(statements),
        Err(nom::Err::Error(e)) | Err(nom::Err::Failure(e)) => {
            if e.errors
                .iter()
                .any(|(_, kind)| matches!(kind, VerboseErrorKind::Context(c) if *c == TOO_DEEP))
            {
                return Err(EngineError::Syntax(TOO_DEEP.to_string()));
            }
            Err(EngineError::Syntax(convert_error(input, e)))
        }
        Err(nom::Err::Incomplete(_)) => Err(EngineError::Syntax("incomplete input".to_string())),
    }
}

fn ws<'a, O, F>(inner: F) -> impl FnMut(&'a str) -> ParserResult<'a, O>
where
    F: FnMut(&'a str) -> ParserResult<'a, O>,
{
    delimited(multispace0, inner, multispace0)
}

fn separator(input: &str) -> ParserResult<()> {
    value((), many1_count(ws(char(';'))))(input)
}

fn program(input: &str) -> ParserResult<Vec<Statement>> {
    delimited(
        pair(multispace0, opt(separator)),
        separated_list0(separator, statement),
        pair(opt(separator), multispace0),
    )(input)
}

fn statement(input: &str) -> ParserResult<Statement> {
    context(
        "statement",
        alt((assignment, map(expression, Statement::Expression))),
    )(input)
}

fn assignment(input: &str) -> ParserResult<Statement> {
    map(
        pair(
            terminated(ws(identifier), terminated(char('='), not(char('=')))),
            expression,
        ),
        |(name, value)| Statement::Assign { name, value },
    )(input)
}

fn is_identifier_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_'
}

fn identifier(input: &str) -> ParserResult<String> {
    context(
        "identifier",
        map(
            verify(
                recognize(pair(
                    alt((alpha1, tag("_"))),
                    many0_count(alt((alphanumeric1, tag("_")))),
                )),
                |name: &str| !KEYWORDS.contains(&name),
            ),
            str::to_string,
        ),
    )(input)
}

fn keyword<'a>(word: &'static str) -> impl FnMut(&'a str) -> ParserResult<'a, &'a str> {
    terminated(tag(word), not(satisfy(is_identifier_char)))
}

pub fn expression(input: &str) -> ParserResult<Expression> {
    nested_expression(input, 0)
}

fn nested_expression(input: &str, depth: usize) -> ParserResult<Expression> {
    context("expression", move |i| or(i, depth))(input)
}

/// Enters one more nesting level, failing hard once the cap is reached.
fn deeper(input: &str, depth: usize) -> Result<usize, nom::Err<VerboseError<&str>>> {
    if depth >= MAX_NESTING_DEPTH {
        return Err(nom::Err::Failure(VerboseError {
            errors: vec![(input, VerboseErrorKind::Context(TOO_DEEP))],
        }));
    }
    Ok(depth + 1)
}

fn binary_level<'a, O, F>(
    operand: F,
    operator: O,
) -> impl FnMut(&'a str) -> ParserResult<'a, Expression>
where
    F: FnMut(&'a str) -> ParserResult<'a, Expression> + Copy,
    O: FnMut(&'a str) -> ParserResult<'a, BinaryOperator> + Copy,
{
    map(
        pair(operand, many0(pair(ws(operator), operand))),
        |(first, rest)| Expression::chain(first, rest),
    )
}

fn or(input: &str, depth: usize) -> ParserResult<Expression> {
    binary_level(
        move |i| and(i, depth),
        |i| value(BinaryOperator::Or, tag("||"))(i),
    )(input)
}

fn and(input: &str, depth: usize) -> ParserResult<Expression> {
    binary_level(
        move |i| equality(i, depth),
        |i| value(BinaryOperator::And, tag("&&"))(i),
    )(input)
}

fn equality(input: &str, depth: usize) -> ParserResult<Expression> {
    binary_level(
        move |i| comparison(i, depth),
        |i| {
            alt((
                value(BinaryOperator::Equal, tag("==")),
                value(BinaryOperator::NotEqual, tag("!=")),
            ))(i)
        },
    )(input)
}

fn comparison(input: &str, depth: usize) -> ParserResult<Expression> {
    binary_level(
        move |i| additive(i, depth),
        |i| {
            alt((
                value(BinaryOperator::LessThanEqual, tag("<=")),
                value(BinaryOperator::GreaterThanEqual, tag(">=")),
                value(BinaryOperator::LessThan, tag("<")),
                value(BinaryOperator::GreaterThan, tag(">")),
            ))(i)
        },
    )(input)
}

fn additive(input: &str, depth: usize) -> ParserResult<Expression> {
    binary_level(
        move |i| multiplicative(i, depth),
        |i| {
            alt((
                value(BinaryOperator::Add, char('+')),
                value(BinaryOperator::Subtract, char('-')),
            ))(i)
        },
    )(input)
}

fn multiplicative(input: &str, depth: usize) -> ParserResult<Expression> {
    binary_level(
        move |i| unary(i, depth),
        |i| {
            alt((
                value(BinaryOperator::Multiply, char('*')),
                value(BinaryOperator::Divide, char('/')),
                value(BinaryOperator::Modulo, char('%')),
            ))(i)
        },
    )(input)
}

fn unary_operator(input: &str) -> ParserResult<UnaryOperator> {
    ws(alt((
        value(UnaryOperator::Negate, char('-')),
        value(UnaryOperator::Not, terminated(char('!'), not(char('=')))),
    )))(input)
}

fn unary(input: &str, depth: usize) -> ParserResult<Expression> {
    match opt(unary_operator)(input)? {
        (rest, Some(op)) => {
            let depth = deeper(rest, depth)?;
            let (rest, operand) = unary(rest, depth)?;
            Ok((
                rest,
                Expression::Unary {
                    op,
                    operand: Box::new(operand),
                },
            ))
        }
        (_, None) => primary(input, depth),
    }
}

fn primary(input: &str, depth: usize) -> ParserResult<Expression> {
    ws(alt((
        map(literal, Expression::Literal),
        move |i| call(i, depth),
        map(identifier, Expression::Variable),
        move |i| parenthesized(i, depth),
    )))(input)
}

fn parenthesized(input: &str, depth: usize) -> ParserResult<Expression> {
    let (input, _) = char('(')(input)?;
    let depth = deeper(input, depth)?;
    let (input, expression) = nested_expression(input, depth)?;
    let (input, _) = ws(char(')'))(input)?;
    Ok((input, expression))
}

fn call(input: &str, depth: usize) -> ParserResult<Expression> {
    context("function call", move |i| call_body(i, depth))(input)
}

fn call_body(input: &str, depth: usize) -> ParserResult<Expression> {
    let (input, function) = identifier(input)?;
    let (input, _) = ws(char('('))(input)?;
    let depth = deeper(input, depth)?;
    let (input, arguments) =
        separated_list0(ws(char(',')), move |i| nested_expression(i, depth))(input)?;
    let (input, _) = char(')')(input)?;
    Ok((
        input,
        Expression::Call {
            function,
            arguments,
        },
    ))
}

fn literal(input: &str) -> ParserResult<Value> {
    context(
        "literal",
        alt((
            value(Value::Boolean(true), keyword("true")),
            value(Value::Boolean(false), keyword("false")),
            value(Value::Null, keyword("null")),
            map(string_literal, Value::String),
            float_literal,
            integer_literal,
        )),
    )(input)
}

fn float_literal(input: &str) -> ParserResult<Value> {
    map_res(recognize(tuple((digit1, char('.'), digit1))), |s: &str| {
        s.parse::<f64>().map(Value::Float)
    })(input)
}

fn integer_literal(input: &str) -> ParserResult<Value> {
    map_res(digit1, |s: &str| s.parse::<i64>().map(Value::Integer))(input)
}

fn string_literal(input: &str) -> ParserResult<String> {
    context(
        "string",
        delimited(
            char('"'),
            map(
                opt(escaped_transform(
                    is_not("\\\""),
                    '\\',
                    alt((
                        value("\\", char('\\')),
                        value("\"", char('"')),
                        value("\n", char('n')),
                        value("\t", char('t')),
                    )),
                )),
                Option::unwrap_or_default,
            ),
            char('"'),
        ),
    )(input)
}
