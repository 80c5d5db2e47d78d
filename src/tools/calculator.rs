//! Arithmetic tools: `add`, `multiply` and `calculate`.

use std::iter::Peekable;
use std::str::Chars;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::{format_number, ToolContext};
use crate::discovery::{Registrar, ToolModule};
use crate::error::ToolError;
use crate::registry::{Arguments, ContentItem, InputSchema, ToolHandler};

/// The `calculator` tool module.
pub struct CalculatorModule;

impl ToolModule for CalculatorModule {
    fn name(&self) -> &'static str {
        "calculator"
    }

    fn register(&self, _ctx: &ToolContext, registrar: &mut Registrar<'_>) {
        registrar.register(Arc::new(BinaryTool {
            name: "add",
            description: "Add two numbers",
            symbol: "+",
            apply: |a, b| a + b,
        }));
        registrar.register(Arc::new(BinaryTool {
            name: "multiply",
            description: "Multiply two numbers",
            symbol: "×",
            apply: |a, b| a * b,
        }));
        registrar.register(Arc::new(CalculateTool));
    }
}

/// A two-operand arithmetic tool.
struct BinaryTool {
    name: &'static str,
    description: &'static str,
    symbol: &'static str,
    apply: fn(f64, f64) -> f64,
}

#[async_trait]
impl ToolHandler for BinaryTool {
    fn name(&self) -> &str {
        self.name
    }

    fn description(&self) -> &str {
        self.description
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object()
            .required("a", "number", "First number")
            .required("b", "number", "Second number")
    }

    async fn handle(&self, _name: &str, arguments: &Arguments) -> Result<Vec<ContentItem>, ToolError> {
        let a = arguments.require_f64("a")?;
        let b = arguments.require_f64("b")?;
        let result = (self.apply)(a, b);
        Ok(vec![ContentItem::text(format!(
            "{} {} {} = {}",
            format_number(a),
            self.symbol,
            format_number(b),
            format_number(result)
        ))])
    }
}

/// Evaluates an arithmetic expression.
struct CalculateTool;

#[async_trait]
impl ToolHandler for CalculateTool {
    fn name(&self) -> &'static str {
        "calculate"
    }

    fn description(&self) -> &'static str {
        "Evaluate an arithmetic expression. Supports +, -, *, /, ** or ^ (power) and parentheses"
    }

    fn input_schema(&self) -> InputSchema {
        InputSchema::object().required(
            "expression",
            "string",
            "Expression to evaluate, e.g. '2 + 3 * 4'",
        )
    }

    async fn handle(&self, _name: &str, arguments: &Arguments) -> Result<Vec<ContentItem>, ToolError> {
        let expression = arguments.require_str("expression")?;
        if expression.len() > MAX_EXPRESSION_LEN {
            return Err(ToolError::invalid(
                "expression",
                format!("longer than {MAX_EXPRESSION_LEN} characters"),
            ));
        }
        if !expression.chars().all(is_expression_char) {
            return Err(ToolError::invalid(
                "expression",
                "only digits, + - * / ** ^, parentheses and '.' are allowed",
            ));
        }

        let value = evaluate(expression).map_err(|e| ToolError::Failed(e.to_string()))?;
        Ok(vec![ContentItem::text(format!(
            "{expression} = {}",
            format_number(value)
        ))])
    }
}

/// Longest expression `calculate` accepts.
const MAX_EXPRESSION_LEN: usize = 4096;

/// Deepest nesting of parentheses, signs and powers the parser follows.
const MAX_DEPTH: usize = 256;

/// Characters an expression may contain.
fn is_expression_char(c: char) -> bool {
    c.is_ascii_digit() || c.is_whitespace() || "+-*/().^".contains(c)
}

/// Why an expression could not be evaluated.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum ExpressionError {
    /// The expression is not well formed.
    #[error("syntax error: {0}")]
    Syntax(String),

    /// A division had a zero divisor.
    #[error("division by zero")]
    DivisionByZero,

    /// The result overflowed or is undefined.
    #[error("result is not a finite number")]
    NotFinite,
}

/// Evaluates `+ - * / ** ^` and parentheses over decimal numbers.
///
/// `**` and `^` are right-associative and bind tighter than a unary minus on
/// their left, so `-2 ** 2` is `-4` and `2 ** 3 ** 2` is `512`.
///
/// # Errors
///
/// Returns an [`ExpressionError`] for malformed input, zero divisors and
/// non-finite results. Nesting deeper than 256 levels is a syntax error.
pub fn evaluate(expression: &str) -> Result<f64, ExpressionError> {
    let mut parser = Parser {
        chars: expression.chars().peekable(),
        depth: 0,
    };
    let value = parser.expr()?;
    parser.skip_whitespace();
    if let Some(c) = parser.chars.peek() {
        return Err(ExpressionError::Syntax(format!("unexpected '{c}'")));
    }
    if value.is_finite() {
        Ok(value)
    } else {
        Err(ExpressionError::NotFinite)
    }
}

struct Parser<'a> {
    chars: Peekable<Chars<'a>>,
    depth: usize,
}

impl Parser<'_> {
    fn skip_whitespace(&mut self) {
        while self.chars.next_if(|c| c.is_whitespace()).is_some() {}
    }

    fn peek(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars.peek().copied()
    }

    fn expr(&mut self) -> Result<f64, ExpressionError> {
        let mut value = self.term()?;
        while let Some(op @ ('+' | '-')) = self.peek() {
            self.chars.next();
            let rhs = self.term()?;
            value = if op == '+' { value + rhs } else { value - rhs };
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64, ExpressionError> {
        let mut value = self.unary()?;
        loop {
            match self.peek() {
                Some('*') if !self.at_power() => {
                    self.chars.next();
                    value *= self.unary()?;
                }
                Some('/') => {
                    self.chars.next();
                    let divisor = self.unary()?;
                    if divisor == 0.0 {
                        return Err(ExpressionError::DivisionByZero);
                    }
                    value /= divisor;
                }
                _ => return Ok(value),
            }
        }
    }

    // Every recursive path passes through here.
    fn unary(&mut self) -> Result<f64, ExpressionError> {
        if self.depth == MAX_DEPTH {
            return Err(ExpressionError::Syntax("expression nested too deeply".to_string()));
        }
        self.depth += 1;
        let value = self.signed();
        self.depth -= 1;
        value
    }

    fn signed(&mut self) -> Result<f64, ExpressionError> {
        match self.peek() {
            Some('-') => {
                self.chars.next();
                Ok(-self.unary()?)
            }
            Some('+') => {
                self.chars.next();
                self.unary()
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<f64, ExpressionError> {
        let base = self.primary()?;
        match self.peek() {
            Some('^') => {
                self.chars.next();
                Ok(base.powf(self.unary()?))
            }
            Some('*') if self.at_power() => {
                self.chars.next();
                self.chars.next();
                Ok(base.powf(self.unary()?))
            }
            _ => Ok(base),
        }
    }

    /// Whether the next two characters are `**`.
    fn at_power(&self) -> bool {
        let mut ahead = self.chars.clone();
        ahead.next() == Some('*') && ahead.next() == Some('*')
    }

    fn primary(&mut self) -> Result<f64, ExpressionError> {
        match self.peek() {
            Some('(') => {
                self.chars.next();
                let value = self.expr()?;
                if self.peek() == Some(')') {
                    self.chars.next();
                    Ok(value)
                } else {
                    Err(ExpressionError::Syntax("missing ')'".to_string()))
                }
            }
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(),
            Some(c) => Err(ExpressionError::Syntax(format!("unexpected '{c}'"))),
            None => Err(ExpressionError::Syntax("unexpected end of expression".to_string())),
        }
    }

    fn number(&mut self) -> Result<f64, ExpressionError> {
        let mut literal = String::new();
        while let Some(c) = self.chars.next_if(|c| c.is_ascii_digit() || *c == '.') {
            literal.push(c);
        }
        literal
            .parse()
            .map_err(|_| ExpressionError::Syntax(format!("invalid number '{literal}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn approx(expression: &str, expected: f64) {
        let value = evaluate(expression).unwrap();
        assert!(
            (value - expected).abs() < 1e-9,
            "{expression} = {value}, expected {expected}"
        );
    }

    #[test]
    fn precedence_and_grouping() {
        approx("2 + 3 * 4", 14.0);
        approx("(2 + 3) * 4", 20.0);
        approx("10 - 4 - 3", 3.0);
        approx("7 / 2", 3.5);
        approx("1.5 * 2", 3.0);
    }

    #[test]
    fn power_is_right_associative_and_binds_tighter_than_negation() {
        approx("2 ** 3 ** 2", 512.0);
        approx("2 ^ 3", 8.0);
        approx("-2 ** 2", -4.0);
        approx("2 ** -1", 0.5);
        approx("(-2) ** 2", 4.0);
    }

    #[test]
    fn malformed_expressions() {
        assert_eq!(evaluate("1 / 0"), Err(ExpressionError::DivisionByZero));
        assert!(matches!(evaluate("2 +"), Err(ExpressionError::Syntax(_))));
        assert!(matches!(evaluate("(1 + 2"), Err(ExpressionError::Syntax(_))));
        assert!(matches!(evaluate("1..2"), Err(ExpressionError::Syntax(_))));
        assert!(matches!(evaluate("2 3"), Err(ExpressionError::Syntax(_))));
        assert_eq!(evaluate("10 ** 400"), Err(ExpressionError::NotFinite));
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let too_deep = ExpressionError::Syntax("expression nested too deeply".to_string());
        let parens = format!("{}1{}", "(".repeat(200_000), ")".repeat(200_000));
        assert_eq!(evaluate(&parens), Err(too_deep.clone()));
        assert_eq!(evaluate(&"-".repeat(200_000)), Err(too_deep.clone()));
        assert_eq!(evaluate(&"2 ** ".repeat(1_000)), Err(too_deep));

        let shallow = format!("{}1{}", "(".repeat(100), ")".repeat(100));
        approx(&shallow, 1.0);
        approx("--1", 1.0);
    }

    #[tokio::test]
    async fn add_renders_integral_results() {
        let tool = BinaryTool {
            name: "add",
            description: "",
            symbol: "+",
            apply: |a, b| a + b,
        };
        let out = tool
            .handle("add", &Arguments::from(json!({"a": 2, "b": 3})))
            .await
            .unwrap();
        assert_eq!(out, vec![ContentItem::text("2 + 3 = 5")]);

        let out = tool
            .handle("add", &Arguments::from(json!({"a": 0.5, "b": "1.25"})))
            .await
            .unwrap();
        assert_eq!(out, vec![ContentItem::text("0.5 + 1.25 = 1.75")]);
    }

    #[tokio::test]
    async fn calculate_rejects_disallowed_characters() {
        let err = CalculateTool
            .handle("calculate", &Arguments::from(json!({"expression": "__import__('os')"})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { .. }));

        let out = CalculateTool
            .handle("calculate", &Arguments::from(json!({"expression": "2 + 3 * 4"})))
            .await
            .unwrap();
        assert_eq!(out, vec![ContentItem::text("2 + 3 * 4 = 14")]);

        let long = "1+".repeat(MAX_EXPRESSION_LEN) + "1";
        let err = CalculateTool
            .handle("calculate", &Arguments::from(json!({"expression": long})))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArgument { .. }));
    }
}
