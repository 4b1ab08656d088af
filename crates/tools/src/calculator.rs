//! Calculator tool — evaluates arithmetic expressions.
//!
//! Supports `+`, `-`, `*`, `/`, parentheses, unary negation, and decimal
//! numbers. A small precedence-climbing evaluator over the raw character
//! stream; no dependencies beyond std.

use async_trait::async_trait;
use threadloom_core::error::ToolError;
use threadloom_core::tool::{Tool, ToolResponse};

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression. Supports +, -, *, /, parentheses, and decimal numbers."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "expression": {
                    "type": "string",
                    "description": "The expression to evaluate, e.g. '(2 + 3) * 4'"
                }
            },
            "required": ["expression"]
        })
    }

    async fn handle(&self, arguments: serde_json::Value) -> Result<ToolResponse, ToolError> {
        let expr = arguments
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'expression' argument".into()))?;

        let value = evaluate(expr).map_err(|reason| ToolError::ExecutionFailed {
            tool_name: "calculator".into(),
            reason,
        })?;

        // Integers render without a trailing .0
        let formatted = if value.fract() == 0.0 && value.abs() < 1e15 {
            format!("{}", value as i64)
        } else {
            format!("{value}")
        };
        Ok(ToolResponse::ok(formatted).with_payload(serde_json::json!({ "result": value })))
    }
}

/// Evaluate an arithmetic expression string.
pub fn evaluate(expr: &str) -> Result<f64, String> {
    let mut eval = Evaluator {
        chars: expr.chars().collect(),
        pos: 0,
    };
    let value = eval.expression(0)?;
    eval.skip_whitespace();
    if eval.pos < eval.chars.len() {
        return Err(format!(
            "Unexpected character '{}' at position {}",
            eval.chars[eval.pos], eval.pos
        ));
    }
    Ok(value)
}

/// Precedence-climbing evaluator directly over the character stream.
struct Evaluator {
    chars: Vec<char>,
    pos: usize,
}

impl Evaluator {
    fn skip_whitespace(&mut self) {
        while self.pos < self.chars.len() && self.chars[self.pos].is_whitespace() {
            self.pos += 1;
        }
    }

    fn peek_op(&mut self) -> Option<char> {
        self.skip_whitespace();
        self.chars
            .get(self.pos)
            .copied()
            .filter(|c| matches!(c, '+' | '-' | '*' | '/'))
    }

    fn precedence(op: char) -> u8 {
        match op {
            '+' | '-' => 1,
            _ => 2,
        }
    }

    fn expression(&mut self, min_prec: u8) -> Result<f64, String> {
        let mut left = self.atom()?;
        while let Some(op) = self.peek_op() {
            let prec = Self::precedence(op);
            if prec < min_prec {
                break;
            }
            self.pos += 1;
            let right = self.expression(prec + 1)?;
            left = match op {
                '+' => left + right,
                '-' => left - right,
                '*' => left * right,
                '/' => {
                    if right == 0.0 {
                        return Err("Division by zero".into());
                    }
                    left / right
                }
                _ => unreachable!(),
            };
        }
        Ok(left)
    }

    fn atom(&mut self) -> Result<f64, String> {
        self.skip_whitespace();
        match self.chars.get(self.pos) {
            Some('-') => {
                self.pos += 1;
                Ok(-self.atom()?)
            }
            Some('(') => {
                self.pos += 1;
                let value = self.expression(0)?;
                self.skip_whitespace();
                if self.chars.get(self.pos) != Some(&')') {
                    return Err("Expected closing parenthesis".into());
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || *c == '.' => self.number(),
            Some(c) => Err(format!("Unexpected character: '{c}'")),
            None => Err("Unexpected end of expression".into()),
        }
    }

    fn number(&mut self) -> Result<f64, String> {
        let start = self.pos;
        while self
            .chars
            .get(self.pos)
            .is_some_and(|c| c.is_ascii_digit() || *c == '.')
        {
            self.pos += 1;
        }
        let raw: String = self.chars[start..self.pos].iter().collect();
        raw.parse().map_err(|_| format!("Invalid number: {raw}"))
    }
}
