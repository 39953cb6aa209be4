//! Arithmetic evaluation tool

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;

use super::{ToolContext, ToolHandler, json_schema};

/// Evaluates arithmetic expressions: `+ - * / % ^`, parentheses, unary minus
pub struct CalculateTool;

#[async_trait]
impl ToolHandler for CalculateTool {
    fn name(&self) -> &str {
        "math.calculate"
    }

    fn description(&self) -> &str {
        "Evaluate an arithmetic expression such as '(2 + 3) * 4 ^ 2'."
    }

    fn input_schema(&self) -> Value {
        json_schema(
            serde_json::json!({
                "expression": {
                    "type": "string",
                    "description": "Arithmetic expression to evaluate"
                }
            }),
            vec!["expression"],
        )
    }

    async fn execute(&self, input: Value, _ctx: &ToolContext) -> Result<String> {
        let expression = input
            .get("expression")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("Missing 'expression' parameter"))?;
        let value = evaluate(expression)?;
        Ok(format_number(value))
    }
}

fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

/// Evaluate an arithmetic expression
pub fn evaluate(expression: &str) -> Result<f64> {
    let mut parser = Parser {
        chars: expression.chars().filter(|c| !c.is_whitespace()).collect(),
        pos: 0,
    };
    let value = parser.expr()?;
    if parser.pos < parser.chars.len() {
        return Err(anyhow!(
            "Unexpected '{}' at position {}",
            parser.chars[parser.pos],
            parser.pos
        ));
    }
    if !value.is_finite() {
        return Err(anyhow!("Result is not a finite number"));
    }
    Ok(value)
}

struct Parser {
    chars: Vec<char>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn expr(&mut self) -> Result<f64> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                '+' => {
                    self.pos += 1;
                    value += self.term()?;
                }
                '-' => {
                    self.pos += 1;
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> Result<f64> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek() {
            match op {
                '*' => {
                    self.pos += 1;
                    value *= self.unary()?;
                }
                '/' | '%' => {
                    self.pos += 1;
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        return Err(anyhow!("Division by zero"));
                    }
                    value = if op == '/' { value / rhs } else { value % rhs };
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn unary(&mut self) -> Result<f64> {
        match self.peek() {
            Some('-') => {
                self.pos += 1;
                Ok(-self.unary()?)
            }
            Some('+') => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    // right-associative, binds tighter than unary minus
    fn power(&mut self) -> Result<f64> {
        let base = self.primary()?;
        if self.peek() == Some('^') {
            self.pos += 1;
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<f64> {
        match self.peek() {
            Some('(') => {
                self.pos += 1;
                let value = self.expr()?;
                if self.peek() != Some(')') {
                    return Err(anyhow!("Missing closing parenthesis"));
                }
                self.pos += 1;
                Ok(value)
            }
            Some(c) if c.is_ascii_digit() || c == '.' => {
                let start = self.pos;
                while matches!(self.peek(), Some(c) if c.is_ascii_digit() || c == '.') {
                    self.pos += 1;
                }
                let literal: String = self.chars[start..self.pos].iter().collect();
                literal
                    .parse::<f64>()
                    .map_err(|_| anyhow!("Invalid number '{}'", literal))
            }
            Some(c) => Err(anyhow!("Unexpected '{}' at position {}", c, self.pos)),
            None => Err(anyhow!("Unexpected end of expression")),
        }
    }
}
