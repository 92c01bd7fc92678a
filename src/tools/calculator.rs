//! Calculator 工具：单行算术表达式求值
//!
//! 仅允许数字与 `+ - * / // ** ( )`；整数运算保持整数，`/` 总是得到浮点（"100 / 5" -> "20.0"）。

use async_trait::async_trait;
use serde_json::Value;

use crate::conversation::RunContext;
use crate::tools::{ArgSpec, Tool, ToolArgs, ToolSchema};

const ALLOWED: &str = "0123456789+-*/.() ";
/// 括号、一元符号与 `**` 右侧的最大嵌套层数
const MAX_DEPTH: usize = 100;

const DOC: &str = "Evaluates a single line of arithmetic. No variables or functions allowed.

Args:
    expression (str): An expression using only numbers and +, -, *, /, //, ** and parentheses.

Examples:
    {\"name\": \"calculator\", \"args\": {\"expression\": \"2 + 2\"}} -> 4
    {\"name\": \"calculator\", \"args\": {\"expression\": \"3 * (17 + 4)\"}} -> 63
    {\"name\": \"calculator\", \"args\": {\"expression\": \"100 / 5\"}} -> 20.0";

pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema::from_doc("calculator", DOC, vec![ArgSpec::new("expression", "str")])
    }

    async fn execute(&self, args: ToolArgs, _ctx: RunContext<'_>) -> Result<String, String> {
        let expression = match args.get("expression") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Number(n)) => n.to_string(),
            _ => return Err("expression must be a string".to_string()),
        };
        evaluate(&expression).map(|n| n.to_string())
    }
}

/// 求值结果：整数或浮点
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Int(i64),
    Float(f64),
}

impl Number {
    fn as_f64(self) -> f64 {
        match self {
            Number::Int(i) => i as f64,
            Number::Float(f) => f,
        }
    }
}

impl std::fmt::Display for Number {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            Number::Int(i) => write!(f, "{i}"),
            Number::Float(x) if x.is_nan() => write!(f, "nan"),
            Number::Float(x) if x.is_infinite() => {
                write!(f, "{}", if x > 0.0 { "inf" } else { "-inf" })
            }
            Number::Float(x) if x.fract() == 0.0 && x.abs() < 1e16 => write!(f, "{x:.1}"),
            Number::Float(x) => write!(f, "{x}"),
        }
    }
}

pub fn evaluate(expression: &str) -> Result<Number, String> {
    if !expression.chars().all(|c| ALLOWED.contains(c)) {
        return Err("Invalid characters in expression".to_string());
    }
    let tokens = tokenize(expression)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        return Err("invalid syntax".to_string());
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(Number),
    Plus,
    Minus,
    Star,
    Slash,
    FloorDiv,
    Pow,
    LParen,
    RParen,
}

fn tokenize(s: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = s.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' => i += 1,
            '0'..='9' | '.' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                    i += 1;
                }
                let lit: String = chars[start..i].iter().collect();
                let num = if lit.contains('.') {
                    lit.parse::<f64>()
                        .map(Number::Float)
                        .map_err(|_| "invalid syntax".to_string())?
                } else {
                    lit.parse::<i64>()
                        .map(Number::Int)
                        .map_err(|_| "integer literal too large".to_string())?
                };
                tokens.push(Token::Num(num));
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::FloorDiv);
                i += 2;
            }
            '+' | '-' | '*' | '/' | '(' | ')' => {
                tokens.push(match c {
                    '+' => Token::Plus,
                    '-' => Token::Minus,
                    '*' => Token::Star,
                    '/' => Token::Slash,
                    '(' => Token::LParen,
                    _ => Token::RParen,
                });
                i += 1;
            }
            _ => return Err("Invalid characters in expression".to_string()),
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        t
    }

    fn nested<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T, String>) -> Result<T, String> {
        if self.depth >= MAX_DEPTH {
            return Err("expression too deeply nested".to_string());
        }
        self.depth += 1;
        let out = f(self);
        self.depth -= 1;
        out
    }

    fn expr(&mut self) -> Result<Number, String> {
        let mut acc = self.term()?;
        while let Some(op) = self.peek() {
            let op = op.clone();
            if !matches!(op, Token::Plus | Token::Minus) {
                break;
            }
            self.pos += 1;
            let rhs = self.term()?;
            acc = arith(&op, acc, rhs)?;
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<Number, String> {
        let mut acc = self.factor()?;
        while let Some(op) = self.peek() {
            let op = op.clone();
            if !matches!(op, Token::Star | Token::Slash | Token::FloorDiv) {
                break;
            }
            self.pos += 1;
            let rhs = self.factor()?;
            acc = arith(&op, acc, rhs)?;
        }
        Ok(acc)
    }

    fn factor(&mut self) -> Result<Number, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                match self.nested(Self::factor)? {
                    Number::Int(i) => i
                        .checked_neg()
                        .map(Number::Int)
                        .ok_or_else(|| "integer overflow".to_string()),
                    Number::Float(f) => Ok(Number::Float(-f)),
                }
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.nested(Self::factor)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Number, String> {
        let base = self.atom()?;
        if self.peek() == Some(&Token::Pow) {
            self.pos += 1;
            let exp = self.nested(Self::factor)?;
            return arith(&Token::Pow, base, exp);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Number, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let v = self.nested(Self::expr)?;
                match self.next() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err("invalid syntax".to_string()),
                }
            }
            _ => Err("invalid syntax".to_string()),
        }
    }
}

fn arith(op: &Token, a: Number, b: Number) -> Result<Number, String> {
    let overflow = || "integer overflow".to_string();
    let zero = || "division by zero".to_string();
    match (op, a, b) {
        (Token::Plus, Number::Int(x), Number::Int(y)) => {
            x.checked_add(y).map(Number::Int).ok_or_else(overflow)
        }
        (Token::Minus, Number::Int(x), Number::Int(y)) => {
            x.checked_sub(y).map(Number::Int).ok_or_else(overflow)
        }
        (Token::Star, Number::Int(x), Number::Int(y)) => {
            x.checked_mul(y).map(Number::Int).ok_or_else(overflow)
        }
        (Token::FloorDiv, Number::Int(_), Number::Int(0)) => Err(zero()),
        (Token::FloorDiv, Number::Int(x), Number::Int(y)) => {
            let q = x.checked_div(y).ok_or_else(overflow)?;
            let floor = if x % y != 0 && ((x < 0) != (y < 0)) { q - 1 } else { q };
            Ok(Number::Int(floor))
        }
        (Token::Pow, Number::Int(x), Number::Int(y)) if y >= 0 => u32::try_from(y)
            .ok()
            .and_then(|e| x.checked_pow(e))
            .map(Number::Int)
            .ok_or_else(overflow),
        (Token::Slash | Token::FloorDiv, _, b) if b.as_f64() == 0.0 => Err(zero()),
        (Token::Plus, a, b) => Ok(Number::Float(a.as_f64() + b.as_f64())),
        (Token::Minus, a, b) => Ok(Number::Float(a.as_f64() - b.as_f64())),
        (Token::Star, a, b) => Ok(Number::Float(a.as_f64() * b.as_f64())),
        (Token::Slash, a, b) => Ok(Number::Float(a.as_f64() / b.as_f64())),
        (Token::FloorDiv, a, b) => Ok(Number::Float((a.as_f64() / b.as_f64()).floor())),
        (Token::Pow, a, b) => Ok(Number::Float(a.as_f64().powf(b.as_f64()))),
        _ => Err("invalid syntax".to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(s: &str) -> String {
        match evaluate(s) {
            Ok(n) => n.to_string(),
            Err(e) => format!("Error: {e}"),
        }
    }

    #[test]
    fn test_python_like_results() {
        assert_eq!(eval("2 + 2"), "4");
        assert_eq!(eval("3 * (17 + 4)"), "63");
        assert_eq!(eval("100 / 5"), "20.0");
        assert_eq!(eval("2 ** 10"), "1024");
        assert_eq!(eval("-2 ** 2"), "-4");
        assert_eq!(eval("7 // 2"), "3");
        assert_eq!(eval("-7 // 2"), "-4");
        assert_eq!(eval("1.5 * 2"), "3.0");
        assert_eq!(eval("0.1 + 0.2"), "0.30000000000000004");
    }

    #[test]
    fn test_errors() {
        assert_eq!(eval("import os"), "Error: Invalid characters in expression");
        assert_eq!(eval("1 / 0"), "Error: division by zero");
        assert_eq!(eval("(1 + 2"), "Error: invalid syntax");
        assert_eq!(eval("1 +"), "Error: invalid syntax");
    }

    #[test]
    fn test_nesting_limit() {
        assert_eq!(eval(&format!("{}1{}", "(".repeat(50), ")".repeat(50))), "1");
        assert_eq!(eval(&format!("{}1", "-".repeat(50))), "1");

        let too_deep = "Error: expression too deeply nested";
        assert_eq!(eval(&format!("{}1{}", "(".repeat(1500), ")".repeat(1500))), too_deep);
        assert_eq!(eval(&format!("{}1", "-".repeat(3000))), too_deep);
        assert_eq!(eval(&format!("{}1", "+".repeat(3000))), too_deep);
        assert_eq!(eval(&format!("{}1", "2 ** ".repeat(1500))), too_deep);
    }

    #[test]
    fn test_deep_input_does_not_overflow_small_stack() {
        // tokio worker 默认 2 MiB 栈
        let handle = std::thread::Builder::new()
            .stack_size(2 * 1024 * 1024)
            .spawn(|| eval(&format!("{}1{}", "(".repeat(8000), ")".repeat(8000))))
            .unwrap();
        assert_eq!(handle.join().unwrap(), "Error: expression too deeply nested");
    }
}
