//! 四则运算工具
//!
//! 先按白名单（数字、`+-*/.()` 与空格）拒绝，再用递归下降求值，从不对未校验的输入求值。
//! 数值语义：整数运算保持整数；`/` 结果总是浮点；`//` 向下取整除；`**` 乘方。

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::Deserialize;
use serde_json::Value;

use crate::tools::{parameters_for, Tool};

const ALLOWED: &str = "0123456789+-*/.() ";

#[derive(Debug, Deserialize, JsonSchema)]
struct CalculatorArgs {
    /// A mathematical expression like '2 + 3 * 4'
    expression: String,
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    fn render(self) -> String {
        match self {
            Num::Int(i) => i.to_string(),
            Num::Float(f) if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 => {
                format!("{f:.1}")
            }
            Num::Float(f) => f.to_string(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
enum Token {
    Num(Num),
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Pow,
    LParen,
    RParen,
}

fn tokenize(expr: &str) -> Result<Vec<Token>, String> {
    let chars: Vec<char> = expr.chars().collect();
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
                let text: String = chars[start..i].iter().collect();
                tokens.push(Token::Num(parse_number(&text)?));
            }
            '+' => {
                tokens.push(Token::Plus);
                i += 1;
            }
            '-' => {
                tokens.push(Token::Minus);
                i += 1;
            }
            '*' if chars.get(i + 1) == Some(&'*') => {
                tokens.push(Token::Pow);
                i += 2;
            }
            '*' => {
                tokens.push(Token::Star);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                tokens.push(Token::DoubleSlash);
                i += 2;
            }
            '/' => {
                tokens.push(Token::Slash);
                i += 1;
            }
            '(' => {
                tokens.push(Token::LParen);
                i += 1;
            }
            ')' => {
                tokens.push(Token::RParen);
                i += 1;
            }
            other => return Err(format!("unexpected character '{other}'")),
        }
    }
    Ok(tokens)
}

fn parse_number(text: &str) -> Result<Num, String> {
    if text == "." || text.matches('.').count() > 1 {
        return Err(format!("invalid number '{text}'"));
    }
    if text.contains('.') {
        text.parse::<f64>()
            .map(Num::Float)
            .map_err(|_| format!("invalid number '{text}'"))
    } else {
        text.parse::<i64>()
            .map(Num::Int)
            .map_err(|_| format!("integer literal too large '{text}'"))
    }
}

/// 递归下降：expr → term → unary → power → atom
struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<Token> {
        self.tokens.get(self.pos).copied()
    }

    fn next(&mut self) -> Option<Token> {
        let t = self.peek();
        self.pos += 1;
        t
    }

    fn expr(&mut self) -> Result<Num, String> {
        let mut acc = self.term()?;
        while let Some(op @ (Token::Plus | Token::Minus)) = self.peek() {
            self.pos += 1;
            let rhs = self.term()?;
            acc = arith(op, acc, rhs)?;
        }
        Ok(acc)
    }

    fn term(&mut self) -> Result<Num, String> {
        let mut acc = self.unary()?;
        while let Some(op @ (Token::Star | Token::Slash | Token::DoubleSlash)) = self.peek() {
            self.pos += 1;
            let rhs = self.unary()?;
            acc = arith(op, acc, rhs)?;
        }
        Ok(acc)
    }

    fn unary(&mut self) -> Result<Num, String> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                match self.unary()? {
                    Num::Int(i) => i.checked_neg().map(Num::Int).ok_or_else(overflow),
                    Num::Float(f) => Ok(Num::Float(-f)),
                }
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.unary()
            }
            _ => self.power(),
        }
    }

    /// `**` 右结合，且比左侧一元负号绑定更紧：-2**2 == -4
    fn power(&mut self) -> Result<Num, String> {
        let base = self.atom()?;
        if self.peek() == Some(Token::Pow) {
            self.pos += 1;
            let exp = self.unary()?;
            return pow(base, exp);
        }
        Ok(base)
    }

    fn atom(&mut self) -> Result<Num, String> {
        match self.next() {
            Some(Token::Num(n)) => Ok(n),
            Some(Token::LParen) => {
                let v = self.expr()?;
                match self.next() {
                    Some(Token::RParen) => Ok(v),
                    _ => Err("unbalanced parentheses".to_string()),
                }
            }
            Some(t) => Err(format!("unexpected token {t:?}")),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

fn overflow() -> String {
    "integer overflow".to_string()
}

fn arith(op: Token, a: Num, b: Num) -> Result<Num, String> {
    match (op, a, b) {
        (Token::Slash, _, _) => {
            let d = b.as_f64();
            if d == 0.0 {
                return Err("division by zero".to_string());
            }
            Ok(Num::Float(a.as_f64() / d))
        }
        (Token::DoubleSlash, Num::Int(x), Num::Int(y)) => {
            if y == 0 {
                return Err("integer division by zero".to_string());
            }
            let q = x.checked_div(y).ok_or_else(overflow)?;
            let q = if (x % y != 0) && ((x < 0) != (y < 0)) { q - 1 } else { q };
            Ok(Num::Int(q))
        }
        (Token::DoubleSlash, _, _) => {
            let d = b.as_f64();
            if d == 0.0 {
                return Err("float floor division by zero".to_string());
            }
            Ok(Num::Float((a.as_f64() / d).floor()))
        }
        (Token::Plus, Num::Int(x), Num::Int(y)) => x.checked_add(y).map(Num::Int).ok_or_else(overflow),
        (Token::Minus, Num::Int(x), Num::Int(y)) => x.checked_sub(y).map(Num::Int).ok_or_else(overflow),
        (Token::Star, Num::Int(x), Num::Int(y)) => x.checked_mul(y).map(Num::Int).ok_or_else(overflow),
        (Token::Plus, _, _) => Ok(Num::Float(a.as_f64() + b.as_f64())),
        (Token::Minus, _, _) => Ok(Num::Float(a.as_f64() - b.as_f64())),
        (Token::Star, _, _) => Ok(Num::Float(a.as_f64() * b.as_f64())),
        (op, _, _) => Err(format!("unsupported operator {op:?}")),
    }
}

fn pow(base: Num, exp: Num) -> Result<Num, String> {
    match (base, exp) {
        (Num::Int(b), Num::Int(e)) if e >= 0 => {
            let e = u32::try_from(e).map_err(|_| overflow())?;
            b.checked_pow(e).map(Num::Int).ok_or_else(overflow)
        }
        _ => {
            let (b, e) = (base.as_f64(), exp.as_f64());
            if b == 0.0 && e < 0.0 {
                return Err("0.0 cannot be raised to a negative power".to_string());
            }
            let v = b.powf(e);
            if v.is_nan() {
                return Err("result is not a real number".to_string());
            }
            Ok(Num::Float(v))
        }
    }
}

/// 对表达式求值；任何失败都返回可直接展示给模型的错误文本
pub fn evaluate(expression: &str) -> Result<String, String> {
    if !expression.chars().all(|c| ALLOWED.contains(c)) {
        return Err(
            "Error: Invalid characters in expression. Only basic arithmetic is supported."
                .to_string(),
        );
    }
    let tokens =
        tokenize(expression).map_err(|e| format!("Error evaluating expression: {e}"))?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser
        .expr()
        .and_then(|v| match parser.peek() {
            None => Ok(v),
            Some(t) => Err(format!("unexpected token {t:?}")),
        })
        .map_err(|e| format!("Error evaluating expression: {e}"))?;
    Ok(value.render())
}

/// calculator 工具
pub struct CalculatorTool;

#[async_trait]
impl Tool for CalculatorTool {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Evaluate a mathematical expression. Only supports basic arithmetic."
    }

    fn parameters_schema(&self) -> Value {
        parameters_for::<CalculatorArgs>()
    }

    async fn execute(&self, args: Value) -> Result<String, String> {
        let args: CalculatorArgs = serde_json::from_value(args)
            .map_err(|e| format!("Error: invalid arguments for calculator: {e}"))?;
        evaluate(&args.expression)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_precedence() {
        assert_eq!(evaluate("2 + 3 * 4").unwrap(), "14");
        assert_eq!(evaluate("15*37").unwrap(), "555");
        assert_eq!(evaluate("(2 + 3) * 4").unwrap(), "20");
        assert_eq!(evaluate("-2**2").unwrap(), "-4");
        assert_eq!(evaluate("2**3**2").unwrap(), "512");
    }

    #[test]
    fn test_division_semantics() {
        assert_eq!(evaluate("10 / 4").unwrap(), "2.5");
        assert_eq!(evaluate("10 / 2").unwrap(), "5.0");
        assert_eq!(evaluate("7 // 2").unwrap(), "3");
        assert_eq!(evaluate("-7 // 2").unwrap(), "-4");
        assert_eq!(evaluate("7.0 // 2").unwrap(), "3.0");
        assert_eq!(evaluate("2 ** -1").unwrap(), "0.5");
        assert_eq!(evaluate("0.1 + 0.2").unwrap(), "0.30000000000000004");
    }

    #[test]
    fn test_rejects_before_evaluating() {
        let err = evaluate("__import__('os')").unwrap_err();
        assert!(err.starts_with("Error: Invalid characters"));
        assert!(evaluate("5 % 2").is_err());
        assert!(evaluate("1e5").is_err());
    }

    #[test]
    fn test_errors_are_text() {
        assert!(evaluate("10 / 0").unwrap_err().contains("division by zero"));
        assert!(evaluate("10 // 0").unwrap_err().contains("division by zero"));
        assert!(evaluate("(1 + 2").unwrap_err().starts_with("Error evaluating expression"));
        assert!(evaluate("1 2").is_err());
        assert!(evaluate("").is_err());
        assert!(evaluate("1..2").is_err());
        assert!(evaluate("9223372036854775807 + 1").unwrap_err().contains("overflow"));
    }

    #[tokio::test]
    async fn test_tool_execute() {
        let tool = CalculatorTool;
        assert_eq!(tool.execute(json!({"expression": "6*7"})).await.unwrap(), "42");
        assert!(tool.execute(json!({})).await.is_err());
        assert_eq!(tool.parameters_schema()["required"], json!(["expression"]));
    }
}
