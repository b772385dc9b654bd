//! Expression parsing and partial evaluation.
//!
//! Recognized text is parsed into an [`Expr`] tree, then [`simplify`]
//! substitutes bound variables and folds constants. Symbols with no binding
//! stay in the tree, so `x + 2 * 3` with no `x` simplifies to `x + 6` instead
//! of failing.
//!
//! Supported syntax:
//!
//! | Form | Examples |
//! |------|----------|
//! | Numbers | `2`, `3.14`, `.5` |
//! | Operators | `+ - * / ^`, `**`, `× ÷ · −` |
//! | Implicit multiplication | `2x`, `3(4 + 1)`, `(a)(b)` |
//! | Functions | `sqrt sin cos tan asin acos atan ln log exp abs`, `√` |
//! | Postfix | `5!`, `x²`, `x³` |
//! | Constants | `pi`, `π`, `e` (shadowed by user bindings) |

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::types::{format_number, MathValue, VariableMapping};

/// Per-item evaluation failures. The engine absorbs these; they never fail a
/// whole request.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("empty expression")]
    Empty,

    #[error("unexpected character '{0}'")]
    UnexpectedChar(char),

    #[error("unexpected token {0}")]
    UnexpectedToken(String),

    #[error("unexpected end of expression")]
    UnexpectedEnd,

    #[error("unbalanced parentheses")]
    UnbalancedParens,

    #[error("division by zero")]
    DivisionByZero,

    #[error("domain error: {0}")]
    Domain(String),

    #[error("result is not finite")]
    NotFinite,

    #[error("cannot solve: {0}")]
    NotSolvable(String),

    #[error("expression nested too deeply")]
    TooDeep,

    #[error("expression longer than {MAX_TOKENS} tokens")]
    TooLong,
}

type EvalResult<T> = std::result::Result<T, EvalError>;

/// Longest token sequence accepted for one expression or binding.
pub const MAX_TOKENS: usize = 256;

/// Deepest bracket, sign, exponent or function nesting the parser follows.
pub const MAX_NESTING: usize = 64;

/// Longest chain of symbolic bindings expanded through one another.
pub const MAX_EXPANSION: usize = 8;

/// Binary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Pow,
}

/// Single-argument functions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Func {
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Ln,
    Log,
    Exp,
    Abs,
}

impl Func {
    fn from_name(name: &str) -> Option<Func> {
        let f = match name {
            "sqrt" => Func::Sqrt,
            "sin" => Func::Sin,
            "cos" => Func::Cos,
            "tan" => Func::Tan,
            "asin" | "arcsin" => Func::Asin,
            "acos" | "arccos" => Func::Acos,
            "atan" | "arctan" => Func::Atan,
            "ln" => Func::Ln,
            "log" => Func::Log,
            "exp" => Func::Exp,
            "abs" => Func::Abs,
            _ => return None,
        };
        Some(f)
    }

    fn name(self) -> &'static str {
        match self {
            Func::Sqrt => "sqrt",
            Func::Sin => "sin",
            Func::Cos => "cos",
            Func::Tan => "tan",
            Func::Asin => "asin",
            Func::Acos => "acos",
            Func::Atan => "atan",
            Func::Ln => "ln",
            Func::Log => "log",
            Func::Exp => "exp",
            Func::Abs => "abs",
        }
    }

    fn apply(self, x: f64) -> EvalResult<f64> {
        let y = match self {
            Func::Sqrt => x.sqrt(),
            Func::Sin => x.sin(),
            Func::Cos => x.cos(),
            Func::Tan => x.tan(),
            Func::Asin => x.asin(),
            Func::Acos => x.acos(),
            Func::Atan => x.atan(),
            Func::Ln => x.ln(),
            Func::Log => x.log10(),
            Func::Exp => x.exp(),
            Func::Abs => x.abs(),
        };
        if y.is_nan() {
            return Err(EvalError::Domain(format!(
                "{}({}) is undefined",
                self.name(),
                format_number(x)
            )));
        }
        if !y.is_finite() {
            return Err(EvalError::NotFinite);
        }
        Ok(y)
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Num(f64),
    /// A free symbol, or opaque text from a symbolic binding that did not parse.
    Sym(String),
    Neg(Box<Expr>),
    Bin(BinOp, Box<Expr>, Box<Expr>),
    Call(Func, Box<Expr>),
    Factorial(Box<Expr>),
}

fn constant(name: &str) -> Option<f64> {
    match name {
        "pi" => Some(std::f64::consts::PI),
        "e" => Some(std::f64::consts::E),
        _ => None,
    }
}

/// Whether `s` is a plain identifier (`x`, `total`, `a_1`).
pub fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_alphanumeric() || c == '_')
}

// --- Tokenizer ---

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
    Bang,
    Root,
}

impl Token {
    fn starts_operand(&self) -> bool {
        matches!(
            self,
            Token::Num(_) | Token::Ident(_) | Token::LParen | Token::Root
        )
    }
}

fn tokenize(text: &str) -> EvalResult<Vec<Token>> {
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < len {
        if tokens.len() > MAX_TOKENS {
            return Err(EvalError::TooLong);
        }
        let c = chars[i];

        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && i + 1 < len && chars[i + 1].is_ascii_digit()) {
            let start = i;
            while i < len && chars[i].is_ascii_digit() {
                i += 1;
            }
            if i < len && chars[i] == '.' {
                i += 1;
                while i < len && chars[i].is_ascii_digit() {
                    i += 1;
                }
            }
            // `1.2.3` is a misread, not `1.2 * .3`.
            if i < len && chars[i] == '.' {
                let end = chars[i..]
                    .iter()
                    .position(|c| !(c.is_ascii_digit() || *c == '.'))
                    .map_or(len, |offset| i + offset);
                return Err(EvalError::UnexpectedToken(chars[start..end].iter().collect()));
            }
            let literal: String = chars[start..i].iter().collect();
            let n = literal
                .trim_end_matches('.')
                .parse::<f64>()
                .map_err(|_| EvalError::UnexpectedToken(literal.clone()))?;
            tokens.push(Token::Num(n));
            continue;
        }

        if c == 'π' {
            tokens.push(Token::Ident("pi".into()));
            i += 1;
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < len && (chars[i].is_alphanumeric() || chars[i] == '_') && chars[i] != 'π' {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let token = match c {
            '+' => Token::Plus,
            '-' | '−' | '–' => Token::Minus,
            '*' if i + 1 < len && chars[i + 1] == '*' => {
                i += 1;
                Token::Caret
            }
            '*' | '×' | '·' | '⋅' => Token::Star,
            '/' | '÷' => Token::Slash,
            '^' => Token::Caret,
            '(' | '[' | '{' => Token::LParen,
            ')' | ']' | '}' => Token::RParen,
            '!' => Token::Bang,
            '√' => Token::Root,
            '²' | '³' => {
                tokens.push(Token::Caret);
                Token::Num(if c == '²' { 2.0 } else { 3.0 })
            }
            other => return Err(EvalError::UnexpectedChar(other)),
        };
        tokens.push(token);
        i += 1;
    }

    if tokens.len() > MAX_TOKENS {
        return Err(EvalError::TooLong);
    }
    Ok(tokens)
}

// --- Parser ---

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
    depth: usize,
}

impl Parser {
    /// Run `rule` one nesting level deeper. Every recursive path of the
    /// grammar goes through here.
    fn nested(&mut self, rule: fn(&mut Self) -> EvalResult<Expr>) -> EvalResult<Expr> {
        if self.depth >= MAX_NESTING {
            return Err(EvalError::TooDeep);
        }
        self.depth += 1;
        let out = rule(self);
        self.depth -= 1;
        out
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let tok = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        tok
    }

    fn expr(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinOp::Add,
                Some(Token::Minus) => BinOp::Sub,
                _ => break,
            };
            self.pos += 1;
            let rhs = self.term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> EvalResult<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => {
                    self.pos += 1;
                    BinOp::Mul
                }
                Some(Token::Slash) => {
                    self.pos += 1;
                    BinOp::Div
                }
                // Implicit multiplication: `2x`, `3(4)`, `(a)(b)`.
                Some(t) if t.starts_operand() => BinOp::Mul,
                _ => break,
            };
            let rhs = self.unary()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> EvalResult<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.pos += 1;
                Ok(Expr::Neg(Box::new(self.nested(Self::unary)?)))
            }
            Some(Token::Plus) => {
                self.pos += 1;
                self.nested(Self::unary)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> EvalResult<Expr> {
        let base = self.postfix()?;
        if let Some(Token::Caret) = self.peek() {
            self.pos += 1;
            // Exponent goes through `unary` so `2^-1` parses and `^` is right-associative.
            let exponent = self.nested(Self::unary)?;
            return Ok(Expr::Bin(BinOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn postfix(&mut self) -> EvalResult<Expr> {
        let mut operand = self.primary()?;
        while let Some(Token::Bang) = self.peek() {
            self.pos += 1;
            operand = Expr::Factorial(Box::new(operand));
        }
        Ok(operand)
    }

    fn primary(&mut self) -> EvalResult<Expr> {
        match self.next() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) => {
                if let Some(func) = Func::from_name(&name) {
                    match self.peek() {
                        Some(Token::LParen) => {
                            let arg = self.nested(Self::primary)?;
                            return Ok(Expr::Call(func, Box::new(arg)));
                        }
                        Some(t) if t.starts_operand() => {
                            let arg = self.nested(Self::power)?;
                            return Ok(Expr::Call(func, Box::new(arg)));
                        }
                        _ => {}
                    }
                }
                Ok(Expr::Sym(name))
            }
            Some(Token::Root) => {
                let arg = self.nested(Self::postfix)?;
                Ok(Expr::Call(Func::Sqrt, Box::new(arg)))
            }
            Some(Token::LParen) => {
                let inner = self.nested(Self::expr)?;
                match self.next() {
                    Some(Token::RParen) => Ok(inner),
                    Some(other) => Err(EvalError::UnexpectedToken(format!("{:?}", other))),
                    None => Err(EvalError::UnbalancedParens),
                }
            }
            Some(Token::RParen) => Err(EvalError::UnbalancedParens),
            Some(other) => Err(EvalError::UnexpectedToken(format!("{:?}", other))),
            None => Err(EvalError::UnexpectedEnd),
        }
    }
}

/// Parse text into an expression tree.
pub fn parse(text: &str) -> EvalResult<Expr> {
    let tokens = tokenize(text)?;
    if tokens.is_empty() {
        return Err(EvalError::Empty);
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        depth: 0,
    };
    let expr = parser.expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some(Token::RParen) => Err(EvalError::UnbalancedParens),
        Some(other) => Err(EvalError::UnexpectedToken(format!("{:?}", other))),
    }
}

// --- Simplification ---

/// Substitute bindings, fold constants, and apply identity rules.
///
/// Symbolic bindings are parsed and resolved against the same mapping, so
/// `b = "a + 1"` with `a = 2` gives `3`. A name is never expanded inside its
/// own expansion: `x = "x + 1"` leaves the inner `x` free. Chains longer than
/// [`MAX_EXPANSION`] fail with [`EvalError::TooDeep`]; binding text that does
/// not parse is kept as opaque text.
pub fn simplify(expr: &Expr, vars: &VariableMapping) -> EvalResult<Expr> {
    Simplifier {
        vars,
        expanding: Vec::new(),
    }
    .run(expr)
}

struct Simplifier<'a> {
    vars: &'a VariableMapping,
    /// Names whose bindings are being expanded, outermost first.
    expanding: Vec<String>,
}

impl Simplifier<'_> {
    fn run(&mut self, expr: &Expr) -> EvalResult<Expr> {
        match expr {
            Expr::Num(n) => Ok(Expr::Num(*n)),
            Expr::Sym(name) => self.symbol(name),
            Expr::Neg(inner) => Ok(negate(self.run(inner)?)),
            Expr::Bin(op, lhs, rhs) => {
                let lhs = self.run(lhs)?;
                let rhs = self.run(rhs)?;
                combine(*op, lhs, rhs)
            }
            Expr::Call(func, arg) => match self.run(arg)? {
                Expr::Num(x) => Ok(Expr::Num(func.apply(x)?)),
                other => Ok(Expr::Call(*func, Box::new(other))),
            },
            Expr::Factorial(inner) => match self.run(inner)? {
                Expr::Num(n) => Ok(Expr::Num(factorial(n)?)),
                other => Ok(Expr::Factorial(Box::new(other))),
            },
        }
    }

    fn symbol(&mut self, name: &str) -> EvalResult<Expr> {
        let free = || constant(name).map(Expr::Num).unwrap_or_else(|| Expr::Sym(name.to_string()));
        match self.vars.get(name) {
            Some(MathValue::Number(n)) => Ok(Expr::Num(*n)),
            Some(MathValue::Symbolic(_)) if self.expanding.iter().any(|n| n == name) => {
                Ok(Expr::Sym(name.to_string()))
            }
            Some(MathValue::Symbolic(text)) => self.expand(name, text),
            None => Ok(free()),
        }
    }

    fn expand(&mut self, name: &str, text: &str) -> EvalResult<Expr> {
        if self.expanding.len() >= MAX_EXPANSION {
            return Err(EvalError::TooDeep);
        }
        let bound = match parse(text) {
            Ok(bound) => bound,
            Err(_) => return Ok(Expr::Sym(text.to_string())),
        };
        self.expanding.push(name.to_string());
        let out = self.run(&bound);
        self.expanding.pop();
        out
    }
}

fn negate(expr: Expr) -> Expr {
    match expr {
        Expr::Num(n) => Expr::Num(-n),
        Expr::Neg(inner) => *inner,
        other => Expr::Neg(Box::new(other)),
    }
}

fn combine(op: BinOp, lhs: Expr, rhs: Expr) -> EvalResult<Expr> {
    if let (Expr::Num(a), Expr::Num(b)) = (&lhs, &rhs) {
        return Ok(Expr::Num(apply_bin(op, *a, *b)?));
    }

    let is = |e: &Expr, v: f64| matches!(e, Expr::Num(n) if *n == v);

    let folded = match op {
        BinOp::Add if is(&lhs, 0.0) => rhs,
        BinOp::Add if is(&rhs, 0.0) => lhs,
        BinOp::Add => match rhs {
            Expr::Num(n) if n < 0.0 => Expr::Bin(BinOp::Sub, Box::new(lhs), Box::new(Expr::Num(-n))),
            Expr::Neg(inner) => Expr::Bin(BinOp::Sub, Box::new(lhs), inner),
            rhs => Expr::Bin(BinOp::Add, Box::new(lhs), Box::new(rhs)),
        },
        BinOp::Sub if is(&rhs, 0.0) => lhs,
        BinOp::Sub if is(&lhs, 0.0) => negate(rhs),
        BinOp::Sub => match rhs {
            Expr::Num(n) if n < 0.0 => Expr::Bin(BinOp::Add, Box::new(lhs), Box::new(Expr::Num(-n))),
            Expr::Neg(inner) => Expr::Bin(BinOp::Add, Box::new(lhs), inner),
            rhs => Expr::Bin(BinOp::Sub, Box::new(lhs), Box::new(rhs)),
        },
        BinOp::Mul if is(&lhs, 0.0) || is(&rhs, 0.0) => Expr::Num(0.0),
        BinOp::Mul if is(&lhs, 1.0) => rhs,
        BinOp::Mul if is(&rhs, 1.0) => lhs,
        BinOp::Div if is(&rhs, 0.0) => return Err(EvalError::DivisionByZero),
        BinOp::Div if is(&rhs, 1.0) => lhs,
        BinOp::Pow if is(&rhs, 0.0) => Expr::Num(1.0),
        BinOp::Pow if is(&rhs, 1.0) => lhs,
        op => Expr::Bin(op, Box::new(lhs), Box::new(rhs)),
    };
    Ok(folded)
}

fn apply_bin(op: BinOp, a: f64, b: f64) -> EvalResult<f64> {
    let y = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return Err(EvalError::DivisionByZero);
            }
            a / b
        }
        BinOp::Pow => a.powf(b),
    };
    if y.is_nan() {
        return Err(EvalError::Domain(format!(
            "{}^{} is undefined",
            format_number(a),
            format_number(b)
        )));
    }
    if !y.is_finite() {
        return Err(EvalError::NotFinite);
    }
    Ok(y)
}

fn factorial(n: f64) -> EvalResult<f64> {
    if n < 0.0 || n.fract() != 0.0 {
        return Err(EvalError::Domain(format!(
            "factorial of {} is undefined",
            format_number(n)
        )));
    }
    if n > 170.0 {
        return Err(EvalError::NotFinite);
    }
    Ok((1..=n as u64).fold(1.0, |acc, k| acc * k as f64))
}

/// Free symbols remaining in an expression.
pub fn free_symbols(expr: &Expr) -> BTreeSet<String> {
    let mut out = BTreeSet::new();
    collect_symbols(expr, &mut out);
    out
}

fn collect_symbols(expr: &Expr, out: &mut BTreeSet<String>) {
    match expr {
        Expr::Num(_) => {}
        Expr::Sym(name) => {
            out.insert(name.clone());
        }
        Expr::Neg(inner) | Expr::Call(_, inner) | Expr::Factorial(inner) => {
            collect_symbols(inner, out)
        }
        Expr::Bin(_, lhs, rhs) => {
            collect_symbols(lhs, out);
            collect_symbols(rhs, out);
        }
    }
}

/// Parse, simplify and reduce text to a [`MathValue`].
///
/// # Examples
///
/// ```
/// use inkcalc::eval::evaluate;
/// use inkcalc::types::{MathValue, VariableMapping};
///
/// let vars = VariableMapping::new().with("y", 10i64);
/// assert_eq!(evaluate("y * 2", &vars).unwrap(), MathValue::Number(20.0));
/// assert_eq!(evaluate("z + 2 * 3", &vars).unwrap(), MathValue::Symbolic("z + 6".into()));
/// ```
pub fn evaluate(text: &str, vars: &VariableMapping) -> EvalResult<MathValue> {
    let expr = simplify(&parse(text)?, vars)?;
    Ok(match expr {
        Expr::Num(n) => MathValue::number(n),
        other => MathValue::Symbolic(other.to_string()),
    })
}

/// Solve `lhs = rhs` for its single unbound symbol, if it is linear in it.
///
/// Returns the symbol name and its value.
pub fn solve_linear(lhs: &str, rhs: &str, vars: &VariableMapping) -> EvalResult<(String, f64)> {
    let difference = Expr::Bin(BinOp::Sub, Box::new(parse(lhs)?), Box::new(parse(rhs)?));
    let reduced = simplify(&difference, vars)?;

    let symbols = free_symbols(&reduced);
    if symbols.len() != 1 {
        return Err(EvalError::NotSolvable(format!(
            "expected one unknown, found {}",
            symbols.len()
        )));
    }
    let unknown = symbols.into_iter().next().unwrap_or_default();

    let at = |t: f64| -> EvalResult<f64> {
        let probe = VariableMapping::new().with(unknown.clone(), MathValue::Number(t));
        match simplify(&reduced, &probe)? {
            Expr::Num(n) => Ok(n),
            other => Err(EvalError::NotSolvable(format!("could not reduce {}", other))),
        }
    };

    let f0 = at(0.0)?;
    let f1 = at(1.0)?;
    let slope = f1 - f0;
    if slope.abs() < 1e-12 {
        return Err(EvalError::NotSolvable(format!("{} cancels out", unknown)));
    }

    // Reject non-linear equations: probe two more points against the line.
    let tolerance = 1e-9 * (1.0 + f0.abs() + slope.abs());
    for t in [2.0, -3.0] {
        if (at(t)? - (f0 + slope * t)).abs() > tolerance * (1.0 + t.abs()) {
            return Err(EvalError::NotSolvable(format!("not linear in {}", unknown)));
        }
    }

    Ok((unknown, -f0 / slope))
}

// --- Display ---

fn precedence(expr: &Expr) -> u8 {
    match expr {
        Expr::Bin(BinOp::Add | BinOp::Sub, ..) => 1,
        Expr::Bin(BinOp::Mul | BinOp::Div, ..) => 2,
        Expr::Neg(_) => 3,
        Expr::Num(n) if *n < 0.0 => 3,
        Expr::Bin(BinOp::Pow, ..) => 4,
        _ => 5,
    }
}

fn write_operand(f: &mut fmt::Formatter<'_>, expr: &Expr, min_prec: u8) -> fmt::Result {
    if precedence(expr) < min_prec {
        write!(f, "({})", expr)
    } else {
        write!(f, "{}", expr)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Num(n) => f.write_str(&format_number(*n)),
            Expr::Sym(name) if is_identifier(name) => f.write_str(name),
            Expr::Sym(text) => write!(f, "({})", text),
            Expr::Neg(inner) => {
                f.write_str("-")?;
                write_operand(f, inner, 3)
            }
            Expr::Bin(op, lhs, rhs) => {
                let (symbol, left_min, right_min) = match op {
                    BinOp::Add => (" + ", 1, 1),
                    BinOp::Sub => (" - ", 1, 2),
                    BinOp::Mul => (" * ", 2, 2),
                    BinOp::Div => (" / ", 2, 3),
                    BinOp::Pow => ("^", 5, 4),
                };
                write_operand(f, lhs, left_min)?;
                f.write_str(symbol)?;
                write_operand(f, rhs, right_min)
            }
            Expr::Call(func, arg) => write!(f, "{}({})", func.name(), arg),
            Expr::Factorial(inner) => {
                write_operand(f, inner, 5)?;
                f.write_str("!")
            }
        }
    }
}
