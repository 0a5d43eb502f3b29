use crate::error::{GlobtimError, Result};
use crate::traits::{Objective, Scalar};
use std::collections::HashMap;

/// OpCodes for the Stack-based Virtual Machine.
/// The VM operates on a stack of `Scalar` values (f64 or Dual).
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum OpCode {
    /// Pushes a constant `f64` value onto the stack.
    LoadConst(f64),
    /// Pushes the value of an input variable (by index) onto the stack.
    LoadVar(usize),
    /// Pushes the value of a parameter (by index) onto the stack.
    LoadParam(usize),
    /// Pops top two values (b, a), pushes (a + b).
    Add,
    /// Pops top two values (b, a), pushes (a - b).
    Sub,
    /// Pops top two values (b, a), pushes (a * b).
    Mul,
    /// Pops top two values (b, a), pushes (a / b).
    Div,
    /// Pops top two values (b, a), pushes (a ^ b).
    Pow,
    /// Pops top value (a), pushes a^n for a constant integer exponent.
    PowI(i32),
    Sin,
    Cos,
    Tan,
    Exp,
    Log,
    Sqrt,
    Abs,
    /// Pops top value (a), pushes -a.
    Neg,
}

/// Represents a compiled sequence of operations.
#[derive(Debug, Clone, Default)]
pub struct Bytecode {
    pub ops: Vec<OpCode>,
    /// Deepest stack the ops reach.
    pub max_stack: usize,
}

/// Stack-based Virtual Machine for evaluating expressions.
///
/// The VM is stateless; `execute` takes all necessary context:
/// - `bytecode`: Instructions to run.
/// - `vars`: Input point (read-only).
/// - `params`: Parameter vector (read-only).
/// - `stack`: A mutable buffer for intermediate computations.
///
/// Returns the value left on the stack. Bytecode produced by [`Compiler`]
/// never underflows; hand-written bytecode that does yields NaN.
pub struct VM;

fn pop<T: Scalar>(stack: &mut Vec<T>) -> T {
    stack.pop().unwrap_or_else(T::nan)
}

impl VM {
    pub fn execute<T: Scalar>(
        bytecode: &Bytecode,
        vars: &[T],
        params: &[T],
        stack: &mut Vec<T>,
    ) -> T {
        stack.clear();

        for op in &bytecode.ops {
            let value = match *op {
                OpCode::LoadConst(val) => T::from_f64(val).unwrap_or_else(T::nan),
                OpCode::LoadVar(idx) => vars.get(idx).copied().unwrap_or_else(T::nan),
                OpCode::LoadParam(idx) => params.get(idx).copied().unwrap_or_else(T::nan),
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => {
                    let b = pop(stack);
                    let a = pop(stack);
                    match *op {
                        OpCode::Add => a + b,
                        OpCode::Sub => a - b,
                        OpCode::Mul => a * b,
                        OpCode::Div => a / b,
                        _ => a.powf(b),
                    }
                }
                OpCode::PowI(n) => pop(stack).powi(n),
                OpCode::Sin => pop(stack).sin(),
                OpCode::Cos => pop(stack).cos(),
                OpCode::Tan => pop(stack).tan(),
                OpCode::Exp => pop(stack).exp(),
                OpCode::Log => pop(stack).ln(),
                OpCode::Sqrt => pop(stack).sqrt(),
                OpCode::Abs => pop(stack).abs(),
                OpCode::Neg => -pop(stack),
            };
            stack.push(value);
        }

        pop(stack)
    }
}

// --- AST & Parser ---

/// Abstract Syntax Tree nodes for expressions.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Binary(Box<Expr>, char, Box<Expr>), // char is operator +, -, *, /, ^
    Unary(char, Box<Expr>),
    Call(String, Box<Expr>),
}

/// Compiles an AST (`Expr`) into `Bytecode`.
/// Resolves variable and parameter names to indices.
pub struct Compiler {
    pub var_map: HashMap<String, usize>,
    pub param_map: HashMap<String, usize>,
}

impl Compiler {
    pub fn new(var_names: &[String], param_names: &[String]) -> Self {
        let var_map = var_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        let param_map = param_names
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), i))
            .collect();
        Self { var_map, param_map }
    }

    pub fn compile(&self, expr: &Expr) -> Result<Bytecode> {
        let mut ops = Vec::new();
        self.compile_recursive(expr, &mut ops)?;
        let mut depth = 0usize;
        let mut max_stack = 0usize;
        for op in &ops {
            match op {
                OpCode::LoadConst(_) | OpCode::LoadVar(_) | OpCode::LoadParam(_) => depth += 1,
                OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Pow => depth -= 1,
                _ => {}
            }
            max_stack = max_stack.max(depth);
        }
        Ok(Bytecode { ops, max_stack })
    }

    fn compile_recursive(&self, expr: &Expr, ops: &mut Vec<OpCode>) -> Result<()> {
        match expr {
            Expr::Number(n) => ops.push(OpCode::LoadConst(*n)),
            Expr::Variable(name) => {
                if let Some(&idx) = self.var_map.get(name) {
                    ops.push(OpCode::LoadVar(idx));
                } else if let Some(&idx) = self.param_map.get(name) {
                    ops.push(OpCode::LoadParam(idx));
                } else {
                    return Err(GlobtimError::Expression(format!(
                        "unknown variable or parameter '{name}'"
                    )));
                }
            }
            Expr::Binary(left, '^', right) => {
                self.compile_recursive(left, ops)?;
                match right.as_ref() {
                    Expr::Number(n) if n.fract() == 0.0 && n.abs() <= i32::MAX as f64 => {
                        ops.push(OpCode::PowI(*n as i32));
                    }
                    _ => {
                        self.compile_recursive(right, ops)?;
                        ops.push(OpCode::Pow);
                    }
                }
            }
            Expr::Binary(left, op, right) => {
                self.compile_recursive(left, ops)?;
                self.compile_recursive(right, ops)?;
                ops.push(match op {
                    '+' => OpCode::Add,
                    '-' => OpCode::Sub,
                    '*' => OpCode::Mul,
                    '/' => OpCode::Div,
                    _ => {
                        return Err(GlobtimError::Expression(format!(
                            "unknown binary operator '{op}'"
                        )))
                    }
                });
            }
            Expr::Unary(op, operand) => {
                self.compile_recursive(operand, ops)?;
                match op {
                    '-' => ops.push(OpCode::Neg),
                    _ => {
                        return Err(GlobtimError::Expression(format!(
                            "unknown unary operator '{op}'"
                        )))
                    }
                }
            }
            Expr::Call(func, arg) => {
                self.compile_recursive(arg, ops)?;
                ops.push(match func.as_str() {
                    "sin" => OpCode::Sin,
                    "cos" => OpCode::Cos,
                    "tan" => OpCode::Tan,
                    "exp" => OpCode::Exp,
                    "log" | "ln" => OpCode::Log,
                    "sqrt" => OpCode::Sqrt,
                    "abs" => OpCode::Abs,
                    _ => {
                        return Err(GlobtimError::Expression(format!(
                            "unknown function '{func}'"
                        )))
                    }
                });
            }
        }
        Ok(())
    }
}

// --- Simple Parser ---

/// Parses a string expression into an AST.
///
/// Grammar, loosest first: `+ -`, `* /`, unary `-`, right-associative `^`,
/// then numbers, identifiers, calls and parentheses.
pub fn parse(input: &str) -> Result<Expr> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression()?;
    if let Some(token) = parser.peek() {
        return Err(GlobtimError::Expression(format!(
            "unexpected trailing {token:?}"
        )));
    }
    Ok(expr)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Identifier(String),
    Plus,
    Minus,
    Star,
    Slash,
    Caret,
    LParen,
    RParen,
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
        } else if c.is_ascii_digit() || c == '.' {
            let mut num_str = String::new();
            while let Some(&d) = chars.peek() {
                let exponent_sign =
                    (d == '+' || d == '-') && num_str.ends_with(|e| e == 'e' || e == 'E');
                if d.is_ascii_digit() || d == '.' || d == 'e' || d == 'E' || exponent_sign {
                    num_str.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            let value = num_str.parse().map_err(|_| {
                GlobtimError::Expression(format!("malformed number '{num_str}'"))
            })?;
            tokens.push(Token::Number(value));
        } else if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&d) = chars.peek() {
                if d.is_alphanumeric() || d == '_' {
                    ident.push(d);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Identifier(ident));
        } else {
            tokens.push(match c {
                '+' => Token::Plus,
                '-' => Token::Minus,
                '*' => Token::Star,
                '/' => Token::Slash,
                '^' => Token::Caret,
                '(' => Token::LParen,
                ')' => Token::RParen,
                _ => {
                    return Err(GlobtimError::Expression(format!(
                        "unexpected character '{c}'"
                    )))
                }
            });
            chars.next();
        }
    }
    Ok(tokens)
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn consume(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).cloned();
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn expect_rparen(&mut self) -> Result<()> {
        match self.consume() {
            Some(Token::RParen) => Ok(()),
            _ => Err(GlobtimError::Expression("expected ')'".to_string())),
        }
    }

    fn parse_expression(&mut self) -> Result<Expr> {
        let mut left = self.parse_product()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => '+',
                Some(Token::Minus) => '-',
                _ => break,
            };
            self.consume();
            let right = self.parse_product()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_product(&mut self) -> Result<Expr> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => '*',
                Some(Token::Slash) => '/',
                _ => break,
            };
            self.consume();
            let right = self.parse_unary()?;
            left = Expr::Binary(Box::new(left), op, Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Some(Token::Minus) => {
                self.consume();
                Ok(Expr::Unary('-', Box::new(self.parse_unary()?)))
            }
            Some(Token::Plus) => {
                self.consume();
                self.parse_unary()
            }
            _ => self.parse_power(),
        }
    }

    fn parse_power(&mut self) -> Result<Expr> {
        let base = self.parse_primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.consume();
            let exponent = self.parse_unary()?;
            return Ok(Expr::Binary(Box::new(base), '^', Box::new(exponent)));
        }
        Ok(base)
    }

    fn parse_primary(&mut self) -> Result<Expr> {
        match self.consume() {
            Some(Token::Number(n)) => Ok(Expr::Number(n)),
            Some(Token::Identifier(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.consume();
                    let arg = self.parse_expression()?;
                    self.expect_rparen()?;
                    Ok(Expr::Call(name, Box::new(arg)))
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            Some(Token::LParen) => {
                let expr = self.parse_expression()?;
                self.expect_rparen()?;
                Ok(expr)
            }
            Some(token) => Err(GlobtimError::Expression(format!(
                "unexpected {token:?}"
            ))),
            None => Err(GlobtimError::Expression(
                "unexpected end of expression".to_string(),
            )),
        }
    }
}

// --- ExpressionObjective ---

/// An [`Objective`] compiled from a formula such as
/// `(x1^2 + x2 - 11)^2 + (x1 + x2^2 - 7)^2`.
///
/// Evaluates on any [`Scalar`], so it works with both the sampler and the
/// autodiff oracle. Each call uses its own stack, which keeps the objective
/// `Sync`.
#[derive(Debug, Clone)]
pub struct ExpressionObjective {
    pub source: String,
    pub bytecode: Bytecode,
    pub variables: Vec<String>,
    pub params: Vec<f64>,
}

impl ExpressionObjective {
    /// Variables are named `x1, ..., xn`.
    pub fn new(source: &str, dimension: usize) -> Result<Self> {
        let variables: Vec<String> = (1..=dimension).map(|i| format!("x{i}")).collect();
        Self::with_names(source, &variables, &[])
    }

    pub fn with_names(
        source: &str,
        variables: &[String],
        params: &[(String, f64)],
    ) -> Result<Self> {
        if variables.is_empty() {
            return Err(GlobtimError::Expression(
                "an objective needs at least one variable".to_string(),
            ));
        }
        let param_names: Vec<String> = params.iter().map(|(n, _)| n.clone()).collect();
        let expr = parse(source)?;
        let bytecode = Compiler::new(variables, &param_names).compile(&expr)?;
        Ok(Self {
            source: source.to_string(),
            bytecode,
            variables: variables.to_vec(),
            params: params.iter().map(|(_, v)| *v).collect(),
        })
    }
}

impl<T: Scalar> Objective<T> for ExpressionObjective {
    fn dimension(&self) -> usize {
        self.variables.len()
    }

    fn evaluate(&self, x: &[T]) -> T {
        let params: Vec<T> = self
            .params
            .iter()
            .map(|&p| T::from_f64(p).unwrap_or_else(T::nan))
            .collect();
        let mut stack = Vec::with_capacity(self.bytecode.max_stack);
        VM::execute(&self.bytecode, x, &params, &mut stack)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::autodiff::{gradient, Dual};

    fn eval(source: &str, x: &[f64]) -> f64 {
        let f = ExpressionObjective::new(source, x.len()).expect("valid expression");
        Objective::<f64>::evaluate(&f, x)
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(eval("1 + 2 * 3", &[0.0]), 7.0);
        assert_eq!(eval("2 ^ 3 ^ 2", &[0.0]), 512.0);
        assert_eq!(eval("-x1^2", &[3.0]), -9.0);
        assert_eq!(eval("2^-1", &[0.0]), 0.5);
        assert_eq!(eval("8 / 4 / 2", &[0.0]), 1.0);
        assert_eq!(eval("(1 + 2) * 3 - -1", &[0.0]), 10.0);
    }

    #[test]
    fn numbers_accept_exponents() {
        assert_eq!(eval("1e-3 * 1000", &[0.0]), 1.0);
        assert_eq!(eval("2.5E+1", &[0.0]), 25.0);
    }

    #[test]
    fn functions_evaluate() {
        let x = [0.7f64];
        let expected = x[0].sin() + x[0].cos() * x[0].tan() - x[0].exp() + x[0].ln()
            + x[0].sqrt()
            + (-x[0]).abs();
        let got = eval(
            "sin(x1) + cos(x1) * tan(x1) - exp(x1) + log(x1) + sqrt(x1) + abs(-x1)",
            &x,
        );
        assert!((got - expected).abs() < 1e-14);
    }

    #[test]
    fn himmelblau_expression_matches_closed_form() {
        let f = ExpressionObjective::new("(x1^2 + x2 - 11)^2 + (x1 + x2^2 - 7)^2", 2)
            .expect("valid expression");
        assert_eq!(Objective::<f64>::evaluate(&f, &[3.0, 2.0]), 0.0);
        assert_eq!(Objective::<f64>::evaluate(&f, &[-3.0, 1.0]), 82.0);
        let g = gradient(&f, &[1.0, 1.0]);
        assert!((g[0] - (-46.0)).abs() < 1e-12);
        assert!((g[1] - (-38.0)).abs() < 1e-12);
        let d = Objective::<Dual>::evaluate(&f, &[Dual::new(-2.0, 1.0), Dual::constant(0.5)]);
        assert!(d.val.is_finite() && d.eps.is_finite());
    }

    #[test]
    fn params_are_resolved_by_name() {
        let f = ExpressionObjective::with_names(
            "a * (x - b)^2",
            &["x".to_string()],
            &[("a".to_string(), 2.0), ("b".to_string(), 1.0)],
        )
        .expect("valid expression");
        assert_eq!(Objective::<f64>::evaluate(&f, &[3.0]), 8.0);
    }

    #[test]
    fn malformed_input_is_an_error() {
        for bad in ["x1 +", "(x1", "x1 $ 2", "foo(x1)", "x3", "1.2.3", "x1 x1", ""] {
            let err = ExpressionObjective::new(bad, 2).expect_err(bad);
            assert!(matches!(err, GlobtimError::Expression(_)), "{bad}");
        }
    }

    #[test]
    fn compiled_stack_depth_is_tracked() {
        let expr = parse("x1 + x2 * (x1 - x2)").expect("valid expression");
        let names = vec!["x1".to_string(), "x2".to_string()];
        let code = Compiler::new(&names, &[]).compile(&expr).expect("compiles");
        assert_eq!(code.max_stack, 4);
        let mut stack = Vec::new();
        assert_eq!(VM::execute(&code, &[3.0, 2.0], &[], &mut stack), 5.0);
    }
}
