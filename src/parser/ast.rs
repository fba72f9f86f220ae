// ========================================
// 式 AST定義
// ========================================

use std::fmt;

// ========================================
// 式
// ========================================

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    String(String),
    Bool(bool),
    Null,
    Ident(String),
    /// `object.name`
    Member { object: Box<Expr>, property: String },
    /// `object[index]`
    Index { object: Box<Expr>, index: Box<Expr> },
    /// `name(args...)`。呼び出し先は `methods` のみ
    FunctionCall { name: String, args: Vec<Expr> },
    Unary { op: UnaryOperator, operand: Box<Expr> },
    BinaryOp { left: Box<Expr>, op: BinaryOperator, right: Box<Expr> },
    Conditional { test: Box<Expr>, then_branch: Box<Expr>, else_branch: Box<Expr> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOperator {
    Not,
    Neg,
    Plus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOperator {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Lt,
    Le,
    Gt,
    Ge,
    Eq,
    Ne,
    StrictEq,
    StrictNe,
    And,
    Or,
}

impl fmt::Display for BinaryOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinaryOperator::Add => "+",
            BinaryOperator::Sub => "-",
            BinaryOperator::Mul => "*",
            BinaryOperator::Div => "/",
            BinaryOperator::Rem => "%",
            BinaryOperator::Lt => "<",
            BinaryOperator::Le => "<=",
            BinaryOperator::Gt => ">",
            BinaryOperator::Ge => ">=",
            BinaryOperator::Eq => "==",
            BinaryOperator::Ne => "!=",
            BinaryOperator::StrictEq => "===",
            BinaryOperator::StrictNe => "!==",
            BinaryOperator::And => "&&",
            BinaryOperator::Or => "||",
        };
        f.write_str(s)
    }
}
