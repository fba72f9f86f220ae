// ========================================
// 式パーサーモジュール
// ========================================
//
// このモジュールはテンプレート式（算術式、比較式、関数呼び出しなど）の解析を担当します。
// 優先順位の解決は pest の Pratt パーサーに任せます。

use pest::Parser;
use pest::iterators::{Pair, Pairs};
use pest::pratt_parser::{Assoc, Op, PrattParser};
use pest_derive::Parser;

use crate::error::ParseError;
use crate::parser::ast::{BinaryOperator, Expr, UnaryOperator};
use crate::parser::utils::process_escape_sequences;

/// テンプレート式のパーサー
#[derive(Parser)]
#[grammar = "parser/expr.pest"]
pub struct ExprParser;

lazy_static::lazy_static! {
    // 後に登録したものほど強く結合する
    static ref PRATT_PARSER: PrattParser<Rule> = PrattParser::new()
        .op(Op::infix(Rule::or, Assoc::Left))
        .op(Op::infix(Rule::and, Assoc::Left))
        .op(Op::infix(Rule::eq, Assoc::Left)
            | Op::infix(Rule::ne, Assoc::Left)
            | Op::infix(Rule::strict_eq, Assoc::Left)
            | Op::infix(Rule::strict_ne, Assoc::Left))
        .op(Op::infix(Rule::lt, Assoc::Left)
            | Op::infix(Rule::le, Assoc::Left)
            | Op::infix(Rule::gt, Assoc::Left)
            | Op::infix(Rule::ge, Assoc::Left))
        .op(Op::infix(Rule::add, Assoc::Left) | Op::infix(Rule::sub, Assoc::Left))
        .op(Op::infix(Rule::mul, Assoc::Left)
            | Op::infix(Rule::div, Assoc::Left)
            | Op::infix(Rule::rem, Assoc::Left))
        .op(Op::prefix(Rule::not) | Op::prefix(Rule::neg) | Op::prefix(Rule::plus))
        .op(Op::postfix(Rule::member) | Op::postfix(Rule::index));
}

/// 式文字列を解析してASTを生成する
pub fn parse_expression(source: &str) -> Result<Expr, ParseError> {
    let mut pairs = ExprParser::parse(Rule::expression, source)
        .map_err(|e| ParseError::syntax(source, e.to_string()))?;

    let expression = next_pair(&mut pairs, source)?;
    let mut inner = expression.into_inner();
    let conditional = next_pair(&mut inner, source)?;

    build_conditional(conditional, source)
}

fn next_pair<'i>(pairs: &mut Pairs<'i, Rule>, source: &str) -> Result<Pair<'i, Rule>, ParseError> {
    pairs
        .next()
        .ok_or_else(|| ParseError::syntax(source, "unexpected end of expression"))
}

/// `test ? a : b` を解析する
fn build_conditional(pair: Pair<Rule>, source: &str) -> Result<Expr, ParseError> {
    let mut inner = pair.into_inner();
    let test = build_binary(next_pair(&mut inner, source)?, source)?;

    match (inner.next(), inner.next()) {
        (Some(then_pair), Some(else_pair)) => Ok(Expr::Conditional {
            test: Box::new(test),
            then_branch: Box::new(build_conditional(then_pair, source)?),
            else_branch: Box::new(build_conditional(else_pair, source)?),
        }),
        _ => Ok(test),
    }
}

fn build_binary(pair: Pair<Rule>, source: &str) -> Result<Expr, ParseError> {
    PRATT_PARSER
        .map_primary(|primary| build_primary(primary, source))
        .map_prefix(|op, operand| {
            let op = match op.as_rule() {
                Rule::not => UnaryOperator::Not,
                Rule::neg => UnaryOperator::Neg,
                Rule::plus => UnaryOperator::Plus,
                rule => return Err(unexpected(rule, source)),
            };
            Ok(Expr::Unary {
                op,
                operand: Box::new(operand?),
            })
        })
        .map_postfix(|object, op| {
            let object = Box::new(object?);
            match op.as_rule() {
                Rule::member => {
                    let property = next_pair(&mut op.into_inner(), source)?;
                    Ok(Expr::Member {
                        object,
                        property: property.as_str().to_string(),
                    })
                }
                Rule::index => {
                    let index = next_pair(&mut op.into_inner(), source)?;
                    Ok(Expr::Index {
                        object,
                        index: Box::new(build_conditional(index, source)?),
                    })
                }
                rule => Err(unexpected(rule, source)),
            }
        })
        .map_infix(|left, op, right| {
            let op = match op.as_rule() {
                Rule::add => BinaryOperator::Add,
                Rule::sub => BinaryOperator::Sub,
                Rule::mul => BinaryOperator::Mul,
                Rule::div => BinaryOperator::Div,
                Rule::rem => BinaryOperator::Rem,
                Rule::lt => BinaryOperator::Lt,
                Rule::le => BinaryOperator::Le,
                Rule::gt => BinaryOperator::Gt,
                Rule::ge => BinaryOperator::Ge,
                Rule::eq => BinaryOperator::Eq,
                Rule::ne => BinaryOperator::Ne,
                Rule::strict_eq => BinaryOperator::StrictEq,
                Rule::strict_ne => BinaryOperator::StrictNe,
                Rule::and => BinaryOperator::And,
                Rule::or => BinaryOperator::Or,
                rule => return Err(unexpected(rule, source)),
            };
            Ok(Expr::BinaryOp {
                left: Box::new(left?),
                op,
                right: Box::new(right?),
            })
        })
        .parse(pair.into_inner())
}

fn build_primary(pair: Pair<Rule>, source: &str) -> Result<Expr, ParseError> {
    match pair.as_rule() {
        Rule::number => pair
            .as_str()
            .parse::<f64>()
            .map(Expr::Number)
            .map_err(|e| ParseError::syntax(source, e.to_string())),
        Rule::string => {
            let raw = pair.into_inner().next().map(|p| p.as_str()).unwrap_or("");
            Ok(Expr::String(process_escape_sequences(raw)))
        }
        Rule::boolean => Ok(Expr::Bool(pair.as_str() == "true")),
        Rule::null => Ok(Expr::Null),
        Rule::ident => Ok(Expr::Ident(pair.as_str().to_string())),
        Rule::call => {
            let mut inner = pair.into_inner();
            let name = next_pair(&mut inner, source)?.as_str().to_string();
            let args = inner
                .map(|arg| build_conditional(arg, source))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Expr::FunctionCall { name, args })
        }
        Rule::conditional => build_conditional(pair, source),
        rule => Err(unexpected(rule, source)),
    }
}

fn unexpected(rule: Rule, source: &str) -> ParseError {
    ParseError::syntax(source, format!("unexpected token {:?}", rule))
}
