// ========================================
// 式評価モジュール
// ========================================
//
// 解析済みの式を文脈（状態オブジェクトなど）に対して評価します。
// 解析結果はソース文字列ごとにキャッシュされますが、評価は毎回
// 渡された文脈で行います。
// 評価エラーは呼び出し元に投げず、ログを出して空文字列を返します。

use serde_json::{Map, Value};

use crate::engine::state::State;
use crate::engine::value::{self, apply_binary, is_truthy, to_number, type_name};
use crate::error::EvalError;
use crate::parser::ast::{BinaryOperator, Expr, UnaryOperator};
use crate::parser::parse_expression_cached;

/// 式の評価文脈
pub trait EvalContext {
    /// 識別子を値に解決する
    fn lookup(&self, name: &str) -> Result<Value, EvalError>;

    /// メソッドを呼び出す
    fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError>;
}

/// 状態のプロパティとメソッドを合わせた文脈。名前が衝突した場合はメソッドが優先
impl EvalContext for State {
    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        if self.has_method(name) {
            return Err(EvalError::NotAValue(name.to_string()));
        }
        self.get(name)
            .ok_or_else(|| EvalError::UnknownIdentifier(name.to_string()))
    }

    fn call(&self, name: &str, args: &[Value]) -> Result<Value, EvalError> {
        let method = self
            .method(name)
            .ok_or_else(|| EvalError::UnknownMethod(name.to_string()))?;
        method(self, args).map_err(|err| match err {
            EvalError::Method { .. } => err,
            other => EvalError::Method {
                name: name.to_string(),
                message: other.to_string(),
            },
        })
    }
}

/// メソッドを持たない素の値マップ
impl EvalContext for Map<String, Value> {
    fn lookup(&self, name: &str) -> Result<Value, EvalError> {
        self.get(name)
            .cloned()
            .ok_or_else(|| EvalError::UnknownIdentifier(name.to_string()))
    }

    fn call(&self, name: &str, _args: &[Value]) -> Result<Value, EvalError> {
        Err(EvalError::UnknownMethod(name.to_string()))
    }
}

/// 式文字列を評価する。失敗した場合はログを出して空文字列を返す
pub fn evaluate<C: EvalContext + ?Sized>(ctx: &C, source: &str) -> Value {
    match evaluate_expression(ctx, source) {
        Ok(value) => value,
        Err(err) => {
            log::warn!("failed to evaluate `{}`: {}", source, err);
            Value::String(String::new())
        }
    }
}

/// 式文字列を評価して表示用文字列を返す
pub fn evaluate_to_string<C: EvalContext + ?Sized>(ctx: &C, source: &str) -> String {
    value::to_display_string(&evaluate(ctx, source))
}

/// 式文字列を評価する。エラーはそのまま返す
pub fn evaluate_expression<C: EvalContext + ?Sized>(ctx: &C, source: &str) -> Result<Value, EvalError> {
    let expr = parse_expression_cached(source)?;
    eval_expr(ctx, &expr)
}

/// 解析済みの式を評価する
pub fn eval_expr<C: EvalContext + ?Sized>(ctx: &C, expr: &Expr) -> Result<Value, EvalError> {
    match expr {
        Expr::Number(n) => value::number(*n),
        Expr::String(s) => Ok(Value::String(s.clone())),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Null => Ok(Value::Null),
        Expr::Ident(name) => ctx.lookup(name),
        Expr::Member { object, property } => {
            let object = eval_expr(ctx, object)?;
            member(&object, property)
        }
        Expr::Index { object, index } => {
            let object = eval_expr(ctx, object)?;
            let index = eval_expr(ctx, index)?;
            index_value(&object, &index)
        }
        Expr::FunctionCall { name, args } => {
            let args = args
                .iter()
                .map(|arg| eval_expr(ctx, arg))
                .collect::<Result<Vec<_>, _>>()?;
            ctx.call(name, &args)
        }
        Expr::Unary { op, operand } => {
            let operand = eval_expr(ctx, operand)?;
            match op {
                UnaryOperator::Not => Ok(Value::Bool(!is_truthy(&operand))),
                UnaryOperator::Neg | UnaryOperator::Plus => {
                    let n = to_number(&operand).ok_or_else(|| {
                        EvalError::type_error(format!("cannot convert {} to a number", type_name(&operand)))
                    })?;
                    value::number(if *op == UnaryOperator::Neg { -n } else { n })
                }
            }
        }
        Expr::BinaryOp { left, op, right } => {
            let left = eval_expr(ctx, left)?;
            // 短絡評価
            match op {
                BinaryOperator::And if !is_truthy(&left) => return Ok(left),
                BinaryOperator::Or if is_truthy(&left) => return Ok(left),
                _ => {}
            }
            let right = eval_expr(ctx, right)?;
            apply_binary(*op, &left, &right)
        }
        Expr::Conditional { test, then_branch, else_branch } => {
            if is_truthy(&eval_expr(ctx, test)?) {
                eval_expr(ctx, then_branch)
            } else {
                eval_expr(ctx, else_branch)
            }
        }
    }
}

fn member(object: &Value, property: &str) -> Result<Value, EvalError> {
    match object {
        Value::Null => Err(EvalError::type_error(format!(
            "cannot read property `{}` of null",
            property
        ))),
        // 未定義のプロパティは null として扱う（表示は "null"）
        Value::Object(map) => Ok(map.get(property).cloned().unwrap_or(Value::Null)),
        Value::String(s) if property == "length" => Ok(Value::from(s.chars().count())),
        Value::Array(items) if property == "length" => Ok(Value::from(items.len())),
        _ => Ok(Value::Null),
    }
}

fn index_value(object: &Value, index: &Value) -> Result<Value, EvalError> {
    match (object, index) {
        (Value::Null, _) => Err(EvalError::type_error("cannot index into null")),
        (Value::Array(items), Value::Number(n)) => Ok(n
            .as_u64()
            .and_then(|i| items.get(i as usize))
            .cloned()
            .unwrap_or(Value::Null)),
        (Value::String(s), Value::Number(n)) => Ok(n
            .as_u64()
            .and_then(|i| s.chars().nth(i as usize))
            .map(|c| Value::String(c.to_string()))
            .unwrap_or(Value::Null)),
        (_, Value::String(key)) => member(object, key),
        (Value::Object(_), other) => member(object, &value::to_display_string(other)),
        _ => Ok(Value::Null),
    }
}
