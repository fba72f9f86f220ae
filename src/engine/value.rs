// ========================================
// 値の意味論
// ========================================
//
// 状態の値は serde_json::Value で表す。
// 文字列化・真偽判定・演算はテンプレート式の慣習（JavaScript風）に合わせる。

use serde_json::{Number, Value};

use crate::error::EvalError;
use crate::parser::ast::BinaryOperator;

/// 値を表示用文字列にする
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.as_f64().map(format_number).unwrap_or_else(|| n.to_string()),
        Value::String(s) => s.clone(),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::Null => String::new(),
                other => to_display_string(other),
            })
            .collect::<Vec<_>>()
            .join(","),
        Value::Object(_) => "[object Object]".to_string(),
    }
}

/// 整数値は小数点なしで表示する
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        // -0 も "0" になる
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

/// 数値をValueにする。有限でない結果は型エラー
pub fn number(n: f64) -> Result<Value, EvalError> {
    if n.fract() == 0.0 && n.abs() < 9.0e15 {
        return Ok(Value::from(n as i64));
    }
    Number::from_f64(n)
        .map(Value::Number)
        .ok_or_else(|| EvalError::type_error(format!("result is not a finite number ({})", format_number(n))))
}

/// 数値への変換。変換できない場合は None（NaN 相当）
pub fn to_number(value: &Value) -> Option<f64> {
    match value {
        Value::Null => Some(0.0),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                Some(0.0)
            } else {
                trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
            }
        }
        Value::Array(_) | Value::Object(_) => None,
    }
}

pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

pub fn strict_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        // 配列・オブジェクトは同一性を持たないので構造で比較する
        _ => a == b,
    }
}

pub fn loose_equals(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Null, Value::Null) => true,
        (Value::Null, _) | (_, Value::Null) => false,
        (Value::String(_), Value::String(_)) => a == b,
        (Value::Array(_) | Value::Object(_), _) | (_, Value::Array(_) | Value::Object(_)) => {
            strict_equals(a, b)
        }
        _ => match (to_number(a), to_number(b)) {
            (Some(x), Some(y)) => x == y,
            _ => false,
        },
    }
}

/// 短絡評価しない二項演算を適用する
pub fn apply_binary(op: BinaryOperator, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        BinaryOperator::Add => {
            if left.is_string() || right.is_string() {
                let mut s = to_display_string(left);
                s.push_str(&to_display_string(right));
                return Ok(Value::String(s));
            }
            arithmetic(op, left, right, |x, y| x + y)
        }
        BinaryOperator::Sub => arithmetic(op, left, right, |x, y| x - y),
        BinaryOperator::Mul => arithmetic(op, left, right, |x, y| x * y),
        BinaryOperator::Div => arithmetic(op, left, right, |x, y| x / y),
        BinaryOperator::Rem => arithmetic(op, left, right, |x, y| x % y),
        BinaryOperator::Lt => Ok(Value::Bool(compare(left, right, |o| o.is_lt()))),
        BinaryOperator::Le => Ok(Value::Bool(compare(left, right, |o| o.is_le()))),
        BinaryOperator::Gt => Ok(Value::Bool(compare(left, right, |o| o.is_gt()))),
        BinaryOperator::Ge => Ok(Value::Bool(compare(left, right, |o| o.is_ge()))),
        BinaryOperator::Eq => Ok(Value::Bool(loose_equals(left, right))),
        BinaryOperator::Ne => Ok(Value::Bool(!loose_equals(left, right))),
        BinaryOperator::StrictEq => Ok(Value::Bool(strict_equals(left, right))),
        BinaryOperator::StrictNe => Ok(Value::Bool(!strict_equals(left, right))),
        // 短絡評価は eval 側で行う
        BinaryOperator::And => Ok(if is_truthy(left) { right.clone() } else { left.clone() }),
        BinaryOperator::Or => Ok(if is_truthy(left) { left.clone() } else { right.clone() }),
    }
}

fn arithmetic(
    op: BinaryOperator,
    left: &Value,
    right: &Value,
    f: impl Fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    match (to_number(left), to_number(right)) {
        (Some(x), Some(y)) => number(f(x, y)),
        _ => Err(EvalError::type_error(format!(
            "cannot apply `{}` to {} and {}",
            op,
            type_name(left),
            type_name(right)
        ))),
    }
}

fn compare(left: &Value, right: &Value, f: impl Fn(std::cmp::Ordering) -> bool) -> bool {
    if let (Value::String(a), Value::String(b)) = (left, right) {
        return f(a.cmp(b));
    }
    match (to_number(left), to_number(right)) {
        (Some(x), Some(y)) => x.partial_cmp(&y).is_some_and(f),
        _ => false,
    }
}

pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_display_strings() {
        assert_eq!(to_display_string(&json!(3)), "3");
        assert_eq!(to_display_string(&json!(3.0)), "3");
        assert_eq!(to_display_string(&json!(2.5)), "2.5");
        assert_eq!(to_display_string(&json!(null)), "null");
        assert_eq!(to_display_string(&json!([1, null, "a"])), "1,,a");
        assert_eq!(to_display_string(&json!({"a": 1})), "[object Object]");
    }

    #[test]
    fn test_add_concatenates_strings() {
        let v = apply_binary(BinaryOperator::Add, &json!("n="), &json!(4)).unwrap();
        assert_eq!(v, json!("n=4"));
        let v = apply_binary(BinaryOperator::Add, &json!(1), &json!(2)).unwrap();
        assert_eq!(v, json!(3));
    }

    #[test]
    fn test_numeric_strings_coerce() {
        let v = apply_binary(BinaryOperator::Mul, &json!("21"), &json!(2)).unwrap();
        assert_eq!(v, json!(42));
    }

    #[test]
    fn test_arithmetic_type_errors() {
        assert!(apply_binary(BinaryOperator::Sub, &json!("abc"), &json!(1)).is_err());
        assert!(apply_binary(BinaryOperator::Div, &json!(1), &json!(0)).is_err());
    }

    #[test]
    fn test_equality() {
        assert!(loose_equals(&json!("1"), &json!(1)));
        assert!(!strict_equals(&json!("1"), &json!(1)));
        assert!(strict_equals(&json!(1), &json!(1.0)));
        assert!(!loose_equals(&json!(null), &json!(0)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!is_truthy(&json!(0)));
        assert!(!is_truthy(&json!("")));
        assert!(is_truthy(&json!("0")));
        assert!(is_truthy(&json!([])));
    }
}
