pub mod ast;
pub mod expr;
pub mod template;
pub mod utils;

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use crate::error::ParseError;

pub use expr::parse_expression;
pub use template::parse_template;

type CachedParse = Result<Arc<ast::Expr>, ParseError>;

lazy_static::lazy_static! {
    // 式のソース文字列 → 解析結果。プロセスが終わるまで追記のみ
    static ref EXPRESSION_CACHE: Mutex<HashMap<String, CachedParse>> =
        Mutex::new(HashMap::new());
}

// 式を解析する。同じ文字列は一度だけ解析し、以降はキャッシュを返す。
pub fn parse_expression_cached(source: &str) -> CachedParse {
    if let Some(hit) = EXPRESSION_CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .get(source)
    {
        return hit.clone();
    }

    let parsed = parse_expression(source).map(Arc::new);
    if let Err(err) = &parsed {
        log::debug!("caching parse failure for `{}`: {}", source, err);
    }

    EXPRESSION_CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .entry(source.to_string())
        .or_insert(parsed)
        .clone()
}

/// キャッシュ済みの式の数
pub fn cached_expression_count() -> usize {
    EXPRESSION_CACHE
        .lock()
        .unwrap_or_else(PoisonError::into_inner)
        .len()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cache_returns_same_parse() {
        let first = parse_expression_cached("cache_probe_a + 1").unwrap();
        let second = parse_expression_cached("cache_probe_a + 1").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(cached_expression_count() >= 1);
    }

    #[test]
    fn test_cache_is_keyed_by_exact_text() {
        let a = parse_expression_cached("cache_probe_b+1").unwrap();
        let b = parse_expression_cached("cache_probe_b + 1").unwrap();
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(a, b);
    }

    #[test]
    fn test_cache_keeps_failures() {
        assert!(parse_expression_cached("cache_probe_c +").is_err());
        assert!(parse_expression_cached("cache_probe_c +").is_err());
    }
}
