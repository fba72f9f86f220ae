// ========================================
// エラー定義
// ========================================
//
// 式の構文エラー、評価エラー、マウント時の構造エラーを定義します。
// 評価エラーは評価器の中で握りつぶされ、ログに記録されます。
// マウントエラーだけが呼び出し元まで伝播します。

use thiserror::Error;

/// テンプレート・式の構文エラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("syntax error in expression `{source_text}`: {message}")]
    Syntax { source_text: String, message: String },

    #[error("template error: {message}")]
    Template { message: String },
}

impl ParseError {
    pub fn syntax(source_text: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Syntax {
            source_text: source_text.into(),
            message: message.into(),
        }
    }

    pub fn template(message: impl Into<String>) -> Self {
        Self::Template {
            message: message.into(),
        }
    }
}

/// 式の評価エラー
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EvalError {
    #[error("`{0}` is not defined")]
    UnknownIdentifier(String),

    #[error("`{0}` is not a method")]
    UnknownMethod(String),

    #[error("`{0}` is a method and cannot be used as a value")]
    NotAValue(String),

    #[error("type error: {0}")]
    Type(String),

    #[error("method `{name}` failed: {message}")]
    Method { name: String, message: String },

    #[error(transparent)]
    Parse(#[from] ParseError),
}

impl EvalError {
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }
}

/// マウント時の構造エラー（回復不能）
#[derive(Debug, Error)]
pub enum MountError {
    #[error("mount point \"{0}\" not found")]
    MountPointNotFound(String),

    #[error(transparent)]
    Template(#[from] ParseError),
}
