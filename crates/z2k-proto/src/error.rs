//! z2k-proto エラー型

use alloc::string::String;

/// 制御エンベロープのデコードエラー
///
/// どれも「壊れた / 想定外のメッセージ」を意味し、黙って捨ててはならない。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtoError {
    /// JSON として解析できない（serde_json のエラーメッセージを保持）
    InvalidJson(String),
    /// 配列であるべき位置が配列ではない
    NotAnArray {
        /// どの要素を解析していたか
        context: &'static str,
    },
    /// 配列の要素数がタグの期待値と一致しない
    WrongArity {
        context: &'static str,
        expected: usize,
        actual: usize,
    },
    /// この方向では定義されていないタグ
    UnknownTag(String),
    /// 文字列であるべき要素が文字列ではない
    ExpectedString { context: &'static str },
    /// 非負整数であるべき要素が非負整数ではない
    ExpectedInteger { context: &'static str },
}

impl core::fmt::Display for ProtoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            ProtoError::InvalidJson(e) => write!(f, "Invalid JSON: {}", e),
            ProtoError::NotAnArray { context } => write!(f, "{}: expected a JSON array", context),
            ProtoError::WrongArity {
                context,
                expected,
                actual,
            } => write!(
                f,
                "{}: expected {} elements, got {}",
                context, expected, actual
            ),
            ProtoError::UnknownTag(tag) => write!(f, "Unknown envelope tag: {:?}", tag),
            ProtoError::ExpectedString { context } => write!(f, "{}: expected a string", context),
            ProtoError::ExpectedInteger { context } => {
                write!(f, "{}: expected a non-negative integer", context)
            }
        }
    }
}

impl From<serde_json::Error> for ProtoError {
    fn from(e: serde_json::Error) -> Self {
        use alloc::string::ToString;
        ProtoError::InvalidJson(e.to_string())
    }
}
