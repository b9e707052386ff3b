//! 位置ベース JSON 配列の分解ヘルパー
//!
//! wire 上ではフィールド名を持たないので、要素数と型を厳密に検査する。

use alloc::string::String;
use alloc::vec::Vec;

use serde_json::Value;

use crate::error::ProtoError;

/// `value` が要素数 `N` の配列であることを検査し、固定長配列として借用する
pub(crate) fn destructure<'a, const N: usize>(
    value: &'a Value,
    context: &'static str,
) -> Result<&'a [Value; N], ProtoError> {
    let items = value
        .as_array()
        .ok_or(ProtoError::NotAnArray { context })?;
    <&[Value; N]>::try_from(items.as_slice()).map_err(|_| ProtoError::WrongArity {
        context,
        expected: N,
        actual: items.len(),
    })
}

pub(crate) fn expect_str<'a>(value: &'a Value, context: &'static str) -> Result<&'a str, ProtoError> {
    value.as_str().ok_or(ProtoError::ExpectedString { context })
}

pub(crate) fn expect_string(value: &Value, context: &'static str) -> Result<String, ProtoError> {
    expect_str(value, context).map(String::from)
}

pub(crate) fn expect_u64(value: &Value, context: &'static str) -> Result<u64, ProtoError> {
    value.as_u64().ok_or(ProtoError::ExpectedInteger { context })
}

/// `[tag, [fields...]]` を組み立てる
pub(crate) fn envelope(tag: &str, fields: Vec<Value>) -> Value {
    Value::Array(alloc::vec![Value::from(tag), Value::Array(fields)])
}

/// `[tag, body]` を分解してタグ文字列と本体を返す
pub(crate) fn split_envelope<'a>(value: &'a Value) -> Result<(&'a str, &'a Value), ProtoError> {
    let [tag, body] = destructure::<2>(value, "envelope")?;
    Ok((expect_str(tag, "envelope tag")?, body))
}

/// JSON 値を 1 行の文字列にする
pub(crate) fn to_line(value: &Value) -> String {
    // Value のシリアライズはマップキーが常に文字列なので失敗しない
    serde_json::to_string(value).expect("JSON value serialization should not fail")
}
