//! ユーザープロファイル

use alloc::string::String;

use serde::Serialize;
use serde_json::Value;

use crate::error::ProtoError;
use crate::json::{destructure, expect_string};

/// セッションに紐づくユーザー情報
///
/// wire 形式は `[userId, signature]`。
/// `Serialize` の出力（`{"userId":..,"signature":..}`）はアプリケーション層向けで、
/// wire 形式とは別物。
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub user_id: String,
    pub signature: String,
}

impl Profile {
    pub fn new(user_id: impl Into<String>, signature: impl Into<String>) -> Self {
        Profile {
            user_id: user_id.into(),
            signature: signature.into(),
        }
    }

    pub fn to_json(&self) -> Value {
        Value::Array(alloc::vec![
            Value::from(self.user_id.as_str()),
            Value::from(self.signature.as_str()),
        ])
    }

    pub fn from_json(value: &Value) -> Result<Self, ProtoError> {
        let [user_id, signature] = destructure::<2>(value, "Profile")?;
        Ok(Profile {
            user_id: expect_string(user_id, "Profile.userId")?,
            signature: expect_string(signature, "Profile.signature")?,
        })
    }
}
