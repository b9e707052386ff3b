//! リモート → クライアント方向の制御メッセージ（CResponse）

use alloc::string::String;
use alloc::vec::Vec;

use serde_json::Value;

use crate::error::ProtoError;
use crate::json::{destructure, envelope, expect_string, expect_u64, split_envelope, to_line};
use crate::profile::Profile;

/// シーケンス番号付きでパッケージングされたアプリケーションレスポンス
///
/// wire 形式: `[responseId, requestCursor, payload]`
#[derive(Debug, Clone, PartialEq)]
pub struct PackagedResponse {
    /// セッション内で 0 から隙間なく増えるレスポンス ID
    pub response_id: u64,
    /// リモートがまだ処理していない最小のリクエスト ID
    pub request_cursor: u64,
    /// アプリケーションペイロード（このレイヤーでは解釈しない）
    pub payload: Value,
}

impl PackagedResponse {
    pub fn new(response_id: u64, request_cursor: u64, payload: Value) -> Self {
        PackagedResponse {
            response_id,
            request_cursor,
            payload,
        }
    }

    fn to_fields(&self) -> Vec<Value> {
        alloc::vec![
            Value::from(self.response_id),
            Value::from(self.request_cursor),
            self.payload.clone(),
        ]
    }

    fn from_fields(body: &Value) -> Result<Self, ProtoError> {
        let [response_id, cursor, payload] = destructure::<3>(body, "PackagedResponse")?;
        Ok(PackagedResponse {
            response_id: expect_u64(response_id, "PackagedResponse.responseId")?,
            request_cursor: expect_u64(cursor, "PackagedResponse.requestCursor")?,
            payload: payload.clone(),
        })
    }
}

/// リモート側が送信する制御メッセージ
#[derive(Debug, Clone, PartialEq)]
pub enum ServerMessage {
    /// セッション作成 / 再アタッチの成功
    SessionSuccess {
        /// 割り当てられたセッション ID（クライアントは解釈せずそのまま返す）
        session_id: String,
        /// リモートが次に期待するリクエスト ID
        request_cursor: u64,
        profile: Profile,
    },
    /// 再アタッチの拒否（未知のセッション、プロファイル不一致）
    SessionFailure,
    PackagedResponse(PackagedResponse),
}

impl ServerMessage {
    pub const TAG_SESSION_SUCCESS: &'static str = "SessionSuccess";
    pub const TAG_SESSION_FAILURE: &'static str = "SessionFailure";
    pub const TAG_PACKAGED_RESPONSE: &'static str = "PackagedResponse";

    pub fn tag(&self) -> &'static str {
        match self {
            ServerMessage::SessionSuccess { .. } => Self::TAG_SESSION_SUCCESS,
            ServerMessage::SessionFailure => Self::TAG_SESSION_FAILURE,
            ServerMessage::PackagedResponse(_) => Self::TAG_PACKAGED_RESPONSE,
        }
    }

    pub fn to_json(&self) -> Value {
        let fields = match self {
            ServerMessage::SessionSuccess {
                session_id,
                request_cursor,
                profile,
            } => alloc::vec![
                Value::from(session_id.as_str()),
                Value::from(*request_cursor),
                profile.to_json(),
            ],
            ServerMessage::SessionFailure => Vec::new(),
            ServerMessage::PackagedResponse(pr) => pr.to_fields(),
        };
        envelope(self.tag(), fields)
    }

    pub fn from_json(value: &Value) -> Result<Self, ProtoError> {
        let (tag, body) = split_envelope(value)?;
        match tag {
            Self::TAG_SESSION_SUCCESS => {
                let [session_id, cursor, profile] = destructure::<3>(body, "SessionSuccess")?;
                Ok(ServerMessage::SessionSuccess {
                    session_id: expect_string(session_id, "SessionSuccess.assignedSessionId")?,
                    request_cursor: expect_u64(cursor, "SessionSuccess.requestCursor")?,
                    profile: Profile::from_json(profile)?,
                })
            }
            Self::TAG_SESSION_FAILURE => {
                destructure::<0>(body, "SessionFailure")?;
                Ok(ServerMessage::SessionFailure)
            }
            Self::TAG_PACKAGED_RESPONSE => {
                PackagedResponse::from_fields(body).map(ServerMessage::PackagedResponse)
            }
            other => Err(ProtoError::UnknownTag(String::from(other))),
        }
    }

    pub fn encode(&self) -> String {
        to_line(&self.to_json())
    }

    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }
}
