//! クライアント → リモート方向の制御メッセージ（CRequest）

use alloc::string::String;
use alloc::vec::Vec;

use serde_json::Value;

use crate::error::ProtoError;
use crate::json::{destructure, envelope, expect_string, expect_u64, split_envelope, to_line};
use crate::profile::Profile;

/// シーケンス番号付きでパッケージングされたアプリケーションリクエスト
///
/// wire 形式: `[requestId, responseCursorSnapshot, payload]`
#[derive(Debug, Clone, PartialEq)]
pub struct PackagedRequest {
    /// クライアントが採番したリクエスト ID（作成後は不変）
    pub request_id: u64,
    /// 送信時点のレスポンスカーソル。リモート側の再送バッファ解放に使われる
    pub response_cursor_snapshot: u64,
    /// アプリケーションペイロード（このレイヤーでは解釈しない）
    pub payload: Value,
}

impl PackagedRequest {
    pub fn new(request_id: u64, response_cursor_snapshot: u64, payload: Value) -> Self {
        PackagedRequest {
            request_id,
            response_cursor_snapshot,
            payload,
        }
    }

    fn to_fields(&self) -> Vec<Value> {
        alloc::vec![
            Value::from(self.request_id),
            Value::from(self.response_cursor_snapshot),
            self.payload.clone(),
        ]
    }

    fn from_fields(body: &Value) -> Result<Self, ProtoError> {
        let [request_id, cursor, payload] = destructure::<3>(body, "PackagedRequest")?;
        Ok(PackagedRequest {
            request_id: expect_u64(request_id, "PackagedRequest.requestId")?,
            response_cursor_snapshot: expect_u64(cursor, "PackagedRequest.responseCursorSnapshot")?,
            payload: payload.clone(),
        })
    }
}

/// クライアントが送信する制御メッセージ
///
/// wire 形式はすべて `[tag, [field, ...]]`。
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// OAuth 系クライアントが接続直後に送るトークン（リレーが消費する）
    Auth { token: String },
    /// 接続元ユーザーの名乗り（通常はリレーがクライアントの代わりに送る）
    Hello { profile: Profile },
    /// 新規セッションの作成
    CreateSession,
    /// 既存セッションへの再アタッチ
    AttachToSession {
        session_id: String,
        /// 次に受け取りたいレスポンス ID（再開位置）
        response_cursor: u64,
    },
    PackagedRequest(PackagedRequest),
}

impl ClientMessage {
    pub const TAG_AUTH: &'static str = "Auth";
    pub const TAG_HELLO: &'static str = "Hello";
    pub const TAG_CREATE_SESSION: &'static str = "CreateSession";
    pub const TAG_ATTACH_TO_SESSION: &'static str = "AttachToSession";
    pub const TAG_PACKAGED_REQUEST: &'static str = "PackagedRequest";

    /// wire 上のタグ文字列
    pub fn tag(&self) -> &'static str {
        match self {
            ClientMessage::Auth { .. } => Self::TAG_AUTH,
            ClientMessage::Hello { .. } => Self::TAG_HELLO,
            ClientMessage::CreateSession => Self::TAG_CREATE_SESSION,
            ClientMessage::AttachToSession { .. } => Self::TAG_ATTACH_TO_SESSION,
            ClientMessage::PackagedRequest(_) => Self::TAG_PACKAGED_REQUEST,
        }
    }

    pub fn to_json(&self) -> Value {
        let fields = match self {
            ClientMessage::Auth { token } => alloc::vec![Value::from(token.as_str())],
            ClientMessage::Hello { profile } => alloc::vec![profile.to_json()],
            ClientMessage::CreateSession => Vec::new(),
            ClientMessage::AttachToSession {
                session_id,
                response_cursor,
            } => alloc::vec![Value::from(session_id.as_str()), Value::from(*response_cursor)],
            ClientMessage::PackagedRequest(pr) => pr.to_fields(),
        };
        envelope(self.tag(), fields)
    }

    pub fn from_json(value: &Value) -> Result<Self, ProtoError> {
        let (tag, body) = split_envelope(value)?;
        match tag {
            Self::TAG_AUTH => {
                let [token] = destructure::<1>(body, "Auth")?;
                Ok(ClientMessage::Auth {
                    token: expect_string(token, "Auth.token")?,
                })
            }
            Self::TAG_HELLO => {
                let [profile] = destructure::<1>(body, "Hello")?;
                Ok(ClientMessage::Hello {
                    profile: Profile::from_json(profile)?,
                })
            }
            Self::TAG_CREATE_SESSION => {
                destructure::<0>(body, "CreateSession")?;
                Ok(ClientMessage::CreateSession)
            }
            Self::TAG_ATTACH_TO_SESSION => {
                let [session_id, cursor] = destructure::<2>(body, "AttachToSession")?;
                Ok(ClientMessage::AttachToSession {
                    session_id: expect_string(session_id, "AttachToSession.sessionId")?,
                    response_cursor: expect_u64(cursor, "AttachToSession.responseCursor")?,
                })
            }
            Self::TAG_PACKAGED_REQUEST => {
                PackagedRequest::from_fields(body).map(ClientMessage::PackagedRequest)
            }
            other => Err(ProtoError::UnknownTag(String::from(other))),
        }
    }

    /// 1 行の JSON 文字列にエンコードする（改行は含まない）
    pub fn encode(&self) -> String {
        to_line(&self.to_json())
    }

    /// JSON 文字列からデコードする
    ///
    /// # エラー
    /// - `ProtoError::InvalidJson`: JSON として不正
    /// - その他: 構造・要素数・型がタグの定義と一致しない
    pub fn decode(text: &str) -> Result<Self, ProtoError> {
        let value: Value = serde_json::from_str(text)?;
        Self::from_json(&value)
    }
}
