//! リレー側の認証ハンドシェイク
//!
//! リレーはプロトコル本体の前に `Auth{token}` を 1 通だけ受け取り、トークンを
//! （外部で）検証してからソケットをセッション終端に引き渡す。
//! 検証中に届いた断片はここに溜めておき、`into_residual()` で後段の
//! `Chunker::with_residual` に渡す。
//!
//! ```text
//! gate.push(bytes)? → Some(token) → 検証 → gate.push(bytes)? ...
//!                                          → Chunker::with_residual(gate.into_residual())
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use z2k_framing::Chunker;
use z2k_proto::ClientMessage;

use crate::error::HandshakeError;

/// 認証メッセージを取り出すゲート
#[derive(Debug, Default)]
pub struct AuthGate {
    chunker: Chunker,
    token: Option<String>,
}

impl AuthGate {
    pub fn new() -> Self {
        AuthGate {
            chunker: Chunker::new(),
            token: None,
        }
    }

    /// 受信断片を積む
    ///
    /// # 戻り値
    /// - `Some(token)`: この呼び出しで `Auth` メッセージが完結した
    /// - `None`: まだ完結していない、または既にトークンを返した後
    ///
    /// # エラー
    /// 最初のメッセージが壊れている、または `Auth` ではない
    pub fn push(&mut self, fragment: &[u8]) -> Result<Option<String>, HandshakeError> {
        self.chunker.push_bytes(fragment);
        if self.token.is_some() {
            return Ok(None);
        }
        let Some(text) = self.chunker.try_unwrap_next()? else {
            return Ok(None);
        };
        match ClientMessage::decode(&text)? {
            ClientMessage::Auth { token } => {
                self.token = Some(token.clone());
                Ok(Some(token))
            }
            other => Err(HandshakeError::ExpectedAuth { got: other.tag() }),
        }
    }

    /// 受け取ったトークン
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    pub fn is_authenticated(&self) -> bool {
        self.token.is_some()
    }

    /// `Auth` 以降に届いた未処理バイト列
    pub fn into_residual(self) -> Vec<u8> {
        self.chunker.into_residual()
    }
}
