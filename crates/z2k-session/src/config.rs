//! セッション設定

use alloc::string::String;

use crate::{INITIAL_REQUEST_ID, RECONNECT_INTERVAL_MS};

/// `SessionMachine` の設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// 最初に割り当てる requestId
    pub initial_request_id: u64,
    /// 切断から再接続を試みるまでの待ち時間（ミリ秒）
    pub reconnect_delay_ms: u64,
    /// 設定されていれば、各接続の最初に `Auth{token}` を送る
    pub auth_token: Option<String>,
}

impl SessionConfig {
    pub fn with_reconnect_delay_ms(mut self, delay_ms: u64) -> Self {
        self.reconnect_delay_ms = delay_ms;
        self
    }

    pub fn with_auth_token(mut self, token: impl Into<String>) -> Self {
        self.auth_token = Some(token.into());
        self
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        SessionConfig {
            initial_request_id: INITIAL_REQUEST_ID,
            reconnect_delay_ms: RECONNECT_INTERVAL_MS,
            auth_token: None,
        }
    }
}
