//! z2k-session エラー型

use alloc::string::String;

use z2k_framing::FrameError;
use z2k_proto::ProtoError;

/// トランスポートの切断理由
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportError {
    /// 相手側または途中経路によるクローズ（WebSocket のクローズコード付き）
    Closed { code: u16 },
    /// トランスポートのエラーイベント、または接続の開始自体に失敗
    Errored,
}

impl core::fmt::Display for TransportError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TransportError::Closed { code } => write!(f, "Transport closed (code {})", code),
            TransportError::Errored => write!(f, "Transport error"),
        }
    }
}

/// 受信ストリームの解析エラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// フレームの切り出しに失敗
    Framing(FrameError),
    /// エンベロープのデコードに失敗
    Envelope(ProtoError),
}

impl core::fmt::Display for DecodeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            DecodeError::Framing(e) => write!(f, "{}", e),
            DecodeError::Envelope(e) => write!(f, "{}", e),
        }
    }
}

impl From<FrameError> for DecodeError {
    fn from(e: FrameError) -> Self {
        DecodeError::Framing(e)
    }
}

impl From<ProtoError> for DecodeError {
    fn from(e: ProtoError) -> Self {
        DecodeError::Envelope(e)
    }
}

/// セッション状態機械が上位に報告するイベント
///
/// 状態機械自体は失敗しない（すべての入力に対して遷移が定義されている）ので、
/// これは `Result` ではなく `Effect::Report` として返される。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// トランスポートの切断（再接続で自動回復する）
    Transport(TransportError),
    /// 受信メッセージが壊れている（接続を切って再接続する）
    ProtocolDecode(DecodeError),
    /// リモートがセッションを拒否した（終端状態。アプリ側で再初期化が必要）
    SessionRejected,
    /// 期待と異なる responseId を受信した（破棄してリモートの再送を待つ）
    ResponseOutOfOrder { expected: u64, received: u64 },
}

impl SessionError {
    /// プロトコル内で自動回復できるか
    pub fn is_recoverable(&self) -> bool {
        match self {
            SessionError::Transport(_) | SessionError::ResponseOutOfOrder { .. } => true,
            SessionError::ProtocolDecode(_) | SessionError::SessionRejected => false,
        }
    }
}

impl core::fmt::Display for SessionError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            SessionError::Transport(e) => write!(f, "{}", e),
            SessionError::ProtocolDecode(e) => write!(f, "Protocol decode error: {}", e),
            SessionError::SessionRejected => write!(f, "Session rejected by remote"),
            SessionError::ResponseOutOfOrder { expected, received } => write!(
                f,
                "Expected response id {}, got {}. Ignoring",
                expected, received
            ),
        }
    }
}

/// リモート側（SessionTerminator）のプロトコル違反
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminatorError {
    /// 開かれていないチャンネルからのメッセージ
    UnknownChannel(u64),
    /// Hello を受信済みのチャンネルに再度 Hello が来た
    DuplicateHello,
    /// Hello より先にセッション操作が来た
    MissingHello,
    /// リモート側では受け付けないメッセージ
    UnexpectedMessage(&'static str),
    /// 存在しないセッションへの応答
    UnknownSession(String),
}

impl core::fmt::Display for TerminatorError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TerminatorError::UnknownChannel(id) => write!(f, "Unknown channel {}", id),
            TerminatorError::DuplicateHello => write!(f, "Received duplicate Hello message"),
            TerminatorError::MissingHello => {
                write!(f, "Session operation before Hello was received")
            }
            TerminatorError::UnexpectedMessage(tag) => write!(f, "Unexpected message {}", tag),
            TerminatorError::UnknownSession(id) => write!(f, "Unknown session {}", id),
        }
    }
}

/// リレーの認証ハンドシェイクのエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
    /// 最初のメッセージを解析できない
    Decode(DecodeError),
    /// 最初のメッセージが Auth ではない
    ExpectedAuth { got: &'static str },
}

impl core::fmt::Display for HandshakeError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            HandshakeError::Decode(e) => write!(f, "Handshake decode error: {}", e),
            HandshakeError::ExpectedAuth { got } => {
                write!(f, "Expected first message to be an Auth message, got {}", got)
            }
        }
    }
}

impl From<DecodeError> for HandshakeError {
    fn from(e: DecodeError) -> Self {
        HandshakeError::Decode(e)
    }
}

impl From<FrameError> for HandshakeError {
    fn from(e: FrameError) -> Self {
        HandshakeError::Decode(DecodeError::Framing(e))
    }
}

impl From<ProtoError> for HandshakeError {
    fn from(e: ProtoError) -> Self {
        HandshakeError::Decode(DecodeError::Envelope(e))
    }
}
