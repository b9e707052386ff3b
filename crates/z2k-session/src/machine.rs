//! クライアント側セッション状態機械
//!
//! トランスポートを直接持たず、入力（接続開始・open・受信データ・切断・送信要求）ごとに
//! 実行すべき `Effect` のリストを返す。WebSocket の生成やタイマーの登録は
//! 呼び出し側（`z2k-wasm` クレート）が担当する。

use alloc::string::String;
use alloc::vec::Vec;

use serde::Serialize;
use z2k_framing::Chunker;
use z2k_proto::{ClientMessage, PackagedRequest, PackagedResponse, Payload, Profile, ServerMessage};

use crate::config::SessionConfig;
use crate::error::{DecodeError, SessionError, TransportError};
use crate::retransmit::RetransmitBuffer;
use crate::INITIAL_RESPONSE_ID;

/// 接続 / セッションの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum State {
    /// 初期状態、および切断後の状態
    Disconnected,
    /// トランスポートを開いている最中
    AwaitingConnect,
    /// トランスポートは開いたが、セッションの確立待ち
    Connected,
    /// セッションにアタッチ済み（リクエストを送信できる）
    AttachedToSession,
    /// リモートがセッションを拒否した（終端）
    SessionFailure,
}

impl State {
    pub fn as_str(&self) -> &'static str {
        match self {
            State::Disconnected => "Disconnected",
            State::AwaitingConnect => "AwaitingConnect",
            State::Connected => "Connected",
            State::AttachedToSession => "AttachedToSession",
            State::SessionFailure => "SessionFailure",
        }
    }
}

impl core::fmt::Display for State {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 呼び出し側が実行する副作用
///
/// リストの順に実行すること。
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// 新しいトランスポートを開く（古いものは既に破棄済み）
    OpenTransport,
    /// 現在のトランスポートを閉じて破棄する
    CloseTransport,
    /// 終端付きのテキストをトランスポートに送る
    Send(String),
    /// `delay_ms` 後に `connect()` を呼ぶ
    ScheduleReconnect { delay_ms: u64 },
    /// 状態変化コールバックを呼ぶ
    StateChanged(State),
    /// レスポンスコールバックにペイロードを渡す
    Deliver(Payload),
    /// ログ / 上位への通知
    Report(SessionError),
}

/// 診断表示用の統計情報
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStats {
    pub state: State,
    pub session_id: Option<String>,
    /// 次に割り当てる requestId
    pub next_request_id: u64,
    /// 次に受け入れる responseId
    pub response_cursor: u64,
    /// 未確認リクエスト数
    pub pending_requests: usize,
    /// トランスポートを開こうとした回数
    pub connect_attempts: u64,
}

/// セッション状態機械
pub struct SessionMachine {
    config: SessionConfig,
    state: State,
    /// 現在の接続用のフレーム分割器（接続ごとに作り直す）
    chunker: Chunker,
    session_id: Option<String>,
    profile: Option<Profile>,
    next_request_id: u64,
    response_cursor: u64,
    unacknowledged: RetransmitBuffer<PackagedRequest>,
    connect_attempts: u64,
}

impl SessionMachine {
    pub fn new(config: SessionConfig) -> Self {
        SessionMachine {
            next_request_id: config.initial_request_id,
            config,
            state: State::Disconnected,
            chunker: Chunker::new(),
            session_id: None,
            profile: None,
            response_cursor: INITIAL_RESPONSE_ID,
            unacknowledged: RetransmitBuffer::new(),
            connect_attempts: 0,
        }
    }

    // =========================================================
    // 入力
    // =========================================================

    /// 最初の接続を開始する
    pub fn start(&mut self) -> Vec<Effect> {
        self.connect()
    }

    /// トランスポートを開く
    ///
    /// `Disconnected` 以外では何もしない。再接続タイマーもここを呼ぶ。
    pub fn connect(&mut self) -> Vec<Effect> {
        if self.state != State::Disconnected {
            return Vec::new();
        }
        self.connect_attempts += 1;
        self.chunker = Chunker::new();
        let mut effects = Vec::new();
        self.set_state(State::AwaitingConnect, &mut effects);
        effects.push(Effect::OpenTransport);
        effects
    }

    /// トランスポートの open イベント
    ///
    /// セッション ID がなければ `CreateSession`、あれば現在のレスポンスカーソルで
    /// `AttachToSession` を送る。
    pub fn on_transport_open(&mut self) -> Vec<Effect> {
        if self.state != State::AwaitingConnect {
            return Vec::new();
        }
        let mut effects = Vec::new();
        if let Some(token) = &self.config.auth_token {
            Self::push_send(
                &ClientMessage::Auth {
                    token: token.clone(),
                },
                &mut effects,
            );
        }
        let opener = match &self.session_id {
            None => ClientMessage::CreateSession,
            Some(id) => ClientMessage::AttachToSession {
                session_id: id.clone(),
                response_cursor: self.response_cursor,
            },
        };
        Self::push_send(&opener, &mut effects);
        self.set_state(State::Connected, &mut effects);
        effects
    }

    /// トランスポートの close / error イベント
    ///
    /// セッション ID・カウンタ・再送バッファはそのまま保持する。
    pub fn on_transport_lost(&mut self, cause: TransportError) -> Vec<Effect> {
        match self.state {
            // 既に処理済み（error の後に close が来る場合など）
            State::Disconnected | State::SessionFailure => Vec::new(),
            _ => {
                let mut effects = Vec::new();
                self.drop_connection(SessionError::Transport(cause), &mut effects);
                effects
            }
        }
    }

    /// トランスポートから届いたデータ断片
    ///
    /// 完結したメッセージをすべて処理する。デコードに失敗したら接続を切って再接続する。
    pub fn on_transport_data(&mut self, fragment: &[u8]) -> Vec<Effect> {
        let mut effects = Vec::new();
        if matches!(self.state, State::Disconnected | State::SessionFailure) {
            return effects;
        }
        self.chunker.push_bytes(fragment);
        loop {
            let message = match self.next_message() {
                Ok(Some(message)) => message,
                Ok(None) => break,
                Err(e) => {
                    self.drop_connection(SessionError::ProtocolDecode(e), &mut effects);
                    break;
                }
            };
            self.handle_message(message, &mut effects);
            if self.state == State::SessionFailure {
                break;
            }
        }
        effects
    }

    /// アプリケーションのリクエストを送る
    ///
    /// 状態にかかわらず再送バッファに積む。`AttachedToSession` のときだけ即座に送信し、
    /// それ以外ではアタッチ後のキャッチアップで送られる。
    pub fn send_request(&mut self, payload: Payload) -> Vec<Effect> {
        let request_id = self.next_request_id;
        self.next_request_id += 1;
        let request = PackagedRequest::new(request_id, self.response_cursor, payload);

        let mut effects = Vec::new();
        if self.state == State::AttachedToSession {
            Self::push_send(&ClientMessage::PackagedRequest(request.clone()), &mut effects);
        }
        self.unacknowledged.push_back(request);
        effects
    }

    // =========================================================
    // 受信メッセージの処理
    // =========================================================

    fn next_message(&mut self) -> Result<Option<ServerMessage>, DecodeError> {
        match self.chunker.try_unwrap_next()? {
            Some(text) => Ok(Some(ServerMessage::decode(&text)?)),
            None => Ok(None),
        }
    }

    fn handle_message(&mut self, message: ServerMessage, effects: &mut Vec<Effect>) {
        match message {
            ServerMessage::SessionSuccess {
                session_id,
                request_cursor,
                profile,
            } => self.on_session_success(session_id, request_cursor, profile, effects),
            ServerMessage::SessionFailure => {
                self.set_state(State::SessionFailure, effects);
                effects.push(Effect::Report(SessionError::SessionRejected));
                effects.push(Effect::CloseTransport);
            }
            ServerMessage::PackagedResponse(response) => {
                self.on_packaged_response(response, effects)
            }
        }
    }

    fn on_session_success(
        &mut self,
        session_id: String,
        request_cursor: u64,
        profile: Profile,
        effects: &mut Vec<Effect>,
    ) {
        self.session_id = Some(session_id);
        self.profile = Some(profile);
        self.unacknowledged.prune_below(request_cursor);

        // キャッチアップ: 残っている未確認リクエストをバッファ順に再送する。
        // StateChanged より前に積むので、状態通知を受けて送られた新しいリクエストは
        // 必ず再送分の後ろに並ぶ。
        for request in self.unacknowledged.iter() {
            Self::push_send(&ClientMessage::PackagedRequest(request.clone()), effects);
        }
        self.set_state(State::AttachedToSession, effects);
    }

    fn on_packaged_response(&mut self, response: PackagedResponse, effects: &mut Vec<Effect>) {
        if response.response_id != self.response_cursor {
            effects.push(Effect::Report(SessionError::ResponseOutOfOrder {
                expected: self.response_cursor,
                received: response.response_id,
            }));
            return;
        }
        self.response_cursor += 1;
        self.unacknowledged.prune_below(response.request_cursor);
        effects.push(Effect::Deliver(response.payload));
    }

    // =========================================================
    // 内部ヘルパー
    // =========================================================

    fn drop_connection(&mut self, cause: SessionError, effects: &mut Vec<Effect>) {
        effects.push(Effect::Report(cause));
        effects.push(Effect::CloseTransport);
        self.set_state(State::Disconnected, effects);
        effects.push(Effect::ScheduleReconnect {
            delay_ms: self.config.reconnect_delay_ms,
        });
    }

    fn set_state(&mut self, state: State, effects: &mut Vec<Effect>) {
        if self.state != state {
            self.state = state;
            effects.push(Effect::StateChanged(state));
        }
    }

    fn push_send(message: &ClientMessage, effects: &mut Vec<Effect>) {
        effects.push(Effect::Send(Chunker::wrap(&message.encode())));
    }

    // =========================================================
    // アクセサ
    // =========================================================

    pub fn state(&self) -> State {
        self.state
    }

    pub fn session_id(&self) -> Option<&str> {
        self.session_id.as_deref()
    }

    pub fn profile(&self) -> Option<&Profile> {
        self.profile.as_ref()
    }

    pub fn response_cursor(&self) -> u64 {
        self.response_cursor
    }

    pub fn next_request_id(&self) -> u64 {
        self.next_request_id
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// 再送バッファのサイズ（UI / 診断表示用）
    pub fn num_pending_requests(&self) -> usize {
        self.unacknowledged.len()
    }

    pub fn pending_requests(&self) -> impl Iterator<Item = &PackagedRequest> {
        self.unacknowledged.iter()
    }

    pub fn stats(&self) -> SessionStats {
        SessionStats {
            state: self.state,
            session_id: self.session_id.clone(),
            next_request_id: self.next_request_id,
            response_cursor: self.response_cursor,
            pending_requests: self.unacknowledged.len(),
            connect_attempts: self.connect_attempts,
        }
    }
}

impl Default for SessionMachine {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}
