//! リモート側のセッション終端（参照実装）
//!
//! セッション ID の発行、リクエストカーソルの管理、レスポンスの採番と再送を行う。
//! クライアントの `SessionMachine` と同じく I/O を持たず、処理結果を `Action` で返す。
//!
//! ## チャンネルとセッション
//! ```text
//! チャンネル = 1 本のトランスポート接続（リレーが Hello{profile} を最初に送る）
//! セッション = 接続をまたいで続く論理的な会話（チャンネルは付け替えられる）
//! ```

use alloc::collections::BTreeMap;
use alloc::format;
use alloc::string::String;
use alloc::vec;
use alloc::vec::Vec;

use z2k_proto::{ClientMessage, PackagedRequest, PackagedResponse, Payload, Profile, ServerMessage};

use crate::error::TerminatorError;
use crate::retransmit::RetransmitBuffer;
use crate::{INITIAL_REQUEST_ID, INITIAL_RESPONSE_ID};

/// チャンネル（接続）の識別子
pub type ChannelId = u64;

/// 呼び出し側が実行する処理
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// チャンネルにメッセージを送る
    Send {
        channel: ChannelId,
        message: ServerMessage,
    },
    /// 受理したリクエストを上流（アプリケーション）に渡す
    Deliver {
        session_id: String,
        request_id: u64,
        payload: Payload,
    },
    /// 古いチャンネルを閉じる（セッションが別の接続に付け替えられた）
    Shutdown { channel: ChannelId },
}

#[derive(Debug, Default)]
struct Channel {
    /// Hello で受け取ったプロファイル
    profile: Option<Profile>,
    /// アタッチ中のセッション
    session_id: Option<String>,
    /// 別のチャンネルにセッションを奪われた
    retired: bool,
}

#[derive(Debug)]
struct RemoteSession {
    profile: Profile,
    channel: Option<ChannelId>,
    /// 次に受理する requestId（= クライアントに通知するリクエストカーソル）
    next_expected_request_id: u64,
    next_response_id: u64,
    unacknowledged: RetransmitBuffer<PackagedResponse>,
}

/// セッション終端
pub struct SessionTerminator {
    prefix: String,
    next_serial: u64,
    next_channel: ChannelId,
    channels: BTreeMap<ChannelId, Channel>,
    sessions: BTreeMap<String, RemoteSession>,
}

impl SessionTerminator {
    /// # 引数
    /// - `prefix`: 発行するセッション ID の接頭辞（`"{prefix}:{serial}"`）
    pub fn new(prefix: impl Into<String>) -> Self {
        SessionTerminator {
            prefix: prefix.into(),
            next_serial: 0,
            next_channel: 0,
            channels: BTreeMap::new(),
            sessions: BTreeMap::new(),
        }
    }

    /// 新しい接続を登録する
    pub fn open_channel(&mut self) -> ChannelId {
        self.next_channel += 1;
        let id = self.next_channel;
        self.channels.insert(id, Channel::default());
        id
    }

    /// 接続の切断
    ///
    /// セッションは残り、次の `AttachToSession` を待つ。
    ///
    /// # 戻り値
    /// 登録済みのチャンネルだったか
    pub fn close_channel(&mut self, channel: ChannelId) -> bool {
        let Some(slot) = self.channels.remove(&channel) else {
            return false;
        };
        let Some(session_id) = slot.session_id else {
            return true;
        };
        if let Some(session) = self.sessions.get_mut(&session_id) {
            if session.channel == Some(channel) {
                session.channel = None;
            }
        }
        true
    }

    /// チャンネルから届いたメッセージを処理する
    ///
    /// # エラー
    /// 未登録チャンネル、Hello の欠落 / 重複、リモート側で受け付けないメッセージ
    pub fn handle(
        &mut self,
        channel: ChannelId,
        message: ClientMessage,
    ) -> Result<Vec<Action>, TerminatorError> {
        let slot = self
            .channels
            .get_mut(&channel)
            .ok_or(TerminatorError::UnknownChannel(channel))?;
        if slot.retired {
            return Ok(Vec::new());
        }

        match message {
            ClientMessage::Auth { .. } => {
                Err(TerminatorError::UnexpectedMessage(ClientMessage::TAG_AUTH))
            }
            ClientMessage::Hello { profile } => {
                if slot.profile.is_some() {
                    return Err(TerminatorError::DuplicateHello);
                }
                slot.profile = Some(profile);
                Ok(Vec::new())
            }
            ClientMessage::CreateSession => self.create_session(channel),
            ClientMessage::AttachToSession {
                session_id,
                response_cursor,
            } => self.attach_to_session(channel, session_id, response_cursor),
            ClientMessage::PackagedRequest(request) => self.packaged_request(channel, request),
        }
    }

    /// セッションにレスポンスを送る
    ///
    /// responseId は 0 から隙間なく採番し、現在のリクエストカーソルを付ける。
    /// 接続がなければバッファに積むだけで、次のアタッチ時に再送される。
    ///
    /// # エラー
    /// 存在しないセッション
    pub fn respond(
        &mut self,
        session_id: &str,
        payload: Payload,
    ) -> Result<Vec<Action>, TerminatorError> {
        let session = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| TerminatorError::UnknownSession(String::from(session_id)))?;
        let response = PackagedResponse::new(
            session.next_response_id,
            session.next_expected_request_id,
            payload,
        );
        session.next_response_id += 1;

        let mut actions = Vec::new();
        if let Some(channel) = session.channel {
            actions.push(Action::Send {
                channel,
                message: ServerMessage::PackagedResponse(response.clone()),
            });
        }
        session.unacknowledged.push_back(response);
        Ok(actions)
    }

    /// セッションを破棄する（期限切れ・ログアウトなど）
    ///
    /// アタッチ中のチャンネルは退役させて閉じる。以後そのセッションへの
    /// `AttachToSession` は `SessionFailure` になる。
    ///
    /// # エラー
    /// 存在しないセッション
    pub fn drop_session(&mut self, session_id: &str) -> Result<Vec<Action>, TerminatorError> {
        let session = self
            .sessions
            .remove(session_id)
            .ok_or_else(|| TerminatorError::UnknownSession(String::from(session_id)))?;
        let Some(channel) = session.channel else {
            return Ok(Vec::new());
        };
        if let Some(slot) = self.channels.get_mut(&channel) {
            slot.session_id = None;
            slot.retired = true;
        }
        Ok(vec![Action::Shutdown { channel }])
    }

    // =========================================================
    // メッセージごとの処理
    // =========================================================

    /// Hello 済みで、まだセッションにアタッチしていないチャンネルのプロファイル
    fn greeted_profile(
        &self,
        channel: ChannelId,
        tag: &'static str,
    ) -> Result<Profile, TerminatorError> {
        let slot = self
            .channels
            .get(&channel)
            .ok_or(TerminatorError::UnknownChannel(channel))?;
        let profile = slot.profile.clone().ok_or(TerminatorError::MissingHello)?;
        if slot.session_id.is_some() {
            return Err(TerminatorError::UnexpectedMessage(tag));
        }
        Ok(profile)
    }

    fn create_session(&mut self, channel: ChannelId) -> Result<Vec<Action>, TerminatorError> {
        let profile = self.greeted_profile(channel, ClientMessage::TAG_CREATE_SESSION)?;
        self.next_serial += 1;
        let session_id = format!("{}:{}", self.prefix, self.next_serial);

        let session = RemoteSession {
            profile: profile.clone(),
            channel: Some(channel),
            next_expected_request_id: INITIAL_REQUEST_ID,
            next_response_id: INITIAL_RESPONSE_ID,
            unacknowledged: RetransmitBuffer::new(),
        };
        let request_cursor = session.next_expected_request_id;
        self.sessions.insert(session_id.clone(), session);
        self.bind(channel, &session_id);

        Ok(vec![Action::Send {
            channel,
            message: ServerMessage::SessionSuccess {
                session_id,
                request_cursor,
                profile,
            },
        }])
    }

    fn attach_to_session(
        &mut self,
        channel: ChannelId,
        session_id: String,
        response_cursor: u64,
    ) -> Result<Vec<Action>, TerminatorError> {
        let profile = self.greeted_profile(channel, ClientMessage::TAG_ATTACH_TO_SESSION)?;
        let Some(session) = self
            .sessions
            .get_mut(&session_id)
            .filter(|session| session.profile == profile)
        else {
            return Ok(vec![Action::Send {
                channel,
                message: ServerMessage::SessionFailure,
            }]);
        };

        let mut actions = Vec::new();
        let previous = session.channel.replace(channel);
        session.unacknowledged.prune_below(response_cursor);
        actions.push(Action::Send {
            channel,
            message: ServerMessage::SessionSuccess {
                session_id: session_id.clone(),
                request_cursor: session.next_expected_request_id,
                profile,
            },
        });
        for response in session.unacknowledged.iter_from(response_cursor) {
            actions.push(Action::Send {
                channel,
                message: ServerMessage::PackagedResponse(response.clone()),
            });
        }

        if let Some(old) = previous.filter(|old| *old != channel) {
            if let Some(slot) = self.channels.get_mut(&old) {
                slot.session_id = None;
                slot.retired = true;
            }
            actions.insert(0, Action::Shutdown { channel: old });
        }
        self.bind(channel, &session_id);
        Ok(actions)
    }

    fn packaged_request(
        &mut self,
        channel: ChannelId,
        request: PackagedRequest,
    ) -> Result<Vec<Action>, TerminatorError> {
        let slot = self
            .channels
            .get(&channel)
            .ok_or(TerminatorError::UnknownChannel(channel))?;
        let session_id = match (&slot.profile, &slot.session_id) {
            (None, _) => return Err(TerminatorError::MissingHello),
            (Some(_), None) => {
                return Err(TerminatorError::UnexpectedMessage(
                    ClientMessage::TAG_PACKAGED_REQUEST,
                ))
            }
            (Some(_), Some(id)) => id.clone(),
        };
        let session = self
            .sessions
            .get_mut(&session_id)
            .ok_or_else(|| TerminatorError::UnknownSession(session_id.clone()))?;

        session
            .unacknowledged
            .prune_below(request.response_cursor_snapshot);

        // キャッチアップで再送された処理済みリクエストは黙って捨てる
        if request.request_id != session.next_expected_request_id {
            return Ok(Vec::new());
        }
        session.next_expected_request_id += 1;
        Ok(vec![Action::Deliver {
            session_id,
            request_id: request.request_id,
            payload: request.payload,
        }])
    }

    fn bind(&mut self, channel: ChannelId, session_id: &str) {
        if let Some(slot) = self.channels.get_mut(&channel) {
            slot.session_id = Some(String::from(session_id));
        }
    }

    // =========================================================
    // アクセサ
    // =========================================================

    pub fn num_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &str> {
        self.sessions.keys().map(String::as_str)
    }

    /// セッションが次に受理する requestId
    pub fn request_cursor(&self, session_id: &str) -> Option<u64> {
        self.sessions
            .get(session_id)
            .map(|s| s.next_expected_request_id)
    }

    /// クライアントの確認待ちレスポンス数
    pub fn num_pending_responses(&self, session_id: &str) -> Option<usize> {
        self.sessions.get(session_id).map(|s| s.unacknowledged.len())
    }

    /// セッションが現在アタッチしているチャンネル
    pub fn channel_of(&self, session_id: &str) -> Option<ChannelId> {
        self.sessions.get(session_id).and_then(|s| s.channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::string::ToString;
    use serde_json::json;

    fn alice() -> Profile {
        Profile::new("alice", "Alice Liddell")
    }

    fn hello(terminator: &mut SessionTerminator, profile: Profile) -> ChannelId {
        let channel = terminator.open_channel();
        let actions = terminator
            .handle(channel, ClientMessage::Hello { profile })
            .unwrap();
        assert!(actions.is_empty());
        channel
    }

    fn request(id: u64, snapshot: u64, payload: Payload) -> ClientMessage {
        ClientMessage::PackagedRequest(PackagedRequest::new(id, snapshot, payload))
    }

    fn attach(session_id: &str, response_cursor: u64) -> ClientMessage {
        ClientMessage::AttachToSession {
            session_id: session_id.to_string(),
            response_cursor,
        }
    }

    fn response_ids(actions: &[Action]) -> Vec<u64> {
        actions
            .iter()
            .filter_map(|a| match a {
                Action::Send {
                    message: ServerMessage::PackagedResponse(r),
                    ..
                } => Some(r.response_id),
                _ => None,
            })
            .collect()
    }

    /// セッションを作成して ID を返す
    fn created(terminator: &mut SessionTerminator) -> (ChannelId, String) {
        let channel = hello(terminator, alice());
        let actions = terminator
            .handle(channel, ClientMessage::CreateSession)
            .unwrap();
        match &actions[..] {
            [Action::Send {
                message: ServerMessage::SessionSuccess { session_id, .. },
                ..
            }] => (channel, session_id.clone()),
            other => panic!("SessionSuccess を期待: {:?}", other),
        }
    }

    #[test]
    fn test_create_session_assigns_ids() {
        let mut terminator = SessionTerminator::new("z2k");
        let channel = hello(&mut terminator, alice());
        let actions = terminator
            .handle(channel, ClientMessage::CreateSession)
            .unwrap();
        assert_eq!(
            actions,
            vec![Action::Send {
                channel,
                message: ServerMessage::SessionSuccess {
                    session_id: "z2k:1".to_string(),
                    request_cursor: 1000,
                    profile: alice(),
                },
            }]
        );

        let (_, second) = created(&mut terminator);
        assert_eq!(second, "z2k:2", "ID は一意");
        assert_eq!(terminator.num_sessions(), 2);
    }

    #[test]
    fn test_hello_required_once() {
        let mut terminator = SessionTerminator::new("z2k");
        let channel = terminator.open_channel();
        assert_eq!(
            terminator.handle(channel, ClientMessage::CreateSession),
            Err(TerminatorError::MissingHello)
        );
        terminator
            .handle(channel, ClientMessage::Hello { profile: alice() })
            .unwrap();
        assert_eq!(
            terminator.handle(channel, ClientMessage::Hello { profile: alice() }),
            Err(TerminatorError::DuplicateHello)
        );
    }

    #[test]
    fn test_unknown_channel_and_auth_rejected() {
        let mut terminator = SessionTerminator::new("z2k");
        assert_eq!(
            terminator.handle(42, ClientMessage::CreateSession),
            Err(TerminatorError::UnknownChannel(42))
        );
        let channel = terminator.open_channel();
        assert_eq!(
            terminator.handle(
                channel,
                ClientMessage::Auth {
                    token: "t".to_string()
                }
            ),
            Err(TerminatorError::UnexpectedMessage("Auth"))
        );
    }

    #[test]
    fn test_request_delivered_in_order_and_duplicates_dropped() {
        let mut terminator = SessionTerminator::new("z2k");
        let (channel, id) = created(&mut terminator);

        let actions = terminator.handle(channel, request(1000, 0, json!("a"))).unwrap();
        assert_eq!(
            actions,
            vec![Action::Deliver {
                session_id: id.clone(),
                request_id: 1000,
                payload: json!("a"),
            }]
        );
        assert!(
            terminator.handle(channel, request(1000, 0, json!("a"))).unwrap().is_empty(),
            "重複は捨てる"
        );
        assert!(
            terminator.handle(channel, request(1002, 0, json!("c"))).unwrap().is_empty(),
            "先走りも捨てる"
        );
        assert_eq!(terminator.request_cursor(&id), Some(1001));
    }

    #[test]
    fn test_respond_stamps_request_cursor() {
        let mut terminator = SessionTerminator::new("z2k");
        let (channel, id) = created(&mut terminator);
        terminator.handle(channel, request(1000, 0, json!("q"))).unwrap();

        let actions = terminator.respond(&id, json!("r")).unwrap();
        assert_eq!(
            actions,
            vec![Action::Send {
                channel,
                message: ServerMessage::PackagedResponse(PackagedResponse::new(
                    0,
                    1001,
                    json!("r")
                )),
            }]
        );
        assert_eq!(terminator.num_pending_responses(&id), Some(1));
        assert_eq!(
            terminator.respond("z2k:99", json!(null)),
            Err(TerminatorError::UnknownSession("z2k:99".to_string()))
        );
    }

    #[test]
    fn test_request_snapshot_prunes_responses() {
        let mut terminator = SessionTerminator::new("z2k");
        let (channel, id) = created(&mut terminator);
        for n in 0..3 {
            terminator.respond(&id, json!(n)).unwrap();
        }
        terminator.handle(channel, request(1000, 2, json!("q"))).unwrap();
        assert_eq!(terminator.num_pending_responses(&id), Some(1));
    }

    #[test]
    fn test_attach_replays_from_cursor() {
        let mut terminator = SessionTerminator::new("z2k");
        let (old, id) = created(&mut terminator);
        for n in 0..4 {
            terminator.respond(&id, json!(n)).unwrap();
        }
        terminator.close_channel(old);
        assert_eq!(terminator.channel_of(&id), None);
        assert!(terminator.respond(&id, json!(4)).unwrap().is_empty(), "接続なしでは送らない");

        let channel = hello(&mut terminator, alice());
        let actions = terminator.handle(channel, attach(&id, 2)).unwrap();
        assert!(matches!(
            &actions[0],
            Action::Send {
                message: ServerMessage::SessionSuccess { request_cursor: 1000, .. },
                ..
            }
        ));
        assert_eq!(response_ids(&actions), [2, 3, 4]);
        assert_eq!(terminator.num_pending_responses(&id), Some(3));
        assert_eq!(terminator.channel_of(&id), Some(channel));
    }

    #[test]
    fn test_attach_retires_previous_channel() {
        let mut terminator = SessionTerminator::new("z2k");
        let (old, id) = created(&mut terminator);
        let channel = hello(&mut terminator, alice());
        let actions = terminator.handle(channel, attach(&id, 0)).unwrap();
        assert_eq!(actions[0], Action::Shutdown { channel: old });

        assert!(
            terminator.handle(old, request(1000, 0, json!("stale"))).unwrap().is_empty(),
            "古いチャンネルからのリクエストは無視"
        );
        assert_eq!(terminator.request_cursor(&id), Some(1000));
        let actions = terminator.respond(&id, json!("r")).unwrap();
        assert!(matches!(&actions[..], [Action::Send { channel: c, .. }] if *c == channel));
    }

    #[test]
    fn test_attach_unknown_session_fails() {
        let mut terminator = SessionTerminator::new("z2k");
        let channel = hello(&mut terminator, alice());
        let actions = terminator.handle(channel, attach("z2k:7", 0)).unwrap();
        assert_eq!(
            actions,
            vec![Action::Send {
                channel,
                message: ServerMessage::SessionFailure
            }]
        );
    }

    #[test]
    fn test_attach_with_other_profile_fails() {
        let mut terminator = SessionTerminator::new("z2k");
        let (_, id) = created(&mut terminator);
        let channel = hello(&mut terminator, Profile::new("mallory", "Mallory"));
        let actions = terminator.handle(channel, attach(&id, 0)).unwrap();
        assert_eq!(
            actions,
            vec![Action::Send {
                channel,
                message: ServerMessage::SessionFailure
            }]
        );
    }

    #[test]
    fn test_request_before_session_rejected() {
        let mut terminator = SessionTerminator::new("z2k");
        let channel = hello(&mut terminator, alice());
        assert_eq!(
            terminator.handle(channel, request(1000, 0, json!("q"))),
            Err(TerminatorError::UnexpectedMessage("PackagedRequest"))
        );
    }

    #[test]
    fn test_drop_session_shuts_down_channel() {
        let mut terminator = SessionTerminator::new("z2k");
        let (channel, id) = created(&mut terminator);

        assert_eq!(
            terminator.drop_session(&id),
            Ok(vec![Action::Shutdown { channel }])
        );
        assert_eq!(terminator.num_sessions(), 0);
        assert!(
            terminator.handle(channel, request(1000, 0, json!("q"))).unwrap().is_empty(),
            "退役したチャンネルの入力は無視"
        );
        assert_eq!(
            terminator.respond(&id, json!("r")),
            Err(TerminatorError::UnknownSession(id.clone()))
        );

        let next = hello(&mut terminator, alice());
        assert_eq!(
            terminator.handle(next, attach(&id, 0)).unwrap(),
            vec![Action::Send {
                channel: next,
                message: ServerMessage::SessionFailure
            }]
        );
    }

    #[test]
    fn test_drop_detached_session() {
        let mut terminator = SessionTerminator::new("z2k");
        let (channel, id) = created(&mut terminator);
        terminator.close_channel(channel);

        assert_eq!(terminator.drop_session(&id), Ok(Vec::new()));
        assert_eq!(
            terminator.drop_session(&id),
            Err(TerminatorError::UnknownSession(id.clone()))
        );
    }

    #[test]
    fn test_close_channel() {
        let mut terminator = SessionTerminator::new("z2k");
        let channel = terminator.open_channel();
        assert!(terminator.close_channel(channel));
        assert!(!terminator.close_channel(channel));
        assert_eq!(terminator.num_channels(), 0);
    }
}
