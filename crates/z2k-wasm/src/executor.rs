//! Effect の実行順序
//!
//! 状態機械への入力と、それが返した `Effect` の実行を 1 本の FIFO キューに通す。
//! ホストのコールバックから再入した入力（`sendRequest` など）の Effect は
//! 実行中のキューの末尾に積まれ、先に積まれた Effect を追い越さない。
//!
//! ## 借用の規則
//! ```text
//! machine / queue の借用は入力 1 回・取り出し 1 回ごとに解放する
//! EffectHost のメソッドはどちらの借用も持たない状態で呼ぶ
//! ```

use alloc::collections::VecDeque;
use alloc::vec::Vec;
use core::cell::{Cell, Ref, RefCell};
use core::fmt::Debug;

use z2k_proto::Payload;
use z2k_session::{Effect, SessionMachine, State, TransportError};

/// ソケットから届いたイベント
#[derive(Debug)]
pub(crate) enum TransportEvent {
    Open,
    Data(Vec<u8>),
    Lost(TransportError),
}

/// Effect を実際に実行する側（ブラウザでは WebSocket・タイマー・JS コールバック）
pub(crate) trait EffectHost {
    type Error: Debug;

    /// 現在のトランスポートの世代番号（なければ `None`）
    fn current_generation(&self) -> Option<u64>;

    /// 新しい世代のトランスポートを開く
    fn open_transport(&self) -> Result<(), Self::Error>;

    fn close_transport(&self);

    /// 終端付きテキストを現在のトランスポートに送る
    fn send(&self, text: &str);

    fn schedule_reconnect(&self, delay_ms: u64);

    fn state_changed(&self, state: State);

    fn deliver(&self, payload: Payload);
}

/// 状態機械と実行待ち Effect のキュー
pub(crate) struct Executor {
    machine: RefCell<SessionMachine>,
    queue: RefCell<VecDeque<Effect>>,
    draining: Cell<bool>,
}

impl Executor {
    pub(crate) fn new(machine: SessionMachine) -> Self {
        Executor {
            machine: RefCell::new(machine),
            queue: RefCell::new(VecDeque::new()),
            draining: Cell::new(false),
        }
    }

    pub(crate) fn machine(&self) -> Ref<'_, SessionMachine> {
        self.machine.borrow()
    }

    /// 状態機械に入力を渡し、出てきた Effect を実行する
    ///
    /// すでに実行中（コールバックからの再入）ならキューに積むだけで戻り、
    /// 外側の実行ループが順に処理する。
    pub(crate) fn submit<H, F>(&self, host: &H, input: F)
    where
        H: EffectHost + ?Sized,
        F: FnOnce(&mut SessionMachine) -> Vec<Effect>,
    {
        let effects = input(&mut self.machine.borrow_mut());
        self.queue.borrow_mut().extend(effects);
        self.drain(host);
    }

    /// トランスポートのイベントを渡す
    ///
    /// 現在の世代以外（閉じた接続の遅れて届いたイベント）は捨てる。
    pub(crate) fn on_event<H>(&self, host: &H, generation: u64, event: TransportEvent)
    where
        H: EffectHost + ?Sized,
    {
        if host.current_generation() != Some(generation) {
            tracing::debug!(generation, ?event, "Ignoring event from a retired transport");
            return;
        }
        self.submit(host, |machine| match event {
            TransportEvent::Open => machine.on_transport_open(),
            TransportEvent::Data(bytes) => machine.on_transport_data(&bytes),
            TransportEvent::Lost(cause) => machine.on_transport_lost(cause),
        });
    }

    fn drain<H>(&self, host: &H)
    where
        H: EffectHost + ?Sized,
    {
        if self.draining.replace(true) {
            return;
        }
        loop {
            let next = self.queue.borrow_mut().pop_front();
            let Some(effect) = next else {
                break;
            };
            self.execute(host, effect);
        }
        self.draining.set(false);
    }

    fn execute<H>(&self, host: &H, effect: Effect)
    where
        H: EffectHost + ?Sized,
    {
        match effect {
            Effect::OpenTransport => {
                if let Err(e) = host.open_transport() {
                    tracing::error!("Transport open failed: {:?}", e);
                    let more = self
                        .machine
                        .borrow_mut()
                        .on_transport_lost(TransportError::Errored);
                    self.queue.borrow_mut().extend(more);
                }
            }
            Effect::CloseTransport => host.close_transport(),
            Effect::Send(text) => host.send(&text),
            Effect::ScheduleReconnect { delay_ms } => {
                tracing::debug!(delay_ms, "Reconnect scheduled");
                host.schedule_reconnect(delay_ms);
            }
            Effect::StateChanged(state) => {
                tracing::info!(%state, "Session state changed");
                host.state_changed(state);
            }
            Effect::Deliver(payload) => host.deliver(payload),
            Effect::Report(error) => {
                if error.is_recoverable() {
                    tracing::warn!(%error, "Session interrupted");
                } else {
                    tracing::error!(%error, "Session failed");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::format;
    use alloc::string::{String, ToString};
    use alloc::vec;
    use serde_json::json;
    use z2k_framing::Chunker;
    use z2k_proto::{ClientMessage, PackagedResponse, Profile, ServerMessage};

    /// 記録するだけのホスト。コールバックから再入できる。
    #[derive(Default)]
    struct FakeHost {
        executor: Option<Executor>,
        generation: Cell<Option<u64>>,
        opened: Cell<u64>,
        refuse_open: Cell<bool>,
        wire: RefCell<Vec<String>>,
        log: RefCell<Vec<String>>,
        states: RefCell<Vec<State>>,
        reconnects: RefCell<Vec<u64>>,
        /// AttachedToSession の通知を受けたら送るリクエスト
        send_on_attach: RefCell<Option<Payload>>,
        /// 最初の Deliver を受けたら送るリクエスト
        send_on_deliver: RefCell<Option<Payload>>,
    }

    impl FakeHost {
        fn new() -> Self {
            FakeHost {
                executor: Some(Executor::new(SessionMachine::default())),
                ..FakeHost::default()
            }
        }

        fn executor(&self) -> &Executor {
            self.executor.as_ref().unwrap()
        }

        fn submit(&self, input: impl FnOnce(&mut SessionMachine) -> Vec<Effect>) {
            self.executor().submit(self, input);
        }

        fn event(&self, generation: u64, event: TransportEvent) {
            self.executor().on_event(self, generation, event);
        }

        fn state(&self) -> State {
            self.executor().machine().state()
        }

        fn wire_request_ids(&self) -> Vec<u64> {
            self.wire
                .borrow()
                .iter()
                .filter_map(|text| {
                    match ClientMessage::decode(text.trim_end_matches('\n')).unwrap() {
                        ClientMessage::PackagedRequest(r) => Some(r.request_id),
                        _ => None,
                    }
                })
                .collect()
        }
    }

    impl EffectHost for FakeHost {
        type Error = &'static str;

        fn current_generation(&self) -> Option<u64> {
            self.generation.get()
        }

        fn open_transport(&self) -> Result<(), Self::Error> {
            if self.refuse_open.get() {
                return Err("refused");
            }
            self.opened.set(self.opened.get() + 1);
            self.generation.set(Some(self.opened.get()));
            Ok(())
        }

        fn close_transport(&self) {
            self.generation.set(None);
        }

        fn send(&self, text: &str) {
            self.log.borrow_mut().push("send".to_string());
            self.wire.borrow_mut().push(text.to_string());
        }

        fn schedule_reconnect(&self, delay_ms: u64) {
            self.reconnects.borrow_mut().push(delay_ms);
        }

        fn state_changed(&self, state: State) {
            self.states.borrow_mut().push(state);
            if state == State::AttachedToSession {
                let payload = self.send_on_attach.borrow_mut().take();
                if let Some(payload) = payload {
                    self.submit(|m| m.send_request(payload));
                }
            }
        }

        fn deliver(&self, payload: Payload) {
            self.log.borrow_mut().push(format!("deliver {}", payload));
            let reply = self.send_on_deliver.borrow_mut().take();
            if let Some(reply) = reply {
                self.submit(|m| m.send_request(reply));
            }
        }
    }

    fn server_bytes(message: &ServerMessage) -> Vec<u8> {
        Chunker::wrap(&message.encode()).into_bytes()
    }

    fn success(request_cursor: u64) -> Vec<u8> {
        server_bytes(&ServerMessage::SessionSuccess {
            session_id: "z2k:1".to_string(),
            request_cursor,
            profile: Profile::new("alice", "Alice Liddell"),
        })
    }

    fn response(response_id: u64, payload: Payload) -> Vec<u8> {
        server_bytes(&ServerMessage::PackagedResponse(PackagedResponse::new(
            response_id,
            1000,
            payload,
        )))
    }

    fn attached_host() -> FakeHost {
        let host = FakeHost::new();
        host.submit(SessionMachine::start);
        host.event(1, TransportEvent::Open);
        host.event(1, TransportEvent::Data(success(1000)));
        assert_eq!(host.state(), State::AttachedToSession);
        host
    }

    #[test]
    fn test_request_from_attach_callback_follows_catch_up() {
        let host = FakeHost::new();
        host.submit(|m| m.send_request(json!("old")));
        host.submit(SessionMachine::start);
        host.event(1, TransportEvent::Open);

        *host.send_on_attach.borrow_mut() = Some(json!("new"));
        host.event(1, TransportEvent::Data(success(1000)));

        assert_eq!(host.wire_request_ids(), [1000, 1001], "再送分が先に送られる");
        assert_eq!(host.executor().machine().num_pending_requests(), 2);
    }

    #[test]
    fn test_reentrant_effects_run_after_queued_ones() {
        let host = attached_host();
        host.log.borrow_mut().clear();
        *host.send_on_deliver.borrow_mut() = Some(json!("reply"));

        let mut data = response(0, json!("a"));
        data.extend(response(1, json!("b")));
        host.event(1, TransportEvent::Data(data));

        assert_eq!(
            *host.log.borrow(),
            vec!["deliver \"a\"", "deliver \"b\"", "send"],
            "コールバック中の送信は同じ断片の配送を追い越さない"
        );
        assert_eq!(host.wire_request_ids(), [1000]);
    }

    #[test]
    fn test_events_from_retired_transport_are_ignored() {
        let host = attached_host();
        host.event(1, TransportEvent::Lost(TransportError::Closed { code: 1006 }));
        assert_eq!(host.state(), State::Disconnected);
        assert_eq!(*host.reconnects.borrow(), [5000]);

        host.submit(SessionMachine::connect);
        assert_eq!(host.current_generation(), Some(2));

        // 前の接続から遅れて届いたイベント
        host.event(1, TransportEvent::Data(response(0, json!("stale"))));
        host.event(1, TransportEvent::Lost(TransportError::Errored));
        assert_eq!(host.state(), State::AwaitingConnect);
        assert!(host.log.borrow().iter().all(|l| !l.starts_with("deliver")));
        assert_eq!(host.reconnects.borrow().len(), 1, "再接続は 1 回だけ");

        host.event(2, TransportEvent::Open);
        assert_eq!(host.state(), State::Connected);
    }

    #[test]
    fn test_open_failure_is_fed_back_as_transport_loss() {
        let host = FakeHost::new();
        host.refuse_open.set(true);
        host.submit(SessionMachine::start);

        assert_eq!(host.state(), State::Disconnected);
        assert_eq!(
            *host.states.borrow(),
            [State::AwaitingConnect, State::Disconnected]
        );
        assert_eq!(*host.reconnects.borrow(), [5000]);

        host.refuse_open.set(false);
        host.submit(SessionMachine::connect);
        assert_eq!(host.state(), State::AwaitingConnect);
        assert_eq!(host.current_generation(), Some(1));
    }

    #[test]
    fn test_executor_idle_after_drain() {
        let host = attached_host();
        assert!(!host.executor().draining.get());
        assert!(host.executor().queue.borrow().is_empty());
        host.submit(|m| m.send_request(json!("q")));
        assert_eq!(host.wire_request_ids(), [1000]);
    }
}
