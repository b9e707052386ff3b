//! SessionClient wasm-bindgen エクスポート
//!
//! ブラウザから呼び出すセッションクライアントの主エントリポイント。
//! `SessionMachine` が返す `Effect` を WebSocket・タイマー・JS コールバックで実行する。

use alloc::format;
use alloc::rc::{Rc, Weak};
use alloc::string::String;
use core::cell::RefCell;

use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;

use z2k_proto::Payload;
use z2k_session::{SessionConfig, SessionMachine, State};

use crate::executor::{EffectHost, Executor};
use crate::transport::{EventSink, Transport};

/// JS に公開する接続状態
#[wasm_bindgen]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected = "Disconnected",
    AwaitingConnect = "AwaitingConnect",
    Connected = "Connected",
    AttachedToSession = "AttachedToSession",
    SessionFailure = "SessionFailure",
}

impl From<State> for ConnectionState {
    fn from(state: State) -> Self {
        match state {
            State::Disconnected => ConnectionState::Disconnected,
            State::AwaitingConnect => ConnectionState::AwaitingConnect,
            State::Connected => ConnectionState::Connected,
            State::AttachedToSession => ConnectionState::AttachedToSession,
            State::SessionFailure => ConnectionState::SessionFailure,
        }
    }
}

/// 接続スロット
#[derive(Default)]
struct Link {
    /// 現在のトランスポート（同時に 1 本だけ）
    transport: Option<Transport>,
    /// 閉じたが Closure をまだ解放していないトランスポート
    _retired: Option<Transport>,
    /// 最後に開いたトランスポートの世代番号
    generation: u64,
}

/// `SessionClient` の中身
///
/// WebSocket のハンドラとタイマーからは `Weak` で参照する。
struct ClientInner {
    executor: Executor,
    url: String,
    link: RefCell<Link>,
    on_state_change: RefCell<Option<js_sys::Function>>,
    on_response: RefCell<Option<js_sys::Function>>,
    this: Weak<ClientInner>,
}

/// 再開可能なセッションのクライアント
///
/// ## 内部アーキテクチャ
///
/// ```text
/// SessionClient
///   └── Rc<ClientInner>
///         ├── Executor       - SessionMachine (z2k-session) と Effect の FIFO キュー
///         ├── Link           - Transport (WebSocket + ハンドラ)、接続ごとに作り直す
///         └── JS コールバック - onStateChange / onResponse
/// ```
///
/// ## スレッド安全性
///
/// WASM はシングルスレッドのため、`!Send + !Sync` を満たす。
/// JS コールバックは内部の借用を解放してから呼ぶので、コールバック内から
/// `sendRequest` を呼んでもよい。その Effect は実行中のキューの末尾に積まれる。
#[wasm_bindgen]
pub struct SessionClient {
    inner: Rc<ClientInner>,
}

#[wasm_bindgen]
impl SessionClient {
    /// クライアントを初期化する（まだ接続しない）
    ///
    /// # 引数
    /// - `url`: 接続先。省略時は `wss://{location.host}/api/`
    /// - `reconnect_delay_ms`: 再接続までの待ち時間。省略時は 5000
    /// - `auth_token`: 指定すると各接続の最初に `Auth` を送る
    ///
    /// # エラー
    /// - `url` 省略時に `window.location` を取得できない
    ///
    /// # 例（TypeScript）
    /// ```typescript
    /// const client = new SessionClient();
    /// const client2 = new SessionClient("wss://example.com/api/", 1000, token);
    /// ```
    #[wasm_bindgen(constructor)]
    pub fn new(
        url: Option<String>,
        reconnect_delay_ms: Option<u32>,
        auth_token: Option<String>,
    ) -> Result<SessionClient, JsError> {
        let url = match url {
            Some(url) => url,
            None => default_url()?,
        };

        let mut config = SessionConfig::default();
        if let Some(delay) = reconnect_delay_ms {
            config = config.with_reconnect_delay_ms(u64::from(delay));
        }
        if let Some(token) = auth_token {
            config = config.with_auth_token(token);
        }

        Ok(SessionClient {
            inner: Rc::new_cyclic(|this| ClientInner {
                executor: Executor::new(SessionMachine::new(config)),
                url,
                link: RefCell::new(Link::default()),
                on_state_change: RefCell::new(None),
                on_response: RefCell::new(None),
                this: this.clone(),
            }),
        })
    }

    /// コールバックを登録して最初の接続を開始する
    ///
    /// # 引数
    /// - `on_state_change`: `(state: ConnectionState) => void`
    /// - `on_response`: `(payload: any) => void`（受け入れたレスポンスごとに 1 回）
    #[wasm_bindgen]
    pub fn start(&self, on_state_change: js_sys::Function, on_response: js_sys::Function) {
        *self.inner.on_state_change.borrow_mut() = Some(on_state_change);
        *self.inner.on_response.borrow_mut() = Some(on_response);
        self.inner.executor.submit(&*self.inner, SessionMachine::start);
    }

    /// アプリケーションのリクエストを送る
    ///
    /// 接続状態にかかわらず受け付ける。アタッチ中でなければキューに積まれる。
    ///
    /// # 引数
    /// - `payload`: JSON に変換できる任意の値
    ///
    /// # エラー
    /// - `payload` を JSON に変換できない（`undefined`、関数、循環参照など）
    #[wasm_bindgen(js_name = "sendRequest")]
    pub fn send_request(&self, payload: JsValue) -> Result<(), JsError> {
        let payload = payload_from_js(&payload)?;
        self.inner
            .executor
            .submit(&*self.inner, |machine| machine.send_request(payload));
        Ok(())
    }

    #[wasm_bindgen(getter)]
    pub fn state(&self) -> ConnectionState {
        self.inner.executor.machine().state().into()
    }

    /// 未確認リクエスト数（UI / 診断表示用）
    #[wasm_bindgen(getter, js_name = "numPendingRequests")]
    pub fn num_pending_requests(&self) -> u32 {
        self.inner.executor.machine().num_pending_requests() as u32
    }

    /// 割り当て済みのセッション ID（未割り当てなら `undefined`）
    #[wasm_bindgen(getter, js_name = "sessionId")]
    pub fn session_id(&self) -> Option<String> {
        self.inner.executor.machine().session_id().map(String::from)
    }

    /// セッションのプロファイル `{userId, signature}`（未アタッチなら `null`）
    #[wasm_bindgen(getter)]
    pub fn profile(&self) -> Result<JsValue, JsError> {
        let json = match self.inner.executor.machine().profile() {
            Some(profile) => serde_json::to_string(profile)
                .map_err(|e| JsError::new(&format!("Profile serialization failed: {}", e)))?,
            None => return Ok(JsValue::NULL),
        };
        js_sys::JSON::parse(&json).map_err(|e| JsError::new(&format!("{:?}", e)))
    }

    /// セッション統計を JSON 文字列で返す
    ///
    /// # 戻り値
    /// JSON 文字列:
    /// ```json
    /// {
    ///   "state": "AttachedToSession",
    ///   "sessionId": "z2k:1",
    ///   "nextRequestId": 1042,
    ///   "responseCursor": 40,
    ///   "pendingRequests": 2,
    ///   "connectAttempts": 3
    /// }
    /// ```
    #[wasm_bindgen(js_name = "getStats")]
    pub fn get_stats(&self) -> Result<String, JsError> {
        let stats = self.inner.executor.machine().stats();
        serde_json::to_string(&stats)
            .map_err(|e| JsError::new(&format!("Stats serialization failed: {}", e)))
    }
}

// =========================================================
// Effect の実行（ブラウザ側）
// =========================================================

impl EffectHost for ClientInner {
    type Error = JsValue;

    fn current_generation(&self) -> Option<u64> {
        self.link.borrow().transport.as_ref().map(Transport::generation)
    }

    /// 新しい世代のトランスポートを開いてスロットに入れる
    fn open_transport(&self) -> Result<(), JsValue> {
        let weak = self.this.clone();
        let sink: EventSink = Rc::new(move |generation, event| {
            if let Some(inner) = weak.upgrade() {
                inner.executor.on_event(&*inner, generation, event);
            }
        });

        let mut link = self.link.borrow_mut();
        // ここはタイマーか start() から呼ばれるので、古い Closure を解放してよい
        link._retired = None;
        link.transport = None;
        link.generation += 1;
        let transport = Transport::open(&self.url, link.generation, sink)?;
        tracing::debug!(generation = link.generation, url = %self.url, "WebSocket opening");
        link.transport = Some(transport);
        Ok(())
    }

    fn close_transport(&self) {
        let mut link = self.link.borrow_mut();
        if let Some(transport) = link.transport.take() {
            transport.shutdown();
            link._retired = Some(transport);
        }
    }

    fn send(&self, text: &str) {
        match &self.link.borrow().transport {
            Some(transport) => {
                if let Err(e) = transport.send(text) {
                    tracing::warn!("WebSocket send failed: {:?}", e);
                }
            }
            None => tracing::warn!("Dropping send with no transport"),
        }
    }

    /// `delay_ms` 後に `connect()` を呼ぶ
    fn schedule_reconnect(&self, delay_ms: u64) {
        let weak = self.this.clone();
        let callback = Closure::once_into_js(move || {
            if let Some(inner) = weak.upgrade() {
                inner.executor.submit(&*inner, SessionMachine::connect);
            }
        });

        let Some(window) = web_sys::window() else {
            tracing::error!("No window; cannot schedule reconnect");
            return;
        };
        let delay = i32::try_from(delay_ms).unwrap_or(i32::MAX);
        if let Err(e) = window.set_timeout_with_callback_and_timeout_and_arguments_0(
            callback.unchecked_ref(),
            delay,
        ) {
            tracing::error!("setTimeout failed: {:?}", e);
        }
    }

    fn state_changed(&self, state: State) {
        let callback = self.on_state_change.borrow().clone();
        if let Some(callback) = callback {
            let state = JsValue::from(ConnectionState::from(state));
            if let Err(e) = callback.call1(&JsValue::NULL, &state) {
                tracing::error!("onStateChange threw: {:?}", e);
            }
        }
    }

    fn deliver(&self, payload: Payload) {
        let callback = self.on_response.borrow().clone();
        let Some(callback) = callback else {
            return;
        };
        match payload_to_js(&payload) {
            Ok(value) => {
                if let Err(e) = callback.call1(&JsValue::NULL, &value) {
                    tracing::error!("onResponse threw: {:?}", e);
                }
            }
            Err(e) => tracing::error!("Response payload conversion failed: {:?}", e),
        }
    }
}

// =========================================================
// ヘルパー
// =========================================================

fn default_url() -> Result<String, JsError> {
    let window = web_sys::window().ok_or_else(|| JsError::new("No window available"))?;
    let host = window
        .location()
        .host()
        .map_err(|e| JsError::new(&format!("Cannot read location.host: {:?}", e)))?;
    Ok(format!("wss://{}/api/", host))
}

/// JS の値を JSON ペイロードにする
fn payload_from_js(value: &JsValue) -> Result<Payload, JsError> {
    let text = js_sys::JSON::stringify(value)
        .map_err(|e| JsError::new(&format!("Payload is not JSON-serializable: {:?}", e)))?
        .as_string()
        .ok_or_else(|| JsError::new("Payload is not JSON-serializable"))?;
    serde_json::from_str(&text).map_err(|e| JsError::new(&format!("Invalid payload: {}", e)))
}

/// JSON ペイロードを JS の値にする
fn payload_to_js(payload: &Payload) -> Result<JsValue, JsValue> {
    let text = serde_json::to_string(payload).map_err(|e| JsValue::from_str(&format!("{}", e)))?;
    js_sys::JSON::parse(&text)
}
