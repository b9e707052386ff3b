//! ブラウザ WebSocket のラッパー
//!
//! ソケット 1 本と、それに登録したイベントハンドラ（Closure）を所有する。
//! イベントは接続の世代番号付きで `sink` に渡され、古い接続からのイベントは
//! `Executor::on_event` で捨てられる。

use alloc::rc::Rc;
use alloc::string::String;
use alloc::vec::Vec;

use js_sys::{ArrayBuffer, Uint8Array};
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{BinaryType, CloseEvent, Event, MessageEvent, WebSocket};

use z2k_session::TransportError;

use crate::executor::TransportEvent;

/// イベントの受け取り先（世代番号, イベント）
pub(crate) type EventSink = Rc<dyn Fn(u64, TransportEvent)>;

/// 1 回の接続試行に対応するトランスポート
pub(crate) struct Transport {
    socket: WebSocket,
    generation: u64,
    _on_open: Closure<dyn FnMut(Event)>,
    _on_message: Closure<dyn FnMut(MessageEvent)>,
    _on_error: Closure<dyn FnMut(Event)>,
    _on_close: Closure<dyn FnMut(CloseEvent)>,
}

impl Transport {
    /// WebSocket を開いてハンドラを登録する
    ///
    /// # エラー
    /// URL が不正などで `new WebSocket(url)` 自体が失敗した
    pub(crate) fn open(url: &str, generation: u64, sink: EventSink) -> Result<Self, JsValue> {
        let socket = WebSocket::new(url)?;
        socket.set_binary_type(BinaryType::Arraybuffer);

        let on_open = {
            let sink = sink.clone();
            Closure::<dyn FnMut(Event)>::new(move |_: Event| {
                sink(generation, TransportEvent::Open);
            })
        };
        let on_message = {
            let sink = sink.clone();
            Closure::<dyn FnMut(MessageEvent)>::new(move |event: MessageEvent| {
                match message_bytes(&event) {
                    Some(bytes) => sink(generation, TransportEvent::Data(bytes)),
                    None => tracing::warn!("Ignoring WebSocket message of unsupported type"),
                }
            })
        };
        let on_error = {
            let sink = sink.clone();
            Closure::<dyn FnMut(Event)>::new(move |_: Event| {
                sink(generation, TransportEvent::Lost(TransportError::Errored));
            })
        };
        let on_close = Closure::<dyn FnMut(CloseEvent)>::new(move |event: CloseEvent| {
            let cause = TransportError::Closed { code: event.code() };
            sink(generation, TransportEvent::Lost(cause));
        });

        socket.set_onopen(Some(on_open.as_ref().unchecked_ref()));
        socket.set_onmessage(Some(on_message.as_ref().unchecked_ref()));
        socket.set_onerror(Some(on_error.as_ref().unchecked_ref()));
        socket.set_onclose(Some(on_close.as_ref().unchecked_ref()));

        Ok(Transport {
            socket,
            generation,
            _on_open: on_open,
            _on_message: on_message,
            _on_error: on_error,
            _on_close: on_close,
        })
    }

    pub(crate) fn generation(&self) -> u64 {
        self.generation
    }

    /// 終端付きテキストを送る
    pub(crate) fn send(&self, text: &str) -> Result<(), JsValue> {
        self.socket.send_with_str(text)
    }

    /// ハンドラを外してソケットを閉じる
    ///
    /// Closure はまだ解放しない。自分のハンドラの実行中に呼ばれることがあるため、
    /// 解放（drop）は次の接続を開くときに行う。
    pub(crate) fn shutdown(&self) {
        self.socket.set_onopen(None);
        self.socket.set_onmessage(None);
        self.socket.set_onerror(None);
        self.socket.set_onclose(None);
        if let Err(e) = self.socket.close() {
            tracing::warn!("WebSocket close failed: {:?}", e);
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// テキストまたはバイナリのメッセージをバイト列にする
fn message_bytes(event: &MessageEvent) -> Option<Vec<u8>> {
    let data = event.data();
    if let Some(text) = data.as_string() {
        return Some(String::into_bytes(text));
    }
    data.dyn_into::<ArrayBuffer>()
        .ok()
        .map(|buffer| Uint8Array::new(&buffer).to_vec())
}
