//! # z2k-wasm
//!
//! wasm-bindgen エクスポート：ブラウザ（z2kplus フロントエンド）から呼び出す公開 API。
//!
//! ## 使用方法（TypeScript）
//!
//! ```typescript
//! import { SessionClient, ConnectionState, init_panic_hook, init_logging } from '../z2k-wasm-pkg/z2k_wasm';
//!
//! // パニック時のスタックトレースとログ出力を有効化（開発時）
//! init_panic_hook();
//! init_logging();
//!
//! // 省略時は wss://{location.host}/api/ に 5 秒間隔で再接続
//! const client = new SessionClient();
//!
//! client.start(
//!     (state: ConnectionState) => statusBar.update(state),
//!     (payload: any) => dispatcher.handle(payload),
//! );
//!
//! // いつ呼んでもよい（切断中はキューに積まれ、再アタッチ後に送られる）
//! client.sendRequest({ kind: "Subscribe", query: "..." });
//!
//! console.log(client.numPendingRequests, client.getStats());
//! ```

use wasm_bindgen::prelude::*;

pub mod client;
mod executor;
mod transport;

pub use client::{ConnectionState, SessionClient};

/// パニック時にブラウザコンソールにスタックトレースを出力する
///
/// 開発時に必ず呼び出すこと。本番ビルドでは feature flag で無効化可能。
#[wasm_bindgen]
pub fn init_panic_hook() {
    #[cfg(feature = "console_error_panic_hook")]
    console_error_panic_hook::set_once();
}

/// `tracing` のイベントをブラウザコンソールに出力する
///
/// 2 回目以降の呼び出しは何もしない。
#[wasm_bindgen]
pub fn init_logging() {
    #[cfg(feature = "tracing-wasm")]
    {
        if tracing_wasm::try_set_as_global_default().is_err() {
            tracing::debug!("Logging subscriber already installed");
        }
    }
}

/// 終端付きの wire 形式に変換するユーティリティ
///
/// テスト・デバッグ用。`SessionClient` は内部で同じ処理を行う。
///
/// # エラー
/// - `message` が改行を含む
#[wasm_bindgen(js_name = "wrapFrame")]
pub fn wrap_frame(message: &str) -> Result<String, JsError> {
    if message.contains('\n') {
        return Err(JsError::new("Framed message must not contain a raw newline"));
    }
    Ok(z2k_framing::Chunker::wrap(message))
}

extern crate alloc;
