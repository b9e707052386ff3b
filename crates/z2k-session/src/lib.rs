//! # z2k-session
//!
//! 再開可能なセッションのコア状態機械。
//!
//! ## 概要
//!
//! WebSocket は任意のタイミングで切れるが、アプリケーションのリクエスト/レスポンスは
//! 失われず、重複せず、順序も保たれなければならない。このクレートはそれを
//! I/O なしの状態機械として実装する。
//!
//! ### キーコンセプト
//!
//! - **requestId**: クライアントが採番する単調増加 ID（1000 から。再接続でもリセットしない）
//! - **レスポンスカーソル**: 次に受け入れる responseId（0 から）。再アタッチ時に送る
//! - **requestCursor**: リモートがまだ処理していない最小の requestId。再送バッファの解放に使う
//! - **キャッチアップ**: (再)アタッチ直後に未確認リクエストをすべて再送する
//!
//! ## セッションの状態遷移
//!
//! ```text
//! Disconnected → AwaitingConnect (connect)
//!              → Connected       (トランスポート open、CreateSession / AttachToSession 送信)
//!              → AttachedToSession (SessionSuccess 受信、キャッチアップ)
//!
//! 切断 / エラー / デコード失敗 → Disconnected → (RECONNECT_INTERVAL_MS 後) connect
//! SessionFailure 受信 → SessionFailure（終端）
//! ```
//!
//! 状態機械は入力ごとに `Effect` のリストを返し、実際の送信・タイマー・コールバックは
//! 呼び出し側（`z2k-wasm` クレート）が実行する。

#![no_std]
extern crate alloc;

pub mod config;
pub mod error;
pub mod handshake;
pub mod machine;
pub mod retransmit;
pub mod terminator;

pub use config::SessionConfig;
pub use error::{DecodeError, HandshakeError, SessionError, TerminatorError, TransportError};
pub use handshake::AuthGate;
pub use machine::{Effect, SessionMachine, SessionStats, State};
pub use retransmit::{RetransmitBuffer, Sequenced};
pub use terminator::{Action, ChannelId, SessionTerminator};

/// 最初の requestId
/// 他の場所で使われる小さな ID と衝突しないようにオフセットしている
pub const INITIAL_REQUEST_ID: u64 = 1000;

/// 最初の responseId
pub const INITIAL_RESPONSE_ID: u64 = 0;

/// 切断から再接続までの間隔（ミリ秒）
pub const RECONNECT_INTERVAL_MS: u64 = 5 * 1000;
