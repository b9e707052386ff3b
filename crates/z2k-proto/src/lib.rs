//! # z2k-proto
//!
//! セッション制御プロトコルのエンベロープ定義とエンコード/デコード。
//!
//! ## エンベロープの役割
//!
//! 制御メッセージは 2 種類に分かれる：
//! - **セッション管理**: `CreateSession` / `AttachToSession` / `SessionSuccess` など
//! - **パッケージ済みアプリケーションメッセージ**: 不透明なペイロードに
//!   フロー制御用のシーケンス番号を相乗りさせたもの
//!
//! ## Wire Format
//!
//! ```text
//! [tag, [field0, field1, ...]]
//!
//! クライアント → リモート: Auth | Hello | CreateSession | AttachToSession | PackagedRequest
//! リモート → クライアント: SessionSuccess | SessionFailure | PackagedResponse
//! ```
//!
//! フィールドは位置のみで識別する（名前なし）。要素数が定義と一致しないものは
//! デコードエラーとし、未知のフィールドは許容しない。

#![no_std]
extern crate alloc;

pub mod crequest;
pub mod cresponse;
pub mod error;
mod json;
pub mod profile;

pub use crequest::{ClientMessage, PackagedRequest};
pub use cresponse::{PackagedResponse, ServerMessage};
pub use error::ProtoError;
pub use profile::Profile;

/// アプリケーションペイロードの型（このレイヤーでは解釈しない）
pub use serde_json::Value as Payload;
