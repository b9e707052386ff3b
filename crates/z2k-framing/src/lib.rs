//! # z2k-framing
//!
//! ストリーム上のメッセージ境界を復元するフレーミング層。
//!
//! WebSocket（およびリレーの TCP 側）は任意の位置で分割されたテキスト断片を
//! 届けるため、受信側で 1 メッセージ = 1 JSON ドキュメントに組み立て直す必要がある。
//!
//! ## Wire Format
//!
//! ```text
//! <JSON ドキュメント>\n<JSON ドキュメント>\n...
//! ```
//!
//! - 終端は ASCII 改行 1 文字のみ（長さプレフィックスなし）
//! - ペイロードは生の改行を含まないこと（JSON シリアライズ済みなら自然に満たされる）
//! - `\n` は UTF-8 のマルチバイト列の途中に現れないので、バイト単位で分割しても安全

#![no_std]
extern crate alloc;

pub mod chunker;
pub mod error;

pub use chunker::Chunker;
pub use error::FrameError;

/// メッセージ終端バイト
pub const TERMINATOR: u8 = b'\n';
