//! 改行区切りメッセージの分割と再組み立て
//!
//! ## 使い方
//! ```text
//! 送信: Chunker::wrap(json) → transport.send()
//! 受信: transport.onmessage → chunker.push_back(fragment)
//!       → while let Some(msg) = chunker.try_unwrap_next()? { ... }
//! ```

use alloc::string::String;
use alloc::vec::Vec;

use crate::error::FrameError;
use crate::TERMINATOR;

/// 断片化されたストリームからメッセージを切り出すバッファ
///
/// 接続ごとに 1 インスタンスを使う。再接続時は新しいインスタンスを作ること
/// （前の接続の途中データを持ち越さないため）。
///
/// 上限は設けない。バックプレッシャーはトランスポート側の責任。
#[derive(Debug, Default)]
pub struct Chunker {
    /// 受信済みバイト列（先頭 `head` バイトは取り出し済み）
    buf: Vec<u8>,
    /// 取り出し済みプレフィックスの長さ
    head: usize,
    /// 改行探索の再開位置（ここより前に改行がないことは確認済み）
    scan_from: usize,
}

impl Chunker {
    /// 空の Chunker を生成する
    pub fn new() -> Self {
        Chunker {
            buf: Vec::new(),
            head: 0,
            scan_from: 0,
        }
    }

    /// 前段の Chunker から引き継いだ未終端データで初期化する
    ///
    /// 認証ハンドシェイクを処理したリレーが、プロトコル本体の処理系に
    /// 途中まで読んだバイト列を渡すときに使う。
    pub fn with_residual(residual: Vec<u8>) -> Self {
        Chunker {
            buf: residual,
            head: 0,
            scan_from: 0,
        }
    }

    /// 送信用にメッセージを終端付きの wire 形式に変換する
    ///
    /// `message` は生の改行を含んではならない（JSON 文字列なら満たされる）。
    pub fn wrap(message: &str) -> String {
        debug_assert!(!message.contains('\n'), "framed message must not contain a raw newline");
        let mut wrapped = String::with_capacity(message.len() + 1);
        wrapped.push_str(message);
        wrapped.push(TERMINATOR as char);
        wrapped
    }

    /// テキスト断片を積む
    pub fn push_back(&mut self, fragment: &str) {
        self.push_bytes(fragment.as_bytes());
    }

    /// バイト断片を積む（バイナリフレームや TCP 由来のデータ用）
    ///
    /// UTF-8 のコードポイントが断片の境界で分かれていても問題ない。
    pub fn push_bytes(&mut self, fragment: &[u8]) {
        if fragment.is_empty() {
            return;
        }
        self.compact();
        self.buf.extend_from_slice(fragment);
    }

    /// 次の完成したメッセージを取り出す
    ///
    /// # 戻り値
    /// - `Ok(Some(msg))`: 終端までのメッセージ（終端は含まない）
    /// - `Ok(None)`: 完成したメッセージがない（バッファは変更しない）
    ///
    /// # エラー
    /// - `FrameError::InvalidUtf8`: メッセージが UTF-8 として不正。
    ///   そのメッセージは消費されるので、次の呼び出しは後続のメッセージから再開する。
    pub fn try_unwrap_next(&mut self) -> Result<Option<String>, FrameError> {
        let offset = match self.buf[self.scan_from..]
            .iter()
            .position(|&b| b == TERMINATOR)
        {
            Some(offset) => offset,
            None => {
                self.scan_from = self.buf.len();
                return Ok(None);
            }
        };

        let start = self.head;
        let end = self.scan_from + offset;
        let message = core::str::from_utf8(&self.buf[start..end])
            .map(String::from)
            .map_err(|e| FrameError::InvalidUtf8 {
                valid_up_to: e.valid_up_to(),
            });

        self.head = end + 1;
        self.scan_from = self.head;
        if self.head == self.buf.len() {
            self.buf.clear();
            self.head = 0;
            self.scan_from = 0;
        }

        message.map(Some)
    }

    /// 未終端の残りデータ
    pub fn residual(&self) -> &[u8] {
        &self.buf[self.head..]
    }

    /// Chunker を消費して未終端の残りデータを返す
    pub fn into_residual(mut self) -> Vec<u8> {
        self.buf.drain(..self.head);
        self.buf
    }

    /// 未終端データのバイト数
    pub fn len(&self) -> usize {
        self.buf.len() - self.head
    }

    /// 未終端データがないか
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// 取り出し済みプレフィックスが半分を超えたら詰める
    fn compact(&mut self) {
        if self.head == 0 || self.head * 2 < self.buf.len() {
            return;
        }
        self.buf.drain(..self.head);
        self.scan_from -= self.head;
        self.head = 0;
    }
}
