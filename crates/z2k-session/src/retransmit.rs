//! 未確認メッセージの再送バッファ
//!
//! クライアント側では未確認のリクエスト、リモート側では未確認のレスポンスを保持する。
//! どちらもシーケンス番号が単調増加する順で末尾に追加され、
//! 相手から届いたカーソルより小さいものを先頭から取り除く。

use alloc::collections::VecDeque;

use z2k_proto::{PackagedRequest, PackagedResponse};

/// シーケンス番号を持つメッセージ
pub trait Sequenced {
    fn seq(&self) -> u64;
}

impl Sequenced for PackagedRequest {
    fn seq(&self) -> u64 {
        self.request_id
    }
}

impl Sequenced for PackagedResponse {
    fn seq(&self) -> u64 {
        self.response_id
    }
}

/// 挿入順 = シーケンス番号順のキュー
///
/// 不変条件: 要素の `seq()` は先頭から末尾へ狭義単調増加。
#[derive(Debug, Clone)]
pub struct RetransmitBuffer<T> {
    entries: VecDeque<T>,
}

impl<T: Sequenced> RetransmitBuffer<T> {
    pub fn new() -> Self {
        RetransmitBuffer {
            entries: VecDeque::new(),
        }
    }

    /// 末尾に追加する
    ///
    /// `item.seq()` は既存のどの要素よりも大きくなければならない。
    pub fn push_back(&mut self, item: T) {
        debug_assert!(
            self.entries.back().map_or(true, |back| back.seq() < item.seq()),
            "retransmit buffer must stay ordered by sequence number"
        );
        self.entries.push_back(item);
    }

    /// 先頭（最も古い）要素
    pub fn front(&self) -> Option<&T> {
        self.entries.front()
    }

    /// `seq() < threshold` の要素を先頭から取り除く
    ///
    /// 取り除いた数に比例する計算量。`threshold` 以上の要素には触れない。
    ///
    /// # 戻り値
    /// 取り除いた要素数
    pub fn prune_below(&mut self, threshold: u64) -> usize {
        let mut evicted = 0;
        while self.front().is_some_and(|front| front.seq() < threshold) {
            self.entries.pop_front();
            evicted += 1;
        }
        evicted
    }

    /// 先頭から順に走査する
    pub fn iter(&self) -> impl Iterator<Item = &T> {
        self.entries.iter()
    }

    /// `seq() >= from` の要素を順に走査する（キャッチアップ用）
    pub fn iter_from(&self, from: u64) -> impl Iterator<Item = &T> {
        self.entries.iter().skip_while(move |item| item.seq() < from)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T: Sequenced> Default for RetransmitBuffer<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use serde_json::Value;

    fn buffer_with(ids: &[u64]) -> RetransmitBuffer<PackagedRequest> {
        let mut buffer = RetransmitBuffer::new();
        for &id in ids {
            buffer.push_back(PackagedRequest::new(id, 0, Value::Null));
        }
        buffer
    }

    fn ids(buffer: &RetransmitBuffer<PackagedRequest>) -> Vec<u64> {
        buffer.iter().map(|r| r.request_id).collect()
    }

    #[test]
    fn test_push_and_front() {
        let buffer = buffer_with(&[1000, 1001, 1002]);
        assert_eq!(buffer.len(), 3);
        assert_eq!(buffer.front().map(|r| r.request_id), Some(1000));
    }

    #[test]
    fn test_prune_removes_strictly_below_threshold() {
        let mut buffer = buffer_with(&[1000, 1001, 1002]);
        assert_eq!(buffer.prune_below(1001), 1);
        assert_eq!(ids(&buffer), [1001, 1002]);
    }

    #[test]
    fn test_prune_is_idempotent() {
        let mut buffer = buffer_with(&[1000, 1001, 1002, 1003]);
        buffer.prune_below(1002);
        let once = ids(&buffer);
        assert_eq!(buffer.prune_below(1002), 0, "2 回目は何も取り除かない");
        assert_eq!(ids(&buffer), once);
    }

    #[test]
    fn test_prune_never_removes_at_or_above_threshold() {
        for threshold in 995..1010u64 {
            let mut buffer = buffer_with(&[1000, 1001, 1002, 1003, 1004]);
            buffer.prune_below(threshold);
            assert!(buffer.iter().all(|r| r.request_id >= threshold));
            let expected: Vec<u64> = (1000..1005).filter(|id| *id >= threshold).collect();
            assert_eq!(ids(&buffer), expected, "threshold {}", threshold);
        }
    }

    #[test]
    fn test_prune_on_empty_buffer() {
        let mut buffer: RetransmitBuffer<PackagedRequest> = RetransmitBuffer::new();
        assert_eq!(buffer.prune_below(u64::MAX), 0);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_iter_from_skips_acknowledged_prefix() {
        let mut buffer: RetransmitBuffer<PackagedResponse> = RetransmitBuffer::new();
        for id in 0..5 {
            buffer.push_back(PackagedResponse::new(id, 1000, Value::Null));
        }
        let replay: Vec<u64> = buffer.iter_from(3).map(|r| r.response_id).collect();
        assert_eq!(replay, [3, 4]);
        assert_eq!(buffer.len(), 5, "iter_from は要素を取り除かない");
    }
}
