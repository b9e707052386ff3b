//! z2k-framing エラー型

/// フレーミング層のエラー
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// 完成したメッセージが UTF-8 として不正
    InvalidUtf8 {
        /// 先頭から有効だったバイト数
        valid_up_to: usize,
    },
}

impl core::fmt::Display for FrameError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FrameError::InvalidUtf8 { valid_up_to } => {
                write!(f, "Frame is not valid UTF-8 (valid up to byte {})", valid_up_to)
            }
        }
    }
}
