//! エラー型

use thiserror::Error;
use unwmap_elf::ElfError;

/// アドレス空間クエリのエラー
///
/// 公開 API はパニックせず、失敗はすべてこの型で返します。
#[derive(Error, Debug)]
pub enum UnwindError {
    /// アドレスに対応するマッピングやシンボル情報がない
    #[error("No information for address 0x{address:x}")]
    NoInfo { address: u64 },

    /// シンボルは見つかったが、名前がバッファに収まらなかった
    #[error("Symbol name truncated (offset 0x{offset:x})")]
    NameTruncated { offset: u64 },

    #[error("Failed to enumerate memory mappings: {0}")]
    Enumeration(#[from] anyhow::Error),

    #[error(transparent)]
    Elf(#[from] ElfError),
}
