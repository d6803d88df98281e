//! ELF 解析のエラー型

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ElfError {
    #[error("Failed to read {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Not a valid ELF image")]
    NotElf,
}

/// MiniDebugInfo 展開のエラー
///
/// 呼び出し側ではソフトエラーとして扱われます。
#[derive(Error, Debug)]
pub enum DecompressError {
    #[error("Built without MiniDebugInfo (xz) support")]
    Unsupported,

    #[error("xz stream ended before completion")]
    Truncated,

    #[error("Failed to allocate {requested} bytes for decompressed output")]
    OutOfMemory { requested: usize },

    #[cfg(feature = "minidebuginfo")]
    #[error("xz stream error: {0}")]
    Stream(#[from] xz2::stream::Error),
}
