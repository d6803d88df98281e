//! ELF イメージの読み込みと所有

use crate::accessor::AnyElf;
use crate::minidebuginfo::extract_minidebuginfo;
use crate::{ElfError, Result};
use memmap2::Mmap;
use std::fmt;
use std::fs::File;
use std::path::Path;
use std::sync::OnceLock;

/// イメージのバイト列
enum ImageData {
    /// バックしているファイルのマッピング
    Mapped(Mmap),
    /// MiniDebugInfo の展開結果など、ヒープ上のバイト列
    Owned(Vec<u8>),
}

impl ImageData {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Mapped(mmap) => &mmap[..],
            Self::Owned(data) => &data[..],
        }
    }
}

/// ELF イメージ
///
/// ファイルをマップしたもの、または MiniDebugInfo を展開したバイト列を保持します。
/// 作成時に ELF として妥当であることを検査済みです。
pub struct ElfImage {
    data: ImageData,
}

impl ElfImage {
    fn new(data: ImageData) -> Result<Self> {
        if AnyElf::parse(data.as_bytes()).is_none() {
            return Err(ElfError::NotElf);
        }
        Ok(Self { data })
    }

    /// バイト列から ELF イメージを作成する
    pub fn from_bytes(data: Vec<u8>) -> Result<Self> {
        Self::new(ImageData::Owned(data))
    }

    /// ELF ファイルを読み取り専用でマップする
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let io_error = |source: std::io::Error| ElfError::Io {
            path: path.to_path_buf(),
            source,
        };
        let file = File::open(path).map_err(io_error)?;
        // SAFETY: 読み取り専用のマッピングで、イメージはその所有者です。
        // ファイルが外部から書き換えられないことはローダがマップしている共有ライブラリと同じ前提です。
        let mmap = unsafe { Mmap::map(&file) }.map_err(io_error)?;
        Self::new(ImageData::Mapped(mmap))
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.data.as_bytes()
    }

    /// イメージのバイト長
    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// ファイルをマップしたイメージか
    pub fn is_mapped(&self) -> bool {
        matches!(self.data, ImageData::Mapped(_))
    }

    /// テーブルへのアクセサを取得する
    pub fn elf(&self) -> Option<AnyElf<'_>> {
        AnyElf::parse(self.as_bytes())
    }
}

impl fmt::Debug for ElfImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ElfImage")
            .field("len", &self.len())
            .field("mapped", &self.is_mapped())
            .finish()
    }
}

/// キャッシュされる ELF オブジェクト
///
/// 主イメージと、必要になった時点で一度だけ展開される MiniDebugInfo イメージを保持します。
/// 展開に失敗した場合も「なし」としてキャッシュします。
#[derive(Debug)]
pub struct ElfObject {
    image: ElfImage,
    use_minidebuginfo: bool,
    minidebuginfo: OnceLock<Option<ElfImage>>,
}

impl ElfObject {
    pub fn new(image: ElfImage, use_minidebuginfo: bool) -> Self {
        Self {
            image,
            use_minidebuginfo,
            minidebuginfo: OnceLock::new(),
        }
    }

    /// ELF ファイルを読み込んでオブジェクトを作成する
    pub fn open<P: AsRef<Path>>(path: P, use_minidebuginfo: bool) -> Result<Self> {
        Ok(Self::new(ElfImage::open(path)?, use_minidebuginfo))
    }

    /// 主イメージ
    pub fn image(&self) -> &ElfImage {
        &self.image
    }

    /// 埋め込み MiniDebugInfo のイメージ
    pub fn minidebuginfo(&self) -> Option<&ElfImage> {
        if !self.use_minidebuginfo {
            return None;
        }
        self.minidebuginfo
            .get_or_init(|| extract_minidebuginfo(&self.image))
            .as_ref()
    }
}
