//! unwmap ELF イメージ解析
//!
//! このクレートは、メモリ上の ELF イメージからセクション・文字列・シンボルテーブルを
//! 境界チェック付きで読み出す機能と、埋め込み MiniDebugInfo の展開、
//! アドレスからのシンボル解決を提供します。

pub mod accessor;
pub mod error;
pub mod image;
pub mod minidebuginfo;
pub mod symbols;

pub use accessor::{AnyElf, ElfAccessor, SectionTable};
pub use error::{DecompressError, ElfError};
pub use image::{ElfImage, ElfObject};
pub use minidebuginfo::{extract_minidebuginfo, xz_decompress, MINIDEBUGINFO_SECTION};
pub use symbols::{get_proc_name_in_image, lookup_symbol, resolve, Lookup, Symbol, SymbolMatch};

/// ELF 解析の結果型
pub type Result<T> = std::result::Result<T, ElfError>;
