//! unwmap のコア機能
//!
//! このクレートは、ローカルプロセスのメモリマップキャッシュと、その上に構築される
//! アドレス空間クエリ（読み書き可否・ELF イメージ・シンボル解決）を提供します。
//! キャッシュは複数スレッドから同時に参照され、ミス時にだけ再構築されます。

pub mod address_space;
pub mod cache;
pub mod config;
pub mod errors;
pub mod map_list;

pub use address_space::{AddressSpace, CacheSession};
pub use cache::{ElfImageRef, LocalMapCache, MapCursor};
pub use config::CacheConfig;
pub use errors::UnwindError;
pub use map_list::{Access, MapList, Protection, Region, RegionInfo};

// 他のクレートから使用するために再エクスポート
pub use unwmap_elf::{ElfObject, Symbol};
pub use unwmap_target::{MapSource, MemoryMapping, ProcMaps};

/// コア機能の結果型
pub type Result<T> = std::result::Result<T, UnwindError>;
