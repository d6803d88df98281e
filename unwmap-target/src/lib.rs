//! unwmap ターゲットプロセスのメモリマップ列挙
//!
//! このクレートは、OS が報告するメモリ領域の一覧を取得するための低レベル機能を提供します。
//! `/proc/<pid>/maps` の解析と、キャッシュ層が依存する `MapSource` トレイトを定義します。

pub mod maps;

pub use maps::{local_pid, page_size, parse_maps, MapSource, MemoryMapping, ProcMaps};
pub use nix::unistd::Pid;

/// ターゲット列挙の結果型
pub type Result<T> = anyhow::Result<T>;
