//! キャッシュの設定

/// シンボル名バッファの既定容量（終端 NUL を含む）
pub const DEFAULT_NAME_CAPACITY: usize = 512;

/// ローカルマップキャッシュの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheConfig {
    /// ロードオフセット計算に使うページサイズ
    pub page_size: u64,
    /// `resolve_symbol` が使う名前バッファの容量
    pub name_capacity: usize,
    /// 埋め込み MiniDebugInfo のシンボルも参照するか
    pub minidebuginfo: bool,
}

impl CacheConfig {
    pub fn with_page_size(mut self, page_size: u64) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_name_capacity(mut self, name_capacity: usize) -> Self {
        self.name_capacity = name_capacity;
        self
    }

    pub fn with_minidebuginfo(mut self, enabled: bool) -> Self {
        self.minidebuginfo = enabled;
        self
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            page_size: unwmap_target::page_size(),
            name_capacity: DEFAULT_NAME_CAPACITY,
            minidebuginfo: cfg!(feature = "minidebuginfo"),
        }
    }
}
