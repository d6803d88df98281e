//! アドレス空間クエリ
//!
//! アンワインダから呼ばれる小さな公開インターフェースです。
//! 状態はすべてキャッシュ側にあり、ここでは持ちません。

use crate::cache::{ElfImageRef, LocalMapCache};
use crate::errors::UnwindError;
use crate::map_list::Access;
use crate::Result;
use unwmap_elf::{get_proc_name_in_image, resolve, Symbol};

/// キャッシュに対するアドレス空間クエリ
#[derive(Clone, Copy)]
pub struct AddressSpace<'a> {
    cache: &'a LocalMapCache,
}

impl<'a> AddressSpace<'a> {
    pub fn new(cache: &'a LocalMapCache) -> Self {
        Self { cache }
    }

    /// プロセス全体のキャッシュに対するクエリ
    pub fn local() -> AddressSpace<'static> {
        AddressSpace::new(LocalMapCache::global())
    }

    pub fn cache(&self) -> &'a LocalMapCache {
        self.cache
    }

    /// アドレスが読み取り可能な領域にあるか
    pub fn is_readable(&self, addr: u64) -> bool {
        self.cache.query_flag(addr, Access::Read)
    }

    /// アドレスが書き込み可能な領域にあるか
    pub fn is_writable(&self, addr: u64) -> bool {
        self.cache.query_flag(addr, Access::Write)
    }

    pub fn get_elf_image(&self, addr: u64) -> Result<ElfImageRef> {
        self.cache.get_elf_image(addr)
    }

    /// アドレスを囲む関数名を `buf` に書き込み、関数先頭からのオフセットを返す
    ///
    /// 名前が収まらなかった場合も `buf` には切り詰めた名前が入り、
    /// `NameTruncated` でオフセットを返します。
    pub fn get_proc_name(&self, addr: u64, buf: &mut [u8]) -> Result<u64> {
        let image = self.cache.get_elf_image(addr)?;
        let found = get_proc_name_in_image(
            &image.object,
            image.segbase,
            image.mapoff,
            addr,
            buf,
            self.cache.config().page_size,
        )
        .ok_or(UnwindError::NoInfo { address: addr })?;

        if found.truncated {
            return Err(UnwindError::NameTruncated {
                offset: found.offset,
            });
        }
        Ok(found.offset)
    }

    /// アドレスを囲む関数のシンボルを解決する
    pub fn resolve_symbol(&self, addr: u64) -> Result<Symbol> {
        let image = self.cache.get_elf_image(addr)?;
        let config = self.cache.config();
        resolve(
            &image.object,
            image.segbase,
            image.mapoff,
            addr,
            config.name_capacity,
            config.page_size,
        )
        .ok_or(UnwindError::NoInfo { address: addr })
    }
}

/// キャッシュの利用区間
///
/// 作成時にキャッシュを有効にし、破棄時に無効にします。
pub struct CacheSession<'a> {
    cache: &'a LocalMapCache,
}

impl<'a> CacheSession<'a> {
    pub fn new(cache: &'a LocalMapCache) -> Result<Self> {
        cache.activate()?;
        Ok(Self { cache })
    }

    /// プロセス全体のキャッシュを使う
    pub fn local() -> Result<CacheSession<'static>> {
        CacheSession::new(LocalMapCache::global())
    }

    pub fn address_space(&self) -> AddressSpace<'a> {
        AddressSpace::new(self.cache)
    }
}

impl Drop for CacheSession<'_> {
    fn drop(&mut self) {
        self.cache.deactivate();
    }
}
