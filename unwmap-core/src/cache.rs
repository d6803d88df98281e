//! ローカルプロセスのメモリマップキャッシュ
//!
//! 現在のマップリストを読み書きロックで保護し、複数スレッドからの参照を許します。
//! ミスしたときだけリストを作り直し、キャッシュ済みの ELF イメージを新しいリストへ移します。
//! 置き換えられたリストは、まだ参照中のスレッドがいる可能性があるため、
//! 参照カウントが 0 になるまで退役リストとして保持します。

use crate::config::CacheConfig;
use crate::errors::UnwindError;
use crate::map_list::{Access, MapList, RegionInfo};
use crate::Result;
use std::mem;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, trace, warn};
use unwmap_elf::ElfObject;
use unwmap_target::{local_pid, MapSource, ProcMaps};

/// アドレスに対応する ELF オブジェクトと、その領域の情報
#[derive(Debug, Clone)]
pub struct ElfImageRef {
    pub object: Arc<ElfObject>,
    /// マッピングの開始アドレス
    pub segbase: u64,
    /// マッピングのファイルオフセット
    pub mapoff: u64,
    pub path: PathBuf,
}

#[derive(Debug, Default)]
struct CacheState {
    refs: usize,
    current: Option<Arc<MapList>>,
    retired: Vec<Arc<MapList>>,
}

/// 現在のリストでのスロット検索結果
enum Slot {
    Cached(ElfImageRef),
    Empty(RegionInfo),
    Miss,
}

/// ローカルプロセスのマップキャッシュ
pub struct LocalMapCache {
    source: Box<dyn MapSource>,
    config: CacheConfig,
    state: RwLock<CacheState>,
    generations: AtomicU64,
}

impl LocalMapCache {
    /// `/proc/self/maps` を列挙元とするキャッシュを作成する
    pub fn new(config: CacheConfig) -> Self {
        Self::with_source(ProcMaps, config)
    }

    pub fn with_source<S: MapSource + 'static>(source: S, config: CacheConfig) -> Self {
        Self {
            source: Box::new(source),
            config,
            state: RwLock::new(CacheState::default()),
            generations: AtomicU64::new(0),
        }
    }

    /// プロセス全体で共有されるキャッシュ
    pub fn global() -> &'static LocalMapCache {
        static GLOBAL: OnceLock<LocalMapCache> = OnceLock::new();
        GLOBAL.get_or_init(|| LocalMapCache::new(CacheConfig::default()))
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn build_list(&self) -> Result<MapList> {
        MapList::build(self.source.as_ref(), local_pid()).map_err(UnwindError::Enumeration)
    }

    /// キャッシュの利用を開始する
    ///
    /// 最初の利用者のときにマップリストを作成します。作成に失敗した場合、
    /// 参照カウントは変わりません。
    pub fn activate(&self) -> Result<()> {
        let mut state = self.write();
        if state.refs == 0 {
            let mut list = self.build_list()?;
            list.set_generation(self.next_generation());
            debug!("map cache activated with {} regions", list.len());
            state.current = Some(Arc::new(list));
        }
        state.refs += 1;
        Ok(())
    }

    /// キャッシュの利用を終了する
    ///
    /// 最後の利用者が抜けると、現在のリストと退役リストをすべて解放します。
    pub fn deactivate(&self) {
        let mut state = self.write();
        if state.refs == 0 || state.current.is_none() {
            warn!("deactivate called on an inactive map cache");
            return;
        }

        state.refs -= 1;
        if state.refs == 0 {
            let retired = mem::take(&mut state.retired);
            let current = state.current.take();
            drop(state);
            debug!("map cache released ({} retired lists)", retired.len());
            drop(retired);
            drop(current);
        }
    }

    pub fn is_active(&self) -> bool {
        self.read().refs > 0
    }

    /// 必要であればマップリストを作り直す
    ///
    /// 新しいリストはロックの外で作成します。それでもアドレスが見つからない
    /// （または要求フラグを満たさない）場合は捨てて `None` を返します。
    /// 書き込みロックを取ったあと、別のスレッドがすでに作り直していないか確認し、
    /// 作り直されていればそのリストで答えます。
    pub fn rebuild_if_necessary(&self, addr: u64, expected: Option<Access>) -> Option<RegionInfo> {
        let mut candidate = match self.build_list() {
            Ok(list) => list,
            Err(e) => {
                debug!("map rebuild failed: {}", e);
                return None;
            }
        };
        let found = candidate
            .find(addr)
            .filter(|region| region.satisfies(expected))
            .map(|region| region.info())?;

        let mut state = self.write();
        if state.refs == 0 {
            // 非アクティブなキャッシュには導入しない
            return Some(found);
        }

        if let Some(current) = state.current.as_deref() {
            let hit = current
                .find(addr)
                .filter(|region| region.satisfies(expected))
                .map(|region| region.info());
            if hit.is_some() {
                trace!("map list already rebuilt by another thread");
                return hit;
            }
            let moved = candidate.migrate_images(current);
            trace!("migrated {} cached images", moved);
        }

        candidate.set_generation(self.next_generation());
        debug!(
            "installing map list generation {} ({} regions)",
            candidate.generation(),
            candidate.len()
        );
        if let Some(old) = state.current.replace(Arc::new(candidate)) {
            state.retired.push(old);
        }
        Some(found)
    }

    fn lookup(&self, addr: u64, expected: Option<Access>) -> Option<RegionInfo> {
        let state = self.read();
        let region = state.current.as_deref()?.find(addr)?;
        region.satisfies(expected).then(|| region.info())
    }

    /// アドレスを含む領域が指定されたアクセスを許すか
    pub fn query_flag(&self, addr: u64, access: Access) -> bool {
        self.lookup(addr, Some(access))
            .or_else(|| self.rebuild_if_necessary(addr, Some(access)))
            .is_some()
    }

    fn find_slot(&self, ip: u64) -> Slot {
        let state = self.read();
        let Some(region) = state.current.as_deref().and_then(|list| list.find(ip)) else {
            return Slot::Miss;
        };
        match (region.cached_image(), region.backing_file()) {
            (Some(object), Some(path)) => Slot::Cached(ElfImageRef {
                object,
                segbase: region.start,
                mapoff: region.offset,
                path: path.to_path_buf(),
            }),
            _ => Slot::Empty(region.info()),
        }
    }

    /// 読み込んだオブジェクトを、まだ同じ領域が現在のリストにあればスロットへ格納する
    fn store_image(&self, info: &RegionInfo, object: Arc<ElfObject>) -> Arc<ElfObject> {
        let state = self.write();
        match state.current.as_deref().and_then(|list| list.find(info.start)) {
            Some(region) if region.start == info.start && region.end == info.end => {
                region.store_image(object)
            }
            _ => object,
        }
    }

    /// ip を含むマッピングの ELF オブジェクトを取得する
    ///
    /// スロットが空ならロックの外でファイルを読み込み、短い書き込みロック区間で格納します。
    pub fn get_elf_image(&self, ip: u64) -> Result<ElfImageRef> {
        let info = match self.find_slot(ip) {
            Slot::Cached(image) => return Ok(image),
            Slot::Empty(info) => info,
            Slot::Miss => self
                .rebuild_if_necessary(ip, None)
                .ok_or(UnwindError::NoInfo { address: ip })?,
        };

        let Some(path) = info.backing_file() else {
            return Err(UnwindError::NoInfo { address: ip });
        };
        let object = Arc::new(ElfObject::open(path, self.config.minidebuginfo)?);
        debug!("loaded {} ({} bytes)", path.display(), object.image().len());
        let object = self.store_image(&info, object);

        Ok(ElfImageRef {
            object,
            segbase: info.start,
            mapoff: info.offset,
            path: path.to_path_buf(),
        })
    }

    /// 現在のマップリスト
    pub fn snapshot(&self) -> Option<Arc<MapList>> {
        self.read().current.clone()
    }

    /// 現在のリストの世代
    pub fn generation(&self) -> Option<u64> {
        self.read().current.as_ref().map(|list| list.generation())
    }

    /// 解放待ちの退役リストの数
    pub fn retired_len(&self) -> usize {
        self.read().retired.len()
    }

    pub fn refs(&self) -> usize {
        self.read().refs
    }

    /// 現在のリストを走査するカーソルを作成する
    pub fn cursor(&self) -> Option<MapCursor> {
        self.snapshot().map(|list| MapCursor { list, index: 0 })
    }
}

/// マップリストのスナップショットを走査するカーソル
///
/// 走査中にリストが置き換えられても読み続けられます。
/// 置き換えられたかどうかは `is_valid` で確認できます。
#[derive(Debug, Clone)]
pub struct MapCursor {
    list: Arc<MapList>,
    index: usize,
}

impl MapCursor {
    /// 走査中のリストがまだキャッシュに導入されているか
    pub fn is_valid(&self, cache: &LocalMapCache) -> bool {
        cache
            .read()
            .current
            .as_ref()
            .is_some_and(|current| Arc::ptr_eq(current, &self.list))
    }

    pub fn generation(&self) -> u64 {
        self.list.generation()
    }
}

impl Iterator for MapCursor {
    type Item = RegionInfo;

    fn next(&mut self) -> Option<Self::Item> {
        let region = self.list.regions().get(self.index)?;
        self.index += 1;
        Some(region.info())
    }
}
