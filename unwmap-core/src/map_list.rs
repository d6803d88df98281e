//! メモリマップのスナップショット
//!
//! 1 回の列挙結果を開始アドレス昇順・重なりなしの領域列として保持します。
//! 検索もイメージの移行も、この順序に依存しています。

use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;
use unwmap_elf::ElfObject;
use unwmap_target::{MapSource, MemoryMapping, Pid};

/// 要求するアクセス種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
    Execute,
}

/// 領域の保護フラグ
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Protection {
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
}

impl Protection {
    /// 指定されたアクセスが許可されているか
    pub fn allows(&self, access: Access) -> bool {
        match access {
            Access::Read => self.readable,
            Access::Write => self.writable,
            Access::Execute => self.executable,
        }
    }
}

/// 領域のメタデータ（イメージスロットを含まない複製可能な形）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionInfo {
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub protection: Protection,
    pub path: Option<PathBuf>,
}

impl RegionInfo {
    /// ELF として読み込める実ファイルのパス
    ///
    /// 匿名マッピングと `[heap]` などの疑似パスは `None` です。
    pub fn backing_file(&self) -> Option<&Path> {
        backing_file(self.path.as_deref())
    }
}

fn backing_file(path: Option<&Path>) -> Option<&Path> {
    path.filter(|path| !path.as_os_str().as_encoded_bytes().starts_with(b"["))
}

/// マップリストの 1 領域
///
/// イメージスロットは所有ハンドルです。新しいリストへ移行されると空になります。
#[derive(Debug)]
pub struct Region {
    pub start: u64,
    pub end: u64,
    pub offset: u64,
    pub protection: Protection,
    pub path: Option<PathBuf>,
    image: Mutex<Option<Arc<ElfObject>>>,
}

impl Region {
    fn from_mapping(mapping: MemoryMapping) -> Self {
        Self {
            start: mapping.start,
            end: mapping.end,
            offset: mapping.offset,
            protection: Protection {
                readable: mapping.readable,
                writable: mapping.writable,
                executable: mapping.executable,
            },
            path: mapping.path,
            image: Mutex::new(None),
        }
    }

    /// アドレスがこの領域の範囲内にあるか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }

    /// 要求されたアクセスを満たすか（`None` は任意のマッピング）
    pub fn satisfies(&self, expected: Option<Access>) -> bool {
        expected.map_or(true, |access| self.protection.allows(access))
    }

    pub fn backing_file(&self) -> Option<&Path> {
        backing_file(self.path.as_deref())
    }

    pub fn info(&self) -> RegionInfo {
        RegionInfo {
            start: self.start,
            end: self.end,
            offset: self.offset,
            protection: self.protection,
            path: self.path.clone(),
        }
    }

    /// キャッシュされている ELF オブジェクト
    pub fn cached_image(&self) -> Option<Arc<ElfObject>> {
        self.slot().clone()
    }

    /// ELF オブジェクトをスロットに格納する
    ///
    /// すでに別のオブジェクトが格納されていればそちらを残して返します。
    pub fn store_image(&self, object: Arc<ElfObject>) -> Arc<ElfObject> {
        self.slot().get_or_insert(object).clone()
    }

    /// スロットからオブジェクトを取り出す（スロットは空になる）
    pub fn take_image(&self) -> Option<Arc<ElfObject>> {
        self.slot().take()
    }

    fn slot(&self) -> std::sync::MutexGuard<'_, Option<Arc<ElfObject>>> {
        self.image.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// メモリマップのスナップショット
#[derive(Debug, Default)]
pub struct MapList {
    generation: u64,
    regions: Vec<Region>,
}

impl MapList {
    /// プロセスのマッピングを列挙してリストを作成する
    pub fn build(source: &dyn MapSource, pid: Pid) -> unwmap_target::Result<Self> {
        let mappings = source.mappings(pid)?;
        Ok(Self::from_mappings(mappings))
    }

    /// 列挙結果から順序付きリストを作成する
    ///
    /// 開始アドレスで整列し、空の範囲と直前の領域に重なるものは捨てます。
    pub fn from_mappings(mut mappings: Vec<MemoryMapping>) -> Self {
        mappings.sort_by_key(|mapping| mapping.start);

        let mut regions: Vec<Region> = Vec::with_capacity(mappings.len());
        for mapping in mappings {
            if mapping.start >= mapping.end {
                debug!("skipping empty mapping 0x{:x}-0x{:x}", mapping.start, mapping.end);
                continue;
            }
            if let Some(prev) = regions.last() {
                if mapping.start < prev.end {
                    debug!(
                        "skipping mapping 0x{:x}-0x{:x} overlapping 0x{:x}-0x{:x}",
                        mapping.start, mapping.end, prev.start, prev.end
                    );
                    continue;
                }
            }
            regions.push(Region::from_mapping(mapping));
        }

        Self {
            generation: 0,
            regions,
        }
    }

    /// アドレスを含む領域を探す
    pub fn find(&self, addr: u64) -> Option<&Region> {
        let index = self.regions.partition_point(|region| region.start <= addr);
        let region = self.regions.get(index.checked_sub(1)?)?;
        region.contains(addr).then_some(region)
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    pub fn len(&self) -> usize {
        self.regions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }

    /// このリストを導入したキャッシュ世代（未導入なら 0）
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub(crate) fn set_generation(&mut self, generation: u64) {
        self.generation = generation;
    }

    /// 古いリストのキャッシュ済みイメージを、範囲が一致する領域へ移す
    ///
    /// 両リストが開始アドレス昇順であることを利用し、1 回の走査で対応を取ります。
    /// 移されたイメージのスロットは古いリスト側で空になります。移した数を返します。
    pub fn migrate_images(&mut self, old: &MapList) -> usize {
        let mut moved = 0;
        let mut cursor = old.regions.iter().peekable();

        for region in &mut self.regions {
            while cursor.next_if(|prev| prev.start < region.start).is_some() {}
            let Some(prev) = cursor.peek() else {
                break;
            };
            if prev.start != region.start || prev.end != region.end {
                continue;
            }
            if let Some(object) = prev.take_image() {
                *region.image.get_mut().unwrap_or_else(PoisonError::into_inner) = Some(object);
                moved += 1;
            }
        }

        moved
    }
}
