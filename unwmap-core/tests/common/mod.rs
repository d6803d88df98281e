//! キャッシュテスト用の列挙元とフィクスチャ

#![allow(dead_code)]

use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SymbolFlags, SymbolKind, SymbolScope};
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Barrier, Mutex};
use tempfile::NamedTempFile;
use tracing_subscriber::EnvFilter;
use unwmap_target::{MapSource, MemoryMapping, Pid};

/// テストログを有効にする（`RUST_LOG` で制御）
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// 内容を差し替えられる列挙元
#[derive(Default)]
pub struct FakeMaps {
    mappings: Mutex<Vec<MemoryMapping>>,
    failing: AtomicBool,
    calls: AtomicUsize,
    gate: Mutex<Option<Arc<Barrier>>>,
}

impl FakeMaps {
    pub fn new(mappings: Vec<MemoryMapping>) -> Arc<Self> {
        Arc::new(Self {
            mappings: Mutex::new(mappings),
            ..Default::default()
        })
    }

    pub fn set(&self, mappings: Vec<MemoryMapping>) {
        *self.mappings.lock().unwrap() = mappings;
    }

    pub fn push(&self, mapping: MemoryMapping) {
        self.mappings.lock().unwrap().push(mapping);
    }

    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// 列挙が呼ばれた回数
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// 以降の列挙を、指定したスレッド数がそろうまで待たせる
    pub fn gate(&self, barrier: Option<Arc<Barrier>>) {
        *self.gate.lock().unwrap() = barrier;
    }
}

impl MapSource for FakeMaps {
    fn mappings(&self, _pid: Pid) -> unwmap_target::Result<Vec<MemoryMapping>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let barrier = self.gate.lock().unwrap().clone();
        if let Some(barrier) = barrier {
            barrier.wait();
        }
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("Failed to enumerate mappings");
        }
        Ok(self.mappings.lock().unwrap().clone())
    }
}

/// "r-xp" 形式のパーミッションからマッピングを作る
pub fn mapping(start: u64, end: u64, perms: &str, path: Option<PathBuf>) -> MemoryMapping {
    let perms = perms.as_bytes();
    MemoryMapping {
        start,
        end,
        offset: 0,
        readable: perms[0] == b'r',
        writable: perms[1] == b'w',
        executable: perms[2] == b'x',
        shared: perms.get(3) == Some(&b's'),
        path,
    }
}

/// 関数シンボル（名前、値、サイズ）を持つ ELF をファイルに書き出す
pub fn elf_file(funcs: &[(&str, u64, u64)]) -> NamedTempFile {
    let mut obj = Object::new(BinaryFormat::Elf, Architecture::X86_64, Endianness::Little);
    let text = obj.section_id(StandardSection::Text);
    obj.append_section_data(text, &[0xc3; 0x40], 16);

    for &(name, value, size) in funcs {
        obj.add_symbol(Symbol {
            name: name.as_bytes().to_vec(),
            value,
            size,
            kind: SymbolKind::Text,
            scope: SymbolScope::Linkage,
            weak: false,
            section: SymbolSection::Section(text),
            flags: SymbolFlags::None,
        });
    }

    let data = obj.write().expect("Failed to write ELF fixture");
    let mut file = NamedTempFile::new().expect("Failed to create temp file");
    file.write_all(&data).expect("Failed to write temp file");
    file.flush().expect("Failed to flush temp file");
    file
}
