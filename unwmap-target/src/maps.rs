//! メモリマップ列挙機能

use crate::Result;
use nix::unistd::{Pid, SysconfVar};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// ページサイズを取得できなかった場合の既定値
const DEFAULT_PAGE_SIZE: u64 = 4096;

/// メモリマッピング情報
///
/// `/proc/<pid>/maps` の 1 行に対応します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryMapping {
    pub start: u64,
    pub end: u64,
    /// バックしているファイル内のオフセット
    pub offset: u64,
    pub readable: bool,
    pub writable: bool,
    pub executable: bool,
    /// 共有マッピング（`s`）かプライベート（`p`）か
    pub shared: bool,
    /// バックしているファイルのパス（匿名マッピングの場合は None）
    pub path: Option<PathBuf>,
}

impl MemoryMapping {
    /// アドレスがこのマッピングの範囲内にあるか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.start && addr < self.end
    }
}

/// メモリ領域の列挙元
///
/// キャッシュ層は列挙結果の順序とフラグの意味だけに依存します。
/// 実装はアドレス昇順でマッピングを返すことが期待されます。
pub trait MapSource: Send + Sync {
    /// 指定されたプロセスのメモリマッピングを列挙する
    fn mappings(&self, pid: Pid) -> Result<Vec<MemoryMapping>>;
}

impl<T: MapSource + ?Sized> MapSource for Arc<T> {
    fn mappings(&self, pid: Pid) -> Result<Vec<MemoryMapping>> {
        (**self).mappings(pid)
    }
}

/// `/proc/<pid>/maps` による列挙
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcMaps;

impl ProcMaps {
    /// /proc/pid/maps のパスを取得する
    fn maps_path(pid: Pid) -> String {
        format!("/proc/{}/maps", pid)
    }
}

impl MapSource for ProcMaps {
    fn mappings(&self, pid: Pid) -> Result<Vec<MemoryMapping>> {
        let maps_path = Self::maps_path(pid);
        let contents = fs::read_to_string(&maps_path)
            .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", maps_path, e))?;
        parse_maps(&contents)
    }
}

/// /proc/pid/maps の内容を解析する
///
/// フォーマット: "address perms offset dev inode pathname"
/// 例: "7f1234567000-7f1234568000 r-xp 00001000 08:01 123456 /lib/libc.so"
///
/// フィールドが足りない行は読み飛ばします。16 進数として解釈できない
/// アドレスやオフセットはエラーになります。
pub fn parse_maps(contents: &str) -> Result<Vec<MemoryMapping>> {
    let mut mappings = Vec::new();

    for line in contents.lines() {
        if let Some(mapping) = parse_line(line)? {
            mappings.push(mapping);
        }
    }

    trace!("parsed {} mappings", mappings.len());
    Ok(mappings)
}

/// 1 行を解析する
fn parse_line(line: &str) -> Result<Option<MemoryMapping>> {
    // パス名は空白を含みうるので、先頭 5 フィールドだけを切り出す
    let mut fields = [""; 5];
    let mut rest = line;
    for field in fields.iter_mut() {
        rest = rest.trim_start();
        let end = rest.find(char::is_whitespace).unwrap_or(rest.len());
        *field = &rest[..end];
        rest = &rest[end..];
    }
    if fields.iter().any(|field| field.is_empty()) {
        return Ok(None);
    }
    let [range, perms, offset, _dev, _inode] = fields;

    // アドレス範囲をパース
    let Some((start, end)) = range.split_once('-') else {
        return Ok(None);
    };
    let start = u64::from_str_radix(start, 16)
        .map_err(|e| anyhow::anyhow!("Failed to parse start address {:?}: {}", start, e))?;
    let end = u64::from_str_radix(end, 16)
        .map_err(|e| anyhow::anyhow!("Failed to parse end address {:?}: {}", end, e))?;
    let offset = u64::from_str_radix(offset, 16)
        .map_err(|e| anyhow::anyhow!("Failed to parse offset {:?}: {}", offset, e))?;

    // パーミッションをパース
    let perms = perms.as_bytes();
    let readable = perms.first() == Some(&b'r');
    let writable = perms.get(1) == Some(&b'w');
    let executable = perms.get(2) == Some(&b'x');
    let shared = perms.get(3) == Some(&b's');

    let path = rest.trim();
    let path = (!path.is_empty()).then(|| PathBuf::from(path));

    Ok(Some(MemoryMapping {
        start,
        end,
        offset,
        readable,
        writable,
        executable,
        shared,
        path,
    }))
}

/// 呼び出し元プロセスの PID を取得する
pub fn local_pid() -> Pid {
    nix::unistd::getpid()
}

/// システムのページサイズを取得する
pub fn page_size() -> u64 {
    match nix::unistd::sysconf(SysconfVar::PAGE_SIZE) {
        Ok(Some(size)) if size > 0 => size as u64,
        _ => DEFAULT_PAGE_SIZE,
    }
}
