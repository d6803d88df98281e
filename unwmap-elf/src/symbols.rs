//! アドレスからのシンボル解決
//!
//! 命令ポインタを囲む関数シンボル（`STT_FUNC`）を、主シンボルテーブル（`.symtab`・`.dynsym`）と
//! MiniDebugInfo のシンボルテーブルから探します。
//! 候補は「ip より手前で最も近い」だけでなく、シンボルのサイズ範囲内に ip を含む必要があります。

use crate::accessor::{AnyElf, ElfAccessor};
use crate::{ElfImage, ElfObject};
use object::elf::{SHN_ABS, SHN_UNDEF, SHT_DYNSYM, SHT_SYMTAB, STT_FUNC};
use object::read::elf::{FileHeader, SectionHeader, Sym};
use std::mem;
use tracing::{debug, trace};

/// シンボルテーブル走査の結果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lookup {
    /// より近いシンボルは見つからなかった
    NotFound,
    /// より近いシンボルが見つかり、名前をバッファに書き込んだ
    Found,
    /// より近いシンボルが見つかったが、名前がバッファに収まらなかった
    Truncated,
}

/// シンボル解決の結果（名前は呼び出し元のバッファに書き込まれる）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SymbolMatch {
    /// シンボル先頭から ip までのバイト数
    pub offset: u64,
    /// バッファに書き込まれた名前の長さ（終端 NUL を除く）
    pub name_len: usize,
    pub truncated: bool,
}

/// シンボル情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名（可読な形式）
    pub demangled_name: String,
    /// シンボル先頭からのオフセット
    pub offset: u64,
    /// 名前がバッファ容量で切り詰められたか
    pub truncated: bool,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: String, offset: u64, truncated: bool) -> Self {
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            offset,
            truncated,
        }
    }

    /// 表示用の名前を取得（デマングル可能ならデマングル後、できなければマングル名）
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }
}

/// シンボル名をデマングルする
fn demangle_symbol(name: &str) -> String {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", demangled);
    }
    // C++ のマングルはそのまま
    name.to_string()
}

/// 名前をバッファにコピーして NUL 終端する
fn copy_name(name: &[u8], buf: &mut [u8]) -> Lookup {
    let Some(capacity) = buf.len().checked_sub(1) else {
        return Lookup::Truncated;
    };
    let len = name.len().min(capacity);
    buf[..len].copy_from_slice(&name[..len]);
    buf[len] = 0;
    if name.len() > capacity {
        Lookup::Truncated
    } else {
        Lookup::Found
    }
}

fn scan_symbols<Elf: FileHeader>(
    elf: &ElfAccessor<'_, Elf>,
    ip: u64,
    load_offset: u64,
    buf: &mut [u8],
    min_distance: &mut u64,
) -> Lookup {
    let endian = elf.endian();
    let Some(sections) = elf.section_table() else {
        return Lookup::NotFound;
    };

    let mut result = Lookup::NotFound;
    for section in sections.iter() {
        let sh_type = section.sh_type(endian);
        if sh_type != SHT_SYMTAB && sh_type != SHT_DYNSYM {
            continue;
        }

        let Some(symtab) = elf.section_data(section) else {
            continue;
        };
        let entsize: u64 = section.sh_entsize(endian).into();
        if entsize < mem::size_of::<Elf::Sym>() as u64 {
            debug!("symbol entry size {} too small, skipping table", entsize);
            continue;
        }
        let Some(strtab) = elf.string_table(section.sh_link(endian)) else {
            continue;
        };
        let symtab_offset: u64 = section.sh_offset(endian).into();
        trace!("symtab=0x{:x}[{}]", symtab_offset, sh_type);

        let symbols = symtab
            .chunks_exact(entsize as usize)
            .filter_map(|entry| object::pod::from_bytes::<Elf::Sym>(entry).ok())
            .map(|(sym, _)| sym);

        for sym in symbols {
            let shndx = sym.st_shndx(endian);
            if sym.st_type() != STT_FUNC || shndx == SHN_UNDEF {
                continue;
            }

            let mut addr: u64 = sym.st_value(endian).into();
            if shndx != SHN_ABS {
                addr = addr.wrapping_add(load_offset);
            }
            let size: u64 = sym.st_size(endian).into();
            let distance = ip.wrapping_sub(addr);

            if distance < *min_distance && distance < size {
                *min_distance = distance;
                let name = strtab.get(sym.st_name(endian)).unwrap_or_default();
                trace!("0x{:016x} info=0x{:02x} {}", addr, sym.st_info(), String::from_utf8_lossy(name));
                result = copy_name(name, buf);
            }
        }
    }
    result
}

/// ELF イメージのシンボルテーブルを走査して ip を囲む関数を探す
///
/// `min_distance` は走査をまたいで共有される現在の最短距離です。
/// より近いシンボルが見つかった場合だけ更新され、名前が `buf` に書き込まれます。
/// 距離が等しい候補は先に見つかったものが優先されます。
pub fn lookup_symbol(
    image: &ElfImage,
    ip: u64,
    load_offset: u64,
    buf: &mut [u8],
    min_distance: &mut u64,
) -> Lookup {
    match image.elf() {
        Some(AnyElf::Elf32(elf)) => scan_symbols(&elf, ip, load_offset, buf, min_distance),
        Some(AnyElf::Elf64(elf)) => scan_symbols(&elf, ip, load_offset, buf, min_distance),
        None => Lookup::NotFound,
    }
}

/// ELF オブジェクト内で ip を囲む関数名を解決する
///
/// `segbase` はマッピングの開始アドレス、`mapoff` はそのファイルオフセットです。
/// MiniDebugInfo にもっと近いシンボルがあればそちらを採用します。
/// シンボル情報がなければ `None` を返します。
pub fn get_proc_name_in_image(
    object: &ElfObject,
    segbase: u64,
    mapoff: u64,
    ip: u64,
    buf: &mut [u8],
    page_size: u64,
) -> Option<SymbolMatch> {
    let image = object.image();
    let load_offset = image.elf()?.load_offset(segbase, mapoff, page_size);
    let mut min_distance = u64::MAX;

    let mut result = lookup_symbol(image, ip, load_offset, buf, &mut min_distance);

    if let Some(mdi) = object.minidebuginfo() {
        match lookup_symbol(mdi, ip, load_offset, buf, &mut min_distance) {
            Lookup::NotFound => {}
            closer => result = closer,
        }
    }

    if result == Lookup::NotFound || min_distance >= image.len() as u64 {
        return None;
    }

    let name_len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    Some(SymbolMatch {
        offset: min_distance,
        name_len,
        truncated: result == Lookup::Truncated,
    })
}

/// シンボルを解決して所有された `Symbol` を返す
///
/// `capacity` は名前バッファの容量（終端 NUL を含む）です。
pub fn resolve(
    object: &ElfObject,
    segbase: u64,
    mapoff: u64,
    ip: u64,
    capacity: usize,
    page_size: u64,
) -> Option<Symbol> {
    let mut buf = vec![0u8; capacity];
    let found = get_proc_name_in_image(object, segbase, mapoff, ip, &mut buf, page_size)?;
    let name = String::from_utf8_lossy(&buf[..found.name_len]).into_owned();
    Some(Symbol::new(name, found.offset, found.truncated))
}
