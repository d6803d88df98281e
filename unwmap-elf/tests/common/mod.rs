//! テスト用 ELF フィクスチャ

#![allow(dead_code)]

use object::write::{Object, StandardSection, Symbol, SymbolSection};
use object::{Architecture, BinaryFormat, Endianness, SectionKind, SymbolFlags, SymbolKind, SymbolScope};
use std::io::Write;

/// 関数シンボル（名前、値、サイズ）
pub type Func<'a> = (&'a str, u64, u64);

/// 関数シンボルと追加セクションを持つ ELF を生成する
pub fn build_elf(funcs: &[Func<'_>], sections: &[(&str, &[u8])]) -> Vec<u8> {
    build_elf_for(Architecture::X86_64, funcs, sections)
}

/// アーキテクチャ（= ELF クラス）を指定して ELF を生成する
pub fn build_elf_for(arch: Architecture, funcs: &[Func<'_>], sections: &[(&str, &[u8])]) -> Vec<u8> {
    let mut obj = Object::new(BinaryFormat::Elf, arch, Endianness::Little);
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

    for &(name, data) in sections {
        let id = obj.add_section(Vec::new(), name.as_bytes().to_vec(), SectionKind::Other);
        obj.append_section_data(id, data, 1);
    }

    obj.write().expect("Failed to write ELF fixture")
}

/// MiniDebugInfo として埋め込むために xz 圧縮する
pub fn xz(data: &[u8]) -> Vec<u8> {
    let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
    encoder.write_all(data).expect("Failed to compress");
    encoder.finish().expect("Failed to finish xz stream")
}

/// 主シンボルと MiniDebugInfo のシンボルを持つ ELF を生成する
pub fn build_elf_with_minidebuginfo(primary: &[Func<'_>], mini: &[Func<'_>]) -> Vec<u8> {
    let inner = build_elf(mini, &[]);
    let compressed = xz(&inner);
    build_elf(primary, &[(".gnu_debugdata", &compressed)])
}

/// セクション名からセクションヘッダのインデックスを探す
pub fn section_index(data: &[u8], name: &str) -> usize {
    use object::{Object as _, ObjectSection as _};
    let file = object::File::parse(data).expect("Failed to parse fixture");
    file.section_by_name(name).expect("section not found").index().0
}

/// ELF64 のセクションヘッダを書き換える（sh_offset = +0x18, sh_size = +0x20）
pub fn patch_section_u64(data: &mut [u8], index: usize, field: usize, value: u64) {
    let shoff = u64::from_le_bytes(data[0x28..0x30].try_into().unwrap()) as usize;
    let entsize = u16::from_le_bytes(data[0x3a..0x3c].try_into().unwrap()) as usize;
    let at = shoff + index * entsize + field;
    data[at..at + 8].copy_from_slice(&value.to_le_bytes());
}
