//! ELF テーブルへの境界チェック付きアクセス
//!
//! 対象のバイト列は切り詰められていたり、不正なヘッダを含んでいたりする可能性があります。
//! すべてのオフセット計算はオーバーフローを検査し、イメージ長と比較してから読み出します。
//! 範囲外の場合は「情報なし」（`None`）を返し、パニックすることはありません。

use object::elf::{FileHeader32, FileHeader64, EV_CURRENT, PT_LOAD};
use object::read::elf::{FileHeader, ProgramHeader, SectionHeader};
use object::read::StringTable;
use object::{Endianness, FileKind};
use std::marker::PhantomData;
use std::mem;
use tracing::{debug, trace};

/// 単一クラス（32/64bit）の ELF イメージへのアクセサ
#[derive(Debug, Clone, Copy)]
pub struct ElfAccessor<'data, Elf: FileHeader> {
    header: &'data Elf,
    endian: Elf::Endian,
    data: &'data [u8],
}

/// セクションヘッダ配列のビュー
///
/// エントリは `e_shentsize` 間隔で並びます。
#[derive(Debug, Clone, Copy)]
pub struct SectionTable<'data, Elf: FileHeader> {
    bytes: &'data [u8],
    entsize: usize,
    count: usize,
    _elf: PhantomData<Elf>,
}

impl<'data, Elf: FileHeader> SectionTable<'data, Elf> {
    /// セクション数
    pub fn len(&self) -> usize {
        self.count
    }

    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// インデックスでセクションヘッダを取得する
    pub fn get(&self, index: usize) -> Option<&'data Elf::SectionHeader> {
        if index >= self.count {
            return None;
        }
        let start = index.checked_mul(self.entsize)?;
        let entry = self.bytes.get(start..start.checked_add(self.entsize)?)?;
        object::pod::from_bytes::<Elf::SectionHeader>(entry)
            .ok()
            .map(|(header, _)| header)
    }

    /// セクションヘッダをテーブル順に列挙する
    pub fn iter(self) -> impl Iterator<Item = &'data Elf::SectionHeader> {
        (0..self.count).filter_map(move |index| self.get(index))
    }
}

/// `offset + len` を検査してイメージ内の範囲を切り出す
fn slice_at(data: &[u8], offset: u64, len: u64) -> Option<&[u8]> {
    let end = offset.checked_add(len)?;
    if end > data.len() as u64 {
        return None;
    }
    data.get(usize::try_from(offset).ok()?..usize::try_from(end).ok()?)
}

impl<'data, Elf: FileHeader> ElfAccessor<'data, Elf> {
    /// ELF イメージとして妥当か検査してアクセサを作成する
    ///
    /// マジック、クラス、バイトオーダ、`EI_VERSION` を確認します。
    pub fn parse(data: &'data [u8]) -> Option<Self> {
        let header = Elf::parse(data).ok()?;
        if header.e_ident().version != EV_CURRENT {
            debug!("unsupported ELF version {}", header.e_ident().version);
            return None;
        }
        let endian = header.endian().ok()?;
        Some(Self {
            header,
            endian,
            data,
        })
    }

    pub fn endian(&self) -> Elf::Endian {
        self.endian
    }

    /// イメージ全体のバイト列
    pub fn data(&self) -> &'data [u8] {
        self.data
    }

    /// セクションヘッダ配列を取得する
    pub fn section_table(&self) -> Option<SectionTable<'data, Elf>> {
        let shoff: u64 = self.header.e_shoff(self.endian).into();
        let shnum = u64::from(self.header.e_shnum(self.endian));
        let entsize = u64::from(self.header.e_shentsize(self.endian));

        if entsize < mem::size_of::<Elf::SectionHeader>() as u64 {
            debug!("section header entry too small ({} bytes)", entsize);
            return None;
        }

        let Some(bytes) = shnum
            .checked_mul(entsize)
            .and_then(|len| slice_at(self.data, shoff, len))
        else {
            debug!(
                "section table outside of image? (0x{:x} + {} * {} > 0x{:x})",
                shoff,
                shnum,
                entsize,
                self.data.len()
            );
            return None;
        };

        Some(SectionTable {
            bytes,
            entsize: entsize as usize,
            count: shnum as usize,
            _elf: PhantomData,
        })
    }

    /// インデックスの位置にあるセクションヘッダを取得する
    ///
    /// ヘッダのスロットがイメージ内に収まっていることだけを検査します。
    pub fn section_header(&self, index: u32) -> Option<&'data Elf::SectionHeader> {
        let shoff: u64 = self.header.e_shoff(self.endian).into();
        let entsize = u64::from(self.header.e_shentsize(self.endian));
        if entsize < mem::size_of::<Elf::SectionHeader>() as u64 {
            return None;
        }

        let Some(slot) = u64::from(index)
            .checked_mul(entsize)
            .and_then(|rel| shoff.checked_add(rel))
            .and_then(|start| slice_at(self.data, start, entsize))
        else {
            debug!("section header {} outside of image?", index);
            return None;
        };

        object::pod::from_bytes::<Elf::SectionHeader>(slot)
            .ok()
            .map(|(header, _)| header)
    }

    /// セクションの内容を取得する
    pub fn section_data(&self, section: &Elf::SectionHeader) -> Option<&'data [u8]> {
        let offset: u64 = section.sh_offset(self.endian).into();
        let size: u64 = section.sh_size(self.endian).into();
        let data = slice_at(self.data, offset, size);
        if data.is_none() {
            debug!(
                "section data outside of image? (0x{:x} + 0x{:x} > 0x{:x})",
                offset,
                size,
                self.data.len()
            );
        }
        data
    }

    /// 文字列テーブルを取得する
    pub fn string_table(&self, index: u32) -> Option<StringTable<'data>> {
        let section = self.section_header(index)?;
        let bytes = self.section_data(section)?;
        let offset: u64 = section.sh_offset(self.endian).into();
        trace!("strtab=0x{:x}", offset);
        Some(StringTable::new(bytes, 0, bytes.len() as u64))
    }

    /// セクション名でセクションを検索する
    ///
    /// 最初に名前が一致したセクションの内容を返します。
    /// 一致したセクションがイメージからはみ出している場合は `None` です。
    pub fn find_section(&self, name: &[u8]) -> Option<&'data [u8]> {
        let sections = self.section_table()?;
        let shstrndx = u32::from(self.header.e_shstrndx(self.endian));
        let names = self.string_table(shstrndx)?;

        let section = sections
            .iter()
            .find(|section| names.get(section.sh_name(self.endian)).ok() == Some(name))?;

        let data = self.section_data(section);
        if data.is_none() {
            debug!("section {} outside image?", String::from_utf8_lossy(name));
        }
        data
    }

    /// ロードオフセット（実行時アドレスとリンク時アドレスの差）を計算する
    ///
    /// `mapoff` を含むページから始まる `PT_LOAD` セグメントを探し、
    /// `segbase - p_vaddr` を返します（`p_offset` がページ境界にない場合はその端数を補正）。
    /// 見つからなければ 0 です。
    pub fn load_offset(&self, segbase: u64, mapoff: u64, page_size: u64) -> u64 {
        let phoff: u64 = self.header.e_phoff(self.endian).into();
        let phnum = u64::from(self.header.e_phnum(self.endian));
        let entsize = u64::from(self.header.e_phentsize(self.endian));

        if entsize < mem::size_of::<Elf::ProgramHeader>() as u64 {
            return 0;
        }
        let Some(table) = phnum
            .checked_mul(entsize)
            .and_then(|len| slice_at(self.data, phoff, len))
        else {
            debug!("program header table outside of image?");
            return 0;
        };

        let page_mask = !(page_size.max(1) - 1);
        let load_segment = table
            .chunks_exact(entsize as usize)
            .filter_map(|entry| object::pod::from_bytes::<Elf::ProgramHeader>(entry).ok())
            .map(|(phdr, _)| phdr)
            .find(|phdr| {
                let p_offset: u64 = phdr.p_offset(self.endian).into();
                phdr.p_type(self.endian) == PT_LOAD && p_offset & page_mask == mapoff
            });

        // セグメント先頭がページ境界にない場合は、その端数だけ仮想アドレスを戻す
        match load_segment {
            Some(phdr) => {
                let p_offset: u64 = phdr.p_offset(self.endian).into();
                let p_vaddr: u64 = phdr.p_vaddr(self.endian).into();
                segbase
                    .wrapping_sub(p_vaddr)
                    .wrapping_add(p_offset.wrapping_sub(mapoff))
            }
            None => 0,
        }
    }
}

/// クラスを問わない ELF アクセサ
#[derive(Debug, Clone, Copy)]
pub enum AnyElf<'data> {
    Elf32(ElfAccessor<'data, FileHeader32<Endianness>>),
    Elf64(ElfAccessor<'data, FileHeader64<Endianness>>),
}

impl<'data> AnyElf<'data> {
    /// ELF クラスを判定してアクセサを作成する
    pub fn parse(data: &'data [u8]) -> Option<Self> {
        match FileKind::parse(data).ok()? {
            FileKind::Elf32 => ElfAccessor::parse(data).map(Self::Elf32),
            FileKind::Elf64 => ElfAccessor::parse(data).map(Self::Elf64),
            _ => None,
        }
    }

    pub fn find_section(&self, name: &[u8]) -> Option<&'data [u8]> {
        match self {
            Self::Elf32(elf) => elf.find_section(name),
            Self::Elf64(elf) => elf.find_section(name),
        }
    }

    pub fn load_offset(&self, segbase: u64, mapoff: u64, page_size: u64) -> u64 {
        match self {
            Self::Elf32(elf) => elf.load_offset(segbase, mapoff, page_size),
            Self::Elf64(elf) => elf.load_offset(segbase, mapoff, page_size),
        }
    }
}
