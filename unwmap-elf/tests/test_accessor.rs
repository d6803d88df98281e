//! 不正なヘッダに対するアクセサのテスト

mod common;

use common::{build_elf, build_elf_with_minidebuginfo, patch_section_u64, section_index};
use unwmap_elf::{extract_minidebuginfo, resolve, AnyElf, ElfImage, ElfObject, MINIDEBUGINFO_SECTION};

const SH_OFFSET: usize = 0x18;
const SH_SIZE: usize = 0x20;

#[test]
fn test_find_section() {
    let data = build_elf(&[], &[(".note.custom", b"payload")]);
    let elf = AnyElf::parse(&data).unwrap();
    assert_eq!(elf.find_section(b".note.custom"), Some(&b"payload"[..]));
    assert_eq!(elf.find_section(b".missing"), None);
}

#[test]
fn test_section_beyond_image_is_unavailable() {
    let mut data = build_elf_with_minidebuginfo(&[], &[("f", 0x1000, 0x10)]);
    let index = section_index(&data, ".gnu_debugdata");
    let len = data.len() as u64;

    patch_section_u64(&mut data, index, SH_SIZE, len);
    let elf = AnyElf::parse(&data).unwrap();
    assert_eq!(elf.find_section(MINIDEBUGINFO_SECTION), None);

    let image = ElfImage::from_bytes(data.clone()).unwrap();
    assert!(extract_minidebuginfo(&image).is_none());

    // offset + size がオーバーフローする
    patch_section_u64(&mut data, index, SH_OFFSET, u64::MAX - 4);
    patch_section_u64(&mut data, index, SH_SIZE, 16);
    let elf = AnyElf::parse(&data).unwrap();
    assert_eq!(elf.find_section(MINIDEBUGINFO_SECTION), None);
}

#[test]
fn test_broken_symtab_is_skipped() {
    let mut data = build_elf(&[("func", 0x1000, 0x10)], &[]);
    let symtab = section_index(&data, ".symtab");
    patch_section_u64(&mut data, symtab, SH_SIZE, u64::MAX / 2);

    let obj = ElfObject::new(ElfImage::from_bytes(data).unwrap(), true);
    assert!(resolve(&obj, 0, 0, 0x1004, 64, 4096).is_none());
}

#[test]
fn test_broken_strtab_is_skipped() {
    let mut data = build_elf(&[("func", 0x1000, 0x10)], &[]);
    let strtab = section_index(&data, ".strtab");
    patch_section_u64(&mut data, strtab, SH_OFFSET, u64::MAX);

    let obj = ElfObject::new(ElfImage::from_bytes(data).unwrap(), true);
    assert!(resolve(&obj, 0, 0, 0x1004, 64, 4096).is_none());
}

/// 決定的な疑似乱数（xorshift64）
struct XorShift(u64);

impl XorShift {
    fn next(&mut self) -> u64 {
        self.0 ^= self.0 << 13;
        self.0 ^= self.0 >> 7;
        self.0 ^= self.0 << 17;
        self.0
    }
}

#[test]
fn test_fuzzed_headers_never_panic() {
    let original = build_elf_with_minidebuginfo(
        &[("primary_fn", 0x1000, 0x100)],
        &[("mini_fn", 0x1080, 0x20)],
    );
    let shoff = u64::from_le_bytes(original[0x28..0x30].try_into().unwrap()) as usize;
    let mut rng = XorShift(0x9e37_79b9_7f4a_7c15);

    for _ in 0..2000 {
        let mut data = original.clone();
        for _ in 0..(rng.next() % 8 + 1) {
            // ELF ヘッダとセクションヘッダ領域を重点的に壊す
            let at = if rng.next() % 2 == 0 {
                (rng.next() % 64) as usize
            } else {
                shoff + (rng.next() as usize % (data.len() - shoff))
            };
            data[at] = rng.next() as u8;
        }

        if let Some(elf) = AnyElf::parse(&data) {
            let _ = elf.find_section(MINIDEBUGINFO_SECTION);
            let _ = elf.load_offset(0x5555_0000_0000, 0, 4096);
        }
        if let Ok(image) = ElfImage::from_bytes(data) {
            let obj = ElfObject::new(image, true);
            let _ = resolve(&obj, 0, 0, 0x1090, 16, 4096);
        }
    }
}

#[test]
fn test_truncated_image_never_panics() {
    let original = build_elf_with_minidebuginfo(&[("primary_fn", 0x1000, 0x100)], &[("mini_fn", 0x1080, 0x20)]);
    for len in (0..original.len()).step_by(7) {
        let data = original[..len].to_vec();
        if let Ok(image) = ElfImage::from_bytes(data) {
            let obj = ElfObject::new(image, true);
            let _ = resolve(&obj, 0, 0, 0x1090, 16, 4096);
        }
    }
}
