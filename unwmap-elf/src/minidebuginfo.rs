//! MiniDebugInfo（`.gnu_debugdata`）の展開

use crate::{DecompressError, ElfImage};
use tracing::debug;

/// xz 圧縮された ELF イメージを格納するセクション名
pub const MINIDEBUGINFO_SECTION: &[u8] = b".gnu_debugdata";

/// 出力バッファの最小サイズ
#[cfg(feature = "minidebuginfo")]
const MIN_OUTPUT_LEN: usize = 4096;

/// ELF イメージに埋め込まれた MiniDebugInfo を取り出す
///
/// セクションがない、展開に失敗した、展開結果が ELF でない場合は `None` です。
pub fn extract_minidebuginfo(image: &ElfImage) -> Option<ElfImage> {
    let compressed = image.elf()?.find_section(MINIDEBUGINFO_SECTION)?;

    let data = match xz_decompress(compressed) {
        Ok(data) => data,
        Err(e) => {
            debug!("LZMA decompression failed: {}", e);
            return None;
        }
    };

    match ElfImage::from_bytes(data) {
        Ok(mdi) => {
            debug!("extracted MiniDebugInfo ({} bytes)", mdi.len());
            Some(mdi)
        }
        Err(e) => {
            debug!("MiniDebugInfo is not an ELF image: {}", e);
            None
        }
    }
}

/// xz ストリームを展開する
///
/// 出力バッファは圧縮サイズの 2 倍から始め、デコーダが出力領域の不足を報告するたびに倍にします。
/// デコーダがストリーム終端を報告した時点で完了です。
/// バッファを確保できない場合は `OutOfMemory` を返します。
#[cfg(feature = "minidebuginfo")]
pub fn xz_decompress(src: &[u8]) -> Result<Vec<u8>, DecompressError> {
    decompress_with_limit(src, usize::MAX)
}

/// 出力バッファの上限 `limit` を指定して展開する
///
/// 上限を超える拡張は確保失敗と同じく `OutOfMemory` になります。
#[cfg(feature = "minidebuginfo")]
fn decompress_with_limit(src: &[u8], limit: usize) -> Result<Vec<u8>, DecompressError> {
    use xz2::stream::{Action, Status, Stream};

    let mut stream = Stream::new_stream_decoder(u64::MAX, 0)?;
    let mut output = Vec::new();
    let initial = src.len().saturating_mul(2).max(MIN_OUTPUT_LEN).min(limit);
    reserve_output(&mut output, initial, limit)?;

    loop {
        if output.len() == output.capacity() {
            let additional = output.capacity().max(MIN_OUTPUT_LEN);
            reserve_output(&mut output, additional, limit)?;
        }

        let consumed = usize::try_from(stream.total_in()).unwrap_or(src.len());
        let input = src.get(consumed..).unwrap_or_default();
        let (in_before, out_before) = (stream.total_in(), output.len());

        match stream.process_vec(input, &mut output, Action::Run)? {
            Status::StreamEnd => break,
            _ => {
                let progressed = stream.total_in() != in_before || output.len() != out_before;
                // 出力に空きがあるのに進まない場合は入力が途中で切れている
                if !progressed && output.len() < output.capacity() {
                    return Err(DecompressError::Truncated);
                }
            }
        }
    }

    output.shrink_to_fit();
    Ok(output)
}

/// 出力バッファを `additional` バイト拡張する（失敗してもパニックしない）
#[cfg(feature = "minidebuginfo")]
fn reserve_output(output: &mut Vec<u8>, additional: usize, limit: usize) -> Result<(), DecompressError> {
    let requested = output.len().saturating_add(additional);
    if requested > limit {
        return Err(DecompressError::OutOfMemory { requested });
    }
    output
        .try_reserve_exact(additional)
        .map_err(|_| DecompressError::OutOfMemory { requested })
}

#[cfg(not(feature = "minidebuginfo"))]
pub fn xz_decompress(_src: &[u8]) -> Result<Vec<u8>, DecompressError> {
    Err(DecompressError::Unsupported)
}

#[cfg(all(test, feature = "minidebuginfo"))]
mod tests {
    use super::*;
    use std::io::Write;

    fn compress(data: &[u8]) -> Vec<u8> {
        let mut encoder = xz2::write::XzEncoder::new(Vec::new(), 6);
        encoder.write_all(data).unwrap();
        encoder.finish().unwrap()
    }

    #[test]
    fn test_decompress_high_ratio() {
        // 圧縮率が高く、出力バッファの倍化が何度も必要になる入力
        let original = vec![0x5a; 1 << 20];
        let compressed = compress(&original);
        assert!(compressed.len() * 4 < original.len());

        let output = xz_decompress(&compressed).expect("decompression failed");
        assert_eq!(output, original);
    }

    #[test]
    fn test_allocation_failure_is_error() {
        let original = vec![0u8; 1 << 20];
        let compressed = compress(&original);

        let err = decompress_with_limit(&compressed, 64 << 10).unwrap_err();
        assert!(matches!(err, DecompressError::OutOfMemory { .. }));

        // 上限に余裕があれば同じ入力を展開できる
        let output = decompress_with_limit(&compressed, 2 << 20).expect("decompression failed");
        assert_eq!(output, original);
    }

    #[test]
    fn test_decompress_truncated_stream() {
        let compressed = compress(b"MiniDebugInfo payload that will be cut short");
        let cut = &compressed[..compressed.len() / 2];
        assert!(xz_decompress(cut).is_err());
    }

    #[test]
    fn test_decompress_garbage() {
        assert!(xz_decompress(b"definitely not an xz stream").is_err());
        assert!(xz_decompress(&[]).is_err());
    }
}
