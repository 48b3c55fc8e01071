//! Shared helpers for integration tests: a handcrafted minimal FLAC
//! file (streaminfo + vorbis comments, no audio frames) that metaflac
//! can read and rewrite.

use std::io::Write;
use std::path::Path;

/// STREAMINFO for a 44.1 kHz / 16-bit / stereo stream with no samples.
fn streaminfo_block() -> Vec<u8> {
    let mut block = Vec::with_capacity(34);
    block.extend_from_slice(&4096u16.to_be_bytes()); // min block size
    block.extend_from_slice(&4096u16.to_be_bytes()); // max block size
    block.extend_from_slice(&[0, 0, 0]); // min frame size (unknown)
    block.extend_from_slice(&[0, 0, 0]); // max frame size (unknown)
    let sample_rate = 44100u64;
    let channels = 2u64;
    let bits_per_sample = 16u64;
    let total_samples = 0u64;
    let packed: u64 = (sample_rate << 44)
        | ((channels - 1) << 41)
        | ((bits_per_sample - 1) << 36)
        | total_samples;
    block.extend_from_slice(&packed.to_be_bytes());
    block.extend_from_slice(&[0u8; 16]); // md5 of no audio
    block
}

fn vorbis_comment_block(comments: &[(&str, &str)]) -> Vec<u8> {
    let vendor = b"cdrip tests";
    let mut block = Vec::new();
    block.extend_from_slice(&(vendor.len() as u32).to_le_bytes());
    block.extend_from_slice(vendor);
    block.extend_from_slice(&(comments.len() as u32).to_le_bytes());
    for (key, value) in comments {
        let entry = format!("{}={}", key, value);
        block.extend_from_slice(&(entry.len() as u32).to_le_bytes());
        block.extend_from_slice(entry.as_bytes());
    }
    block
}

fn block_header(block_type: u8, is_last: bool, length: usize) -> [u8; 4] {
    let type_byte = if is_last { 0x80 | block_type } else { block_type };
    let len = length as u32;
    [
        type_byte,
        (len >> 16) as u8,
        (len >> 8) as u8,
        len as u8,
    ]
}

/// Write a minimal but structurally valid FLAC file carrying the given
/// Vorbis comments.
pub fn write_minimal_flac(path: &Path, comments: &[(&str, &str)]) {
    let streaminfo = streaminfo_block();
    let vorbis = vorbis_comment_block(comments);

    let mut file = std::fs::File::create(path).expect("create test flac");
    file.write_all(b"fLaC").unwrap();
    file.write_all(&block_header(0, false, streaminfo.len())).unwrap();
    file.write_all(&streaminfo).unwrap();
    file.write_all(&block_header(4, true, vorbis.len())).unwrap();
    file.write_all(&vorbis).unwrap();
}
