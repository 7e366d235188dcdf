use crc32fast::Hasher;

use crate::types::PageId;

/// Checksum stored in every WAL frame. The upper half carries the WAL salt so
/// frames left over from an earlier log generation never verify; the lower
/// half is a CRC32 over the salt, the frame header fields and the page image.
pub fn calculate_frame_checksum(salt: u32, page_id: PageId, commit: bool, image: &[u8]) -> u64 {
    let mut hasher = Hasher::new();

    hasher.update(&salt.to_le_bytes());
    hasher.update(&page_id.to_le_bytes());
    hasher.update(&[commit as u8]);
    hasher.update(image);

    ((salt as u64) << 32) | hasher.finalize() as u64
}

pub fn verify_frame_checksum(
    salt: u32,
    page_id: PageId,
    commit: bool,
    image: &[u8],
    expected_checksum: u64,
) -> bool {
    calculate_frame_checksum(salt, page_id, commit, image) == expected_checksum
}
