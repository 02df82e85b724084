/// FNV-1a, 32-bit. Keys the extfs sidecar records by normalized path.
#[inline]
pub fn fnv1a32(data: &[u8]) -> u32 {
    let mut h: u32 = 2166136261;
    for &b in data {
        h ^= b as u32;
        h = h.wrapping_mul(16777619);
    }
    h
}
