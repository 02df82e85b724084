//! Byte-string helpers for NUL-padded fixed buffers.

/// Extract a NUL-padded byte array as a `&str`.
///
/// Scans for the first NUL byte (or end of slice) and interprets the
/// prefix as UTF-8; returns `"<invalid>"` for non-UTF-8 data.
#[inline]
pub fn bytes_as_str(buf: &[u8]) -> &str {
    let len = buf.iter().position(|&b| b == 0).unwrap_or(buf.len());
    core::str::from_utf8(&buf[..len]).unwrap_or("<invalid>")
}

/// Copy `src` into a NUL-padded fixed buffer, truncating to leave a
/// terminator byte.
pub fn copy_padded(dst: &mut [u8], src: &str) {
    dst.fill(0);
    if dst.is_empty() {
        return;
    }
    let n = src.len().min(dst.len() - 1);
    dst[..n].copy_from_slice(&src.as_bytes()[..n]);
}
