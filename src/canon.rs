//! Path canonicalization.
//!
//! Paths are simplified lexically, without touching the disk: "foo/./bar"
//! becomes "foo/bar" and "foo/../bar" becomes "bar".  These paths show up due
//! to variable expansion in particular.
//!
//! On Windows backslashes are also separators.  They are normalized to '/'
//! and their positions are remembered in a "slash bits" mask so that the
//! original spelling can be restored for display and for command lines.

use anyhow::bail;

/// Whether '\' separates path components on this platform.
pub const BACKSLASH_SEPARATORS: bool = cfg!(windows);

/// Only the first this-many separators have their original style recorded.
const MAX_SLASH_BITS: usize = 64;

#[inline]
fn is_sep(c: u8, backslash_separators: bool) -> bool {
    c == b'/' || (backslash_separators && c == b'\\')
}

/// Collapse `.` and `..` components in place, returning the new length.
/// Separators are copied through as-is (they are normalized afterwards).
fn collapse(buf: &mut [u8], backslash_separators: bool) -> usize {
    let sep = |c: u8| is_sep(c, backslash_separators);
    let end = buf.len();
    let mut src = 0;
    let mut dst = 0;
    // Start offsets (in dst) of components we may back up over.
    let mut components: Vec<usize> = Vec::new();

    if end > 0 && sep(buf[0]) {
        src += 1;
        dst += 1;
        // Keep the "//server" prefix of Windows network paths.
        if backslash_separators && end > 1 && sep(buf[1]) {
            src += 1;
            dst += 1;
        }
    }
    let root = dst;

    // Invariant: dst <= src, so writes only touch already-consumed bytes.
    while src < end {
        match buf[src] {
            c if sep(c) => {
                src += 1;
                continue;
            }
            b'.' => {
                if src + 1 == end {
                    break; // Trailing '.', trim.
                }
                let next = buf[src + 1];
                if sep(next) {
                    // "./", skip.
                    src += 2;
                    continue;
                }
                if next == b'.' && (src + 2 == end || sep(buf[src + 2])) {
                    // ".." component, try to back up.
                    match components.pop() {
                        Some(ofs) => dst = ofs,
                        None => {
                            buf[dst] = b'.';
                            buf[dst + 1] = b'.';
                            dst += 2;
                            if src + 2 != end {
                                buf[dst] = buf[src + 2];
                                dst += 1;
                            }
                        }
                    }
                    src += 3;
                    continue;
                }
                // A component that happens to start with "." or "..".
            }
            _ => {}
        }

        components.push(dst);
        // Copy one component, including its trailing separator.
        while src < end {
            let c = buf[src];
            buf[dst] = c;
            src += 1;
            dst += 1;
            if sep(c) {
                break;
            }
        }
    }

    if dst > root && sep(buf[dst - 1]) {
        dst -= 1;
    }
    dst
}

/// Canonicalize a path, treating '\' as a separator iff `backslash_separators`.
/// Returns the canonical path and its slash bits.
pub fn canon_path_bits_with(path: &str, backslash_separators: bool) -> anyhow::Result<(String, u64)> {
    if path.is_empty() {
        bail!("empty path");
    }
    let mut buf = path.as_bytes().to_vec();
    let len = collapse(&mut buf, backslash_separators);
    buf.truncate(len);
    if buf.is_empty() {
        buf.push(b'.');
    }

    let mut bits = 0u64;
    if backslash_separators {
        let mut index = 0;
        for c in buf.iter_mut() {
            match *c {
                b'\\' => {
                    if index < MAX_SLASH_BITS {
                        bits |= 1 << index;
                    }
                    *c = b'/';
                    index += 1;
                }
                b'/' => index += 1,
                _ => {}
            }
        }
    }

    // Only whole components and ASCII separators were moved, so the bytes
    // are still valid UTF-8.
    Ok((String::from_utf8(buf)?, bits))
}

/// Canonicalize a path using this platform's separators.
pub fn canon_path_bits(path: &str) -> anyhow::Result<(String, u64)> {
    canon_path_bits_with(path, BACKSLASH_SEPARATORS)
}

/// Canonicalize a path, discarding slash bits.
/// An empty path stays empty; callers that care reject it via canon_path_bits.
pub fn canon_path<T: Into<String>>(inpath: T) -> String {
    let path: String = inpath.into();
    match canon_path_bits(&path) {
        Ok((canon, _)) => canon,
        Err(_) => path,
    }
}

/// Undo the slash normalization of canon_path_bits, restoring backslashes
/// at the separator positions recorded in `slash_bits`.
pub fn decanon_path(path: &str, slash_bits: u64) -> String {
    if slash_bits == 0 {
        return path.to_owned();
    }
    let mut out = String::with_capacity(path.len());
    let mut index = 0;
    for c in path.chars() {
        if c == '/' {
            if index < MAX_SLASH_BITS && slash_bits & (1 << index) != 0 {
                out.push('\\');
            } else {
                out.push('/');
            }
            index += 1;
        } else {
            out.push(c);
        }
    }
    out
}
