//! Byte-level helpers shared by the header and body parsers

pub(crate) const CRLF: &[u8] = b"\r\n";
pub(crate) const CRLFCRLF: &[u8] = b"\r\n\r\n";

// CASE TABLES

const fn case_table(upper: bool) -> [u8; 256] {
    let mut table = [0u8; 256];
    let mut i = 0;
    while i < 256 {
        let byte = i as u8;
        table[i] = match (upper, byte) {
            (true, b'a'..=b'z') => byte - 32,
            (false, b'A'..=b'Z') => byte + 32,
            _ => byte,
        };
        i += 1;
    }
    table
}

pub(crate) static TO_UPPER: [u8; 256] = case_table(true);
pub(crate) static TO_LOWER: [u8; 256] = case_table(false);

/// Canonicalizes a header key in place: `content-LENGTH: x` becomes
/// `Content-Length: x`. Stops at the first `:`, the value is untouched.
#[inline]
pub(crate) fn normalize_key(line: &mut [u8]) {
    let Some(first) = line.first_mut() else {
        return;
    };
    *first = TO_UPPER[*first as usize];

    let mut i = 1;
    while i < line.len() {
        match line[i] {
            b':' => break,
            b'-' => {
                i += 1;
                match line.get_mut(i) {
                    Some(b':') | None => break,
                    Some(byte) => *byte = TO_UPPER[*byte as usize],
                }
            }
            byte => line[i] = TO_LOWER[byte as usize],
        }
        i += 1;
    }
}

// INTEGERS

// 18 decimal digits always fit in a u64 without overflow checks.
const MAX_UINT_DIGITS: usize = 18;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum UintError {
    Empty,
    UnexpectedFirstChar,
    TooLong,
}

/// Parses the leading run of decimal digits.
///
/// Returns the value and the number of bytes consumed; trailing non-digit
/// bytes end the number without error (`b"128abc"` is `(128, 3)`).
#[inline]
pub(crate) fn parse_uint(bytes: &[u8]) -> Result<(u64, usize), UintError> {
    if bytes.is_empty() {
        return Err(UintError::Empty);
    }

    let mut value: u64 = 0;
    for (i, &byte) in bytes.iter().enumerate() {
        let digit = byte.wrapping_sub(b'0');
        if digit > 9 {
            return match i {
                0 => Err(UintError::UnexpectedFirstChar),
                _ => Ok((value, i)),
            };
        }
        if i >= MAX_UINT_DIGITS {
            return Err(UintError::TooLong);
        }
        value = value * 10 + digit as u64;
    }

    Ok((value, bytes.len()))
}

// TEXT

/// Borrows a byte span as text without copying.
///
/// The returned `&str` lives exactly as long as the buffer it points into,
/// so it cannot outlive the next mutation of its owner.
#[inline]
pub(crate) fn as_text(bytes: &[u8]) -> Option<&str> {
    simdutf8::basic::from_utf8(bytes).ok()
}

#[inline]
pub(crate) fn trim_start_spaces(mut bytes: &[u8]) -> &[u8] {
    while let [b' ', rest @ ..] = bytes {
        bytes = rest;
    }
    bytes
}

#[inline]
pub(crate) fn trim_end_spaces(mut bytes: &[u8]) -> &[u8] {
    while let [rest @ .., b' '] = bytes {
        bytes = rest;
    }
    bytes
}
