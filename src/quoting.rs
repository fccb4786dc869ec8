//! Feature quoting.
//!
//! Recorded features and contexts are byte strings from hostile inputs; the
//! feature-file format is tab-separated lines. Quoting maps arbitrary bytes
//! onto that format: invalid UTF-8 and the separator bytes (tab, newline,
//! carriage return) become `\xHH` escapes, and under the default policy
//! literal backslashes are doubled so the escaping is reversible.

/// How much escaping a recorder applies, derived from its flags.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QuoteStyle {
    /// Escape invalid UTF-8, separator bytes, and backslashes. Reversible.
    Default,
    /// Escape invalid UTF-8 and separator bytes only (`xml` flag).
    Xml,
    /// Pass bytes through untouched (`no_quote` flag).
    None,
}

fn push_hex_escape(out: &mut Vec<u8>, b: u8) {
    out.extend_from_slice(format!("\\x{:02X}", b).as_bytes());
}

fn push_valid(out: &mut Vec<u8>, segment: &str, style: QuoteStyle) {
    for &b in segment.as_bytes() {
        match b {
            b'\t' | b'\n' | b'\r' => push_hex_escape(out, b),
            b'\\' if style == QuoteStyle::Default => out.extend_from_slice(b"\\\\"),
            _ => out.push(b),
        }
    }
}

/// Quote `bytes` for inclusion in a feature file.
pub fn quote(bytes: &[u8], style: QuoteStyle) -> Vec<u8> {
    if style == QuoteStyle::None {
        return bytes.to_vec();
    }
    let mut out = Vec::with_capacity(bytes.len());
    let mut rest = bytes;
    loop {
        match std::str::from_utf8(rest) {
            Ok(valid) => {
                push_valid(&mut out, valid, style);
                return out;
            }
            Err(err) => {
                let (valid, bad) = rest.split_at(err.valid_up_to());
                // Safe: from_utf8 told us this prefix is valid.
                push_valid(&mut out, unsafe { std::str::from_utf8_unchecked(valid) }, style);
                let bad_len = err.error_len().unwrap_or(bad.len());
                for &b in &bad[..bad_len] {
                    push_hex_escape(&mut out, b);
                }
                rest = &bad[bad_len..];
            }
        }
    }
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Reverse `\xHH` hex and `\NNN` octal escapes, and `\\` doubling.
///
/// Unrecognized escapes pass through untouched, so this is safe to run on
/// strings that were never quoted.
pub fn unquote_string(quoted: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(quoted.len());
    let mut i = 0;
    while i < quoted.len() {
        if quoted[i] != b'\\' {
            out.push(quoted[i]);
            i += 1;
            continue;
        }
        let rest = &quoted[i + 1..];
        match rest.first().copied() {
            Some(b'\\') => {
                out.push(b'\\');
                i += 2;
            }
            Some(b'x') | Some(b'X') if rest.len() >= 3 => {
                match (hex_val(rest[1]), hex_val(rest[2])) {
                    (Some(hi), Some(lo)) => {
                        out.push(hi << 4 | lo);
                        i += 4;
                    }
                    _ => {
                        out.push(b'\\');
                        i += 1;
                    }
                }
            }
            Some(d0 @ b'0'..=b'7') if rest.len() >= 3 => {
                let (d1, d2) = (rest[1], rest[2]);
                if (b'0'..=b'7').contains(&d1) && (b'0'..=b'7').contains(&d2) {
                    let v =
                        (u32::from(d0 - b'0') << 6) | (u32::from(d1 - b'0') << 3) | u32::from(d2 - b'0');
                    if v <= 0xff {
                        out.push(v as u8);
                        i += 4;
                        continue;
                    }
                }
                out.push(b'\\');
                i += 1;
            }
            _ => {
                out.push(b'\\');
                i += 1;
            }
        }
    }
    out
}

/// Sanitize a forensic-path string for use as a carve file name.
///
/// Control bytes, high bytes, and filesystem metacharacters become `_`.
pub fn valid_dosname(name: &str) -> String {
    name.bytes()
        .map(|b| {
            if b <= 32 || b >= 128 || br#""*+,/:;<=>?\[]|$"#.contains(&b) {
                '_'
            } else {
                b as char
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use quickcheck::{QuickCheck, TestResult};

    use super::*;

    #[test]
    fn plain_text_passes_through() {
        assert_eq!(quote(b"user@example.com", QuoteStyle::Default), b"user@example.com");
    }

    #[test]
    fn separators_are_escaped() {
        assert_eq!(quote(b"a\tb\nc\rd", QuoteStyle::Default), b"a\\x09b\\x0Ac\\x0Dd");
        assert_eq!(quote(b"a\tb", QuoteStyle::Xml), b"a\\x09b");
        assert_eq!(quote(b"a\tb", QuoteStyle::None), b"a\tb");
    }

    #[test]
    fn backslash_doubling_is_default_only() {
        assert_eq!(quote(br"a\b", QuoteStyle::Default), br"a\\b");
        assert_eq!(quote(br"a\b", QuoteStyle::Xml), br"a\b");
    }

    #[test]
    fn invalid_utf8_becomes_hex() {
        assert_eq!(quote(b"a\xffb", QuoteStyle::Default), b"a\\xFFb");
        assert_eq!(quote(b"a\xffb", QuoteStyle::Xml), b"a\\xFFb");
        // A multibyte sequence cut short escapes each offending byte.
        assert_eq!(quote(b"\xe2\x82", QuoteStyle::Default), b"\\xE2\\x82");
    }

    #[test]
    fn unquote_handles_octal_and_hex() {
        assert_eq!(unquote_string(b"\\x41\\102C"), b"ABC");
        assert_eq!(unquote_string(b"no escapes"), b"no escapes");
        assert_eq!(unquote_string(b"\\\\x41"), b"\\x41");
        // Trailing or malformed escapes survive untouched.
        assert_eq!(unquote_string(b"tail\\"), b"tail\\");
        assert_eq!(unquote_string(b"\\xZZ"), b"\\xZZ");
    }

    #[test]
    fn quote_then_unquote_is_identity() {
        fn prop(bytes: Vec<u8>) -> TestResult {
            let quoted = quote(&bytes, QuoteStyle::Default);
            TestResult::from_bool(unquote_string(&quoted) == bytes)
        }
        QuickCheck::new()
            .tests(1_000)
            .quickcheck(prop as fn(Vec<u8>) -> TestResult);
    }

    #[test]
    fn dosname_replaces_hostile_bytes() {
        assert_eq!(valid_dosname("1000-HIBER-33423"), "1000-HIBER-33423");
        assert_eq!(valid_dosname("a/b:c*d"), "a_b_c_d");
        assert_eq!(valid_dosname("sp ace\x01high\u{00ff}"), "sp_ace_high__");
    }
}
