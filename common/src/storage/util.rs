//! Storage utilities.
//!
//! Glob matching with the store's pattern rules (used by `KEYS`, `SCAN` and
//! pattern subscriptions) and keyspace notification channel naming.

/// Returns the keyspace notification channel for a key in a database.
pub fn keyspace_channel(db_id: u32, key: &str) -> String {
    format!("__keyspace@{}__:{}", db_id, key)
}

/// Matches `text` against a glob pattern.
///
/// Supports `*` (any run of characters), `?` (any single character),
/// `[abc]`, `[^abc]`, `[a-z]` character classes, and `\` to escape the next
/// character.
pub fn glob_match(pattern: &str, text: &str) -> bool {
    match_bytes(pattern.as_bytes(), text.as_bytes())
}

fn match_bytes(mut p: &[u8], mut s: &[u8]) -> bool {
    while let Some(&c) = p.first() {
        match c {
            b'*' => {
                while p.len() > 1 && p[1] == b'*' {
                    p = &p[1..];
                }
                if p.len() == 1 {
                    return true;
                }
                return (0..=s.len()).any(|i| match_bytes(&p[1..], &s[i..]));
            }
            b'?' => {
                if s.is_empty() {
                    return false;
                }
                p = &p[1..];
                s = &s[1..];
            }
            b'[' => {
                let Some(&ch) = s.first() else {
                    return false;
                };
                let (matched, rest) = match_class(&p[1..], ch);
                if !matched {
                    return false;
                }
                p = rest;
                s = &s[1..];
            }
            b'\\' if p.len() >= 2 => {
                if s.first() != Some(&p[1]) {
                    return false;
                }
                p = &p[2..];
                s = &s[1..];
            }
            _ => {
                if s.first() != Some(&c) {
                    return false;
                }
                p = &p[1..];
                s = &s[1..];
            }
        }
    }
    s.is_empty()
}

/// Matches one byte against a character class. `p` starts right after the
/// opening `[`; the returned slice starts right after the closing `]`. An
/// unterminated class runs to the end of the pattern.
fn match_class(p: &[u8], c: u8) -> (bool, &[u8]) {
    let mut p = p;
    let negate = p.first() == Some(&b'^');
    if negate {
        p = &p[1..];
    }
    let mut matched = false;
    loop {
        match p {
            [] => break,
            [b']', rest @ ..] => {
                p = rest;
                break;
            }
            [b'\\', escaped, rest @ ..] => {
                matched |= *escaped == c;
                p = rest;
            }
            [lo, b'-', hi, rest @ ..] if *hi != b']' => {
                let (lo, hi) = if lo <= hi { (*lo, *hi) } else { (*hi, *lo) };
                matched |= (lo..=hi).contains(&c);
                p = rest;
            }
            [x, rest @ ..] => {
                matched |= *x == c;
                p = rest;
            }
        }
    }
    (matched != negate, p)
}
