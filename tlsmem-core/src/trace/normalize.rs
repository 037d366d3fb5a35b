// SPDX-License-Identifier: Apache-2.0
// Copyright 2025 Ankit Kumar Pandey

//! Allocation-site label normalization.
//!
//! Massif labels carry code addresses, mangled-symbol hashes and absolute
//! paths that differ between machines and builds. Normalized labels only keep
//! what identifies the site, so breakdowns from different sessions compare.

/// Normalize a heap-tree label.
///
/// ```
/// use tlsmem_core::trace::normalize_label;
///
/// let label = "0x4C2DB8F: rustls::conn::Connection::new::h0123456789abcdef \
///     (/home/ci/.cargo/registry/src/index.crates.io-6f17d22bba15001f/rustls-0.23.15/src/conn.rs:88)";
/// assert_eq!(
///     normalize_label(label),
///     "rustls::conn::Connection::new (rustls-0.23.15/src/conn.rs:88)"
/// );
/// ```
pub fn normalize_label(label: &str) -> String {
    let label = strip_address(label.trim());
    let label = strip_symbol_hashes(label);
    shorten_paths(&label)
}

/// `0x4C2DB8F: foo` -> `foo`.
fn strip_address(label: &str) -> &str {
    let Some(rest) = label.strip_prefix("0x") else {
        return label;
    };
    let digits = rest.chars().take_while(char::is_ascii_hexdigit).count();
    match rest[digits..].strip_prefix(": ") {
        Some(tail) if digits > 0 => tail,
        _ => label,
    }
}

/// Remove `::h<16 hex digits>` legacy mangling hashes.
fn strip_symbol_hashes(label: &str) -> String {
    const HASH_LEN: usize = 16;

    let mut out = String::with_capacity(label.len());
    let mut rest = label;

    while let Some(pos) = rest.find("::h") {
        let after = &rest[pos + 3..];
        let is_hash = after.len() >= HASH_LEN
            && after.as_bytes()[..HASH_LEN].iter().all(u8::is_ascii_hexdigit)
            && !after
                .as_bytes()
                .get(HASH_LEN)
                .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_');

        if is_hash {
            out.push_str(&rest[..pos]);
            rest = &after[HASH_LEN..];
        } else {
            out.push_str(&rest[..pos + 3]);
            rest = after;
        }
    }
    out.push_str(rest);
    out
}

/// Rewrite every path-like token, keeping spaces and parentheses.
fn shorten_paths(label: &str) -> String {
    let mut out = String::with_capacity(label.len());
    let mut token = String::new();

    for c in label.chars() {
        if matches!(c, ' ' | '(' | ')') {
            out.push_str(&shorten_path(&token));
            token.clear();
            out.push(c);
        } else {
            token.push(c);
        }
    }
    out.push_str(&shorten_path(&token));
    out
}

fn shorten_path(token: &str) -> String {
    if !token.contains('/') {
        return token.to_string();
    }

    // <cargo home>/registry/src/<index>/<crate>-<version>/...
    if let Some(pos) = token.find("/registry/src/") {
        let rest = &token[pos + "/registry/src/".len()..];
        if let Some((_index, inner)) = rest.split_once('/') {
            return inner.to_string();
        }
    }

    // <cargo home>/git/checkouts/<repo>-<hash>/<rev>/...
    if let Some(pos) = token.find("/git/checkouts/") {
        let rest = &token[pos + "/git/checkouts/".len()..];
        let mut parts = rest.splitn(3, '/');
        if let (Some(repo), Some(rev), Some(inner)) = (parts.next(), parts.next(), parts.next()) {
            let repo = repo.rsplit_once('-').map_or(repo, |(name, _hash)| name);
            return format!("{}@{}/{}", repo, rev, inner);
        }
    }

    token.rsplit('/').next().unwrap_or(token).to_string()
}
