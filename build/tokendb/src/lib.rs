// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Token database: the build-time scan that lets the host put format
//! strings back onto tokens.
//!
//! The scanner walks the source tree for `ailog::<level>!("…")` call
//! sites, hashes each format string exactly the way the firmware macro
//! does (same shared function), derives the argument-type letters from
//! the `%`-placeholders, and emits one CSV the decoder loads. Two
//! different strings hashing to one token is a build error here — at
//! runtime tokens are trusted blindly.
//!
//! The BUILD_ID is the XOR of all distinct tokens; the firmware logs it
//! as its first message and the decoder refuses silently mismatched
//! databases.

use std::collections::HashMap;
use std::fmt::Write as _;
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use regex::Regex;
use walkdir::WalkDir;

pub use ailog_wire::fnv1a32;

pub const CSV_HEADER: &str = "token_hash,level,format_string,arg_types,file,line";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Entry {
    pub token: u32,
    pub level: String,
    pub fmt: String,
    pub arg_types: String,
    pub file: String,
    pub line: usize,
}

#[derive(Clone, Debug, Default)]
pub struct TokenDb {
    pub entries: Vec<Entry>,
}

impl TokenDb {
    /// XOR over the distinct token set. Order-independent, so the scan
    /// order of the tree cannot change the id.
    pub fn build_id(&self) -> u32 {
        let mut seen = std::collections::HashSet::new();
        let mut id = 0u32;
        for e in &self.entries {
            if seen.insert(e.token) {
                id ^= e.token;
            }
        }
        id
    }

    pub fn lookup(&self, token: u32) -> Option<&Entry> {
        self.entries.iter().find(|e| e.token == token)
    }

    /// Fails when two different format strings share a token. Duplicate
    /// call sites of the same string are fine (and common).
    pub fn check_collisions(&self) -> Result<()> {
        let mut by_token: HashMap<u32, &str> = HashMap::new();
        for e in &self.entries {
            if let Some(prev) = by_token.insert(e.token, &e.fmt) {
                if prev != e.fmt {
                    bail!(
                        "token collision {:#010X}: {:?} vs {:?}",
                        e.token,
                        prev,
                        e.fmt
                    );
                }
            }
        }
        Ok(())
    }

    pub fn to_csv(&self) -> String {
        let mut out = String::new();
        out.push_str(CSV_HEADER);
        out.push('\n');
        for e in &self.entries {
            let _ = writeln!(
                out,
                "0x{:08X},{},{},{},{},{}",
                e.token,
                e.level,
                quote(&e.fmt),
                e.arg_types,
                quote(&e.file),
                e.line
            );
        }
        out
    }

    pub fn from_csv(text: &str) -> Result<TokenDb> {
        let mut entries = Vec::new();
        for (i, line) in text.lines().enumerate() {
            if i == 0 {
                if line != CSV_HEADER {
                    bail!("unrecognized token database header: {line:?}");
                }
                continue;
            }
            if line.is_empty() {
                continue;
            }
            let fields = split_csv(line);
            let [token, level, fmt, arg_types, file, line_no] = fields
                .as_slice()
            else {
                bail!("malformed token database row {}: {line:?}", i + 1);
            };
            let token = token
                .strip_prefix("0x")
                .ok_or_else(|| anyhow!("token without 0x prefix: {token:?}"))
                .and_then(|t| u32::from_str_radix(t, 16).map_err(Into::into))?;
            entries.push(Entry {
                token,
                level: level.clone(),
                fmt: fmt.clone(),
                arg_types: arg_types.clone(),
                file: file.clone(),
                line: line_no.parse().context("bad line number")?,
            });
        }
        Ok(TokenDb { entries })
    }
}

/// CSV quoting: always quoted, inner quotes doubled, so commas and
/// percent signs in format strings survive.
fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\"\""))
}

fn split_csv(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut cur = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        match c {
            '"' if in_quotes => {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    cur.push('"');
                } else {
                    in_quotes = false;
                }
            }
            '"' => in_quotes = true,
            ',' if !in_quotes => fields.push(std::mem::take(&mut cur)),
            c => cur.push(c),
        }
    }
    fields.push(cur);
    fields
}

/// Resolves the escape sequences a Rust string literal can carry, so
/// the scanned text hashes to the same token the compiled literal did.
fn unescape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut chars = raw.chars();
    while let Some(c) = chars.next() {
        if c != '\\' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => out.push('\n'),
            Some('r') => out.push('\r'),
            Some('t') => out.push('\t'),
            Some('0') => out.push('\0'),
            Some('\\') => out.push('\\'),
            Some('"') => out.push('"'),
            Some(other) => {
                out.push('\\');
                out.push(other);
            }
            None => out.push('\\'),
        }
    }
    out
}

/// Derives the decoder's type letters from the placeholders. Mirrors
/// the firmware-side placeholder rules; more than eight arguments or an
/// unknown letter is an error here too.
pub fn arg_letters(fmt: &str) -> Result<String> {
    let mut letters = String::new();
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            continue;
        }
        match chars.next() {
            Some('%') => {}
            Some(l @ ('d' | 'u' | 'x' | 'f' | 's')) => letters.push(l),
            other => bail!("unsupported placeholder %{:?} in {fmt:?}", other),
        }
    }
    if letters.len() > ailog_wire::MAX_ARGS {
        bail!("more than {} placeholders in {fmt:?}", ailog_wire::MAX_ARGS);
    }
    Ok(letters)
}

/// Scans one file's text. `file` is the path recorded into the rows.
pub fn scan_text(file: &str, text: &str) -> Result<Vec<Entry>> {
    // The format string is always the macro's first token, a plain
    // literal, so a single pattern covers every call site.
    let call = Regex::new(
        r#"ailog::(error|warn|info|debug)!\s*\(\s*"((?:[^"\\]|\\.)*)""#,
    )
    .expect("static regex");
    let mut entries = Vec::new();
    for cap in call.captures_iter(text) {
        let whole = cap.get(0).expect("capture 0");
        let fmt = unescape(&cap[2]);
        let line = text[..whole.start()].matches('\n').count() + 1;
        entries.push(Entry {
            token: fnv1a32(fmt.as_bytes()),
            level: cap[1].to_uppercase(),
            arg_types: arg_letters(&fmt)
                .with_context(|| format!("{file}:{line}"))?,
            fmt,
            file: file.to_string(),
            line,
        });
    }
    Ok(entries)
}

/// The workspace directories that become firmware. Host tools and
/// reference material never reach the wire, so their strings stay out
/// of the database.
pub const FIRMWARE_DIRS: &[&str] = &["sys", "lib", "drv", "task", "app"];

/// Scans the firmware portion of a workspace rooted at `root`. A root
/// with none of the conventional subdirectories (a test fixture, say)
/// is scanned whole.
pub fn scan_workspace(root: &Path) -> Result<TokenDb> {
    let roots: Vec<_> = FIRMWARE_DIRS
        .iter()
        .map(|d| root.join(d))
        .filter(|p| p.is_dir())
        .collect();
    let mut db = TokenDb::default();
    if roots.is_empty() {
        scan_tree(root, root, &mut db)?;
    } else {
        for sub in &roots {
            scan_tree(root, sub, &mut db)?;
        }
    }
    db.check_collisions()?;
    db.entries.sort_by(|a, b| (&a.file, a.line).cmp(&(&b.file, b.line)));
    Ok(db)
}

fn scan_tree(root: &Path, tree: &Path, db: &mut TokenDb) -> Result<()> {
    let walker = WalkDir::new(tree).into_iter().filter_entry(|e| {
        let name = e.file_name().to_string_lossy();
        !(name == "target" || name.starts_with('.'))
    });
    for entry in walker {
        let entry = entry?;
        if entry.path().extension().map_or(true, |x| x != "rs") {
            continue;
        }
        let text = std::fs::read_to_string(entry.path())
            .with_context(|| format!("reading {}", entry.path().display()))?;
        let rel = entry
            .path()
            .strip_prefix(root)
            .unwrap_or(entry.path())
            .to_string_lossy()
            .into_owned();
        db.entries.extend(scan_text(&rel, &text)?);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scan_finds_call_sites_with_lines() {
        let src = r#"
fn boot() {
    ailog::info!("Mounted existing filesystem");
    ailog::error!("flash write failed at %x", addr);
    ailog::debug!("tick %d of %u (%f)", a, b, c);
}
"#;
        let entries = scan_text("src/main.rs", src).unwrap();
        assert_eq!(entries.len(), 3);
        assert_eq!(entries[0].level, "INFO");
        assert_eq!(entries[0].arg_types, "");
        assert_eq!(entries[0].line, 3);
        assert_eq!(entries[1].arg_types, "x");
        assert_eq!(entries[2].arg_types, "duf");
        assert_eq!(entries[2].line, 5);
        assert_eq!(
            entries[0].token,
            fnv1a32(b"Mounted existing filesystem")
        );
    }

    #[test]
    fn csv_round_trip_with_awkward_strings() {
        let db = TokenDb {
            entries: vec![Entry {
                token: 0xDEAD_BEEF,
                level: "WARN".into(),
                fmt: "a, \"b\" %u".into(),
                arg_types: "u".into(),
                file: "lib/x.rs".into(),
                line: 42,
            }],
        };
        let csv = db.to_csv();
        assert!(csv.starts_with(CSV_HEADER));
        let back = TokenDb::from_csv(&csv).unwrap();
        assert_eq!(back.entries, db.entries);
    }

    #[test]
    fn build_id_is_order_independent_xor() {
        let entry = |fmt: &str| Entry {
            token: fnv1a32(fmt.as_bytes()),
            level: "INFO".into(),
            fmt: fmt.into(),
            arg_types: String::new(),
            file: "f.rs".into(),
            line: 1,
        };
        let a = TokenDb { entries: vec![entry("one"), entry("two")] };
        let b = TokenDb { entries: vec![entry("two"), entry("one"), entry("two")] };
        assert_eq!(a.build_id(), b.build_id());
        assert_eq!(a.build_id(), fnv1a32(b"one") ^ fnv1a32(b"two"));
    }

    #[test]
    fn collisions_are_a_build_error() {
        let mk = |fmt: &str, token| Entry {
            token,
            level: "INFO".into(),
            fmt: fmt.into(),
            arg_types: String::new(),
            file: "f.rs".into(),
            line: 1,
        };
        let ok = TokenDb { entries: vec![mk("same", 7), mk("same", 7)] };
        assert!(ok.check_collisions().is_ok());
        let bad = TokenDb { entries: vec![mk("one", 7), mk("two", 7)] };
        assert!(bad.check_collisions().is_err());
    }

    #[test]
    fn bad_placeholders_are_rejected() {
        assert!(scan_text("f.rs", r#"ailog::info!("%q bad");"#).is_err());
        assert!(arg_letters("%d%d%d%d%d%d%d%d%d").is_err());
        assert_eq!(arg_letters("100%% %s").unwrap(), "s");
    }

    #[test]
    fn escaped_literals_hash_like_compiled_ones() {
        let entries =
            scan_text("f.rs", r#"ailog::info!("line\nbreak %u", n);"#).unwrap();
        assert_eq!(entries[0].fmt, "line\nbreak %u");
        assert_eq!(entries[0].token, fnv1a32(b"line\nbreak %u"));
    }
}
