// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Stream decoder for the tokenized log channel.
//!
//! Frames on the 4-byte token, recovers level and argument count from
//! the header byte, and consumes arguments according to the type
//! letters the token database recorded for that format string. Tokens
//! the database has never heard of become `UNKNOWN` records carrying
//! their raw bytes: the framing heuristic for those (arguments read as
//! varints) is best-effort by design, since the true layout left with
//! the unknown string.

use std::io::{ErrorKind, Read};

use ailog_wire::{build_id_token, unpack_header, varint_decode, DecodedArg};
use anyhow::{bail, Result};
use tokendb::TokenDb;

/// One decoded record, ready for output formatting.
#[derive(Clone, Debug, PartialEq)]
pub struct Record {
    pub level: String,
    pub msg: String,
    pub token: u32,
    pub file: String,
    pub line: usize,
    pub args: Vec<serde_json::Value>,
    /// Raw argument bytes, kept only for `UNKNOWN` records.
    pub raw: Option<Vec<u8>>,
}

/// Result of the first-packet handshake.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct BuildIdStatus {
    pub expected: u32,
    pub seen: Option<u32>,
    pub mismatch: bool,
}

pub struct Decoder<'a> {
    db: &'a TokenDb,
    /// Set after the first record; `Some` exactly once.
    pending_status: Option<BuildIdStatus>,
    first_seen: bool,
}

impl<'a> Decoder<'a> {
    pub fn new(db: &'a TokenDb) -> Self {
        Self { db, pending_status: None, first_seen: false }
    }

    /// The handshake verdict, available after the first record and
    /// consumed by the caller.
    pub fn take_build_id_status(&mut self) -> Option<BuildIdStatus> {
        self.pending_status.take()
    }

    /// Decodes the next record; `None` on clean end-of-stream.
    pub fn next_record<R: Read>(&mut self, input: &mut R) -> Result<Option<Record>> {
        let mut preamble = [0u8; 5];
        if !read_exact_or_eof(input, &mut preamble)? {
            return Ok(None);
        }
        let token = u32::from_le_bytes(preamble[..4].try_into().expect("4 bytes"));
        let Some((level, argc)) = unpack_header(preamble[4]) else {
            bail!("unframeable header byte {:#04x} for token {token:#010x}", preamble[4]);
        };

        let record = match self.db.lookup(token) {
            Some(entry) => {
                let mut args = Vec::new();
                let mut decoded = Vec::new();
                for letter in entry.arg_types.bytes() {
                    let arg = read_arg(input, letter)?;
                    args.push(arg_json(&arg));
                    decoded.push(arg);
                }
                Record {
                    level: level.name().to_string(),
                    msg: format_message(&entry.fmt, &decoded),
                    token,
                    file: entry.file.clone(),
                    line: entry.line,
                    args,
                    raw: None,
                }
            }
            None => {
                // Unknown token: arg sizes are unknowable; read `argc`
                // varints and keep the bytes for the human.
                let mut raw = Vec::new();
                for _ in 0..argc {
                    raw.extend_from_slice(&read_varint_bytes(input)?);
                }
                Record {
                    level: "UNKNOWN".to_string(),
                    msg: format!("unknown token {token:#010x}"),
                    token,
                    file: String::new(),
                    line: 0,
                    args: Vec::new(),
                    raw: Some(raw),
                }
            }
        };

        if !self.first_seen {
            self.first_seen = true;
            self.pending_status = Some(self.check_build_id(&record));
        }
        Ok(Some(record))
    }

    fn check_build_id(&self, first: &Record) -> BuildIdStatus {
        let expected = self.db.build_id();
        if first.token != build_id_token() {
            return BuildIdStatus { expected, seen: None, mismatch: true };
        }
        let seen = first.args.first().and_then(|v| {
            v.as_str().and_then(|s| u32::from_str_radix(s.trim_start_matches("0x"), 16).ok())
        });
        BuildIdStatus { expected, seen, mismatch: seen != Some(expected) }
    }
}

fn read_exact_or_eof<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<bool> {
    let mut at = 0;
    while at < buf.len() {
        match input.read(&mut buf[at..]) {
            Ok(0) if at == 0 => return Ok(false),
            Ok(0) => bail!("stream ended mid-record"),
            Ok(n) => at += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(true)
}

fn read_varint_bytes<R: Read>(input: &mut R) -> Result<Vec<u8>> {
    let mut bytes = Vec::new();
    loop {
        let mut b = [0u8; 1];
        if !read_exact_or_eof(input, &mut b)? {
            bail!("stream ended mid-argument");
        }
        bytes.push(b[0]);
        if b[0] & 0x80 == 0 {
            return Ok(bytes);
        }
        if bytes.len() == 5 {
            bail!("varint longer than 5 bytes; stream out of sync");
        }
    }
}

fn read_arg<R: Read>(input: &mut R, letter: u8) -> Result<DecodedArg> {
    if letter == b'f' {
        let mut raw = [0u8; 4];
        if !read_exact_or_eof(input, &mut raw)? {
            bail!("stream ended mid-argument");
        }
        return Ok(DecodedArg::F32(f32::from_le_bytes(raw)));
    }
    let bytes = read_varint_bytes(input)?;
    let Some((arg, _)) = ailog_wire::decode_arg(&bytes, letter) else {
        bail!("undecodable argument letter {:?}", letter as char);
    };
    Ok(arg)
}

fn arg_json(arg: &DecodedArg) -> serde_json::Value {
    match *arg {
        DecodedArg::I32(v) => v.into(),
        DecodedArg::U32(v) => v.into(),
        DecodedArg::Hex(v) => format!("0x{v:x}").into(),
        DecodedArg::F32(v) => serde_json::Number::from_f64(v as f64)
            .map(serde_json::Value::Number)
            .unwrap_or_else(|| format!("{v}").into()),
    }
}

/// Substitutes decoded arguments back into the format string, printf
/// style: `%x` bare lowercase hex, `%%` a literal percent.
pub fn format_message(fmt: &str, args: &[DecodedArg]) -> String {
    let mut out = String::with_capacity(fmt.len() + 16);
    let mut next = 0;
    let mut chars = fmt.chars().peekable();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('%') => out.push('%'),
            Some(letter) => {
                match (letter, args.get(next)) {
                    ('d', Some(DecodedArg::I32(v))) => out.push_str(&v.to_string()),
                    ('u', Some(DecodedArg::U32(v))) => out.push_str(&v.to_string()),
                    ('x', Some(DecodedArg::Hex(v))) => out.push_str(&format!("{v:x}")),
                    ('f', Some(DecodedArg::F32(v))) => out.push_str(&format!("{v}")),
                    (_, Some(other)) => out.push_str(&format!("{other:?}")),
                    (_, None) => out.push_str("<missing>"),
                }
                next += 1;
            }
            None => out.push('%'),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use ailog_wire::{encode_packet, fnv1a32, Arg, Level, MAX_PACKET};
    use std::io::Cursor;
    use tokendb::scan_text;

    fn db_for(src: &str) -> TokenDb {
        let mut db = TokenDb::default();
        db.entries = scan_text("src/main.rs", src).unwrap();
        db
    }

    fn packet(token: u32, level: Level, args: &[Arg]) -> Vec<u8> {
        let mut buf = [0u8; MAX_PACKET];
        let n = encode_packet(token, level, args, &mut buf).unwrap();
        buf[..n].to_vec()
    }

    #[test]
    fn decodes_a_stream_with_handshake() {
        let db = db_for(
            r#"
            ailog::info!("BUILD_ID: %x", id);
            ailog::error!("flash write failed at %x", addr);
            ailog::debug!("tick %d of %u (%f)", a, b, c);
            "#,
        );
        let build = db.build_id();

        let mut stream = Vec::new();
        stream.extend(packet(build_id_token(), Level::Info, &[Arg::Hex(build)]));
        stream.extend(packet(
            fnv1a32(b"tick %d of %u (%f)"),
            Level::Debug,
            &[Arg::I32(-3), Arg::U32(9), Arg::F32(0.5)],
        ));
        let mut cursor = Cursor::new(stream);
        let mut dec = Decoder::new(&db);

        let first = dec.next_record(&mut cursor).unwrap().unwrap();
        assert_eq!(first.level, "INFO");
        assert_eq!(first.msg, format!("BUILD_ID: {build:x}"));
        let status = dec.take_build_id_status().unwrap();
        assert!(!status.mismatch);
        assert_eq!(status.seen, Some(build));

        let second = dec.next_record(&mut cursor).unwrap().unwrap();
        assert_eq!(second.msg, "tick -3 of 9 (0.5)");
        assert_eq!(second.file, "src/main.rs");
        assert!(dec.take_build_id_status().is_none());

        assert!(dec.next_record(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn build_id_mismatch_is_flagged_and_decoding_continues() {
        let db = db_for(r#"ailog::info!("BUILD_ID: %x", id);"#);
        let mut stream = Vec::new();
        stream.extend(packet(build_id_token(), Level::Info, &[Arg::Hex(0xBAD)]));
        let mut cursor = Cursor::new(stream);
        let mut dec = Decoder::new(&db);

        let first = dec.next_record(&mut cursor).unwrap().unwrap();
        assert_eq!(first.token, build_id_token());
        let status = dec.take_build_id_status().unwrap();
        assert!(status.mismatch);
        assert_eq!(status.seen, Some(0xBAD));
        assert_eq!(status.expected, db.build_id());
    }

    #[test]
    fn unknown_token_becomes_a_sentinel_record() {
        let db = db_for(r#"ailog::info!("BUILD_ID: %x", id);"#);
        let stream = packet(fnv1a32(b"not in the db %u"), Level::Warn, &[Arg::U32(300)]);
        let mut cursor = Cursor::new(stream);
        let mut dec = Decoder::new(&db);

        let rec = dec.next_record(&mut cursor).unwrap().unwrap();
        assert_eq!(rec.level, "UNKNOWN");
        assert_eq!(rec.raw.as_deref(), Some(&[0xD8, 0x04][..]));
        // First packet was not the handshake: that is itself a mismatch.
        assert!(dec.take_build_id_status().unwrap().mismatch);
    }

    #[test]
    fn zero_arg_fast_path_record() {
        let db = db_for(r#"ailog::info!("supervisor started");"#);
        let stream = packet(fnv1a32(b"supervisor started"), Level::Info, &[]);
        let mut cursor = Cursor::new(stream);
        let mut dec = Decoder::new(&db);
        let rec = dec.next_record(&mut cursor).unwrap().unwrap();
        assert_eq!(rec.msg, "supervisor started");
        assert!(rec.args.is_empty());
    }
}
