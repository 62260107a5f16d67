// {{{ Copyright (c) cvdkit contributors, 2025
//
// Permission is hereby granted, free of charge, to any person obtaining a copy
// of this software and associated documentation files (the "Software"), to deal
// in the Software without restriction, including without limitation the rights
// to use, copy, modify, merge, publish, distribute, sublicense, and/or sell
// copies of the Software, and to permit persons to whom the Software is
// furnished to do so, subject to the following conditions:
//
// The above copyright notice and this permission notice shall be included in
// all copies or substantial portions of the Software.
//
// THE SOFTWARE IS PROVIDED "AS IS", WITHOUT WARRANTY OF ANY KIND, EXPRESS OR
// IMPLIED, INCLUDING BUT NOT LIMITED TO THE WARRANTIES OF MERCHANTABILITY,
// FITNESS FOR A PARTICULAR PURPOSE AND NONINFRINGEMENT. IN NO EVENT SHALL THE
// AUTHORS OR COPYRIGHT HOLDERS BE LIABLE FOR ANY CLAIM, DAMAGES OR OTHER
// LIABILITY, WHETHER IN AN ACTION OF CONTRACT, TORT OR OTHERWISE, ARISING FROM,
// OUT OF OR IN CONNECTION WITH THE SOFTWARE OR THE USE OR OTHER DEALINGS IN
// THE SOFTWARE. }}}

//! The CVD container: a fixed 512-byte ASCII header followed immediately by
//! a gzip-tar payload. Grounded on `cl_cvdparse`/`cl_cvdhead`/`cli_cvdverify`/
//! `cli_cvdload` in `libclamav/cvd.c`, replacing their malloc'd
//! colon-tokenized fields with a parsed struct and their shelled-out
//! `gzread`-a-512-byte-block loop (`cli_untgz`) with [`crate::archive`].

use crate::hash::{Md5Digest, digest::DigestError};
use std::{
    io::{Read, Seek, SeekFrom, Write},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

pub const HEADER_LEN: usize = 512;
const MAGIC: &str = "ClamAV-VDB";

/// A parsed 512-byte CVD header.
#[derive(Clone, Debug, PartialEq)]
pub struct CvdHeader {
    /// `DD Mon YYYY HH-MM ±ZZZZ`, kept as the original string: re-deriving it
    /// from a parsed time would lose the exact locale-independent rendering
    /// (English month abbreviations) mandated regardless of host locale.
    pub build_time: String,
    pub version: u32,
    pub signature_count: u32,
    pub engine_level: u32,
    pub payload_hash: Md5Digest,
    /// ASCII detached signature over `payload_hash`'s hex text.
    pub signature: String,
    pub builder: String,
    /// Absent in the older 7-field header form.
    pub creation_time: Option<u64>,
}

/// Errors encountered parsing or emitting a [`CvdHeader`].
#[derive(Debug)]
pub enum HeaderError {
    /// Didn't start with `ClamAV-VDB:`.
    BadMagic,
    /// A required colon-delimited field was missing.
    MissingField(&'static str),
    /// A field expected to hold an unsigned integer didn't parse as one.
    InvalidInteger(&'static str),
    /// A digest field wasn't a well-formed hex digest.
    InvalidDigest(DigestError),
    /// A field contained a colon, a newline, or would make the header
    /// exceed [`HEADER_LEN`] bytes once space-padded.
    FieldTooWide(&'static str),
}
crate::errors::error_enum!(HeaderError);

impl From<DigestError> for HeaderError {
    fn from(e: DigestError) -> Self {
        HeaderError::InvalidDigest(e)
    }
}

/// Parse exactly [`HEADER_LEN`] bytes into a [`CvdHeader`].
///
/// Trailing spaces (and, tolerantly, any trailing CR/LF a sloppier writer
/// left in) are stripped before tokenizing on `:`, mirroring `cl_cvdhead`'s
/// right-trim loop. The 8th field (creation time) is optional, matching the
/// old 7-field header form `cl_cvdparse` still accepts.
pub fn parse_header(bytes: &[u8; HEADER_LEN]) -> Result<CvdHeader, HeaderError> {
    let text = std::str::from_utf8(bytes).unwrap_or("");
    let text = text.trim_end_matches(['\0', ' ', '\r', '\n']);

    let mut fields = text.splitn(9, ':');
    let magic = fields.next().ok_or(HeaderError::MissingField("magic"))?;
    if magic != MAGIC {
        return Err(HeaderError::BadMagic);
    }

    let build_time = fields
        .next()
        .ok_or(HeaderError::MissingField("build_time"))?
        .to_owned();
    let version = parse_u32(fields.next(), "version")?;
    let signature_count = parse_u32(fields.next(), "signature_count")?;
    let engine_level = parse_u32(fields.next(), "engine_level")?;
    let payload_hash: Md5Digest = fields
        .next()
        .ok_or(HeaderError::MissingField("payload_hash"))?
        .parse()?;
    let signature = fields
        .next()
        .ok_or(HeaderError::MissingField("signature"))?
        .to_owned();
    let builder = fields
        .next()
        .ok_or(HeaderError::MissingField("builder"))?
        .to_owned();
    let creation_time = match fields.next() {
        Some(s) if !s.is_empty() => Some(
            s.parse::<u64>()
                .map_err(|_| HeaderError::InvalidInteger("creation_time"))?,
        ),
        _ => None,
    };

    Ok(CvdHeader {
        build_time,
        version,
        signature_count,
        engine_level,
        payload_hash,
        signature,
        builder,
        creation_time,
    })
}

fn parse_u32(field: Option<&str>, name: &'static str) -> Result<u32, HeaderError> {
    field
        .ok_or(HeaderError::MissingField(name))?
        .parse()
        .map_err(|_| HeaderError::InvalidInteger(name))
}

/// Emit exactly [`HEADER_LEN`] bytes: the colon-delimited fields, then
/// space-padded to fill the fixed width.
pub fn write_header(h: &CvdHeader) -> Result<[u8; HEADER_LEN], HeaderError> {
    let creation_time = h
        .creation_time
        .map(|t| t.to_string())
        .unwrap_or_default();

    let line = format!(
        "{MAGIC}:{}:{}:{}:{}:{}:{}:{}:{}",
        h.build_time,
        h.version,
        h.signature_count,
        h.engine_level,
        h.payload_hash,
        h.signature,
        h.builder,
        creation_time,
    );

    for (name, field) in [
        ("build_time", h.build_time.as_str()),
        ("signature", h.signature.as_str()),
        ("builder", h.builder.as_str()),
    ] {
        if field.contains(':') || field.contains('\n') || field.contains('\r') {
            return Err(HeaderError::FieldTooWide(name));
        }
    }

    if line.len() > HEADER_LEN {
        return Err(HeaderError::FieldTooWide("header"));
    }

    let mut out = [b' '; HEADER_LEN];
    out[..line.len()].copy_from_slice(line.as_bytes());
    Ok(out)
}

/// Outcome of verifying a CVD file: either fully verified, or verified
/// modulo signature (no keyring was configured).
#[derive(Debug)]
pub struct VerifiedCvd {
    pub header: CvdHeader,
    pub signature_outcome: crate::hash::signature::SignatureOutcome,
}

/// Errors encountered verifying or loading a CVD file.
#[derive(Debug)]
pub enum CvdError {
    Io(std::io::Error),
    Header(HeaderError),
    /// The recomputed payload hash didn't match the header's.
    HashMismatch,
    #[cfg(feature = "sequoia")]
    Signature(crate::hash::signature::SignatureError),
}
crate::errors::error_enum!(CvdError);

impl From<std::io::Error> for CvdError {
    fn from(e: std::io::Error) -> Self {
        CvdError::Io(e)
    }
}
impl From<HeaderError> for CvdError {
    fn from(e: HeaderError) -> Self {
        CvdError::Header(e)
    }
}
#[cfg(feature = "sequoia")]
impl From<crate::hash::signature::SignatureError> for CvdError {
    fn from(e: crate::hash::signature::SignatureError) -> Self {
        CvdError::Signature(e)
    }
}

/// Read, hash-check, and (if a verifier is supplied) signature-check a CVD
/// file. Mirrors `cli_cvdverify`: header parse, MD5-over-payload compare,
/// then detached-signature check over the hash's hex text.
#[cfg(feature = "sequoia")]
pub fn verify<R: Read + Seek>(
    mut reader: R,
    verifier: Option<&crate::hash::signature::SignatureVerifier>,
) -> Result<VerifiedCvd, CvdError> {
    reader.seek(SeekFrom::Start(0))?;
    let mut header_bytes = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_bytes)?;
    let header = parse_header(&header_bytes)?;

    let payload_hash = Md5Digest::of_stream(&mut reader).map_err(|_| CvdError::HashMismatch)?;
    if payload_hash != header.payload_hash {
        return Err(CvdError::HashMismatch);
    }

    let signature_outcome = crate::hash::signature::verify_signature(
        verifier,
        header.payload_hash.to_string().as_bytes(),
        &header.signature,
    )?;

    Ok(VerifiedCvd {
        header,
        signature_outcome,
    })
}

/// Advisory checks against a verified header: never fatal, surfaced as
/// warnings a caller may log or ignore. Mirrors the two `cli_warnmsg` blocks
/// in `cli_cvdload`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Advisory {
    /// `creation_time` predates now by more than the configured staleness
    /// threshold.
    Stale,
    /// `engine_level` exceeds the running engine's level.
    EngineOutdated,
}

/// Evaluate the advisory checks against `header`, relative to `now`.
pub fn advisories(
    header: &CvdHeader,
    config: &crate::config::VerifyConfig,
    now: SystemTime,
) -> Vec<Advisory> {
    let mut warnings = Vec::new();

    if let Some(creation_time) = header.creation_time {
        let created = UNIX_EPOCH + Duration::from_secs(creation_time);
        if let Ok(age) = now.duration_since(created) {
            if age > config.staleness_threshold {
                warnings.push(Advisory::Stale);
            }
        }
    }

    if header.engine_level > config.engine_level {
        warnings.push(Advisory::EngineOutdated);
    }

    warnings
}

/// Position `reader` at the start of the archive payload (offset
/// [`HEADER_LEN`]), suitable for feeding to [`crate::archive::unpack_dir`].
pub fn open_payload<R: Read + Seek>(mut reader: R) -> Result<R, CvdError> {
    reader.seek(SeekFrom::Start(HEADER_LEN as u64))?;
    Ok(reader)
}

/// Write a full CVD container: header followed by the archive payload bytes.
pub fn write_cvd<W: Write>(out: &mut W, header: &CvdHeader, payload: &[u8]) -> Result<(), CvdError> {
    out.write_all(&write_header(header)?)?;
    out.write_all(payload)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> CvdHeader {
        CvdHeader {
            build_time: "03 Jan 2025 12-00 +0000".to_owned(),
            version: 27000,
            signature_count: 8_000_000,
            engine_level: 90,
            payload_hash: "d41d8cd98f00b204e9800998ecf8427e".parse().unwrap(),
            signature: "deadbeefcafe".to_owned(),
            builder: "sigmgr".to_owned(),
            creation_time: Some(1_735_905_600),
        }
    }

    #[test]
    fn header_round_trips() {
        let header = sample_header();
        let bytes = write_header(&header).unwrap();
        assert_eq!(bytes.len(), HEADER_LEN);
        let parsed = parse_header(&bytes).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn header_accepts_old_seven_field_form() {
        let mut line = format!(
            "ClamAV-VDB:03 Jan 2025 12-00 +0000:27000:8000000:90:{}:deadbeef:sigmgr",
            "d41d8cd98f00b204e9800998ecf8427e"
        );
        line.push_str(&" ".repeat(HEADER_LEN - line.len()));
        let mut bytes = [0u8; HEADER_LEN];
        bytes.copy_from_slice(line.as_bytes());

        let parsed = parse_header(&bytes).unwrap();
        assert_eq!(parsed.creation_time, None);
        assert_eq!(parsed.builder, "sigmgr");
    }

    #[test]
    fn rejects_bad_magic() {
        let bytes = [b' '; HEADER_LEN];
        assert!(matches!(parse_header(&bytes), Err(HeaderError::BadMagic)));
    }

    #[test]
    fn advisories_flags_stale_and_outdated() {
        let mut header = sample_header();
        header.creation_time = Some(0);
        header.engine_level = 999;
        let config = crate::config::VerifyConfig {
            engine_level: 1,
            ..Default::default()
        };
        let warnings = advisories(&header, &config, UNIX_EPOCH + Duration::from_secs(10_000_000));
        assert!(warnings.contains(&Advisory::Stale));
        assert!(warnings.contains(&Advisory::EngineOutdated));
    }

    #[test]
    fn advisories_empty_for_fresh_compatible_header() {
        let mut header = sample_header();
        header.creation_time = Some(1_000_000);
        header.engine_level = 1;
        let config = crate::config::VerifyConfig {
            engine_level: 90,
            ..Default::default()
        };
        let warnings = advisories(&header, &config, UNIX_EPOCH + Duration::from_secs(1_000_010));
        assert!(warnings.is_empty());
    }
}
