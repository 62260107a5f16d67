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

//! The CDIFF envelope: a compressed, signed wrapper carrying a
//! [`crate::patch`] script. Grounded on `script2cdiff`/`cdiff_apply` in
//! `sigtool/sigtool.c`, using [`crate::archive`]'s `flate2` dependency for
//! the gzip body and [`crate::hash::Sha256Digest`] for the envelope digest
//! the signature is bound to.

use crate::hash::Sha256Digest;
use flate2::{Compression, read::GzDecoder, write::GzEncoder};
use std::io::{Read, Write};

const PREFIX_MAGIC: &str = "ClamAV-Diff";

/// Errors encountered packing, parsing, or verifying a CDIFF envelope.
#[derive(Debug)]
pub enum CdiffError {
    Io(std::io::Error),
    /// The envelope didn't start with `ClamAV-Diff:`.
    BadMagic,
    /// A colon-delimited prefix field was missing or non-numeric.
    MalformedPrefix,
    /// No final `:` delimiter was found to separate body from signature.
    MissingSignatureDelimiter,
    /// The recomputed SHA-256 digest didn't match what the signature
    /// covers (only surfaced once a verifier rejects the signature).
    HashMismatch,
    #[cfg(feature = "sequoia")]
    Signature(crate::hash::signature::SignatureError),
}
crate::errors::error_enum!(CdiffError);

impl From<std::io::Error> for CdiffError {
    fn from(e: std::io::Error) -> Self {
        CdiffError::Io(e)
    }
}
#[cfg(feature = "sequoia")]
impl From<crate::hash::signature::SignatureError> for CdiffError {
    fn from(e: crate::hash::signature::SignatureError) -> Self {
        CdiffError::Signature(e)
    }
}

/// A parsed CDIFF envelope: the prefix fields, the still-compressed body,
/// and the trailing ASCII signature.
#[derive(Clone, Debug, PartialEq)]
pub struct CdiffEnvelope {
    pub version: u32,
    pub uncompressed_size: u64,
    /// Gzip-compressed PatchScript bytes.
    pub compressed_script: Vec<u8>,
    pub signature: String,
}

/// Compress `script` and assemble the signed prefix+body portion of a CDIFF
/// envelope (everything up to, but not including, the final `:signature`).
/// Call this, obtain a detached signature from [`crate::signer`] over a
/// SHA-256 of the result, then append it with [`finish`].
pub fn pack_body(script: &[u8], version: u32) -> Result<Vec<u8>, CdiffError> {
    let mut compressed = Vec::new();
    {
        let mut encoder = GzEncoder::new(&mut compressed, Compression::default());
        encoder.write_all(script)?;
        encoder.finish()?;
    }

    let mut out = format!("{PREFIX_MAGIC}:{version}:{}:", script.len()).into_bytes();
    out.extend_from_slice(&compressed);
    Ok(out)
}

/// Append `:<signature>` to a body produced by [`pack_body`], completing
/// the envelope.
pub fn finish(mut body: Vec<u8>, signature: &str) -> Vec<u8> {
    body.push(b':');
    body.extend_from_slice(signature.as_bytes());
    body
}

/// SHA-256 over the signed portion of an envelope (prefix + compressed
/// body), the digest a detached signature is obtained over.
pub fn digest(body: &[u8]) -> Result<Sha256Digest, CdiffError> {
    Sha256Digest::of_stream(body).map_err(|_| CdiffError::MalformedPrefix)
}

/// Parse a complete CDIFF envelope (prefix + compressed body + `:signature`)
/// into its components.
pub fn parse(bytes: &[u8]) -> Result<CdiffEnvelope, CdiffError> {
    if !bytes.starts_with(PREFIX_MAGIC.as_bytes()) {
        return Err(CdiffError::BadMagic);
    }

    let mut rest = &bytes[PREFIX_MAGIC.len()..];
    if rest.first() != Some(&b':') {
        return Err(CdiffError::MalformedPrefix);
    }
    rest = &rest[1..];

    let version_end = rest
        .iter()
        .position(|&b| b == b':')
        .ok_or(CdiffError::MalformedPrefix)?;
    let version: u32 = std::str::from_utf8(&rest[..version_end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CdiffError::MalformedPrefix)?;
    rest = &rest[version_end + 1..];

    let size_end = rest
        .iter()
        .position(|&b| b == b':')
        .ok_or(CdiffError::MalformedPrefix)?;
    let uncompressed_size: u64 = std::str::from_utf8(&rest[..size_end])
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or(CdiffError::MalformedPrefix)?;
    let body_start = bytes.len() - rest.len() + size_end + 1;

    let signature_delim = rfind_byte(&bytes[body_start..], b':')
        .ok_or(CdiffError::MissingSignatureDelimiter)?;
    let signature_start = body_start + signature_delim + 1;

    let compressed_script = bytes[body_start..body_start + signature_delim].to_vec();
    let signature = String::from_utf8_lossy(&bytes[signature_start..]).into_owned();

    Ok(CdiffEnvelope {
        version,
        uncompressed_size,
        compressed_script,
        signature,
    })
}

fn rfind_byte(haystack: &[u8], needle: u8) -> Option<usize> {
    haystack.iter().rposition(|&b| b == needle)
}

/// Verify a parsed envelope's signature and return the decompressed
/// PatchScript bytes.
#[cfg(feature = "sequoia")]
pub fn verify_and_unpack(
    bytes: &[u8],
    verifier: Option<&crate::hash::signature::SignatureVerifier>,
) -> Result<(crate::hash::signature::SignatureOutcome, Vec<u8>), CdiffError> {
    let envelope = parse(bytes)?;
    let signed_len = bytes.len() - 1 - envelope.signature.len();
    let digest = digest(&bytes[..signed_len])?;

    let outcome = crate::hash::signature::verify_signature(
        verifier,
        digest.to_string().as_bytes(),
        &envelope.signature,
    )?;

    let mut script = Vec::new();
    GzDecoder::new(envelope.compressed_script.as_slice()).read_to_end(&mut script)?;

    Ok((outcome, script))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pack_parse_round_trips() {
        let script = b"OPEN daily.hdb\nADD aaaaaaaaaaaaaaaa:1:A\nCLOSE\n";
        let body = pack_body(script, 42).unwrap();
        let envelope_bytes = finish(body, "SIGNATURE-TEXT");

        let parsed = parse(&envelope_bytes).unwrap();
        assert_eq!(parsed.version, 42);
        assert_eq!(parsed.uncompressed_size, script.len() as u64);
        assert_eq!(parsed.signature, "SIGNATURE-TEXT");

        let mut decompressed = Vec::new();
        GzDecoder::new(parsed.compressed_script.as_slice())
            .read_to_end(&mut decompressed)
            .unwrap();
        assert_eq!(decompressed, script);
    }

    #[test]
    fn rejects_bad_magic() {
        let err = parse(b"NotACdiff:1:2:body:sig").unwrap_err();
        assert!(matches!(err, CdiffError::BadMagic));
    }

    #[test]
    fn digest_is_stable_over_identical_bodies() {
        let body_a = pack_body(b"OPEN x\nCLOSE\n", 1).unwrap();
        let body_b = pack_body(b"OPEN x\nCLOSE\n", 1).unwrap();
        assert_eq!(digest(&body_a).unwrap(), digest(&body_b).unwrap());
    }
}
