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

//! OpenPGP detached-signature verification, adapted from
//! `control::openpgp::OpenPgpValidator` for CVD/CDIFF's detached-signature-
//! over-a-digest scheme rather than clearsigned control files: the message
//! we verify against is a raw digest, and the signature arrives separately
//! (the header's `MD5:` field vs. trailing hex blob, or the `:`-delimited
//! tail of a CDIFF envelope), so [`sequoia_openpgp::parse::stream::DetachedVerifierBuilder`]
//! is the right tool rather than the inline-message `VerifierBuilder`.

#![cfg_attr(docsrs, doc(cfg(feature = "sequoia")))]

use sequoia_openpgp::{
    Cert, Fingerprint, KeyHandle, Result as SequoiaResult,
    cert::CertParser,
    parse::{
        Parse,
        stream::{DetachedVerifierBuilder, MessageLayer, MessageStructure, VerificationHelper},
    },
    policy::StandardPolicy,
};
use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

/// Builder for a [`SignatureVerifier`] backed by one or more keyrings.
#[derive(Clone, Default)]
pub struct SignatureVerifierBuilder {
    keyrings: Vec<PathBuf>,
}

/// A loaded trusted keyring, ready to check detached signatures against.
#[derive(Clone)]
pub struct SignatureVerifier {
    keys: HashMap<Fingerprint, Cert>,
}

/// Outcome of [`verify_signature`]. `Unverified` is a soft result, not an
/// error: it means no verifier was supplied, so the caller decides whether
/// that's acceptable.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SignatureOutcome {
    /// At least one signature over the digest matched a key in the keyring.
    Verified,
    /// No keyring was supplied to check against.
    Unverified,
}

/// Error conditions encountered while verifying a detached signature.
#[derive(Debug)]
pub enum SignatureError {
    /// No signature in the ASCII-armored blob matched a key in the keyring.
    NoValidSignatures,
    /// The signature text wasn't well-formed ASCII-armored OpenPGP data.
    Malformed(anyhow::Error),
    /// Underlying i/o error loading a keyring file.
    Io(std::io::Error),
}
crate::errors::error_enum!(SignatureError);

impl SignatureVerifier {
    /// Start building a verifier from one or more keyring files.
    pub fn build() -> SignatureVerifierBuilder {
        Default::default()
    }
}

impl SignatureVerifierBuilder {
    /// Add a keyring file to the trusted set. Keys from every keyring added
    /// this way are merged together.
    pub fn with_keyring(mut self, path: &Path) -> Self {
        self.keyrings.push(path.to_owned());
        self
    }

    /// Load all configured keyrings and produce a [`SignatureVerifier`].
    pub fn build(self) -> Result<SignatureVerifier, SignatureError> {
        let mut keys = HashMap::new();
        for keyring in self.keyrings {
            for cert in CertParser::from_file(&keyring).map_err(SignatureError::Malformed)? {
                let cert = cert.map_err(SignatureError::Malformed)?;
                keys.insert(cert.fingerprint(), cert.clone());
                for key in cert.keys() {
                    keys.insert(key.key().fingerprint(), cert.clone());
                }
            }
        }
        Ok(SignatureVerifier { keys })
    }
}

struct Helper<'a> {
    verifier: &'a SignatureVerifier,
    matched: bool,
}

impl VerificationHelper for &mut Helper<'_> {
    fn get_certs(&mut self, _ids: &[KeyHandle]) -> SequoiaResult<Vec<Cert>> {
        Ok(self.verifier.keys.values().cloned().collect())
    }

    fn check(&mut self, structure: MessageStructure) -> SequoiaResult<()> {
        for layer in structure.into_iter() {
            let MessageLayer::SignatureGroup { results } = layer else {
                continue;
            };
            for result in results {
                let Ok(result) = result else { continue };
                for fingerprint in result.sig.issuer_fingerprints() {
                    if self.verifier.keys.contains_key(fingerprint) {
                        self.matched = true;
                    }
                }
            }
        }
        Ok(())
    }
}

/// Verify an ASCII-armored detached OpenPGP signature over `digest`.
///
/// When `verifier` is `None` this returns `Ok(SignatureOutcome::Unverified)`
/// rather than an error: callers without a configured keyring (`cvdinfo` run
/// against an arbitrary file, for instance) still get to inspect a bundle,
/// they just can't attest to its authenticity. Higher-level operations that
/// require a signature (publishing a build, applying an untrusted patch)
/// are responsible for turning that into a hard failure themselves.
pub fn verify_signature(
    verifier: Option<&SignatureVerifier>,
    digest: &[u8],
    signature_ascii: &str,
) -> Result<SignatureOutcome, SignatureError> {
    let Some(verifier) = verifier else {
        return Ok(SignatureOutcome::Unverified);
    };

    let policy = &StandardPolicy::new();
    let mut helper = Helper {
        verifier,
        matched: false,
    };

    let mut v = DetachedVerifierBuilder::from_bytes(signature_ascii.as_bytes())
        .map_err(SignatureError::Malformed)?
        .with_policy(policy, None, &mut helper)
        .map_err(SignatureError::Malformed)?;

    v.verify_bytes(digest).map_err(SignatureError::Malformed)?;

    let Helper { matched, .. } = helper;
    if matched {
        Ok(SignatureOutcome::Verified)
    } else {
        Err(SignatureError::NoValidSignatures)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_verifier_is_unverified_not_error() {
        let result = verify_signature(None, b"deadbeef", "garbage");
        assert_eq!(result.unwrap(), SignatureOutcome::Unverified);
    }
}
