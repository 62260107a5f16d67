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

// Adapted from `control/digest.rs`: a const-generic hash container with a
// lowercase-hex `Display`/`FromStr` pair. Here it also carries the actual
// digest computation, since this crate (unlike the control-file parser this
// type was lifted from) needs to produce digests, not just validate them.

use std::io::Read;
use std::str::FromStr;

#[cfg(not(feature = "hex"))]
type Inner<const HASH_LEN: usize> = String;

#[cfg(feature = "hex")]
type Inner<const HASH_LEN: usize> = [u8; HASH_LEN];

const HASH_LEN_MD5: usize = 16;
const HASH_LEN_SHA256: usize = 32;

/// A fixed-length cryptographic digest, rendered as lowercase hex.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Digest<const HASH_LEN: usize>(Inner<HASH_LEN>);

/// 128-bit MD5 digest, used for the CVD archive-payload hash (spec: "lowercase
/// hex hash of the archive payload (32 chars)").
pub type Md5Digest = Digest<HASH_LEN_MD5>;

/// 256-bit SHA-256 digest, used over the CDIFF envelope.
pub type Sha256Digest = Digest<HASH_LEN_SHA256>;

/// Errors encountered parsing or computing a [`Digest`].
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum DigestError {
    /// The hex string was empty.
    Empty,
    /// The hex string was the wrong length for this digest's `HASH_LEN`.
    BadLength,
    /// The hex string contained non-hex characters. Only returned under the
    /// `hex` feature.
    InvalidEncoding,
    /// The stream ended before a full digest's worth of bytes could be
    /// consumed from an expected-length read.
    ShortRead,
}
crate::errors::error_enum!(DigestError);

impl From<std::io::Error> for DigestError {
    fn from(_: std::io::Error) -> Self {
        DigestError::ShortRead
    }
}

#[cfg(not(feature = "hex"))]
mod no_hex {
    use super::*;

    impl<const HASH_LEN: usize> std::fmt::Display for Digest<HASH_LEN> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", self.0)
        }
    }

    impl<const HASH_LEN: usize> FromStr for Digest<HASH_LEN> {
        type Err = DigestError;
        fn from_str(s: &str) -> Result<Self, DigestError> {
            if s.is_empty() {
                return Err(DigestError::Empty);
            }
            if s.len() != HASH_LEN * 2 {
                return Err(DigestError::BadLength);
            }
            Ok(Self(s.to_owned()))
        }
    }

    /// Lowercase-hex render of raw digest bytes, without the `hex` crate —
    /// this module only exists when `hex` is disabled.
    pub(super) fn to_hex(bytes: &[u8]) -> String {
        const DIGITS: &[u8; 16] = b"0123456789abcdef";
        let mut out = String::with_capacity(bytes.len() * 2);
        for byte in bytes {
            out.push(DIGITS[(byte >> 4) as usize] as char);
            out.push(DIGITS[(byte & 0x0f) as usize] as char);
        }
        out
    }
}

#[cfg(feature = "hex")]
mod with_hex {
    use super::*;

    impl<const HASH_LEN: usize> std::fmt::Display for Digest<HASH_LEN> {
        fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
            write!(f, "{}", hex::encode(self.0))
        }
    }

    impl<const HASH_LEN: usize> FromStr for Digest<HASH_LEN> {
        type Err = DigestError;
        fn from_str(s: &str) -> Result<Self, DigestError> {
            if s.is_empty() {
                return Err(DigestError::Empty);
            }
            let bytes = hex::decode(s).map_err(|_| DigestError::InvalidEncoding)?;
            Ok(Self(
                bytes.try_into().map_err(|_| DigestError::BadLength)?,
            ))
        }
    }

    impl<const HASH_LEN: usize> Digest<HASH_LEN> {
        /// Raw digest bytes.
        pub fn as_bytes(&self) -> &[u8; HASH_LEN] {
            &self.0
        }
    }
}

impl Md5Digest {
    /// Compute the MD5 digest of a byte stream.
    pub fn of_stream<R: Read>(mut r: R) -> Result<Self, DigestError> {
        use md5::{Digest as _, Md5};
        let mut hasher = Md5::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        #[cfg(feature = "hex")]
        {
            Ok(Digest(hasher.finalize().into()))
        }
        #[cfg(not(feature = "hex"))]
        {
            Ok(Digest(no_hex::to_hex(&hasher.finalize())))
        }
    }

    /// Compute the MD5 digest of a file's full contents.
    pub fn of_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self, DigestError> {
        Self::of_stream(std::fs::File::open(path)?)
    }
}

impl Sha256Digest {
    /// Compute the SHA-256 digest of a byte stream.
    pub fn of_stream<R: Read>(mut r: R) -> Result<Self, DigestError> {
        use sha2::{Digest as _, Sha256};
        let mut hasher = Sha256::new();
        let mut buf = [0u8; 64 * 1024];
        loop {
            let n = r.read(&mut buf)?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        #[cfg(feature = "hex")]
        {
            Ok(Digest(hasher.finalize().into()))
        }
        #[cfg(not(feature = "hex"))]
        {
            Ok(Digest(no_hex::to_hex(&hasher.finalize())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_of_empty_stream() {
        let d = Md5Digest::of_stream(std::io::empty()).unwrap();
        assert_eq!(d.to_string(), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn sha256_of_empty_stream() {
        let d = Sha256Digest::of_stream(std::io::empty()).unwrap();
        assert_eq!(
            d.to_string(),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn round_trips_through_display_and_parse() {
        let d = Md5Digest::of_stream("Sig1=abc\n".as_bytes()).unwrap();
        let s = d.to_string();
        let parsed: Md5Digest = s.parse().unwrap();
        assert_eq!(d, parsed);
    }

    #[test]
    fn rejects_wrong_length() {
        assert_eq!(
            "abcd".parse::<Md5Digest>().unwrap_err(),
            DigestError::BadLength
        );
    }

    #[test]
    fn rejects_empty() {
        assert_eq!("".parse::<Md5Digest>().unwrap_err(), DigestError::Empty);
    }
}
