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

//! Digest computation and OpenPGP signature verification.
//!
//! [`digest`] provides the MD5 (CVD payload) and SHA-256 (CDIFF envelope)
//! digests bundles are signed over. [`signature`] wraps `sequoia-openpgp`
//! detached-signature verification against an optional trusted keyring: a
//! missing keyring is a soft [`signature::SignatureOutcome::Unverified`], not
//! an error, so tools that run without one (`cvdinfo` on an arbitrary file)
//! keep working.

pub mod digest;

#[cfg(feature = "sequoia")]
pub mod signature;

pub use digest::{Digest, DigestError, Md5Digest, Sha256Digest};
