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

#![deny(missing_copy_implementations)]
#![deny(trivial_casts)]
#![deny(trivial_numeric_casts)]
#![deny(unused_import_braces)]
#![deny(unused_qualifications)]
#![deny(rustdoc::broken_intra_doc_links)]
#![deny(rustdoc::private_intra_doc_links)]

//! `cvdkit` builds, diffs, patches, and verifies signed incremental
//! signature-database bundles: the CVD container format and its CDIFF
//! incremental-update sibling.
//!
//! # Pipeline order
//!
//! A signature database directory is packed into a [`cvd`] container. A
//! [`diff`] against a previous release's unpacked directory produces a
//! [`patch`] script, which is wrapped into a [`cdiff`] envelope. The
//! [`build`] module orchestrates all of this end to end, calling out to a
//! [`signer`] for detached signatures and consulting a [`mirror`] store to
//! steer clients away from misbehaving or stale mirrors. [`manifest`]
//! ties a release's per-file hashes to both the build and the patch
//! verification step.
//!
//! # Feature flags
//!
//! | Flag      | Description                                                         |
//! | --------- | -------------------------------------------------------------------- |
//! | `full`    | Enable all optional features.                                        |
//! | `chrono`  | Render the CVD header's build-time field with [chrono].              |
//! | `hex`     | Store digests as raw bytes with hex `Display`/`FromStr`, via [hex].   |
//! | `serde`   | Derive [serde] (de)serialization for the config structs.              |
//! | `sequoia` | Verify detached OpenPGP signatures using [sequoia_openpgp].           |
//! | `cli`     | Build the `cvdkit` binary ([clap] subcommands over the library API).  |
//!
//! # Feature `chrono`
//!
//! Without this feature the build orchestrator emits an empty build-time
//! field rather than guessing at a locale-independent rendering itself.
//!
//! # Feature `hex`
//!
//! Enable parsing hashes from ASCII into bytes using the `hex` crate,
//! rather than keeping them as opaque hex strings.
//!
//! # Feature `sequoia`
//!
//! Enable verifying CVD and CDIFF detached signatures against a trusted
//! keyring. Without it, [`cvd::verify`] and [`cdiff::verify_and_unpack`]
//! are unavailable; parsing and building bundles still works.

pub mod archive;
pub mod build;
pub mod cdiff;
pub mod config;
pub mod cvd;
pub mod diff;
mod errors;
pub mod hash;
pub mod manifest;
pub mod mirror;
pub mod notify;
pub mod patch;
pub mod signer;
