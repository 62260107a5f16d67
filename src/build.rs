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

//! The build orchestrator: the pipeline that turns a signature-database
//! directory into a new CVD (and, against a previous version, a CDIFF).
//! Grounded on `build()` in `sigtool/sigtool.c`, generalized away from its
//! hardcoded `main`/`daily` filename list to [`crate::patch::is_allowed_name`],
//! and away from its two-pass placeholder-then-patch header (`header[real_header] = 0`,
//! then later splicing in the real hash/signature) per the design note: a
//! single typed context accumulates the header fields and is serialized once.

use crate::{
    archive, cdiff,
    config::{BuildConfig, NOTIFY_HOOK_POOL_CAP},
    cvd::{self, CvdHeader},
    diff::{self, DiffOptions},
    hash::{Md5Digest, digest::DigestError},
    manifest::{Manifest, ManifestError, VerifyPatchError},
    notify, patch,
    signer::{SignMode, SignerClient},
};
use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

/// Which stage of the pipeline an error originated in, so a caller can emit
/// the single log line that identifies where a build failed.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BuildStage {
    Load,
    Manifest,
    Archive,
    Sign,
    Header,
    Diff,
    Verify,
}

/// The underlying failure, independent of which stage it happened in.
#[derive(Debug)]
pub enum BuildErrorKind {
    Io(std::io::Error),
    Archive(archive::ArchiveError),
    Digest(DigestError),
    Cvd(cvd::CvdError),
    Cdiff(cdiff::CdiffError),
    Manifest(ManifestError),
    Verify(VerifyPatchError),
    Signer(crate::signer::SignerError),
    Diff(diff::DiffError),
    /// No database files of any allowed extension were present in the
    /// build directory.
    NoSignatureFiles,
}
crate::errors::error_enum!(BuildErrorKind);

/// A pipeline failure, tagged with the stage it happened in and (where
/// applicable) the file being processed.
#[derive(Debug)]
pub struct BuildError {
    pub stage: BuildStage,
    pub file: Option<String>,
    pub kind: BuildErrorKind,
}
crate::errors::error_enum!(BuildError);

impl BuildError {
    fn new(stage: BuildStage, kind: impl Into<BuildErrorKind>) -> Self {
        BuildError {
            stage,
            file: None,
            kind: kind.into(),
        }
    }

    fn with_file(stage: BuildStage, file: impl Into<String>, kind: impl Into<BuildErrorKind>) -> Self {
        BuildError {
            stage,
            file: Some(file.into()),
            kind: kind.into(),
        }
    }
}

macro_rules! kind_from {
    ($source:ty, $variant:ident) => {
        impl From<$source> for BuildErrorKind {
            fn from(e: $source) -> Self {
                BuildErrorKind::$variant(e)
            }
        }
    };
}
kind_from!(std::io::Error, Io);
kind_from!(archive::ArchiveError, Archive);
kind_from!(DigestError, Digest);
kind_from!(cvd::CvdError, Cvd);
kind_from!(cdiff::CdiffError, Cdiff);
kind_from!(ManifestError, Manifest);
kind_from!(VerifyPatchError, Verify);
kind_from!(crate::signer::SignerError, Signer);
kind_from!(diff::DiffError, Diff);

/// The previous release's version and signature count, read from either a
/// prior CVD header or a prior `.info` manifest's header prefix.
#[derive(Clone, Debug)]
pub struct PreviousRelease {
    pub version: u32,
    pub signature_count: u32,
}

/// Result of a successful build: the new CVD bytes, its header, and
/// (if a previous release directory was supplied) the CDIFF bytes against
/// it.
pub struct BuildOutput {
    pub cvd_header: CvdHeader,
    pub cvd_bytes: Vec<u8>,
    pub cdiff_bytes: Option<Vec<u8>>,
}

/// Non-comment, non-blank line count across every present allowed
/// signature file in `db_dir`, used to cross-check the engine-reported
/// signature count (`countlines()` in the original, generalized past its
/// fixed filename list).
fn count_signature_lines(db_dir: &Path) -> Result<u32, BuildError> {
    let mut total = 0u32;
    for entry in fs::read_dir(db_dir).map_err(|e| BuildError::new(BuildStage::Load, e))? {
        let entry = entry.map_err(|e| BuildError::new(BuildStage::Load, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if !patch::is_allowed_name(&name) || name == "COPYING" || name.ends_with(".info") {
            continue;
        }
        let contents = fs::read_to_string(entry.path()).unwrap_or_default();
        total += contents
            .lines()
            .filter(|l| !l.is_empty() && !l.starts_with('#'))
            .count() as u32;
    }
    Ok(total)
}

fn database_filenames(db_dir: &Path) -> Result<Vec<String>, BuildError> {
    let mut names = Vec::new();
    for entry in fs::read_dir(db_dir).map_err(|e| BuildError::new(BuildStage::Load, e))? {
        let entry = entry.map_err(|e| BuildError::new(BuildStage::Load, e))?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if patch::is_allowed_name(&name) {
            names.push(name);
        }
    }
    names.sort();
    Ok(names)
}

/// Run the full build pipeline (spec steps 1-7): load and count
/// signatures, derive the new version, compose and write the manifest,
/// pack the archive, obtain a signature over its hash, and emit the final
/// CVD bytes.
pub fn build_cvd(
    db_dir: &Path,
    engine_signature_count: u32,
    previous: Option<&PreviousRelease>,
    config: &BuildConfig,
    signer: &SignerClient,
    signer_host: &str,
) -> Result<(CvdHeader, Vec<u8>), BuildError> {
    let filenames = database_filenames(db_dir)?;
    if filenames.is_empty() {
        return Err(BuildError::new(BuildStage::Load, BuildErrorKind::NoSignatureFiles));
    }

    let counted = count_signature_lines(db_dir)?;
    if counted != engine_signature_count {
        tracing::warn!(
            counted,
            engine_signature_count,
            "signature count mismatch: check the database directory for stray files"
        );
    }

    let version = previous.map(|p| p.version + 1).unwrap_or(1);

    let build_time = chrono_build_time();
    let header_prefix = format!(
        "ClamAV-VDB:{build_time}:{version}:{engine_signature_count}:{}",
        config.engine_level
    );

    let manifest = Manifest::build(header_prefix, db_dir, &filenames)
        .map_err(|e| BuildError::new(BuildStage::Manifest, e))?;
    let mut manifest_bytes = Vec::new();
    manifest
        .write(&mut manifest_bytes)
        .map_err(|e| BuildError::new(BuildStage::Manifest, e))?;

    let db_stem = filenames
        .first()
        .and_then(|n| n.split('.').next())
        .unwrap_or("daily");
    let manifest_name = format!("{db_stem}.info");
    fs::write(db_dir.join(&manifest_name), &manifest_bytes)
        .map_err(|e| BuildError::with_file(BuildStage::Manifest, manifest_name, e))?;

    let mut archive_bytes = Vec::new();
    archive::pack_dir(&mut archive_bytes, db_dir).map_err(|e| BuildError::new(BuildStage::Archive, e))?;

    let payload_hash =
        Md5Digest::of_stream(archive_bytes.as_slice()).map_err(|e| BuildError::new(BuildStage::Archive, e))?;

    let signature = signer
        .sign(signer_host, payload_hash.to_string().as_bytes(), SignMode::Cvd)
        .map_err(|e| BuildError::new(BuildStage::Sign, e))?;

    let header = CvdHeader {
        build_time,
        version,
        signature_count: engine_signature_count,
        engine_level: config.engine_level,
        payload_hash,
        signature,
        builder: config.builder.clone(),
        creation_time: Some(epoch_now()),
    };

    let mut cvd_bytes = Vec::new();
    cvd::write_cvd(&mut cvd_bytes, &header, &archive_bytes).map_err(|e| BuildError::new(BuildStage::Header, e))?;

    Ok((header, cvd_bytes))
}

/// Run the full pipeline: build a new CVD from `db_dir`, and, if
/// `previous_dir` names a previously unpacked release to diff against,
/// also build the matching CDIFF. A CDIFF verification failure is
/// reported to the caller rather than silently dropped, so it can decide
/// whether to still ship the CVD alone and mark the CDIFF attempt broken.
pub fn build(
    db_dir: &Path,
    engine_signature_count: u32,
    previous: Option<&PreviousRelease>,
    previous_dir: Option<&Path>,
    config: &BuildConfig,
    signer: &SignerClient,
    signer_host: &str,
) -> Result<BuildOutput, BuildError> {
    let (cvd_header, cvd_bytes) = build_cvd(db_dir, engine_signature_count, previous, config, signer, signer_host)?;

    let cdiff_bytes = match previous_dir {
        Some(old_dir) => Some(build_cdiff(old_dir, db_dir, cvd_header.version, signer, signer_host)?),
        None => None,
    };

    if !config.notify_hooks.is_empty() {
        for result in notify::run_hooks(&config.notify_hooks, NOTIFY_HOOK_POOL_CAP) {
            if !result.success {
                tracing::warn!(command = %result.command, "notification hook failed");
            }
        }
    }

    Ok(BuildOutput {
        cvd_header,
        cvd_bytes,
        cdiff_bytes,
    })
}

/// Run steps 8-9: diff the new build's directory against a previously
/// unpacked reference directory, verify the patch reproduces the new
/// manifest, and pack a CDIFF. On verification failure the caller should
/// rename the CDIFF output to `.broken`; this function signals that by
/// returning the error rather than writing a file itself.
pub fn build_cdiff(
    old_dir: &Path,
    new_dir: &Path,
    version: u32,
    signer: &SignerClient,
    signer_host: &str,
) -> Result<Vec<u8>, BuildError> {
    let commands =
        diff::diff_dirs(old_dir, new_dir, &DiffOptions::default()).map_err(|e| BuildError::new(BuildStage::Diff, e))?;

    let mut script_bytes = Vec::new();
    for command in &commands {
        writeln!(script_bytes, "{}", render_command(command)).map_err(|e| BuildError::new(BuildStage::Diff, e))?;
    }

    let work_dir = tempfile::tempdir().map_err(|e| BuildError::new(BuildStage::Verify, e))?;
    crate::manifest::verify_patch(script_bytes.as_slice(), old_dir, work_dir.path())
        .map_err(|e| BuildError::new(BuildStage::Verify, e))?;

    let body = cdiff::pack_body(&script_bytes, version).map_err(|e| BuildError::new(BuildStage::Diff, e))?;
    let digest = cdiff::digest(&body).map_err(|e| BuildError::new(BuildStage::Diff, e))?;
    let signature = signer
        .sign(signer_host, digest.to_string().as_bytes(), SignMode::Cdiff)
        .map_err(|e| BuildError::new(BuildStage::Sign, e))?;
    Ok(cdiff::finish(body, &signature))
}

fn render_command(command: &patch::Command) -> String {
    match command {
        patch::Command::Open { name } => format!("OPEN {name}"),
        patch::Command::Add { line } => format!("ADD {line}"),
        patch::Command::Del { old_line, key } => format!("DEL {old_line} {key}"),
        patch::Command::Xchg { old_line, key, new_line } => format!("XCHG {old_line} {key} {new_line}"),
        patch::Command::Close => "CLOSE".to_owned(),
        patch::Command::Unlink { name } => format!("UNLINK {name}"),
    }
}

#[cfg(feature = "chrono")]
fn chrono_build_time() -> String {
    chrono::Local::now().format("%d %b %Y %H-%M %z").to_string()
}

#[cfg(not(feature = "chrono"))]
fn chrono_build_time() -> String {
    String::new()
}

fn epoch_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Rename a freshly written but failed-verification CDIFF file to
/// `<name>.broken`, so a subsequent rebuild attempt notices it rather than
/// silently overwriting it.
pub fn mark_broken(path: &Path) -> std::io::Result<PathBuf> {
    let broken = path.with_extension("broken");
    fs::rename(path, &broken)?;
    Ok(broken)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn count_signature_lines_ignores_manifest_and_copying() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("COPYING"), "license text\n").unwrap();
        fs::write(dir.path().join("daily.info"), "ClamAV-VDB:x\nfoo:bar\n").unwrap();
        fs::write(dir.path().join("daily.hdb"), "sig1\nsig2\n\n#comment\n").unwrap();

        let count = count_signature_lines(dir.path()).unwrap();
        assert_eq!(count, 2);
    }

    #[test]
    fn database_filenames_filters_to_allowed_extensions() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("daily.hdb"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        fs::write(dir.path().join("COPYING"), "").unwrap();

        let mut names = database_filenames(dir.path()).unwrap();
        names.sort();
        assert_eq!(names, vec!["COPYING".to_owned(), "daily.hdb".to_owned()]);
    }

    #[test]
    fn build_runs_notify_hooks_after_a_successful_build() {
        use std::{io::Read, net::TcpListener, thread};

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = thread::spawn(move || {
            let (mut stream, _) = listener.accept().unwrap();
            let mut buf = [0u8; 512];
            let _ = stream.read(&mut buf).unwrap();
            stream.write_all(b"Signature:deadbeef").unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("daily.hdb"), "aaaaaaaaaaaaaaaa:1:A\n").unwrap();

        let marker = dir.path().join("hook-ran");
        let config = BuildConfig {
            notify_hooks: vec![format!("touch {}", marker.display())],
            ..BuildConfig::default()
        };
        let signer = SignerClient::new("u", "p", std::time::Duration::from_secs(5));

        build(dir.path(), 1, None, None, &config, &signer, &addr.to_string()).unwrap();
        handle.join().unwrap();

        assert!(marker.exists());
    }

    #[test]
    fn build_cvd_rejects_empty_directory_at_load_stage() {
        let dir = tempfile::tempdir().unwrap();
        let signer = SignerClient::new("u", "p", std::time::Duration::from_secs(1));
        let err = build_cvd(
            dir.path(),
            0,
            None,
            &BuildConfig::default(),
            &signer,
            "127.0.0.1:1",
        )
        .unwrap_err();
        assert_eq!(err.stage, BuildStage::Load);
        assert!(matches!(err.kind, BuildErrorKind::NoSignatureFiles));
    }
}
