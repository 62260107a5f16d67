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

//! The `.info` manifest: line 1 is the CVD header prefix through engine
//! level, subsequent lines are `filename:hex-hash`. Grounded on `writeinfo`
//! in `sigtool/sigtool.c` and used both by the build orchestrator (to write
//! a fresh manifest) and by [`verify_patch`] (to check a patched directory
//! against what the new bundle claims to contain).

use crate::hash::Md5Digest;
use std::{
    collections::BTreeMap,
    fs,
    io::{self, BufRead, Write},
    path::Path,
};

/// A parsed `.info` manifest.
#[derive(Clone, Debug, PartialEq)]
pub struct Manifest {
    /// The header prefix line: `ClamAV-VDB:<build-time>:<version>:<sigs>:<engine-level>`.
    pub header_prefix: String,
    /// Filename to hex-digest, in the order they appeared in the manifest.
    pub entries: Vec<(String, String)>,
}

/// Errors encountered reading, writing, or checking a manifest.
#[derive(Debug)]
pub enum ManifestError {
    Io(io::Error),
    /// A non-header-prefix line wasn't `filename:hash`.
    MalformedEntry(String),
    /// The manifest had no lines at all.
    Empty,
    /// A file the manifest lists is missing from the directory being
    /// checked, or its hash no longer matches.
    Mismatch { name: String },
}
crate::errors::error_enum!(ManifestError);

impl From<io::Error> for ManifestError {
    fn from(e: io::Error) -> Self {
        ManifestError::Io(e)
    }
}

impl Manifest {
    /// Build a manifest from a header prefix and the set of files present
    /// in `dir`, hashing each as it goes.
    pub fn build(header_prefix: String, dir: &Path, filenames: &[String]) -> Result<Self, ManifestError> {
        let mut entries = Vec::with_capacity(filenames.len());
        for name in filenames {
            let hash = Md5Digest::of_file(dir.join(name)).map_err(|_| ManifestError::Mismatch { name: name.clone() })?;
            entries.push((name.clone(), hash.to_string()));
        }
        Ok(Manifest { header_prefix, entries })
    }

    /// Parse a manifest from its `.info` file text.
    pub fn parse<R: BufRead>(reader: R) -> Result<Self, ManifestError> {
        let mut lines = reader.lines();
        let header_prefix = lines.next().ok_or(ManifestError::Empty)??;

        let mut entries = Vec::new();
        for line in lines {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let (name, hash) = line
                .split_once(':')
                .ok_or_else(|| ManifestError::MalformedEntry(line.clone()))?;
            entries.push((name.to_owned(), hash.to_owned()));
        }

        Ok(Manifest { header_prefix, entries })
    }

    /// Serialize back to `.info` file text.
    pub fn write<W: Write>(&self, out: &mut W) -> Result<(), ManifestError> {
        writeln!(out, "{}", self.header_prefix)?;
        for (name, hash) in &self.entries {
            writeln!(out, "{name}:{hash}")?;
        }
        Ok(())
    }

    /// Check every listed file in `dir` still hashes to what the manifest
    /// claims. The first mismatch (missing file or changed hash) is
    /// returned; no attempt is made to collect every mismatch, mirroring
    /// the fail-fast verification the build orchestrator relies on.
    pub fn check(&self, dir: &Path) -> Result<(), ManifestError> {
        for (name, expected_hash) in &self.entries {
            let actual = Md5Digest::of_file(dir.join(name))
                .map_err(|_| ManifestError::Mismatch { name: name.clone() })?;
            if actual.to_string() != *expected_hash {
                return Err(ManifestError::Mismatch { name: name.clone() });
            }
        }
        Ok(())
    }

    /// Lookup table of filename to claimed hash.
    pub fn as_map(&self) -> BTreeMap<&str, &str> {
        self.entries.iter().map(|(n, h)| (n.as_str(), h.as_str())).collect()
    }
}

/// Errors verifying a patch against a reference snapshot.
#[derive(Debug)]
pub enum VerifyPatchError {
    Io(io::Error),
    Archive(crate::archive::ArchiveError),
    Patch(crate::patch::PatchError),
    Manifest(ManifestError),
    /// The reference directory had no `.info` manifest to check against.
    MissingManifest,
}
crate::errors::error_enum!(VerifyPatchError);

impl From<io::Error> for VerifyPatchError {
    fn from(e: io::Error) -> Self {
        VerifyPatchError::Io(e)
    }
}
impl From<crate::archive::ArchiveError> for VerifyPatchError {
    fn from(e: crate::archive::ArchiveError) -> Self {
        VerifyPatchError::Archive(e)
    }
}
impl From<crate::patch::PatchError> for VerifyPatchError {
    fn from(e: crate::patch::PatchError) -> Self {
        VerifyPatchError::Patch(e)
    }
}
impl From<ManifestError> for VerifyPatchError {
    fn from(e: ManifestError) -> Self {
        VerifyPatchError::Manifest(e)
    }
}

/// Apply `patch_script` over a copy of `reference_dir` (a plain directory
/// snapshot, already unpacked) staged at `work_dir`, then check the result
/// against `<name>.info`'s recorded hashes. On any mismatch the caller is
/// expected to rename the offending patch to `.broken` so a subsequent
/// rebuild attempt notices; that rename is the build orchestrator's job,
/// not this function's.
pub fn verify_patch<R: BufRead>(
    patch_script: R,
    reference_dir: &Path,
    work_dir: &Path,
) -> Result<(), VerifyPatchError> {
    copy_dir(reference_dir, work_dir)?;
    crate::patch::apply_script(patch_script, work_dir)?;

    let manifest_path = find_manifest(work_dir)?;
    let manifest = Manifest::parse(io::BufReader::new(fs::File::open(&manifest_path)?))?;
    manifest.check(work_dir)?;
    Ok(())
}

fn find_manifest(dir: &Path) -> Result<std::path::PathBuf, VerifyPatchError> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("info") {
            return Ok(path);
        }
    }
    Err(VerifyPatchError::MissingManifest)
}

fn copy_dir(src: &Path, dest: &Path) -> io::Result<()> {
    fs::create_dir_all(dest)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let dest_path = dest.join(entry.file_name());
        fs::copy(entry.path(), dest_path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn manifest_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("daily.hdb"), "aaaaaaaaaaaaaaaa:1:A\n").unwrap();

        let manifest = Manifest::build(
            "ClamAV-VDB:03 Jan 2025 12-00 +0000:27001:1:90".to_owned(),
            dir.path(),
            &["daily.hdb".to_owned()],
        )
        .unwrap();

        let mut bytes = Vec::new();
        manifest.write(&mut bytes).unwrap();
        let parsed = Manifest::parse(Cursor::new(bytes)).unwrap();
        assert_eq!(parsed, manifest);
    }

    #[test]
    fn check_detects_hash_mismatch() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("daily.hdb"), "aaaaaaaaaaaaaaaa:1:A\n").unwrap();
        let manifest = Manifest::build(
            "ClamAV-VDB:x:1:1:90".to_owned(),
            dir.path(),
            &["daily.hdb".to_owned()],
        )
        .unwrap();

        fs::write(dir.path().join("daily.hdb"), "changed\n").unwrap();
        let err = manifest.check(dir.path()).unwrap_err();
        assert!(matches!(err, ManifestError::Mismatch { .. }));
    }

    #[test]
    fn verify_patch_succeeds_when_result_matches_manifest() {
        let reference = tempfile::tempdir().unwrap();
        fs::write(reference.path().join("daily.hdb"), "aaaaaaaaaaaaaaaa:1:A\n").unwrap();

        let work = tempfile::tempdir().unwrap();
        let script = "OPEN daily.hdb\nADD bbbbbbbbbbbbbbbb:2:B\nCLOSE\n";

        // Build the manifest against what the patch is expected to produce.
        let post_patch = tempfile::tempdir().unwrap();
        fs::write(
            post_patch.path().join("daily.hdb"),
            "aaaaaaaaaaaaaaaa:1:A\nbbbbbbbbbbbbbbbb:2:B\n",
        )
        .unwrap();
        let manifest = Manifest::build(
            "ClamAV-VDB:x:2:2:90".to_owned(),
            post_patch.path(),
            &["daily.hdb".to_owned()],
        )
        .unwrap();
        let mut manifest_bytes = Vec::new();
        manifest.write(&mut manifest_bytes).unwrap();
        fs::write(reference.path().join("daily.info"), manifest_bytes).unwrap();

        verify_patch(Cursor::new(script), reference.path(), work.path().join("staged").as_path()).unwrap();
    }
}
