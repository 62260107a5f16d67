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

//! The line-oriented diff engine that produces a [`crate::patch::Command`]
//! sequence from two directory snapshots. Grounded directly on `compare()`
//! and `diffdirs()` in `sigtool/sigtool.c`: a bounded look-ahead scan rather
//! than a general LCS, because signature-database updates interleave small
//! deletions among long stable regions and fifty lines bounds the
//! worst-case quadratic behaviour a general diff would risk.

use crate::config::MAX_DEL_LOOKAHEAD;
use crate::hash::Md5Digest;
use crate::patch::{Command, line_key};
use std::{fs, io, path::Path};

/// Errors encountered diffing two directories.
#[derive(Debug)]
pub enum DiffError {
    Io(io::Error),
}
crate::errors::error_enum!(DiffError);

impl From<io::Error> for DiffError {
    fn from(e: io::Error) -> Self {
        DiffError::Io(e)
    }
}

/// Knobs on [`diff_dirs`] that don't change the default `diffdirs()`
/// behaviour unless explicitly turned on.
#[derive(Clone, Debug, Default)]
pub struct DiffOptions {
    /// Emit `UNLINK <name>` for files present in `old_dir` but absent from
    /// `new_dir`. Off by default: the original diff tool silently drops
    /// them, carrying them forward only as an unapplied artifact in
    /// `old_dir`.
    pub emit_unlink: bool,
}

/// Diff two database directories into a single flat [`Command`] sequence,
/// one `OPEN ... CLOSE` run per changed file, in sorted filename order.
/// Files whose content hash is unchanged are skipped entirely, files only
/// in `new_dir` are treated as wholly new (all `ADD`), and — unless
/// `options.emit_unlink` is set — files only in `old_dir` are ignored.
pub fn diff_dirs(old_dir: &Path, new_dir: &Path, options: &DiffOptions) -> Result<Vec<Command>, DiffError> {
    let mut commands = Vec::new();

    let mut new_names: Vec<String> = fs::read_dir(new_dir)?
        .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
        .collect::<Result<_, _>>()?;
    new_names.sort();

    for name in &new_names {
        let new_path = new_dir.join(name);
        let old_path = old_dir.join(name);
        if let Some(file_commands) = diff_file(&old_path, &new_path, name)? {
            commands.extend(file_commands);
        }
    }

    if options.emit_unlink {
        let mut old_names: Vec<String> = fs::read_dir(old_dir)?
            .map(|e| e.map(|e| e.file_name().to_string_lossy().into_owned()))
            .collect::<Result<_, _>>()?;
        old_names.sort();
        for name in old_names {
            if !new_names.contains(&name) {
                commands.push(Command::Unlink { name });
            }
        }
    }

    Ok(commands)
}

/// Diff a single file pair. Returns `None` if the files are byte-identical
/// (by hash) and nothing should be emitted for them.
fn diff_file(old_path: &Path, new_path: &Path, name: &str) -> Result<Option<Vec<Command>>, DiffError> {
    let old_exists = old_path.is_file();

    if old_exists {
        let old_hash = Md5Digest::of_file(old_path).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;
        let new_hash = Md5Digest::of_file(new_path).map_err(|_| io::Error::from(io::ErrorKind::InvalidData))?;
        if old_hash == new_hash {
            return Ok(None);
        }
    }

    let new_lines: Vec<String> = fs::read_to_string(new_path)?.lines().map(str::to_owned).collect();
    let old_lines: Vec<String> = if old_exists {
        fs::read_to_string(old_path)?.lines().map(str::to_owned).collect()
    } else {
        Vec::new()
    };

    let mut commands = vec![Command::Open { name: name.to_owned() }];
    commands.extend(diff_lines(&old_lines, &new_lines));
    commands.push(Command::Close);
    Ok(Some(commands))
}

/// The bounded look-ahead line diff itself, independent of file I/O so it
/// can be exercised directly in tests.
pub fn diff_lines(old_lines: &[String], new_lines: &[String]) -> Vec<Command> {
    let mut commands = Vec::new();
    let mut o = 0usize;
    let mut n = 0usize;

    while n < new_lines.len() {
        if o >= old_lines.len() {
            commands.push(Command::Add { line: new_lines[n].clone() });
            n += 1;
            continue;
        }

        if old_lines[o] == new_lines[n] {
            o += 1;
            n += 1;
            continue;
        }

        let lookahead_end = (o + 1 + MAX_DEL_LOOKAHEAD).min(old_lines.len());
        let found = ((o + 1)..lookahead_end).find(|&j| old_lines[j] == new_lines[n]);

        match found {
            Some(j) => {
                let skip = j - o;
                for (i, line) in old_lines[o..j].iter().enumerate() {
                    commands.push(Command::Del {
                        old_line: (o + i + 1) as u32,
                        key: line_key(line),
                    });
                }
                o += skip + 1;
                n += 1;
            }
            None => {
                commands.push(Command::Xchg {
                    old_line: (o + 1) as u32,
                    key: line_key(&old_lines[o]),
                    new_line: new_lines[n].clone(),
                });
                o += 1;
                n += 1;
            }
        }
    }

    for (i, line) in old_lines[o..].iter().enumerate() {
        commands.push(Command::Del {
            old_line: (o + i + 1) as u32,
            key: line_key(line),
        });
    }

    commands
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lines(s: &[&str]) -> Vec<String> {
        s.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn identical_lines_emit_nothing() {
        let old = lines(&["aaaaaaaaaaaaaaaa:1:A", "bbbbbbbbbbbbbbbb:2:B"]);
        let new = old.clone();
        assert!(diff_lines(&old, &new).is_empty());
    }

    #[test]
    fn single_mismatch_emits_xchg() {
        let old = lines(&["aaaaaaaaaaaaaaaa:1:A"]);
        let new = lines(&["aaaaaaaaaaaaaaaa:1:A2"]);
        let commands = diff_lines(&old, &new);
        assert_eq!(
            commands,
            vec![Command::Xchg {
                old_line: 1,
                key: line_key(&old[0]),
                new_line: new[0].clone(),
            }]
        );
    }

    #[test]
    fn deleted_lines_within_lookahead_emit_del_and_resync() {
        let old = lines(&[
            "aaaaaaaaaaaaaaaa:1:A",
            "bbbbbbbbbbbbbbbb:2:B",
            "cccccccccccccccc:3:C",
        ]);
        let new = lines(&["aaaaaaaaaaaaaaaa:1:A", "cccccccccccccccc:3:C"]);
        let commands = diff_lines(&old, &new);
        assert_eq!(
            commands,
            vec![Command::Del {
                old_line: 2,
                key: line_key(&old[1]),
            }]
        );
    }

    #[test]
    fn beyond_lookahead_falls_back_to_xchg() {
        let mut old = vec!["HEAD".to_string()];
        old.extend((0..(MAX_DEL_LOOKAHEAD + 5)).map(|i| format!("filler-{i}")));
        let new = lines(&["HEAD-changed"]);
        let mut new_full = vec![new[0].clone()];
        new_full.extend(old[1..].iter().cloned());

        let commands = diff_lines(&old, &new_full);
        assert_eq!(
            commands[0],
            Command::Xchg {
                old_line: 1,
                key: line_key(&old[0]),
                new_line: new_full[0].clone(),
            }
        );
    }

    #[test]
    fn trailing_old_lines_emit_del() {
        let old = lines(&["aaaaaaaaaaaaaaaa:1:A", "bbbbbbbbbbbbbbbb:2:B"]);
        let new = lines(&["aaaaaaaaaaaaaaaa:1:A"]);
        let commands = diff_lines(&old, &new);
        assert_eq!(
            commands,
            vec![Command::Del {
                old_line: 2,
                key: line_key(&old[1]),
            }]
        );
    }

    #[test]
    fn new_only_file_is_all_adds() {
        let old: Vec<String> = Vec::new();
        let new = lines(&["aaaaaaaaaaaaaaaa:1:A", "bbbbbbbbbbbbbbbb:2:B"]);
        let commands = diff_lines(&old, &new);
        assert_eq!(
            commands,
            vec![
                Command::Add { line: new[0].clone() },
                Command::Add { line: new[1].clone() },
            ]
        );
    }

    #[test]
    fn diff_dirs_skips_identical_files_and_diffs_changed_ones() {
        let old_dir = tempfile::tempdir().unwrap();
        let new_dir = tempfile::tempdir().unwrap();

        fs::write(old_dir.path().join("daily.hdb"), "aaaaaaaaaaaaaaaa:1:A\n").unwrap();
        fs::write(new_dir.path().join("daily.hdb"), "aaaaaaaaaaaaaaaa:1:A\n").unwrap();

        fs::write(old_dir.path().join("main.hdb"), "bbbbbbbbbbbbbbbb:1:B\n").unwrap();
        fs::write(new_dir.path().join("main.hdb"), "bbbbbbbbbbbbbbbb:1:B2\n").unwrap();

        let commands = diff_dirs(old_dir.path(), new_dir.path(), &DiffOptions::default()).unwrap();
        assert_eq!(
            commands,
            vec![
                Command::Open { name: "main.hdb".to_owned() },
                Command::Xchg {
                    old_line: 1,
                    key: line_key("bbbbbbbbbbbbbbbb:1:B"),
                    new_line: "bbbbbbbbbbbbbbbb:1:B2".to_owned(),
                },
                Command::Close,
            ]
        );
    }
}
