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

//! The PatchScript command language: `OPEN`/`ADD`/`DEL`/`XCHG`/`CLOSE`/
//! `UNLINK` over line-keyed signature-database text files. Grounded on
//! `script2cdiff`/`cdiff_apply` in `sigtool/sigtool.c`'s script handling,
//! but with a `pest` grammar per command line rather than the original's
//! `strtok`-based tokenizing, following the `control::paragraph` module's
//! use of `pest` for its own line-oriented grammar.

mod grammar {
    #![allow(missing_docs)]
    #[derive(pest_derive::Parser)]
    #[grammar = "patch/grammar.pest"]
    pub struct PatchParser;
}

use grammar::{PatchParser, Rule};
use pest::Parser;
use std::{
    fs, io,
    io::{BufRead, Write},
    path::{Path, PathBuf},
};

/// A single PatchScript command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Command {
    Open { name: String },
    Add { line: String },
    Del { old_line: u32, key: String },
    Xchg { old_line: u32, key: String, new_line: String },
    Close,
    Unlink { name: String },
}

/// Errors encountered parsing or applying a PatchScript.
#[derive(Debug)]
pub enum PatchError {
    Io(io::Error),
    /// A line didn't match any command's grammar.
    Syntax(String),
    /// `<name>` contained `/` or wasn't an allowed database filename.
    ForbiddenName(String),
    /// A command other than `OPEN` arrived with no file open, or `OPEN`
    /// arrived while one already was.
    UnbalancedOpen,
    /// `DEL`/`XCHG` referenced a line number outside the open file's range.
    LineOutOfRange(u32),
    /// `DEL`/`XCHG`'s key didn't match the addressed line's leading key.
    KeyAssertionFailed { expected: String, found: String },
    /// The script ended with a file still open.
    UnterminatedOpen,
}
crate::errors::error_enum!(PatchError);

impl From<io::Error> for PatchError {
    fn from(e: io::Error) -> Self {
        PatchError::Io(e)
    }
}

/// Database filenames the PatchScript commands are allowed to name, per the
/// fixed set of signature-database extensions plus `COPYING`.
pub fn is_allowed_name(name: &str) -> bool {
    if name.contains('/') {
        return false;
    }
    if name == "COPYING" {
        return true;
    }
    let Some((stem, ext)) = name.split_once('.') else {
        return false;
    };
    if stem != "main" && stem != "daily" {
        return false;
    }
    matches!(
        ext,
        "db" | "fp" | "hdb" | "mdb" | "ndb" | "pdb" | "rmd" | "zmd" | "sdb" | "cfg" | "wdb" | "info"
    )
}

/// The first 16 bytes of `line`, truncated at the first space, used as the
/// drift-detection key for `DEL`/`XCHG`.
pub fn line_key(line: &str) -> String {
    let truncated = line.split(' ').next().unwrap_or("");
    truncated.chars().take(16).collect()
}

/// The grammar's `integer` rule only guarantees `ASCII_DIGIT+`, not that it
/// fits in a `u32` — a script line like `DEL 99999999999 key` parses as a
/// command but must fail here rather than abort the process.
fn parse_line_number(digits: &str, line: &str) -> Result<u32, PatchError> {
    digits.parse().map_err(|_| PatchError::Syntax(line.to_owned()))
}

fn parse_line(line: &str) -> Result<Command, PatchError> {
    let mut pairs = PatchParser::parse(Rule::script_line, line)
        .map_err(|e| PatchError::Syntax(e.to_string()))?;
    let script_line = pairs.next().ok_or_else(|| PatchError::Syntax(line.to_owned()))?;
    let command = script_line
        .into_inner()
        .next()
        .ok_or_else(|| PatchError::Syntax(line.to_owned()))?;

    match command.as_rule() {
        Rule::open_cmd => {
            let name = command.into_inner().next().unwrap().as_str().to_owned();
            Ok(Command::Open { name })
        }
        Rule::add_cmd => {
            let text = command.into_inner().next().unwrap().as_str().to_owned();
            Ok(Command::Add { line: text })
        }
        Rule::del_cmd => {
            let mut inner = command.into_inner();
            let old_line = parse_line_number(inner.next().unwrap().as_str(), line)?;
            let key = inner.next().unwrap().as_str().to_owned();
            Ok(Command::Del { old_line, key })
        }
        Rule::xchg_cmd => {
            let mut inner = command.into_inner();
            let old_line = parse_line_number(inner.next().unwrap().as_str(), line)?;
            let key = inner.next().unwrap().as_str().to_owned();
            let new_line = inner.next().unwrap().as_str().to_owned();
            Ok(Command::Xchg {
                old_line,
                key,
                new_line,
            })
        }
        Rule::close_cmd => Ok(Command::Close),
        Rule::unlink_cmd => {
            let name = command.into_inner().next().unwrap().as_str().to_owned();
            Ok(Command::Unlink { name })
        }
        _ => Err(PatchError::Syntax(line.to_owned())),
    }
}

/// Parse a PatchScript, validating each command's syntax (and, for
/// `OPEN`/`UNLINK`, that `<name>` is an allowed database filename) as it's
/// read. Lazy: commands are yielded one at a time rather than collected.
pub fn parse_script<R: BufRead>(reader: R) -> impl Iterator<Item = Result<Command, PatchError>> {
    reader.lines().filter_map(|line| {
        let line = match line {
            Ok(l) => l,
            Err(e) => return Some(Err(PatchError::from(e))),
        };
        if line.is_empty() {
            return None;
        }
        Some(parse_line(&line).and_then(|cmd| {
            let name = match &cmd {
                Command::Open { name } | Command::Unlink { name } => Some(name),
                _ => None,
            };
            if let Some(name) = name {
                if !is_allowed_name(name) {
                    return Err(PatchError::ForbiddenName(name.clone()));
                }
            }
            Ok(cmd)
        }))
    })
}

struct OpenFile {
    name: String,
    lines: Vec<Option<String>>,
    appended: Vec<String>,
}

/// Apply a PatchScript, read command-by-command from `reader`, against the
/// files in `directory`.
///
/// Each `CLOSE` commits its file atomically (write to a sibling tempfile,
/// then rename); the script as a whole is not transactional across files.
/// Mirrors the `OPEN`/`DEL`/`XCHG`/`ADD`/`CLOSE` state machine in
/// `sigtool.c`'s patch application, generalized from its hardcoded
/// `main.*`/`daily.*` handling to any allowed database filename.
pub fn apply_script<R: BufRead>(reader: R, directory: &Path) -> Result<(), PatchError> {
    let mut open: Option<OpenFile> = None;

    for command in parse_script(reader) {
        let command = command?;
        match command {
            Command::Open { name } => {
                if open.is_some() {
                    return Err(PatchError::UnbalancedOpen);
                }
                let path = directory.join(&name);
                let contents = fs::read_to_string(&path)?;
                let lines = contents.lines().map(|l| Some(l.to_owned())).collect();
                open = Some(OpenFile {
                    name,
                    lines,
                    appended: Vec::new(),
                });
            }
            Command::Add { line } => {
                let file = open.as_mut().ok_or(PatchError::UnbalancedOpen)?;
                file.appended.push(line);
            }
            Command::Del { old_line, key } => {
                let file = open.as_mut().ok_or(PatchError::UnbalancedOpen)?;
                assert_and_clear(file, old_line, &key)?;
            }
            Command::Xchg {
                old_line,
                key,
                new_line,
            } => {
                let file = open.as_mut().ok_or(PatchError::UnbalancedOpen)?;
                let idx = line_index(file, old_line)?;
                let current = file.lines[idx].as_deref().unwrap_or("");
                check_key(current, &key)?;
                file.lines[idx] = Some(new_line);
            }
            Command::Close => {
                let file = open.take().ok_or(PatchError::UnbalancedOpen)?;
                commit(directory, &file)?;
            }
            Command::Unlink { name } => {
                let path = directory.join(&name);
                if path.exists() {
                    fs::remove_file(path)?;
                }
            }
        }
    }

    if open.is_some() {
        return Err(PatchError::UnterminatedOpen);
    }

    Ok(())
}

fn line_index(file: &OpenFile, old_line: u32) -> Result<usize, PatchError> {
    let idx = old_line
        .checked_sub(1)
        .ok_or(PatchError::LineOutOfRange(old_line))? as usize;
    if idx >= file.lines.len() {
        return Err(PatchError::LineOutOfRange(old_line));
    }
    Ok(idx)
}

fn check_key(line: &str, expected: &str) -> Result<(), PatchError> {
    let found = line_key(line);
    if found != expected {
        return Err(PatchError::KeyAssertionFailed {
            expected: expected.to_owned(),
            found,
        });
    }
    Ok(())
}

fn assert_and_clear(file: &mut OpenFile, old_line: u32, key: &str) -> Result<(), PatchError> {
    let idx = line_index(file, old_line)?;
    let current = file.lines[idx]
        .as_deref()
        .ok_or(PatchError::LineOutOfRange(old_line))?;
    check_key(current, key)?;
    file.lines[idx] = None;
    Ok(())
}

fn commit(directory: &Path, file: &OpenFile) -> Result<(), PatchError> {
    let path = directory.join(&file.name);
    let tmp_path: PathBuf = path.with_extension(format!(
        "{}.tmp",
        path.extension().and_then(|e| e.to_str()).unwrap_or("new")
    ));

    {
        let mut tmp = fs::File::create(&tmp_path)?;
        for line in file.lines.iter().flatten() {
            writeln!(tmp, "{line}")?;
        }
        for line in &file.appended {
            writeln!(tmp, "{line}")?;
        }
        tmp.sync_all()?;
    }

    fs::rename(&tmp_path, &path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn rejects_names_with_slash() {
        assert!(!is_allowed_name("../etc/passwd"));
    }

    #[test]
    fn accepts_copying_and_database_names() {
        assert!(is_allowed_name("COPYING"));
        assert!(is_allowed_name("main.hdb"));
        assert!(is_allowed_name("daily.info"));
        assert!(!is_allowed_name("daily.exe"));
    }

    #[test]
    fn key_truncates_at_16_bytes_or_first_space() {
        assert_eq!(line_key("Sig.Name:1:*:deadbeef"), "Sig.Name:1:*:dea");
        assert_eq!(line_key("short with spaces"), "short");
    }

    #[test]
    fn parses_each_command_kind() {
        let script = "OPEN daily.hdb\nADD deadbeef:10:Trojan.Foo\nDEL 3 deadbeef:10:Trojan\nXCHG 4 deadbeef:11 deadbeef:11:Trojan.Bar\nCLOSE\nUNLINK main.cfg\n";
        let commands: Vec<_> = parse_script(Cursor::new(script))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(
            commands,
            vec![
                Command::Open {
                    name: "daily.hdb".to_owned()
                },
                Command::Add {
                    line: "deadbeef:10:Trojan.Foo".to_owned()
                },
                Command::Del {
                    old_line: 3,
                    key: "deadbeef:10:Trojan".to_owned()
                },
                Command::Xchg {
                    old_line: 4,
                    key: "deadbeef:11".to_owned(),
                    new_line: "deadbeef:11:Trojan.Bar".to_owned()
                },
                Command::Close,
                Command::Unlink {
                    name: "main.cfg".to_owned()
                },
            ]
        );
    }

    #[test]
    fn del_with_line_number_overflowing_u32_is_a_syntax_error_not_a_panic() {
        let script = "OPEN daily.hdb\nDEL 99999999999 deadbeef:1\nCLOSE\n";
        let commands: Result<Vec<_>, _> = parse_script(Cursor::new(script)).collect();
        assert!(matches!(commands, Err(PatchError::Syntax(_))));
    }

    #[test]
    fn apply_rejects_unbalanced_open() {
        let dir = tempfile::tempdir().unwrap();
        let script = "ADD deadbeef:1:Trojan.Foo\n";
        let err = apply_script(Cursor::new(script), dir.path()).unwrap_err();
        assert!(matches!(err, PatchError::UnbalancedOpen));
    }

    #[test]
    fn apply_round_trips_add_del_xchg_close() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("daily.hdb"),
            "aaaaaaaaaaaaaaaa:1:A\nbbbbbbbbbbbbbbbb:2:B\ncccccccccccccccc:3:C\n",
        )
        .unwrap();

        let script = "OPEN daily.hdb\nDEL 2 bbbbbbbbbbbbbbbb:2\nXCHG 3 cccccccccccccccc:3 cccccccccccccccc:3:Updated\nADD dddddddddddddddd:4:D\nCLOSE\n";
        apply_script(Cursor::new(script), dir.path()).unwrap();

        let result = fs::read_to_string(dir.path().join("daily.hdb")).unwrap();
        assert_eq!(
            result,
            "aaaaaaaaaaaaaaaa:1:A\ncccccccccccccccc:3:Updated\ndddddddddddddddd:4:D\n"
        );
    }

    #[test]
    fn apply_detects_key_drift() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("daily.hdb"), "aaaaaaaaaaaaaaaa:1:A\n").unwrap();

        let script = "OPEN daily.hdb\nDEL 1 zzzzzzzzzzzzzzzz:9\nCLOSE\n";
        let err = apply_script(Cursor::new(script), dir.path()).unwrap_err();
        assert!(matches!(err, PatchError::KeyAssertionFailed { .. }));
    }

    #[test]
    fn apply_rejects_unterminated_open() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("daily.hdb"), "aaaaaaaaaaaaaaaa:1:A\n").unwrap();

        let script = "OPEN daily.hdb\nADD bbbbbbbbbbbbbbbb:2:B\n";
        let err = apply_script(Cursor::new(script), dir.path()).unwrap_err();
        assert!(matches!(err, PatchError::UnterminatedOpen));
    }
}
