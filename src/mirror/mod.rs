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

//! The mirror reputation store: a flat file of fixed-width binary rows
//! tracking per-mirror success/failure counts and a temporary ignore latch.
//! Grounded on `mirman_read`/`mirman_check`/`mirman_update`/`mirman_write`
//! in `freshclam/mirman.c`. Row encode/decode uses `binrw`, following
//! `cascette_client_storage::index::IndexEntry`'s pattern for a fixed-size
//! packed record, since the teacher repo has no binary-format precedent of
//! its own.

use binrw::{BinRead, BinWrite};
use std::{
    fs,
    io::Cursor,
    net::Ipv4Addr,
    path::{Path, PathBuf},
    time::{Duration, SystemTime, UNIX_EPOCH},
};

/// One fixed-width row: IPv4 address, last-access time, success/failure
/// counts, ignore flag, engine level at last attempt, and reserved padding.
#[derive(Clone, Copy, Debug, PartialEq, Eq, BinRead, BinWrite)]
#[brw(big)]
pub struct MirrorRecord {
    /// Network byte order is preserved by treating the address as a plain
    /// 4-byte big-endian integer, matching `struct in_addr` on the wire.
    pub ip: u32,
    pub atime: u32,
    pub succ: u32,
    pub fail: u32,
    pub ignore: u8,
    pub engine_level: u32,
    pub reserved: [u8; 16],
}

pub const RECORD_LEN: usize = 4 + 4 + 4 + 4 + 1 + 4 + 16;

impl MirrorRecord {
    fn fresh(ip: Ipv4Addr, atime: u32) -> Self {
        MirrorRecord {
            ip: u32::from(ip),
            atime,
            succ: 0,
            fail: 0,
            ignore: 0,
            engine_level: 0,
            reserved: [0xff; 16],
        }
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.ip)
    }
}

/// Errors encountered loading, checking, or writing the store.
#[derive(Debug)]
pub enum MirrorError {
    Io(std::io::Error),
    Codec(binrw::Error),
}
crate::errors::error_enum!(MirrorError);

impl From<std::io::Error> for MirrorError {
    fn from(e: std::io::Error) -> Self {
        MirrorError::Io(e)
    }
}
impl From<binrw::Error> for MirrorError {
    fn from(e: binrw::Error) -> Self {
        MirrorError::Codec(e)
    }
}

/// Outcome of [`MirrorStore::check`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MirrorStatus {
    Ok,
    /// Latched ignore, still within the ignore window.
    Ignore,
    /// The mirror last served a database too far ahead of the local engine
    /// level, recently enough that it's worth temporarily avoiding.
    EngineOutdated,
    /// The store is inactive (loaded with `active = false`): every
    /// operation is a no-op.
    Unknown,
}

/// A loaded mirror reputation file, mutated in memory and flushed on
/// [`MirrorStore::write`].
pub struct MirrorStore {
    records: Vec<MirrorRecord>,
    active: bool,
    config: crate::config::MirrorStoreConfig,
}

impl MirrorStore {
    /// Load `path`. A partial trailing row (file size not a multiple of
    /// [`RECORD_LEN`]) is treated as corruption: the file is deleted and an
    /// empty store is returned, mirroring `mirman_read`'s preference for
    /// starting fresh over trusting a truncated record.
    pub fn load(path: &Path, active: bool, config: crate::config::MirrorStoreConfig) -> Result<Self, MirrorError> {
        if !path.exists() {
            return Ok(MirrorStore {
                records: Vec::new(),
                active,
                config,
            });
        }

        let bytes = fs::read(path)?;
        if bytes.len() % RECORD_LEN != 0 {
            fs::remove_file(path)?;
            return Ok(MirrorStore {
                records: Vec::new(),
                active,
                config,
            });
        }

        let mut records = Vec::with_capacity(bytes.len() / RECORD_LEN);
        let mut cursor = Cursor::new(&bytes);
        while (cursor.position() as usize) < bytes.len() {
            records.push(MirrorRecord::read(&mut cursor)?);
        }

        Ok(MirrorStore {
            records,
            active,
            config,
        })
    }

    /// Truncate `path` and rewrite every row.
    pub fn write(&self, path: &Path) -> Result<(), MirrorError> {
        let mut bytes = Vec::with_capacity(self.records.len() * RECORD_LEN);
        let mut cursor = Cursor::new(&mut bytes);
        for record in &self.records {
            record.write(&mut cursor)?;
        }
        fs::write(path, bytes)?;
        Ok(())
    }

    fn find(&self, ip: Ipv4Addr) -> Option<usize> {
        let target = u32::from(ip);
        self.records.iter().position(|r| r.ip == target)
    }

    /// Check a mirror's current reputation as of `now`.
    pub fn check(&mut self, ip: Ipv4Addr, local_engine_level: u32, now: SystemTime) -> MirrorStatus {
        if !self.active {
            return MirrorStatus::Unknown;
        }

        let Some(idx) = self.find(ip) else {
            return MirrorStatus::Ok;
        };

        let now_secs = to_epoch_secs(now);
        let record = &mut self.records[idx];

        if record.ignore != 0 {
            let elapsed = now_secs.saturating_sub(record.atime as u64);
            if elapsed <= self.config.ignore_window.as_secs() {
                return MirrorStatus::Ignore;
            }
            record.ignore = 0;
            return MirrorStatus::Ok;
        }

        let slack = self.config.engine_outdated_slack;
        let window = self.config.engine_outdated_window.as_secs();
        if record.engine_level > local_engine_level + slack {
            let elapsed = now_secs.saturating_sub(record.atime as u64);
            if elapsed <= window {
                return MirrorStatus::EngineOutdated;
            }
        }

        MirrorStatus::Ok
    }

    /// Record the outcome of an attempt against `ip`. `broken` marks a
    /// failure that should latch `ignore` once the failure threshold is
    /// reached; a fresh record is appended if none existed.
    pub fn update(&mut self, ip: Ipv4Addr, broken: bool, engine_level: u32, now: SystemTime) {
        if !self.active {
            return;
        }

        let now_secs = to_epoch_secs(now) as u32;
        let threshold = self.config.failure_threshold;

        match self.find(ip) {
            Some(idx) => {
                let record = &mut self.records[idx];
                record.atime = now_secs;
                record.engine_level = engine_level;
                if broken {
                    record.fail += 1;
                } else {
                    record.succ += 1;
                    record.fail = 0;
                }
                record.ignore = if record.fail < threshold { 0 } else { 1 };
            }
            None => {
                let mut record = MirrorRecord::fresh(ip, now_secs);
                record.engine_level = engine_level;
                if broken {
                    record.fail = 1;
                } else {
                    record.succ = 1;
                }
                self.records.push(record);
            }
        }
    }

    /// All currently known records, for reporting (`mirman_list`).
    pub fn list(&self) -> &[MirrorRecord] {
        &self.records
    }
}

fn to_epoch_secs(t: SystemTime) -> u64 {
    t.duration_since(UNIX_EPOCH).unwrap_or(Duration::ZERO).as_secs()
}

/// Default path a mirror reputation file is stored at, relative to a
/// database directory.
pub fn default_path(db_dir: &Path) -> PathBuf {
    db_dir.join("mirrors.dat")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ip(a: u8, b: u8, c: u8, d: u8) -> Ipv4Addr {
        Ipv4Addr::new(a, b, c, d)
    }

    #[test]
    fn three_failures_latch_ignore_and_expire_after_window() {
        let config = crate::config::MirrorStoreConfig::default();
        let mut store = MirrorStore {
            records: Vec::new(),
            active: true,
            config,
        };

        let t0 = UNIX_EPOCH;
        for _ in 0..3 {
            store.update(ip(1, 2, 3, 4), true, 90, t0);
        }

        let one_hour_later = t0 + Duration::from_secs(3600);
        assert_eq!(store.check(ip(1, 2, 3, 4), 90, one_hour_later), MirrorStatus::Ignore);

        let past_window = t0 + Duration::from_secs(3 * 86400 + 1);
        assert_eq!(store.check(ip(1, 2, 3, 4), 90, past_window), MirrorStatus::Ok);
        assert_eq!(store.records[0].ignore, 0);
    }

    #[test]
    fn single_failure_does_not_latch() {
        let mut store = MirrorStore {
            records: Vec::new(),
            active: true,
            config: crate::config::MirrorStoreConfig::default(),
        };
        let now = UNIX_EPOCH;
        store.update(ip(10, 0, 0, 1), true, 90, now);
        assert_eq!(store.check(ip(10, 0, 0, 1), 90, now), MirrorStatus::Ok);
    }

    #[test]
    fn engine_outdated_within_window() {
        let mut store = MirrorStore {
            records: Vec::new(),
            active: true,
            config: crate::config::MirrorStoreConfig::default(),
        };
        let now = UNIX_EPOCH;
        store.update(ip(1, 1, 1, 1), false, 100, now);
        let soon_after = now + Duration::from_secs(60);
        assert_eq!(store.check(ip(1, 1, 1, 1), 90, soon_after), MirrorStatus::EngineOutdated);

        let after_window = now + Duration::from_secs(4 * 3600 + 1);
        assert_eq!(store.check(ip(1, 1, 1, 1), 90, after_window), MirrorStatus::Ok);
    }

    #[test]
    fn inactive_store_is_always_unknown() {
        let mut store = MirrorStore {
            records: Vec::new(),
            active: false,
            config: crate::config::MirrorStoreConfig::default(),
        };
        store.update(ip(1, 1, 1, 1), true, 90, UNIX_EPOCH);
        assert_eq!(store.check(ip(1, 1, 1, 1), 90, UNIX_EPOCH), MirrorStatus::Unknown);
    }

    #[test]
    fn load_deletes_corrupt_file_and_returns_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirrors.dat");
        fs::write(&path, vec![0u8; RECORD_LEN + 3]).unwrap();

        let store = MirrorStore::load(&path, true, crate::config::MirrorStoreConfig::default()).unwrap();
        assert!(store.list().is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn write_then_load_round_trips_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("mirrors.dat");

        let mut store = MirrorStore {
            records: Vec::new(),
            active: true,
            config: crate::config::MirrorStoreConfig::default(),
        };
        store.update(ip(8, 8, 8, 8), false, 90, UNIX_EPOCH);
        store.write(&path).unwrap();

        let reloaded = MirrorStore::load(&path, true, crate::config::MirrorStoreConfig::default()).unwrap();
        assert_eq!(reloaded.list().len(), 1);
        assert_eq!(reloaded.list()[0].addr(), ip(8, 8, 8, 8));
    }
}
