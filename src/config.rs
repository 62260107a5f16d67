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

//! Implementation-defined parameters the spec allows to vary without
//! changing bundle wire compatibility: staleness/ignore windows, the
//! engine-outdated slack, the signer timeout, and the notification-hook
//! worker cap.

use std::time::Duration;

#[cfg(feature = "serde")]
use ::serde::{Deserialize, Serialize};

/// Settings consulted by [`crate::cvd::verify`] and the build orchestrator.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct VerifyConfig {
    /// A header older than this is flagged with a staleness warning.
    /// Never fatal. Default 7 days.
    pub staleness_threshold: Duration,

    /// The running engine level, used to flag an incompatibility warning
    /// when a header's engine level exceeds it. Never fatal.
    pub engine_level: u32,
}

impl Default for VerifyConfig {
    fn default() -> Self {
        VerifyConfig {
            staleness_threshold: Duration::from_secs(7 * 86400),
            engine_level: 0,
        }
    }
}

/// Settings consulted by [`crate::mirror::MirrorStore`].
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct MirrorStoreConfig {
    /// How long a latched `ignore` flag sticks before it's eligible to
    /// clear on the next [`crate::mirror::MirrorStore::check`]. `IGN_WINDOW`
    /// in the original tool. Default 3 days.
    pub ignore_window: Duration,

    /// How far ahead of the local engine level a mirror's last-served
    /// database can be before it's temporarily avoided. Default 3.
    pub engine_outdated_slack: u32,

    /// How long an `engine-outdated` avoidance decision holds before it's
    /// reconsidered. Default 4 hours.
    pub engine_outdated_window: Duration,

    /// Number of consecutive failures required before `ignore` can latch.
    /// Default 3.
    pub failure_threshold: u32,
}

impl Default for MirrorStoreConfig {
    fn default() -> Self {
        MirrorStoreConfig {
            ignore_window: Duration::from_secs(3 * 86400),
            engine_outdated_slack: 3,
            engine_outdated_window: Duration::from_secs(4 * 3600),
            failure_threshold: 3,
        }
    }
}

/// Settings consulted by the build orchestrator and the remote signer client.
#[derive(Clone, Debug, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct BuildConfig {
    /// Engine compatibility level stamped into the header of a newly built
    /// bundle.
    pub engine_level: u32,

    /// Identity string recorded in the `builder` header field.
    pub builder: String,

    /// Timeout for the round-trip to the remote signer. Default 60s.
    pub signer_timeout: Duration,

    /// Shell commands run (bounded concurrency, cap 5) after a successful
    /// build, to notify downstream systems a new version was published.
    /// Empty by default: the original fork-based hook mechanism is opt-in
    /// here, not automatic.
    pub notify_hooks: Vec<String>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        BuildConfig {
            engine_level: 0,
            builder: String::new(),
            signer_timeout: Duration::from_secs(60),
            notify_hooks: Vec::new(),
        }
    }
}

/// Bound on concurrently running notification hooks, per spec.
pub const NOTIFY_HOOK_POOL_CAP: usize = 5;

/// Bound on look-ahead lines the diff engine will scan before giving up and
/// emitting an `XCHG` instead of a run of `DEL`s.
pub const MAX_DEL_LOOKAHEAD: usize = 50;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verify_config_defaults_match_spec() {
        let c = VerifyConfig::default();
        assert_eq!(c.staleness_threshold, Duration::from_secs(7 * 86400));
    }

    #[test]
    fn mirror_config_defaults_match_spec() {
        let c = MirrorStoreConfig::default();
        assert_eq!(c.ignore_window, Duration::from_secs(3 * 86400));
        assert_eq!(c.engine_outdated_slack, 3);
        assert_eq!(c.engine_outdated_window, Duration::from_secs(4 * 3600));
        assert_eq!(c.failure_threshold, 3);
    }
}
