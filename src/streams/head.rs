// SPDX-License-Identifier: MPL-2.0

use std::fmt;

/// Resolved head of a stream, used as the cursor for fetching newer members.
///
/// `Skip` and `Force` are distinct states, not magic cursor values: `Skip`
/// means nothing newer is known and a poll should not refresh, `Force` means
/// fetch the newest page regardless of any cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StreamHead {
    #[default]
    Skip,
    Force,
    /// `indexed_at` of the newest cached member
    Since(i64),
}

impl StreamHead {
    /// Whether a poll holding this head should reach out to Nexus.
    pub fn wants_fetch(self) -> bool {
        !matches!(self, StreamHead::Skip)
    }
}

impl fmt::Display for StreamHead {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StreamHead::Skip => f.write_str("skip"),
            StreamHead::Force => f.write_str("force"),
            StreamHead::Since(cursor) => write!(f, "since {cursor}"),
        }
    }
}
