//! Skip classification: decide whether a title is worth an inference call.

use std::fmt;

use serde::Serialize;

use crate::config::PolicyConfig;
use crate::db::{DatabaseError, ModerationLookup, ModerationStatus};
use super::source::TitleRecord;

/// Why a title was not sent to the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    Original,
    Locked,
    Hidden,
    Removed,
    Downvoted,
    /// Moderation state blocked scoring but no flag explains it.
    Unknown,
}

impl SkipReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Original => "original",
            Self::Locked => "locked",
            Self::Hidden => "hidden",
            Self::Removed => "removed",
            Self::Downvoted => "downvoted",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipDecision {
    Process,
    Skip(SkipReason),
}

/// Classify one record.
///
/// Original titles are skipped without touching the store. A key missing from
/// the store gets the benefit of the doubt and is processed.
pub fn classify(
    record: &TitleRecord,
    moderation: &dyn ModerationLookup,
    policy: &PolicyConfig,
) -> Result<SkipDecision, DatabaseError> {
    if record.original {
        return Ok(SkipDecision::Skip(SkipReason::Original));
    }

    match moderation.lookup(record.key())? {
        None => Ok(SkipDecision::Process),
        Some(status) => Ok(decide(&status, policy.downvote_floor)),
    }
}

/// Decision for a title that has moderation state.
///
/// The first matching reason wins, in the order locked, hidden, removed,
/// downvoted.
pub fn decide(status: &ModerationStatus, downvote_floor: i64) -> SkipDecision {
    let net_score = status.net_score();
    if !status.locked && !status.shadow_hidden && !status.removed && net_score > downvote_floor {
        return SkipDecision::Process;
    }

    let reason = if status.locked {
        SkipReason::Locked
    } else if status.shadow_hidden {
        SkipReason::Hidden
    } else if status.removed {
        SkipReason::Removed
    } else if net_score <= downvote_floor {
        SkipReason::Downvoted
    } else {
        SkipReason::Unknown
    };
    SkipDecision::Skip(reason)
}
