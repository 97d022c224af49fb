//! Decides whether a row renders without its own author header.

use chrono::TimeDelta;

use crate::message::Message;

pub const DEFAULT_CONDENSE_THRESHOLD_SECS: i64 = 5 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Condensation {
    pub condensed: bool,
    /// Whole seconds since the previous row; zero unless `condensed`.
    pub offset: TimeDelta,
}

impl Condensation {
    pub fn standalone() -> Self {
        Self {
            condensed: false,
            offset: TimeDelta::zero(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CondensePolicy {
    threshold: TimeDelta,
}

impl Default for CondensePolicy {
    fn default() -> Self {
        Self::new(TimeDelta::seconds(DEFAULT_CONDENSE_THRESHOLD_SECS))
    }
}

impl CondensePolicy {
    pub fn new(threshold: TimeDelta) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> TimeDelta {
        self.threshold
    }

    pub fn evaluate(&self, previous: Option<&Message>, candidate: &Message) -> Condensation {
        let Some(previous) = previous else {
            return Condensation::standalone();
        };
        if previous.author_id != candidate.author_id {
            return Condensation::standalone();
        }

        let gap = candidate.timestamp - previous.timestamp;
        if gap >= self.threshold {
            return Condensation::standalone();
        }

        Condensation {
            condensed: true,
            offset: ceil_to_seconds(gap),
        }
    }
}

fn ceil_to_seconds(delta: TimeDelta) -> TimeDelta {
    let seconds = delta.num_seconds();
    if delta.subsec_nanos() > 0 {
        TimeDelta::seconds(seconds + 1)
    } else {
        TimeDelta::seconds(seconds)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use shared::domain::{ChannelId, UserId};

    use super::*;

    fn at(author: i64, millis: i64) -> Message {
        let base = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Message::local(
            ChannelId(1),
            UserId(author),
            "text",
            base + TimeDelta::milliseconds(millis),
        )
    }

    #[test]
    fn first_row_is_never_condensed() {
        let policy = CondensePolicy::default();
        assert_eq!(policy.evaluate(None, &at(1, 0)), Condensation::standalone());
    }

    #[test]
    fn same_author_within_threshold_condenses_with_ceiled_offset() {
        let policy = CondensePolicy::default();
        let result = policy.evaluate(Some(&at(1, 0)), &at(1, 60_250));
        assert!(result.condensed);
        assert_eq!(result.offset, TimeDelta::seconds(61));
    }

    #[test]
    fn different_author_or_large_gap_breaks_the_group() {
        let policy = CondensePolicy::default();
        assert!(!policy.evaluate(Some(&at(1, 0)), &at(2, 1_000)).condensed);
        assert!(!policy.evaluate(Some(&at(1, 0)), &at(1, 300_000)).condensed);
        assert!(policy.evaluate(Some(&at(1, 0)), &at(1, 299_999)).condensed);
    }
}
