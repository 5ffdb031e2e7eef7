use crate::model::{ActivityStatus, Character, ResetCadence};
use time::format_description::well_known::Rfc3339;
use time::macros::time;
use time::{Duration, OffsetDateTime, Weekday};
use tracing::{debug, warn};

/// Most recent reset boundary at or before `now`.
///
/// Daily resets happen at 08:00 UTC; weekly resets at 08:00 UTC on Wednesday.
pub fn last_boundary(cadence: ResetCadence, now: OffsetDateTime) -> OffsetDateTime {
    let now = now.to_offset(time::UtcOffset::UTC);
    let mut boundary = now.replace_time(time!(08:00));

    match cadence {
        ResetCadence::Daily => {
            if now < boundary {
                boundary -= Duration::days(1);
            }
        }
        ResetCadence::Weekly => {
            let since_wed = (now.weekday().number_days_from_monday() as i64
                - Weekday::Wednesday.number_days_from_monday() as i64)
                .rem_euclid(7);
            boundary -= Duration::days(since_wed);
            if now < boundary {
                boundary -= Duration::days(7);
            }
        }
    }
    boundary
}

/// Make activities available again when a boundary passed since the last check.
/// Returns true when anything changed.
pub fn apply_resets(character: &mut Character, now: OffsetDateTime) -> bool {
    // Unknown or unparseable timestamps count as "checked now".
    let last_check = character
        .last_reset_check
        .as_deref()
        .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
        .unwrap_or(now);

    let daily = last_boundary(ResetCadence::Daily, now);
    let weekly = last_boundary(ResetCadence::Weekly, now);

    let mut modified = false;
    for activity in character.activities.values_mut() {
        let boundary = match activity.reset {
            ResetCadence::Daily => daily,
            ResetCadence::Weekly => weekly,
        };
        if last_check < boundary {
            activity.status = ActivityStatus::Available;
            modified = true;
        }
    }

    if modified || character.last_reset_check.is_none() {
        if let Some(stamp) = format_timestamp(now) {
            character.last_reset_check = Some(stamp);
        }
    }
    if modified {
        debug!(name = %character.name, "resets applied");
    }
    modified
}

/// RFC 3339 text for `t`, or `None` (logged) when `t` has no RFC 3339 form.
pub fn format_timestamp(t: OffsetDateTime) -> Option<String> {
    match t.format(&Rfc3339) {
        Ok(s) => Some(s),
        Err(e) => {
            warn!(%t, "reset timestamp not representable: {e}");
            None
        }
    }
}
