//! Identifier grammar and allocation for tasks and verification runs.
//!
//! Run ids follow `run_<yyyymmdd>_<hhmmss>_<r>` where `<r>` is six
//! lowercase alphanumerics drawn from the OS entropy source. Task ids use
//! the same shape with a `task_` prefix. The timestamp portion is UTC.

use chrono::{DateTime, NaiveDateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const SUFFIX_LEN: usize = 6;

/// Generate a random suffix of lowercase alphanumerics.
fn random_suffix() -> String {
    let mut rng = OsRng;
    (0..SUFFIX_LEN)
        .map(|_| {
            let idx = rng.gen_range(0..SUFFIX_CHARSET.len());
            SUFFIX_CHARSET[idx] as char
        })
        .collect()
}

fn timestamp_component(now: DateTime<Utc>) -> String {
    now.format("%Y%m%d_%H%M%S").to_string()
}

/// Allocate a new run id from the current UTC time.
pub fn generate_run_id() -> String {
    generate_run_id_at(Utc::now())
}

/// Allocate a run id for a specific instant (used by retention tests).
pub fn generate_run_id_at(now: DateTime<Utc>) -> String {
    format!("run_{}_{}", timestamp_component(now), random_suffix())
}

/// Allocate a new task id from the current UTC time.
pub fn generate_task_id() -> String {
    format!("task_{}_{}", timestamp_component(Utc::now()), random_suffix())
}

fn is_valid_id(value: &str, prefix: &str) -> bool {
    let Some(rest) = value.strip_prefix(prefix) else {
        return false;
    };

    let parts: Vec<&str> = rest.split('_').collect();
    if parts.len() != 3 {
        return false;
    }

    let (date, time, suffix) = (parts[0], parts[1], parts[2]);
    date.len() == 8
        && date.bytes().all(|b| b.is_ascii_digit())
        && time.len() == 6
        && time.bytes().all(|b| b.is_ascii_digit())
        && suffix.len() == SUFFIX_LEN
        && suffix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit())
}

/// Check a string against the run-id grammar `run_<8 digits>_<6 digits>_<6 lower-alnum>`.
pub fn is_valid_run_id(value: &str) -> bool {
    is_valid_id(value, "run_")
}

/// Check a string against the task-id grammar.
pub fn is_valid_task_id(value: &str) -> bool {
    is_valid_id(value, "task_")
}

/// Parse the UTC timestamp embedded in a run id.
///
/// Returns `None` when the id does not satisfy the grammar or encodes an
/// impossible date.
pub fn parse_run_id_timestamp(run_id: &str) -> Option<DateTime<Utc>> {
    if !is_valid_run_id(run_id) {
        return None;
    }
    let rest = run_id.strip_prefix("run_")?;
    let stamp = &rest[..15]; // yyyymmdd_hhmmss
    NaiveDateTime::parse_from_str(stamp, "%Y%m%d_%H%M%S")
        .ok()
        .map(|naive| naive.and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashSet;

    #[test]
    fn run_id_matches_grammar() {
        let run_id = generate_run_id();
        assert!(is_valid_run_id(&run_id), "bad run id: {run_id}");
        assert!(run_id.starts_with("run_"));
    }

    #[test]
    fn hundred_rapid_allocations_are_unique() {
        let ids: HashSet<String> = (0..100).map(|_| generate_run_id()).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn suffix_is_lowercase_alphanumeric() {
        let run_id = generate_run_id();
        let suffix = run_id.rsplit('_').next().unwrap();
        assert_eq!(suffix.len(), 6);
        assert!(suffix
            .bytes()
            .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit()));
    }

    #[test]
    fn validator_rejects_malformed_ids() {
        assert!(!is_valid_run_id("run_2024_143200_abc123"));
        assert!(!is_valid_run_id("run_20240115_143200_ABC123"));
        assert!(!is_valid_run_id("run_20240115_143200_abc12"));
        assert!(!is_valid_run_id("run_20240115_143200_abc1234"));
        assert!(!is_valid_run_id("task_20240115_143200_abc123"));
        assert!(!is_valid_run_id("run_20240115_143200"));
        assert!(!is_valid_run_id(""));
    }

    #[test]
    fn validator_accepts_known_good_id() {
        assert!(is_valid_run_id("run_20240115_143200_abc123"));
        assert!(is_valid_task_id("task_20240115_143200_x9y8z7"));
    }

    #[test]
    fn timestamp_parses_back_to_utc() {
        let instant = Utc.with_ymd_and_hms(2024, 1, 15, 14, 32, 0).unwrap();
        let run_id = generate_run_id_at(instant);
        assert_eq!(parse_run_id_timestamp(&run_id), Some(instant));
    }

    #[test]
    fn timestamp_parse_rejects_invalid() {
        assert!(parse_run_id_timestamp("run_99999999_999999_abc123").is_none());
        assert!(parse_run_id_timestamp("not-a-run-id").is_none());
    }
}
