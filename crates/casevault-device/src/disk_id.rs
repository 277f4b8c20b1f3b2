//! Human-readable disk identifiers: `YYYYMM<group><seq>`

use chrono::{DateTime, Datelike, TimeZone};
use std::fmt;

/// How a disk entered the inventory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiskGroup {
    /// Initialized by an operator
    Initialized,
    /// Found by a local volume scan
    Scanned,
    /// Remote SMB share
    Remote,
}

impl DiskGroup {
    /// Letter used in the identifier
    pub const fn letter(self) -> char {
        match self {
            Self::Initialized => 'A',
            Self::Scanned => 'B',
            Self::Remote => 'C',
        }
    }
}

impl fmt::Display for DiskGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// `YYYYMM<letter>` prefix for a month
pub fn disk_id_prefix<Tz: TimeZone>(now: &DateTime<Tz>, group: DiskGroup) -> String {
    format!("{:04}{:02}{}", now.year(), now.month(), group.letter())
}

/// Format a full identifier
pub fn format_disk_id(prefix: &str, sequence: u32) -> String {
    format!("{}{:03}", prefix, sequence)
}

/// Next free identifier for `group` in the month of `now`
///
/// The sequence continues after the highest one already issued with the same
/// prefix, so a gap left by a removed disk is never reused.
pub fn next_disk_id<'a, Tz, I>(existing: I, group: DiskGroup, now: &DateTime<Tz>) -> String
where
    Tz: TimeZone,
    I: IntoIterator<Item = &'a str>,
{
    let prefix = disk_id_prefix(now, group);
    let highest = existing
        .into_iter()
        .filter_map(|id| id.strip_prefix(prefix.as_str()))
        .filter_map(|seq| seq.parse::<u32>().ok())
        .max()
        .unwrap_or(0);
    format_disk_id(&prefix, highest + 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn march_2024() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 15, 10, 0, 0).unwrap()
    }

    #[test]
    fn test_first_id_of_month() {
        let id = next_disk_id(std::iter::empty(), DiskGroup::Initialized, &march_2024());
        assert_eq!(id, "202403A001");
    }

    #[test]
    fn test_sequence_per_group_and_month() {
        let existing = ["202403A001", "202403A002", "202403B001", "202402A007"];
        let now = march_2024();
        assert_eq!(
            next_disk_id(existing.iter().copied(), DiskGroup::Initialized, &now),
            "202403A003"
        );
        assert_eq!(
            next_disk_id(existing.iter().copied(), DiskGroup::Scanned, &now),
            "202403B002"
        );
        assert_eq!(
            next_disk_id(existing.iter().copied(), DiskGroup::Remote, &now),
            "202403C001"
        );
    }

    #[test]
    fn test_gap_is_not_reused() {
        let existing = ["202403A001", "202403A005"];
        assert_eq!(
            next_disk_id(existing.iter().copied(), DiskGroup::Initialized, &march_2024()),
            "202403A006"
        );
    }
}
