use chrono::{DateTime, Utc};

/// Cell format of the ledger's Date column, e.g. `2024-03-05 08:15:00 +0000`.
pub const LEDGER_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S %z";

/// Cutoff for "new" messages: the date of the newest message already in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Watermark {
    /// Nothing recorded yet; every message is new.
    None,
    At(DateTime<Utc>),
}

impl Watermark {
    /// Used when the recorded date cannot be read; older than any message.
    pub const FLOOR: Watermark = Watermark::At(DateTime::<Utc>::MIN_UTC);

    /// Parse a Date cell written by [`format_ledger_date`].
    pub fn parse(cell: &str) -> Result<Self, chrono::ParseError> {
        let date = DateTime::parse_from_str(cell.trim(), LEDGER_DATE_FORMAT)?;
        Ok(Watermark::At(date.with_timezone(&Utc)))
    }

    /// True when `date` is strictly newer than the watermark.
    pub fn admits(&self, date: DateTime<Utc>) -> bool {
        match self {
            Watermark::None => true,
            Watermark::At(cutoff) => date > *cutoff,
        }
    }
}

pub fn format_ledger_date(date: DateTime<Utc>) -> String {
    date.format(LEDGER_DATE_FORMAT).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn parses_what_it_formats() {
        let date = Utc.with_ymd_and_hms(2024, 3, 5, 8, 15, 0).unwrap();
        let cell = format_ledger_date(date);
        assert_eq!(cell, "2024-03-05 08:15:00 +0000");
        assert_eq!(Watermark::parse(&cell).unwrap(), Watermark::At(date));
    }

    #[test]
    fn parses_non_utc_offsets() {
        let watermark = Watermark::parse("2024-03-05 10:15:00 +0200").unwrap();
        assert_eq!(
            watermark,
            Watermark::At(Utc.with_ymd_and_hms(2024, 3, 5, 8, 15, 0).unwrap())
        );
    }

    #[test]
    fn rejects_other_formats() {
        assert!(Watermark::parse("").is_err());
        assert!(Watermark::parse("2024-03-05T08:15:00Z").is_err());
    }

    #[test]
    fn admits_only_strictly_newer_dates() {
        let cutoff = Utc.with_ymd_and_hms(2024, 3, 5, 8, 15, 0).unwrap();
        let watermark = Watermark::At(cutoff);
        assert!(!watermark.admits(cutoff));
        assert!(watermark.admits(cutoff + chrono::Duration::seconds(1)));
        assert!(!watermark.admits(cutoff - chrono::Duration::seconds(1)));
        assert!(Watermark::None.admits(DateTime::<Utc>::UNIX_EPOCH));
        assert!(Watermark::FLOOR.admits(DateTime::<Utc>::UNIX_EPOCH));
    }
}
