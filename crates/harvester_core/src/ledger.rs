use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::state::PriorRunClassification;

/// Format of the ledger's date line, e.g. `2024-03-01T10:15:00+0000`.
pub const LEDGER_DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%z";

/// Contents of the run ledger file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub run_count: i64,
    pub last_run: DateTime<Utc>,
    pub failure: Option<PriorRunClassification>,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum LedgerFormatError {
    #[error("ledger has {0} lines, expected 2 or 3")]
    LineCount(usize),
    #[error("invalid run count `{0}`")]
    RunCount(String),
    #[error("invalid last run date `{0}`")]
    Date(String),
    #[error("unrecognised failure tag `{0}`")]
    FailureTag(String),
}

impl LedgerEntry {
    /// Parses ledger text. Trailing blank lines are tolerated; anything
    /// else outside the 2-3 line layout is corruption.
    pub fn parse(text: &str) -> Result<Self, LedgerFormatError> {
        let mut lines: Vec<&str> = text.lines().map(str::trim).collect();
        while lines.last().is_some_and(|line| line.is_empty()) {
            lines.pop();
        }
        if !(2..=3).contains(&lines.len()) {
            return Err(LedgerFormatError::LineCount(lines.len()));
        }

        let run_count = lines[0]
            .parse::<i64>()
            .ok()
            .filter(|count| *count >= -1)
            .ok_or_else(|| LedgerFormatError::RunCount(lines[0].to_string()))?;
        let last_run = DateTime::parse_from_str(lines[1], LEDGER_DATE_FORMAT)
            .map_err(|_| LedgerFormatError::Date(lines[1].to_string()))?
            .with_timezone(&Utc);
        let failure = match lines.get(2) {
            Some(token) => Some(
                PriorRunClassification::from_token(token)
                    .ok_or_else(|| LedgerFormatError::FailureTag(token.to_string()))?,
            ),
            None => None,
        };

        Ok(Self {
            run_count,
            last_run,
            failure,
        })
    }

    pub fn render(&self) -> String {
        let mut text = format!(
            "{}\n{}\n",
            self.run_count,
            self.last_run.format(LEDGER_DATE_FORMAT)
        );
        if let Some(failure) = self.failure {
            text.push_str(failure.token());
            text.push('\n');
        }
        text
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_two_lines_without_failure() {
        let entry = LedgerEntry {
            run_count: 4,
            last_run: Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap(),
            failure: None,
        };
        assert_eq!(entry.render(), "4\n2024-03-01T10:15:00+0000\n");
        assert_eq!(LedgerEntry::parse(&entry.render()), Ok(entry));
    }

    #[test]
    fn parses_offsets_into_utc() {
        let entry = LedgerEntry::parse("7\n2024-03-01T12:15:00+0200\nFAILED_FULL\n").unwrap();
        assert_eq!(
            entry.last_run,
            Utc.with_ymd_and_hms(2024, 3, 1, 10, 15, 0).unwrap()
        );
        assert_eq!(entry.failure, Some(PriorRunClassification::FailedFull));
    }

    #[test]
    fn rejects_corrupt_ledgers() {
        assert_eq!(
            LedgerEntry::parse("1\n2024-03-01T10:15:00+0000\nFAILED_FULL\nextra\n"),
            Err(LedgerFormatError::LineCount(4))
        );
        assert_eq!(
            LedgerEntry::parse("1\n"),
            Err(LedgerFormatError::LineCount(1))
        );
        assert_eq!(
            LedgerEntry::parse("1\n2024-03-01T10:15:00+0000\nBROKEN\n"),
            Err(LedgerFormatError::FailureTag("BROKEN".into()))
        );
        assert_eq!(
            LedgerEntry::parse("-2\n2024-03-01T10:15:00+0000\n"),
            Err(LedgerFormatError::RunCount("-2".into()))
        );
        assert!(matches!(
            LedgerEntry::parse("3\nyesterday\n"),
            Err(LedgerFormatError::Date(_))
        ));
    }
}
