use std::fmt;

use chrono::{DateTime, FixedOffset};
use regex::Regex;

/// Timestamp layout inside fragment file names, e.g. `2024_03_01T10_15_00+0000`.
pub const FRAGMENT_TIMESTAMP_FORMAT: &str = "%Y_%m_%dT%H_%M_%S%z";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FragmentKind {
    Additions,
    Subtractions,
}

impl FragmentKind {
    pub fn prefix(self) -> &'static str {
        match self {
            FragmentKind::Additions => "add",
            FragmentKind::Subtractions => "subtract",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        match prefix {
            "add" => Some(FragmentKind::Additions),
            "subtract" => Some(FragmentKind::Subtractions),
            _ => None,
        }
    }
}

/// Parsed `{add|subtract}_{sequence}_{timestamp}.{ext}` fragment file name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FragmentName {
    pub kind: FragmentKind,
    pub sequence: u32,
    pub timestamp: DateTime<FixedOffset>,
    pub extension: String,
}

impl FragmentName {
    pub fn new(
        kind: FragmentKind,
        sequence: u32,
        timestamp: DateTime<FixedOffset>,
        extension: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            sequence,
            timestamp,
            extension: extension.into(),
        }
    }

    /// Parses `name` if it follows the fragment grammar with this `extension`.
    pub fn parse(name: &str, extension: &str) -> Option<Self> {
        FragmentPattern::new(extension).ok()?.parse(name)
    }

    pub fn file_name(&self) -> String {
        self.to_string()
    }
}

/// Compiled fragment grammar for one file extension.
#[derive(Debug, Clone)]
pub struct FragmentPattern {
    regex: Regex,
    extension: String,
}

impl FragmentPattern {
    pub fn new(extension: &str) -> Result<Self, regex::Error> {
        let pattern = format!(
            r"^(add|subtract)_(\d+)_(\d{{4}}_\d{{2}}_\d{{2}}T\d{{2}}_\d{{2}}_\d{{2}}[+-]\d{{4}})\.{}$",
            regex::escape(extension)
        );
        Ok(Self {
            regex: Regex::new(&pattern)?,
            extension: extension.to_string(),
        })
    }

    pub fn parse(&self, name: &str) -> Option<FragmentName> {
        let captures = self.regex.captures(name)?;
        let kind = FragmentKind::from_prefix(&captures[1])?;
        let sequence = captures[2].parse().ok()?;
        let timestamp = DateTime::parse_from_str(&captures[3], FRAGMENT_TIMESTAMP_FORMAT).ok()?;
        Some(FragmentName::new(kind, sequence, timestamp, self.extension.clone()))
    }
}

impl fmt::Display for FragmentName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{}_{}.{}",
            self.kind.prefix(),
            self.sequence,
            self.timestamp.format(FRAGMENT_TIMESTAMP_FORMAT),
            self.extension
        )
    }
}
