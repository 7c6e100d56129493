//! Verdict parsing against an explicit label table.
//!
//! A verdict is the free text an inference component hands back:
//!
//! ```text
//! LABEL: SARCASTIC
//! CERTAINTY: 0.87
//! COMPUTE TIME: 0.01234
//! ```
//!
//! The first non-empty line must carry the label field. Remaining fields are
//! optional and matched independently of their order. Anything that does not
//! fit maps to [`Verdict::Unparseable`]; parsing never fails.
use crate::error::ConfigError;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::time::Duration;

/// Numeric code written to the correction log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelCode(pub u32);

impl LabelCode {
    pub const NORMAL: LabelCode = LabelCode(0);
    pub const SARCASTIC: LabelCode = LabelCode(1);

    pub fn code(self) -> u32 {
        self.0
    }
}

impl fmt::Display for LabelCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One row of the label table: the token a model prints and its code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelEntry {
    pub name: String,
    pub code: LabelCode,
}

/// Closed, bidirectional mapping between verdict tokens and label codes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelTable {
    entries: Vec<LabelEntry>,
}

impl LabelTable {
    /// Build a table, rejecting empty tables, duplicate names or codes, and
    /// names that could not appear as a single verdict token.
    pub fn new(entries: Vec<LabelEntry>) -> Result<Self, ConfigError> {
        if entries.is_empty() {
            return Err(ConfigError::Invalid("label table is empty".to_string()));
        }
        let mut names = BTreeSet::new();
        let mut codes = BTreeSet::new();
        for entry in &entries {
            if entry.name.is_empty()
                || !entry
                    .name
                    .chars()
                    .all(|ch| ch.is_alphanumeric() || ch == '_')
            {
                return Err(ConfigError::Invalid(format!(
                    "label name {:?} must be a single word",
                    entry.name
                )));
            }
            if !names.insert(entry.name.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate label name {:?}",
                    entry.name
                )));
            }
            if !codes.insert(entry.code) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate label code {}",
                    entry.code
                )));
            }
        }
        Ok(Self { entries })
    }

    /// The two-class table used by the sarcasm models.
    pub fn sarcasm() -> Self {
        Self {
            entries: vec![
                LabelEntry {
                    name: "NORMAL".to_string(),
                    code: LabelCode::NORMAL,
                },
                LabelEntry {
                    name: "SARCASTIC".to_string(),
                    code: LabelCode::SARCASTIC,
                },
            ],
        }
    }

    pub fn code_for(&self, name: &str) -> Option<LabelCode> {
        self.entries
            .iter()
            .find(|entry| entry.name == name)
            .map(|entry| entry.code)
    }

    pub fn name_for(&self, code: LabelCode) -> Option<&str> {
        self.entries
            .iter()
            .find(|entry| entry.code == code)
            .map(|entry| entry.name.as_str())
    }

    pub fn entries(&self) -> &[LabelEntry] {
        &self.entries
    }
}

/// Outcome of parsing a verdict. `Unparseable` is a normal result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    Label {
        code: LabelCode,
        certainty: Option<f64>,
    },
    Unparseable,
}

impl Verdict {
    pub fn label(&self) -> Option<LabelCode> {
        match self {
            Verdict::Label { code, .. } => Some(*code),
            Verdict::Unparseable => None,
        }
    }
}

/// Maps verdict text to label codes through a [`LabelTable`].
#[derive(Debug, Clone)]
pub struct LabelParser {
    table: LabelTable,
    label_field: Regex,
    certainty_field: Regex,
}

impl LabelParser {
    pub fn new(table: LabelTable) -> Self {
        Self {
            table,
            label_field: Regex::new(r"^LABEL:\s*(\w+)$").expect("valid label field regex"),
            certainty_field: Regex::new(r"^CERTAINTY:\s*([0-9]+(?:\.[0-9]+)?)$")
                .expect("valid certainty field regex"),
        }
    }

    pub fn table(&self) -> &LabelTable {
        &self.table
    }

    /// Parse a verdict into a label code, or `Unparseable`.
    pub fn parse(&self, verdict: &str) -> Verdict {
        let mut lines = verdict
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty());
        let Some(first) = lines.next() else {
            return Verdict::Unparseable;
        };
        let Some(token) = self
            .label_field
            .captures(first)
            .and_then(|caps| caps.get(1))
        else {
            return Verdict::Unparseable;
        };
        let Some(code) = self.table.code_for(token.as_str()) else {
            return Verdict::Unparseable;
        };
        let certainty = lines.find_map(|line| {
            self.certainty_field
                .captures(line)
                .and_then(|caps| caps.get(1))
                .and_then(|value| value.as_str().parse::<f64>().ok())
        });
        Verdict::Label { code, certainty }
    }

    /// Render a verdict in the text format [`LabelParser::parse`] accepts.
    ///
    /// Returns `None` when the code is not in the table.
    pub fn render(&self, code: LabelCode, certainty: f64, elapsed: Duration) -> Option<String> {
        let name = self.table.name_for(code)?;
        Some(format!(
            "LABEL: {name}\nCERTAINTY: {certainty:.2}\nCOMPUTE TIME: {:.5}",
            elapsed.as_secs_f64()
        ))
    }
}

impl Default for LabelParser {
    fn default() -> Self {
        Self::new(LabelTable::sarcasm())
    }
}
