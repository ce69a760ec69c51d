//! Rendering of message fields as delimited or fixed-width lines.
//!
//! A [`MessageFormatter`] holds an ordered field selection and a [`Layout`].
//! It renders a header line and one line per message, both with the same
//! layout, so the columns of a listing always line up with its header.

use queue_runtime::ReceivedMessage;
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

#[cfg(test)]
#[path = "format_tests.rs"]
mod tests;

/// Separator between values in the delimited layout
pub const DELIMITER: &str = ", ";

/// Marker appended to values cut short in the column layout
pub const ELLIPSIS: &str = "...";

/// Errors raised while building a field selection
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FormatError {
    #[error("Unknown field '{0}'. Expected one of MessageId, SeqNum, Body, UserProperties.")]
    UnknownField(String),
}

// ============================================================================
// Fields
// ============================================================================

/// A message field that can be rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    MessageId,
    SeqNum,
    Body,
    UserProperties,
}

impl Field {
    /// Every field in canonical order
    pub const ALL: [Field; 4] = [
        Field::MessageId,
        Field::SeqNum,
        Field::Body,
        Field::UserProperties,
    ];

    /// Header label
    pub fn label(self) -> &'static str {
        match self {
            Self::MessageId => "MessageId",
            Self::SeqNum => "SeqNum",
            Self::Body => "Body",
            Self::UserProperties => "User Properties",
        }
    }

    /// Width of the field in the column layout
    pub fn column_width(self) -> usize {
        match self {
            Self::MessageId => 20,
            Self::SeqNum => 20,
            Self::Body => 100,
            Self::UserProperties => 100,
        }
    }

    /// Text of this field for one message
    pub fn extract(self, message: &ReceivedMessage) -> String {
        match self {
            Self::MessageId => message.message_id.clone(),
            Self::SeqNum => message.sequence_number.to_string(),
            Self::Body => body_text(&message.body),
            Self::UserProperties => properties_text(message),
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Field {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized: String = s
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_lowercase();
        match normalized.as_str() {
            "messageid" => Ok(Self::MessageId),
            "seqnum" => Ok(Self::SeqNum),
            "body" => Ok(Self::Body),
            "userproperties" => Ok(Self::UserProperties),
            _ => Err(FormatError::UnknownField(s.trim().to_string())),
        }
    }
}

/// Parse a comma separated field list, skipping empty entries
pub fn parse_fields(list: &str) -> Result<Vec<Field>, FormatError> {
    list.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::parse)
        .collect()
}

/// Body as UTF-8 text, or with non-text bytes escaped as `\xNN`
pub fn body_text(body: &[u8]) -> String {
    match std::str::from_utf8(body) {
        Ok(text) => text.to_string(),
        Err(_) => body.escape_ascii().to_string(),
    }
}

/// User properties as a JSON object with keys in sorted order
fn properties_text(message: &ReceivedMessage) -> String {
    let sorted: BTreeMap<&String, &serde_json::Value> = message.user_properties.iter().collect();
    let object: serde_json::Map<String, serde_json::Value> = sorted
        .into_iter()
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect();
    serde_json::Value::Object(object).to_string()
}

// ============================================================================
// Layout
// ============================================================================

/// How field values are assembled into a line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Layout {
    /// Values joined with [`DELIMITER`]
    #[default]
    Delimited,
    /// Values truncated and padded to fixed widths
    Column,
}

/// Cut a value so that it fits in a column of `width` characters
///
/// The result is at most `width - 1` characters long, leaving one character
/// of space before the next column. Shortened values end with [`ELLIPSIS`].
pub fn truncate(value: &str, width: usize) -> Cow<'_, str> {
    let limit = width.saturating_sub(1);
    if value.chars().count() <= limit {
        return Cow::Borrowed(value);
    }

    let kept: String = value
        .chars()
        .take(limit.saturating_sub(ELLIPSIS.len()))
        .collect();
    Cow::Owned(kept + ELLIPSIS)
}

fn column(value: &str, width: usize) -> String {
    format!("{:<width$}", truncate(value, width), width = width)
}

// ============================================================================
// Formatter
// ============================================================================

/// Formats messages with a fixed field selection and layout
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageFormatter {
    fields: Vec<Field>,
    layout: Layout,
}

impl MessageFormatter {
    /// Create a formatter; an empty selection means every field in canonical order
    pub fn new(fields: Vec<Field>, layout: Layout) -> Self {
        let fields = if fields.is_empty() {
            Field::ALL.to_vec()
        } else {
            fields
        };
        Self { fields, layout }
    }

    /// Effective field selection
    pub fn fields(&self) -> &[Field] {
        &self.fields
    }

    pub fn layout(&self) -> Layout {
        self.layout
    }

    /// Header line built from the field labels
    pub fn format_header(&self) -> String {
        self.assemble(self.fields.iter().map(|f| (*f, f.label().to_string())))
    }

    /// One line for a message
    pub fn format_message(&self, message: &ReceivedMessage) -> String {
        self.assemble(self.fields.iter().map(|f| (*f, f.extract(message))))
    }

    fn assemble(&self, values: impl Iterator<Item = (Field, String)>) -> String {
        match self.layout {
            Layout::Delimited => values
                .map(|(_, value)| value)
                .collect::<Vec<_>>()
                .join(DELIMITER),
            Layout::Column => values
                .map(|(field, value)| column(&value, field.column_width()))
                .collect(),
        }
    }
}

impl Default for MessageFormatter {
    fn default() -> Self {
        Self::new(Vec::new(), Layout::default())
    }
}
