//! Folder tables and their columns.
//!
//! The store has exactly four folders, each backed by its own table. All
//! tables share the message columns; some add folder-specific ones.

mod schema;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

pub(crate) use schema::initialize;

/// One of the four fixed message folders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Folder {
    /// Received messages.
    Inbox,
    /// Outgoing messages, sent or scheduled.
    Sent,
    /// Unsent compositions.
    Drafts,
    /// Deleted messages awaiting the retention sweep.
    Trash,
}

impl Folder {
    /// Every folder, in table creation order.
    pub const ALL: [Self; 4] = [Self::Inbox, Self::Sent, Self::Drafts, Self::Trash];

    /// Table name, also the textual folder name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Inbox => "inbox",
            Self::Sent => "sent",
            Self::Drafts => "drafts",
            Self::Trash => "trash",
        }
    }

    /// Whether the folder table declares the `flagged` column.
    #[must_use]
    pub const fn supports_flagging(&self) -> bool {
        matches!(self, Self::Inbox | Self::Trash)
    }

    /// Whether `column` exists in this folder's table.
    #[must_use]
    pub const fn has_column(&self, column: Column) -> bool {
        match column {
            Column::Flagged => self.supports_flagging(),
            Column::DeletedAt => matches!(self, Self::Trash),
            Column::SentStatus | Column::SendAt => matches!(self, Self::Sent),
            _ => true,
        }
    }

    /// Columns of this folder's table, shared ones first.
    #[must_use]
    pub fn columns(&self) -> Vec<Column> {
        Column::ALL
            .iter()
            .copied()
            .filter(|c| self.has_column(*c))
            .collect()
    }
}

impl fmt::Display for Folder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Folder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "inbox" => Ok(Self::Inbox),
            "sent" => Ok(Self::Sent),
            "drafts" => Ok(Self::Drafts),
            "trash" => Ok(Self::Trash),
            other => Err(Error::validation(format!(
                "Invalid folder name: {other:?} (expected inbox, sent, drafts or trash)"
            ))),
        }
    }
}

/// A column of a folder table.
///
/// Statement text is only ever assembled from these names, never from caller
/// input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// Message identifier, primary key.
    Uid,
    /// Subject line.
    Subject,
    /// Single sender address.
    Sender,
    /// Comma-joined recipient list.
    Recipient,
    /// `YYYY-MM-DD`.
    Date,
    /// `HH:MM:SS`.
    Time,
    /// Optional message body.
    Body,
    /// Comma-joined attachment filenames.
    Attachments,
    /// Read flag.
    IsRead,
    /// Follow-up flag (inbox, trash).
    Flagged,
    /// ISO-8601 deletion timestamp (trash).
    DeletedAt,
    /// Delivery status (sent).
    SentStatus,
    /// Scheduled send timestamp (sent).
    SendAt,
}

impl Column {
    /// All columns, shared ones first.
    pub const ALL: [Self; 13] = [
        Self::Uid,
        Self::Subject,
        Self::Sender,
        Self::Recipient,
        Self::Date,
        Self::Time,
        Self::Body,
        Self::Attachments,
        Self::IsRead,
        Self::Flagged,
        Self::DeletedAt,
        Self::SentStatus,
        Self::SendAt,
    ];

    /// Column name as used in statements.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Uid => "uid",
            Self::Subject => "subject",
            Self::Sender => "sender",
            Self::Recipient => "recipient",
            Self::Date => "date",
            Self::Time => "time",
            Self::Body => "body",
            Self::Attachments => "attachments",
            Self::IsRead => "is_read",
            Self::Flagged => "flagged",
            Self::DeletedAt => "deleted_at",
            Self::SentStatus => "sent_status",
            Self::SendAt => "send_at",
        }
    }

    /// Value to select in place of this column for folders that lack it, so
    /// that rows from different folders line up in a union.
    pub(crate) const fn placeholder(&self) -> &'static str {
        match self {
            Self::Flagged | Self::IsRead => "0",
            _ => "NULL",
        }
    }
}

impl fmt::Display for Column {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Column {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|c| c.as_str() == s)
            .ok_or_else(|| Error::validation(format!("Unknown column: {s:?}")))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_folder_parse_is_case_insensitive() {
        assert_eq!("INBOX".parse::<Folder>().unwrap(), Folder::Inbox);
        assert_eq!(" Trash ".parse::<Folder>().unwrap(), Folder::Trash);
        assert!("archive".parse::<Folder>().unwrap_err().is_validation());
    }

    #[test]
    fn test_folder_specific_columns() {
        assert!(Folder::Inbox.has_column(Column::Flagged));
        assert!(!Folder::Inbox.has_column(Column::DeletedAt));
        assert!(Folder::Trash.has_column(Column::DeletedAt));
        assert!(Folder::Sent.has_column(Column::SendAt));
        assert!(!Folder::Drafts.has_column(Column::Flagged));

        let drafts = Folder::Drafts.columns();
        assert_eq!(drafts.len(), 9);
        assert_eq!(drafts[0], Column::Uid);
    }

    #[test]
    fn test_column_round_trip_through_name() {
        for column in Column::ALL {
            assert_eq!(column.as_str().parse::<Column>().unwrap(), column);
        }
        assert!("id; DROP TABLE inbox".parse::<Column>().is_err());
    }
}
