//! Message domain models.

use std::fmt;

use chrono::{DateTime, NaiveDateTime, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::folder::Folder;
use crate::{Error, Result};

/// Identifier of a message, unique within its folder.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(String);

impl MessageId {
    /// Create an identifier, trimming surrounding whitespace.
    ///
    /// # Errors
    ///
    /// Returns a validation error if the identifier is empty.
    pub fn new(value: impl Into<String>) -> Result<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(Error::validation("Message ID cannot be empty"));
        }
        Ok(Self(trimmed.to_string()))
    }

    /// The identifier text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Numeric value of the identifier, if it is one (IMAP UIDs are).
    #[must_use]
    pub fn as_number(&self) -> Option<u64> {
        self.0.parse().ok()
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl TryFrom<&str> for MessageId {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        Self::new(value)
    }
}

impl From<u32> for MessageId {
    fn from(uid: u32) -> Self {
        Self(uid.to_string())
    }
}

/// Delivery status of a message in the sent folder.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    /// Queued or scheduled, not yet handed to the server.
    #[default]
    Pending,
    /// Accepted by the server.
    Sent,
    /// Delivery failed.
    Failed,
}

impl DeliveryStatus {
    /// Parse from database string representation.
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "sent" => Self::Sent,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }

    /// Convert to database string representation.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }
}

/// Folder membership of a message together with the columns only that
/// folder carries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "folder", rename_all = "lowercase")]
pub enum FolderData {
    /// In the inbox.
    Inbox {
        /// Flagged for follow-up.
        flagged: bool,
    },
    /// In the sent folder.
    Sent {
        /// Delivery status.
        status: DeliveryStatus,
        /// When a scheduled message should go out.
        send_at: Option<DateTime<Utc>>,
    },
    /// In drafts.
    Drafts,
    /// In the trash.
    Trash {
        /// Flagged for follow-up.
        flagged: bool,
        /// When the message was moved to the trash.
        deleted_at: DateTime<Utc>,
    },
}

impl FolderData {
    /// Fresh folder data for a message entering `folder`.
    #[must_use]
    pub fn new(folder: Folder) -> Self {
        match folder {
            Folder::Inbox => Self::Inbox { flagged: false },
            Folder::Sent => Self::Sent {
                status: DeliveryStatus::Pending,
                send_at: None,
            },
            Folder::Drafts => Self::Drafts,
            Folder::Trash => Self::Trash {
                flagged: false,
                deleted_at: Utc::now(),
            },
        }
    }

    /// The folder this data belongs to.
    #[must_use]
    pub const fn folder(&self) -> Folder {
        match self {
            Self::Inbox { .. } => Folder::Inbox,
            Self::Sent { .. } => Folder::Sent,
            Self::Drafts => Folder::Drafts,
            Self::Trash { .. } => Folder::Trash,
        }
    }

    /// Flag state, `None` for folders without the column.
    #[must_use]
    pub const fn flagged(&self) -> Option<bool> {
        match self {
            Self::Inbox { flagged } | Self::Trash { flagged, .. } => Some(*flagged),
            Self::Sent { .. } | Self::Drafts => None,
        }
    }
}

/// A stored message.
///
/// Timestamps are kept at second precision, matching the `date`/`time`
/// columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Identifier, immutable once created.
    pub id: MessageId,
    /// Subject line.
    pub subject: String,
    /// Sender address.
    pub sender: String,
    /// Recipient addresses.
    pub recipients: Vec<String>,
    /// Local date and time the message was received or composed.
    pub received_at: NaiveDateTime,
    /// Body text, if any.
    pub body: Option<String>,
    /// Attachment filenames.
    pub attachments: Vec<String>,
    /// Whether the message has been read.
    pub is_read: bool,
    /// Folder membership and folder-specific columns.
    pub folder_data: FolderData,
}

impl Message {
    /// Creates a message with empty content in `folder`.
    #[must_use]
    pub fn new(id: MessageId, folder: Folder, received_at: NaiveDateTime) -> Self {
        Self {
            id,
            subject: String::new(),
            sender: String::new(),
            recipients: Vec::new(),
            received_at: truncate_to_seconds(received_at),
            body: None,
            attachments: Vec::new(),
            is_read: false,
            folder_data: FolderData::new(folder),
        }
    }

    /// Set the subject.
    #[must_use]
    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = subject.into();
        self
    }

    /// Set the sender.
    #[must_use]
    pub fn with_sender(mut self, sender: impl Into<String>) -> Self {
        self.sender = sender.into();
        self
    }

    /// Set the recipients.
    #[must_use]
    pub fn with_recipients<I, S>(mut self, recipients: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.recipients = recipients.into_iter().map(Into::into).collect();
        self
    }

    /// Set the body.
    #[must_use]
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }

    /// Set the attachment filenames.
    #[must_use]
    pub fn with_attachments<I, S>(mut self, attachments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attachments = attachments.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the folder data (and with it the folder).
    #[must_use]
    pub fn with_folder_data(mut self, folder_data: FolderData) -> Self {
        self.folder_data = folder_data;
        self
    }

    /// The folder the message belongs to.
    #[must_use]
    pub const fn folder(&self) -> Folder {
        self.folder_data.folder()
    }

    /// Whether the message is flagged. Always false where flags don't exist.
    #[must_use]
    pub fn is_flagged(&self) -> bool {
        self.folder_data.flagged().unwrap_or(false)
    }

    /// Set the flag. Returns false if the folder has no flag column.
    pub fn set_flagged(&mut self, value: bool) -> bool {
        match &mut self.folder_data {
            FolderData::Inbox { flagged } | FolderData::Trash { flagged, .. } => {
                *flagged = value;
                true
            }
            FolderData::Sent { .. } | FolderData::Drafts => false,
        }
    }

    /// Mark the message as read.
    pub fn mark_as_read(&mut self) {
        self.is_read = true;
    }

    /// Mark the message as unread.
    pub fn mark_as_unread(&mut self) {
        self.is_read = false;
    }

    /// Reassign the message to another folder.
    ///
    /// The flag survives moves between flaggable folders. Entering the trash
    /// stamps the deletion time; entering sent starts as pending.
    pub fn move_to(&mut self, folder: Folder) {
        if folder == self.folder() {
            return;
        }
        let flagged = self.is_flagged();
        self.folder_data = match folder {
            Folder::Inbox => FolderData::Inbox { flagged },
            Folder::Trash => FolderData::Trash {
                flagged,
                deleted_at: Utc::now(),
            },
            other => FolderData::new(other),
        };
    }

    /// Whether the message has attachments.
    #[must_use]
    pub fn has_attachments(&self) -> bool {
        !self.attachments.is_empty()
    }

    /// `YYYY-MM-DD` part of the sort key.
    #[must_use]
    pub fn date_string(&self) -> String {
        self.received_at.format(DATE_FORMAT).to_string()
    }

    /// `HH:MM:SS` part of the sort key.
    #[must_use]
    pub fn time_string(&self) -> String {
        self.received_at.format(TIME_FORMAT).to_string()
    }

    /// Check that the message survives a write and read back unchanged.
    ///
    /// # Errors
    ///
    /// Returns a validation error if `received_at` carries sub-second
    /// precision or a recipient or attachment entry is empty.
    pub fn validate(&self) -> Result<()> {
        if self.received_at.nanosecond() != 0 {
            return Err(Error::validation(format!(
                "message {}: received_at must be whole seconds, got {}",
                self.id, self.received_at
            )));
        }
        if self.recipients.iter().any(String::is_empty) {
            return Err(Error::validation(format!(
                "message {}: empty recipient",
                self.id
            )));
        }
        if self.attachments.iter().any(String::is_empty) {
            return Err(Error::validation(format!(
                "message {}: empty attachment name",
                self.id
            )));
        }
        Ok(())
    }

    /// Short preview of the body.
    #[must_use]
    pub fn preview(&self, max_chars: usize) -> String {
        let body = self.body.as_deref().unwrap_or_default();
        let flat: String = body.split_whitespace().collect::<Vec<_>>().join(" ");
        if flat.chars().count() <= max_chars {
            return flat;
        }
        let mut cut: String = flat.chars().take(max_chars).collect();
        cut.push_str("...");
        cut
    }
}

pub(crate) const DATE_FORMAT: &str = "%Y-%m-%d";
pub(crate) const TIME_FORMAT: &str = "%H:%M:%S";

fn truncate_to_seconds(dt: NaiveDateTime) -> NaiveDateTime {
    dt.with_nanosecond(0).unwrap_or(dt)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;

    use super::*;

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_message_id_rejects_blank() {
        assert!(MessageId::new("   ").is_err());
        assert_eq!(MessageId::new(" 42 ").unwrap().as_str(), "42");
        assert_eq!(MessageId::from(7u32).as_number(), Some(7));
        assert_eq!(MessageId::new("abc").unwrap().as_number(), None);
    }

    #[test]
    fn test_date_and_time_strings() {
        let msg = Message::new(MessageId::from(1u32), Folder::Inbox, at(9, 5, 3));
        assert_eq!(msg.date_string(), "2024-03-15");
        assert_eq!(msg.time_string(), "09:05:03");
    }

    #[test]
    fn test_new_truncates_subsecond_precision() {
        let precise = at(9, 5, 3).with_nanosecond(123_456_789).unwrap();
        let msg = Message::new(MessageId::from(1u32), Folder::Inbox, precise);
        assert_eq!(msg.received_at, at(9, 5, 3));
    }

    #[test]
    fn test_flag_only_in_flaggable_folders() {
        let mut inbox = Message::new(MessageId::from(1u32), Folder::Inbox, at(1, 0, 0));
        assert!(inbox.set_flagged(true));
        assert!(inbox.is_flagged());

        let mut draft = Message::new(MessageId::from(2u32), Folder::Drafts, at(1, 0, 0));
        assert!(!draft.set_flagged(true));
        assert!(!draft.is_flagged());
    }

    #[test]
    fn test_move_to_trash_keeps_flag_and_stamps_deletion() {
        let mut msg = Message::new(MessageId::from(1u32), Folder::Inbox, at(1, 0, 0));
        msg.set_flagged(true);
        let before = Utc::now();

        msg.move_to(Folder::Trash);

        assert_eq!(msg.folder(), Folder::Trash);
        assert!(msg.is_flagged());
        match msg.folder_data {
            FolderData::Trash { deleted_at, .. } => assert!(deleted_at >= before),
            other => panic!("unexpected folder data: {other:?}"),
        }
    }

    #[test]
    fn test_move_to_sent_starts_pending() {
        let mut msg = Message::new(MessageId::from(1u32), Folder::Drafts, at(1, 0, 0));
        msg.move_to(Folder::Sent);
        assert_eq!(
            msg.folder_data,
            FolderData::Sent {
                status: DeliveryStatus::Pending,
                send_at: None
            }
        );
    }

    #[test]
    fn test_preview_collapses_whitespace() {
        let msg = Message::new(MessageId::from(1u32), Folder::Inbox, at(1, 0, 0))
            .with_body("Hello\n\n  world, this is long");
        assert_eq!(msg.preview(11), "Hello world...");
        assert_eq!(msg.preview(100), "Hello world, this is long");
    }

    #[test]
    fn test_delivery_status_parse_is_lenient() {
        assert_eq!(DeliveryStatus::parse("SENT"), DeliveryStatus::Sent);
        assert_eq!(DeliveryStatus::parse("bogus"), DeliveryStatus::Pending);
    }

    #[test]
    fn test_validate_rejects_lossy_fields() {
        let msg = Message::new(MessageId::from(4u32), Folder::Inbox, at(9, 5, 3));
        assert!(msg.validate().is_ok());

        let mut precise = msg.clone();
        precise.received_at = at(9, 5, 3).with_nanosecond(250_000_000).unwrap();
        assert!(precise.validate().unwrap_err().is_validation());

        let blank_recipient = msg.clone().with_recipients(["a@x.org", ""]);
        assert!(blank_recipient.validate().unwrap_err().is_validation());

        let blank_attachment = msg.with_attachments([""]);
        assert!(blank_attachment.validate().unwrap_err().is_validation());
    }
}
