//! Conversion between [`Message`] and folder table rows.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use sqlx::Row;
use sqlx::sqlite::SqliteRow;

use super::model::{DATE_FORMAT, DeliveryStatus, FolderData, Message, MessageId, TIME_FORMAT};
use crate::folder::{Column, Folder};
use crate::query::SqlValue;
use crate::Result;

const LIST_SEPARATOR: &str = ", ";

/// Column values for writing `message` into its folder table.
pub(crate) fn message_values(message: &Message) -> Vec<(Column, SqlValue)> {
    let mut values = vec![
        (Column::Uid, SqlValue::from(message.id.as_str())),
        (Column::Subject, SqlValue::from(message.subject.as_str())),
        (Column::Sender, SqlValue::from(message.sender.as_str())),
        (Column::Recipient, SqlValue::Text(join_list(&message.recipients))),
        (Column::Date, SqlValue::Text(message.date_string())),
        (Column::Time, SqlValue::Text(message.time_string())),
        (Column::Body, SqlValue::from(message.body.clone())),
        (Column::Attachments, SqlValue::Text(join_list(&message.attachments))),
        (Column::IsRead, SqlValue::Bool(message.is_read)),
    ];

    match &message.folder_data {
        FolderData::Inbox { flagged } => values.push((Column::Flagged, SqlValue::Bool(*flagged))),
        FolderData::Trash {
            flagged,
            deleted_at,
        } => {
            values.push((Column::Flagged, SqlValue::Bool(*flagged)));
            values.push((Column::DeletedAt, SqlValue::Text(deleted_at.to_rfc3339())));
        }
        FolderData::Sent { status, send_at } => {
            values.push((Column::SentStatus, SqlValue::from(status.as_str())));
            values.push((
                Column::SendAt,
                SqlValue::from(send_at.map(|t| t.to_rfc3339())),
            ));
        }
        FolderData::Drafts => {}
    }

    values
}

/// Build a message from a row of `folder`'s table.
///
/// Folder-specific columns are read leniently: a missing or NULL column
/// becomes false or unset.
pub(crate) fn row_to_message(row: &SqliteRow, folder: Folder) -> Result<Message> {
    let id: String = row.try_get(Column::Uid.as_str())?;
    let date: String = row.try_get(Column::Date.as_str())?;
    let time: String = row.try_get(Column::Time.as_str())?;

    let date = NaiveDate::parse_from_str(&date, DATE_FORMAT)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let time = NaiveTime::parse_from_str(&time, TIME_FORMAT)
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let received_at = date.and_time(time);

    let folder_data = match folder {
        Folder::Inbox => FolderData::Inbox {
            flagged: lenient_bool(row, Column::Flagged),
        },
        Folder::Trash => FolderData::Trash {
            flagged: lenient_bool(row, Column::Flagged),
            deleted_at: lenient_timestamp(row, Column::DeletedAt)
                .unwrap_or_else(|| received_at.and_utc()),
        },
        Folder::Sent => FolderData::Sent {
            status: lenient_text(row, Column::SentStatus)
                .map(|s| DeliveryStatus::parse(&s))
                .unwrap_or_default(),
            send_at: lenient_timestamp(row, Column::SendAt),
        },
        Folder::Drafts => FolderData::Drafts,
    };

    Ok(Message {
        id: MessageId::new(id)?,
        subject: lenient_text(row, Column::Subject).unwrap_or_default(),
        sender: lenient_text(row, Column::Sender).unwrap_or_default(),
        recipients: split_list(&lenient_text(row, Column::Recipient).unwrap_or_default()),
        received_at,
        body: lenient_text(row, Column::Body),
        attachments: split_list(&lenient_text(row, Column::Attachments).unwrap_or_default()),
        is_read: lenient_bool(row, Column::IsRead),
        folder_data,
    })
}

/// Build a message from a multi-folder row carrying a `folder` column.
pub(crate) fn row_to_tagged_message(row: &SqliteRow) -> Result<Message> {
    let folder: String = row.try_get("folder")?;
    row_to_message(row, folder.parse()?)
}

fn lenient_text(row: &SqliteRow, column: Column) -> Option<String> {
    row.try_get::<Option<String>, _>(column.as_str())
        .ok()
        .flatten()
}

fn lenient_bool(row: &SqliteRow, column: Column) -> bool {
    row.try_get::<Option<bool>, _>(column.as_str())
        .ok()
        .flatten()
        .unwrap_or(false)
}

fn lenient_timestamp(row: &SqliteRow, column: Column) -> Option<DateTime<Utc>> {
    lenient_text(row, column)
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map(|t| t.with_timezone(&Utc))
}

/// Join list entries with `", "`, escaping `\` and `,` inside entries.
fn join_list(items: &[String]) -> String {
    let mut joined = String::new();
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            joined.push_str(LIST_SEPARATOR);
        }
        for c in item.chars() {
            if matches!(c, '\\' | ',') {
                joined.push('\\');
            }
            joined.push(c);
        }
    }
    joined
}

/// Inverse of [`join_list`]. Also reads plain comma-separated text.
fn split_list(raw: &str) -> Vec<String> {
    if raw.is_empty() {
        return Vec::new();
    }

    let mut items = Vec::new();
    let mut current = String::new();
    let mut chars = raw.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '\\' => current.push(chars.next().unwrap_or('\\')),
            ',' => {
                items.push(std::mem::take(&mut current));
                chars.next_if_eq(&' ');
            }
            other => current.push(other),
        }
    }
    items.push(current);
    items
}
