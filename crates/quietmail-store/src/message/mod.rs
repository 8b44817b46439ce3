//! Message records and their row mapping.

mod model;
mod row;

pub use model::{DeliveryStatus, FolderData, Message, MessageId};
pub(crate) use row::{message_values, row_to_message, row_to_tagged_message};
