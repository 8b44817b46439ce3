//! Table and index definitions for the folder tables.

use sqlx::sqlite::SqlitePool;

use super::Folder;
use crate::Result;

/// Create every folder table and its indexes if they don't exist.
pub(crate) async fn initialize(pool: &SqlitePool) -> Result<()> {
    for folder in Folder::ALL {
        sqlx::query(&create_table_sql(folder)).execute(pool).await?;

        for index in create_indexes_sql(folder) {
            sqlx::query(&index).execute(pool).await?;
        }
    }

    Ok(())
}

fn create_table_sql(folder: Folder) -> String {
    let mut columns = vec![
        "uid TEXT PRIMARY KEY NOT NULL",
        "subject TEXT NOT NULL DEFAULT ''",
        "sender TEXT NOT NULL DEFAULT ''",
        "recipient TEXT NOT NULL DEFAULT ''",
        "date TEXT NOT NULL",
        "time TEXT NOT NULL",
        "body TEXT",
        "attachments TEXT NOT NULL DEFAULT ''",
        "is_read INTEGER NOT NULL DEFAULT 0",
    ];

    match folder {
        Folder::Inbox => columns.push("flagged INTEGER NOT NULL DEFAULT 0"),
        Folder::Trash => {
            columns.push("flagged INTEGER NOT NULL DEFAULT 0");
            columns.push("deleted_at TEXT NOT NULL");
        }
        Folder::Sent => {
            columns.push(
                "sent_status TEXT NOT NULL DEFAULT 'pending' \
                 CHECK (sent_status IN ('pending', 'sent', 'failed'))",
            );
            columns.push("send_at TEXT");
        }
        Folder::Drafts => {}
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    {}\n)",
        folder.as_str(),
        columns.join(",\n    ")
    )
}

fn create_indexes_sql(folder: Folder) -> Vec<String> {
    let table = folder.as_str();
    let mut indexes = vec![
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_date ON {table}(date DESC, time DESC)"),
        format!("CREATE INDEX IF NOT EXISTS idx_{table}_sender ON {table}(sender)"),
    ];

    if folder.supports_flagging() {
        indexes.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_flagged ON {table}(flagged) WHERE flagged = 1"
        ));
    }
    if folder == Folder::Trash {
        indexes.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_deleted_at ON {table}(deleted_at)"
        ));
    }
    if folder == Folder::Sent {
        indexes.push(format!(
            "CREATE INDEX IF NOT EXISTS idx_{table}_status ON {table}(sent_status)"
        ));
    }

    indexes
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use sqlx::Row;
    use sqlx::sqlite::SqlitePoolOptions;

    use super::*;

    #[test]
    fn test_table_sql_has_folder_columns() {
        let trash = create_table_sql(Folder::Trash);
        assert!(trash.contains("flagged"));
        assert!(trash.contains("deleted_at"));
        assert!(!trash.contains("sent_status"));

        let drafts = create_table_sql(Folder::Drafts);
        assert!(!drafts.contains("flagged"));
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();

        initialize(&pool).await.unwrap();
        initialize(&pool).await.unwrap();

        let rows = sqlx::query(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
        )
        .fetch_all(&pool)
        .await
        .unwrap();
        let names: Vec<String> = rows.iter().map(|r| r.get("name")).collect();
        assert_eq!(names, vec!["drafts", "inbox", "sent", "trash"]);
    }

    #[tokio::test]
    async fn test_sent_status_is_constrained() {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        initialize(&pool).await.unwrap();

        let result = sqlx::query(
            "INSERT INTO sent (uid, date, time, sent_status) VALUES ('1', '2024-01-01', '10:00:00', 'lost')",
        )
        .execute(&pool)
        .await;
        assert!(result.is_err());
    }
}
