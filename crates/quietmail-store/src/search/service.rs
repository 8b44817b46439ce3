//! Search execution.

use std::sync::Arc;
use std::time::Instant;

use sqlx::Row;
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use tracing::{debug, warn};

use super::model::{FilterValue, OrderBy, SearchFilter, SearchQuery, SearchResult};
use crate::engine::EngineManager;
use crate::folder::{Column, Folder};
use crate::message::{Message, row_to_tagged_message};
use crate::query::{self, SqlQuery, SqlValue};
use crate::transaction::TransactionManager;
use crate::Result;

/// Typed, multi-folder search over the store.
#[derive(Debug, Clone)]
pub struct SearchService {
    engine: Arc<EngineManager>,
}

impl SearchService {
    /// Create a search service on `engine`.
    #[must_use]
    pub const fn new(engine: Arc<EngineManager>) -> Self {
        Self { engine }
    }

    /// Run `query`, returning one page of matches and the total match count.
    ///
    /// A query with neither keyword nor filters matches nothing and does no
    /// I/O. The page and the total are read in one read-only transaction.
    /// Rows that fail to convert are logged and skipped.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub async fn search(&self, query: &SearchQuery) -> Result<SearchResult> {
        if query.is_empty() {
            debug!("Search without keyword or filters, returning no results");
            return Ok(SearchResult::empty(query.folders.clone(), query.offset));
        }

        let started = Instant::now();
        let manager = TransactionManager::for_engine(&self.engine).await?;
        let mut tx = manager.begin_read_only().await?;
        let fetched = fetch_page_and_total(tx.conn(), query).await;
        let (rows, total_count) = tx.finish(fetched).await?;

        let messages: Vec<Message> = rows
            .iter()
            .filter_map(|row| match row_to_tagged_message(row) {
                Ok(message) => Some(message),
                Err(e) => {
                    warn!(error = %e, "Skipping unreadable search row");
                    None
                }
            })
            .collect();

        let elapsed = started.elapsed();
        self.engine
            .metrics()
            .record_duration("search.query", elapsed, &[]);

        let config = self.engine.config();
        if config.log_slow_queries && elapsed > config.slow_query_threshold {
            warn!(
                elapsed_ms = elapsed.as_secs_f64() * 1000.0,
                keyword = query.keyword.as_deref().unwrap_or(""),
                filters = query.filters.len(),
                "Slow search"
            );
        }
        debug!(
            returned = messages.len(),
            total = total_count,
            folders = query.folders.len(),
            "Search completed"
        );

        Ok(SearchResult {
            messages,
            total_count: u64::try_from(total_count).unwrap_or(0),
            query_time_ms: elapsed.as_secs_f64() * 1000.0,
            folders_searched: query.folders.clone(),
            offset: query.offset,
        })
    }

    /// Keyword search in one folder.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad arguments, or an error if the
    /// database query fails.
    pub async fn search_in_folder(
        &self,
        folder: Folder,
        keyword: &str,
        fields: &[Column],
        limit: u32,
    ) -> Result<Vec<Message>> {
        let query = SearchQuery::builder()
            .keyword(keyword)
            .in_folder(folder)
            .fields(fields)
            .limit(limit)
            .build()?;
        Ok(self.search(&query).await?.messages)
    }

    /// Keyword search across every folder.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad arguments, or an error if the
    /// database query fails.
    pub async fn search_all_folders(
        &self,
        keyword: &str,
        fields: &[Column],
        limit: u32,
    ) -> Result<SearchResult> {
        let query = SearchQuery::builder()
            .keyword(keyword)
            .fields(fields)
            .limit(limit)
            .build()?;
        self.search(&query).await
    }

    /// Filter-only search. `folders` defaults to every folder.
    ///
    /// # Errors
    ///
    /// Returns a validation error for bad arguments, or an error if the
    /// database query fails.
    pub async fn advanced_search(
        &self,
        filters: Vec<SearchFilter>,
        folders: Option<&[Folder]>,
        limit: u32,
    ) -> Result<SearchResult> {
        let mut builder = SearchQuery::builder().limit(limit);
        if let Some(folders) = folders {
            builder = builder.in_folders(folders);
        }
        for filter in filters {
            builder = builder.with_filter(filter);
        }
        self.search(&builder.build()?).await
    }
}

async fn fetch_page_and_total(
    conn: &mut SqliteConnection,
    query: &SearchQuery,
) -> Result<(Vec<SqliteRow>, i64)> {
    let rows = page_statement(query).build().fetch_all(&mut *conn).await?;
    let row = count_statement(query).build().fetch_one(&mut *conn).await?;
    let total: i64 = row.try_get("total")?;
    Ok((rows, total))
}

fn page_statement(query: &SearchQuery) -> SqlQuery {
    let mut qb = SqlQuery::new("");
    for (i, folder) in query.folders.iter().enumerate() {
        if i > 0 {
            qb.push(" UNION ALL ");
        }
        query::push_union_select(&mut qb, *folder, true);
        push_where(&mut qb, *folder, query);
    }

    let dir = if query.descending { "DESC" } else { "ASC" };
    qb.push(format!(" ORDER BY {} {dir}", query.order_by.as_str()));
    if query.order_by == OrderBy::Date {
        qb.push(format!(", time {dir}"));
    }
    qb.push(", folder, uid DESC");
    query::push_page(&mut qb, Some(query.limit), Some(query.offset));
    qb
}

fn count_statement(query: &SearchQuery) -> SqlQuery {
    let mut qb = SqlQuery::new("SELECT COALESCE(SUM(c), 0) AS total FROM (");
    for (i, folder) in query.folders.iter().enumerate() {
        if i > 0 {
            qb.push(" UNION ALL ");
        }
        qb.push(format!("SELECT COUNT(*) AS c FROM {folder}"));
        push_where(&mut qb, *folder, query);
    }
    qb.push(")");
    qb
}

fn push_where(qb: &mut SqlQuery, folder: Folder, query: &SearchQuery) {
    qb.push(" WHERE 1 = 1");

    if let Some(keyword) = &query.keyword {
        let fields = if query.fields.is_empty() {
            &query::SEARCHABLE_COLUMNS[..]
        } else {
            &query.fields[..]
        };
        let pattern = query::like_contains(keyword);
        qb.push(" AND (");
        for (i, column) in fields.iter().enumerate() {
            if i > 0 {
                qb.push(" OR ");
            }
            qb.push(column.as_str());
            qb.push(" LIKE ");
            qb.push_bind(pattern.clone());
            qb.push(r" ESCAPE '\'");
        }
        qb.push(")");
    }

    for filter in &query.filters {
        qb.push(" AND ");
        push_filter(qb, folder, filter);
    }
}

fn push_filter(qb: &mut SqlQuery, folder: Folder, filter: &SearchFilter) {
    use super::model::SearchOperator as Op;

    qb.push(filter.field().expr(folder));
    let op = filter.operator();
    match filter.value() {
        FilterValue::List(values) => {
            qb.push(if op == Op::NotIn { " NOT IN (" } else { " IN (" });
            query::push_list(qb, values.iter());
            qb.push(")");
        }
        FilterValue::Scalar(SqlValue::Null) if op == Op::NotEquals => {
            qb.push(" IS NOT NULL");
        }
        FilterValue::Scalar(SqlValue::Null) => {
            qb.push(" IS NULL");
        }
        FilterValue::Scalar(value) if op.is_pattern() => {
            let text = query::escape_like(&scalar_text(value));
            let pattern = match op {
                Op::StartsWith => format!("{text}%"),
                Op::EndsWith => format!("%{text}"),
                _ => format!("%{text}%"),
            };
            qb.push(" LIKE ");
            qb.push_bind(pattern);
            qb.push(r" ESCAPE '\'");
        }
        FilterValue::Scalar(value) => {
            qb.push(format!(" {op} "));
            query::push_value(qb, value);
        }
    }
}

fn scalar_text(value: &SqlValue) -> String {
    match value {
        SqlValue::Null => String::new(),
        SqlValue::Text(text) => text.clone(),
        SqlValue::Integer(n) => n.to_string(),
        SqlValue::Bool(b) => u8::from(*b).to_string(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::message::MessageId;
    use crate::repository::MessageRepository;
    use crate::search::{SearchField, SearchOperator};

    fn service() -> (MessageRepository, SearchService) {
        let engine = Arc::new(EngineManager::in_memory());
        (
            MessageRepository::new(Arc::clone(&engine)),
            SearchService::new(engine),
        )
    }

    fn message(uid: u32, folder: Folder, day: u32, subject: &str) -> Message {
        let at = NaiveDate::from_ymd_opt(2024, 3, day)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        Message::new(MessageId::from(uid), folder, at)
            .with_subject(subject)
            .with_sender(format!("user{uid}@example.com"))
    }

    #[test]
    fn test_page_statement_shape() {
        let query = SearchQuery::builder()
            .keyword("50%")
            .in_folders(&[Folder::Inbox, Folder::Sent])
            .filter(SearchField::Flagged, SearchOperator::Equals, true)
            .order_by(OrderBy::Subject, false)
            .build()
            .unwrap();
        let page = page_statement(&query);
        let sql = page.sql();
        assert_eq!(sql.matches("UNION ALL").count(), 1);
        assert!(sql.contains("AND flagged = ?"));
        assert!(sql.contains("AND 0 = ?"));
        assert!(sql.contains("ORDER BY subject ASC, folder, uid DESC"));

        let count = count_statement(&query);
        assert!(count.sql().starts_with("SELECT COALESCE(SUM(c), 0) AS total FROM (SELECT COUNT(*) AS c FROM inbox WHERE 1 = 1"));
        assert!(!count.sql().contains("LIMIT"));
    }

    #[tokio::test]
    async fn test_empty_query_returns_nothing() {
        let (_, service) = service();
        let query = SearchQuery::builder().build().unwrap();
        let result = service.search(&query).await.unwrap();
        assert!(result.messages.is_empty());
        assert_eq!(result.total_count, 0);
        assert!(!result.has_more());
    }

    #[tokio::test]
    async fn test_keyword_across_folders_keeps_provenance() {
        let (repo, service) = service();
        repo.save(&message(1, Folder::Inbox, 1, "Team meeting")).await.unwrap();
        repo.save(&message(2, Folder::Sent, 2, "Re: meeting notes")).await.unwrap();
        repo.save(&message(3, Folder::Drafts, 3, "Lunch")).await.unwrap();

        let result = service
            .search_all_folders("meeting", &[], 50)
            .await
            .unwrap();
        assert_eq!(result.total_count, 2);
        let folders: Vec<Folder> = result.messages.iter().map(Message::folder).collect();
        assert_eq!(folders, vec![Folder::Sent, Folder::Inbox]);
        assert_eq!(result.by_folder().len(), 2);
    }

    #[tokio::test]
    async fn test_like_wildcards_match_literally() {
        let (repo, service) = service();
        repo.save(&message(1, Folder::Inbox, 1, "50% off")).await.unwrap();
        repo.save(&message(2, Folder::Inbox, 2, "500 offers")).await.unwrap();

        let found = service
            .search_in_folder(Folder::Inbox, "50%", &[Column::Subject], 10)
            .await
            .unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].subject, "50% off");
    }

    #[tokio::test]
    async fn test_filters() {
        let (repo, service) = service();
        for uid in 1..=4 {
            repo.save(&message(uid, Folder::Inbox, uid, &format!("Report {uid}")))
                .await
                .unwrap();
        }
        repo.flag(&MessageId::from(2), Folder::Inbox).await.unwrap();
        repo.save(&message(9, Folder::Drafts, 9, "Report draft")).await.unwrap();

        let flagged = service
            .advanced_search(
                vec![SearchFilter::new(SearchField::Flagged, SearchOperator::Equals, true).unwrap()],
                None,
                10,
            )
            .await
            .unwrap();
        assert_eq!(flagged.total_count, 1);
        assert_eq!(flagged.messages[0].id.as_str(), "2");

        let query = SearchQuery::builder()
            .in_folder(Folder::Inbox)
            .filter(SearchField::Date, SearchOperator::GreaterEqual, "2024-03-03")
            .filter_parsed("sender", "not_in", vec!["user4@example.com"])
            .build()
            .unwrap();
        let result = service.search(&query).await.unwrap();
        assert_eq!(result.total_count, 1);
        assert_eq!(result.messages[0].id.as_str(), "3");

        let query = SearchQuery::builder()
            .filter(SearchField::Subject, SearchOperator::StartsWith, "Report")
            .filter(SearchField::Subject, SearchOperator::EndsWith, "draft")
            .build()
            .unwrap();
        let result = service.search(&query).await.unwrap();
        assert_eq!(result.total_count, 1);
        assert_eq!(result.messages[0].folder(), Folder::Drafts);
    }

    #[tokio::test]
    async fn test_pagination_counts_whole_match_set() {
        let (repo, service) = service();
        for uid in 1..=7 {
            repo.save(&message(uid, Folder::Inbox, uid, "status update"))
                .await
                .unwrap();
        }
        let query = SearchQuery::builder()
            .keyword("status")
            .limit(3)
            .offset(6)
            .build()
            .unwrap();
        let result = service.search(&query).await.unwrap();
        assert_eq!(result.messages.len(), 1);
        assert_eq!(result.total_count, 7);
        assert!(!result.has_more());
        assert_eq!(service.engine.metrics().timer_stats("search.query", &[]).count, 1);
    }
}
