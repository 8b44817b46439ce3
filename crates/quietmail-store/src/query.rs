//! Parameterized statement construction for the folder tables.
//!
//! Every function here is pure: it takes structured arguments and returns a
//! [`SqlQuery`] whose text is assembled only from [`Folder`] and [`Column`]
//! names. Caller-supplied values always travel as bound parameters.

use sqlx::Sqlite;

use crate::folder::{Column, Folder};
use crate::message::{Message, MessageId, message_values};
use crate::{Error, Result};

/// A statement under construction, with its bound arguments.
pub type SqlQuery = sqlx::QueryBuilder<'static, Sqlite>;

/// Maximum keyword length accepted by [`search`].
pub const MAX_KEYWORD_LEN: usize = 1000;
/// Maximum page size accepted by [`search`].
pub const MAX_SEARCH_LIMIT: u32 = 10_000;
/// Columns a keyword search may look at.
pub const SEARCHABLE_COLUMNS: [Column; 4] =
    [Column::Subject, Column::Sender, Column::Recipient, Column::Body];

/// A value bound into a statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SqlValue {
    /// SQL NULL.
    Null,
    /// Text.
    Text(String),
    /// Integer.
    Integer(i64),
    /// Boolean, stored as 0/1.
    Bool(bool),
}

impl From<&str> for SqlValue {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(value: String) -> Self {
        Self::Text(value)
    }
}

impl From<Option<String>> for SqlValue {
    fn from(value: Option<String>) -> Self {
        value.map_or(Self::Null, Self::Text)
    }
}

impl From<bool> for SqlValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for SqlValue {
    fn from(value: i64) -> Self {
        Self::Integer(value)
    }
}

impl From<&MessageId> for SqlValue {
    fn from(value: &MessageId) -> Self {
        Self::Text(value.as_str().to_string())
    }
}

/// Constraint on one column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Condition {
    /// `column = value`
    Eq(SqlValue),
    /// `column != value`
    NotEq(SqlValue),
    /// `column IN (values)`
    In(Vec<SqlValue>),
    /// `column IS NULL`
    IsNull,
}

/// Conjunction of column conditions.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Conditions(Vec<(Column, Condition)>);

impl Conditions {
    /// No conditions.
    #[must_use]
    pub const fn new() -> Self {
        Self(Vec::new())
    }

    /// Require `column = value`.
    #[must_use]
    pub fn equals(mut self, column: Column, value: impl Into<SqlValue>) -> Self {
        self.0.push((column, Condition::Eq(value.into())));
        self
    }

    /// Require `column != value`.
    #[must_use]
    pub fn not_equals(mut self, column: Column, value: impl Into<SqlValue>) -> Self {
        self.0.push((column, Condition::NotEq(value.into())));
        self
    }

    /// Require `column` to be one of `values`.
    #[must_use]
    pub fn any_of<I, V>(mut self, column: Column, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<SqlValue>,
    {
        let values = values.into_iter().map(Into::into).collect();
        self.0.push((column, Condition::In(values)));
        self
    }

    /// Require `column IS NULL`.
    #[must_use]
    pub fn is_null(mut self, column: Column) -> Self {
        self.0.push((column, Condition::IsNull));
        self
    }

    /// Whether there are no conditions.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn check(&self, folder: Folder) -> Result<()> {
        for (column, _) in &self.0 {
            require_column(folder, *column)?;
        }
        Ok(())
    }

    fn push_where(&self, qb: &mut SqlQuery) {
        for (i, (column, condition)) in self.0.iter().enumerate() {
            qb.push(if i == 0 { " WHERE " } else { " AND " });
            qb.push(column.as_str());
            match condition {
                Condition::Eq(value) => {
                    qb.push(" = ");
                    push_value(qb, value);
                }
                Condition::NotEq(value) => {
                    qb.push(" != ");
                    push_value(qb, value);
                }
                Condition::In(values) if values.is_empty() => {
                    qb.push(" IN (NULL)");
                }
                Condition::In(values) => {
                    qb.push(" IN (");
                    push_list(qb, values.iter());
                    qb.push(")");
                }
                Condition::IsNull => {
                    qb.push(" IS NULL");
                }
            }
        }
    }
}

/// Shape of a select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SelectOptions {
    /// Whether to fetch the body column.
    pub include_body: bool,
    /// Maximum rows.
    pub limit: Option<u32>,
    /// Rows to skip.
    pub offset: Option<u32>,
}

impl Default for SelectOptions {
    fn default() -> Self {
        Self {
            include_body: true,
            limit: None,
            offset: None,
        }
    }
}

/// `SELECT` from one folder, newest first.
///
/// # Errors
///
/// Returns a validation error if a condition names a column the folder
/// doesn't have.
pub fn select(folder: Folder, conditions: &Conditions, options: &SelectOptions) -> Result<SqlQuery> {
    conditions.check(folder)?;

    let columns: Vec<&str> = folder
        .columns()
        .into_iter()
        .filter(|c| options.include_body || *c != Column::Body)
        .map(|c| c.as_str())
        .collect();

    let mut qb = SqlQuery::new("SELECT ");
    qb.push(columns.join(", "));
    qb.push(" FROM ");
    qb.push(folder.as_str());
    conditions.push_where(&mut qb);
    qb.push(" ORDER BY date DESC, time DESC, uid DESC");
    push_page(&mut qb, options.limit, options.offset);
    Ok(qb)
}

/// Insert `message` into its folder, replacing any row with the same id.
#[must_use]
pub fn upsert(message: &Message) -> SqlQuery {
    let folder = message.folder();
    let values = message_values(message);

    let mut qb = SqlQuery::new("INSERT INTO ");
    qb.push(folder.as_str());
    qb.push(" (");
    qb.push(
        values
            .iter()
            .map(|(c, _)| c.as_str())
            .collect::<Vec<_>>()
            .join(", "),
    );
    qb.push(") VALUES (");
    push_list(&mut qb, values.iter().map(|(_, v)| v));
    qb.push(") ON CONFLICT(uid) DO UPDATE SET ");
    qb.push(
        values
            .iter()
            .filter(|(c, _)| *c != Column::Uid)
            .map(|(c, _)| format!("{c} = excluded.{c}"))
            .collect::<Vec<_>>()
            .join(", "),
    );
    qb
}

/// `UPDATE` columns of one message.
///
/// # Errors
///
/// Returns a validation error if `changes` is empty, touches `uid`, or names
/// a column the folder doesn't have.
pub fn update(folder: Folder, id: &MessageId, changes: &[(Column, SqlValue)]) -> Result<SqlQuery> {
    if changes.is_empty() {
        return Err(Error::validation("update requires at least one column"));
    }
    for (column, _) in changes {
        if *column == Column::Uid {
            return Err(Error::validation("message identifiers are immutable"));
        }
        require_column(folder, *column)?;
    }

    let mut qb = SqlQuery::new("UPDATE ");
    qb.push(folder.as_str());
    qb.push(" SET ");
    for (i, (column, value)) in changes.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push(column.as_str());
        qb.push(" = ");
        push_value(&mut qb, value);
    }
    qb.push(" WHERE uid = ");
    qb.push_bind(id.as_str().to_string());
    Ok(qb)
}

/// `DELETE` one message.
#[must_use]
pub fn delete(folder: Folder, id: &MessageId) -> SqlQuery {
    let mut qb = SqlQuery::new("DELETE FROM ");
    qb.push(folder.as_str());
    qb.push(" WHERE uid = ");
    qb.push_bind(id.as_str().to_string());
    qb
}

/// `DELETE` every message in `ids`.
#[must_use]
pub fn delete_many(folder: Folder, ids: &[MessageId]) -> SqlQuery {
    let mut qb = SqlQuery::new("DELETE FROM ");
    qb.push(folder.as_str());
    push_uid_in(&mut qb, ids);
    qb
}

/// Identifiers among `ids` present in `folder`, as column `uid`.
#[must_use]
pub fn existing_ids(folder: Folder, ids: &[MessageId]) -> SqlQuery {
    let mut qb = SqlQuery::new("SELECT uid FROM ");
    qb.push(folder.as_str());
    push_uid_in(&mut qb, ids);
    qb
}

/// `COUNT(*)` as column `count`.
///
/// # Errors
///
/// Returns a validation error if a condition names a column the folder
/// doesn't have.
pub fn count(folder: Folder, conditions: &Conditions) -> Result<SqlQuery> {
    conditions.check(folder)?;
    let mut qb = SqlQuery::new("SELECT COUNT(*) AS count FROM ");
    qb.push(folder.as_str());
    conditions.push_where(&mut qb);
    Ok(qb)
}

/// Largest numeric identifier as column `highest`, zero when empty.
#[must_use]
pub fn highest_uid(folder: Folder) -> SqlQuery {
    let mut qb = SqlQuery::new("SELECT COALESCE(MAX(CAST(uid AS INTEGER)), 0) AS highest FROM ");
    qb.push(folder.as_str());
    qb
}

/// Keyword search over several folders at once.
///
/// Each folder contributes `field LIKE %keyword%` clauses joined with OR over
/// `fields` (every searchable column when empty). The per-folder selects are
/// combined with `UNION ALL` and ordered, limited and offset as a whole. Each
/// row carries a `folder` column naming where it came from.
///
/// # Errors
///
/// Returns a validation error, before building anything, if the keyword is
/// empty or longer than [`MAX_KEYWORD_LEN`], `limit` is outside
/// `1..=MAX_SEARCH_LIMIT`, `folders` is empty, or a field isn't in
/// [`SEARCHABLE_COLUMNS`].
pub fn search(
    folders: &[Folder],
    keyword: &str,
    fields: &[Column],
    limit: u32,
    offset: u32,
) -> Result<SqlQuery> {
    validate_keyword(keyword)?;
    if !(1..=MAX_SEARCH_LIMIT).contains(&limit) {
        return Err(Error::validation(format!(
            "limit must be between 1 and {MAX_SEARCH_LIMIT}, got {limit}"
        )));
    }
    if folders.is_empty() {
        return Err(Error::validation("at least one folder is required"));
    }
    if let Some(bad) = fields.iter().find(|f| !SEARCHABLE_COLUMNS.contains(f)) {
        return Err(Error::validation(format!("field {bad} is not searchable")));
    }
    let fields = if fields.is_empty() {
        &SEARCHABLE_COLUMNS[..]
    } else {
        fields
    };

    let pattern = like_contains(keyword);
    let mut qb = SqlQuery::new("");
    for (i, folder) in dedup(folders).into_iter().enumerate() {
        if i > 0 {
            qb.push(" UNION ALL ");
        }
        push_union_select(&mut qb, folder, true);
        qb.push(" WHERE (");
        for (j, field) in fields.iter().enumerate() {
            if j > 0 {
                qb.push(" OR ");
            }
            qb.push(field.as_str());
            qb.push(" LIKE ");
            qb.push_bind(pattern.clone());
            qb.push(r" ESCAPE '\'");
        }
        qb.push(")");
    }
    qb.push(UNION_ORDER);
    push_page(&mut qb, Some(limit), Some(offset));
    Ok(qb)
}

pub(crate) const UNION_ORDER: &str = " ORDER BY date DESC, time DESC, folder, uid DESC";

pub(crate) fn validate_keyword(keyword: &str) -> Result<()> {
    let len = keyword.chars().count();
    if len == 0 || len > MAX_KEYWORD_LEN {
        return Err(Error::validation(format!(
            "keyword must be 1 to {MAX_KEYWORD_LEN} characters, got {len}"
        )));
    }
    Ok(())
}

/// `SELECT <every column> , '<folder>' AS folder FROM <folder>`, filling
/// columns the folder lacks with placeholders so rows of all folders line up.
pub(crate) fn push_union_select(qb: &mut SqlQuery, folder: Folder, include_body: bool) {
    let columns: Vec<String> = Column::ALL
        .iter()
        .filter(|c| include_body || **c != Column::Body)
        .map(|c| {
            if folder.has_column(*c) {
                c.as_str().to_string()
            } else {
                format!("{} AS {}", c.placeholder(), c.as_str())
            }
        })
        .collect();
    qb.push("SELECT ");
    qb.push(columns.join(", "));
    qb.push(format!(", '{folder}' AS folder FROM {folder}"));
}

pub(crate) fn push_value(qb: &mut SqlQuery, value: &SqlValue) {
    match value {
        SqlValue::Null => qb.push_bind(None::<String>),
        SqlValue::Text(text) => qb.push_bind(text.clone()),
        SqlValue::Integer(n) => qb.push_bind(*n),
        SqlValue::Bool(b) => qb.push_bind(*b),
    };
}

pub(crate) fn push_list<'a>(qb: &mut SqlQuery, values: impl Iterator<Item = &'a SqlValue>) {
    for (i, value) in values.enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        push_value(qb, value);
    }
}

pub(crate) fn push_page(qb: &mut SqlQuery, limit: Option<u32>, offset: Option<u32>) {
    match (limit, offset) {
        (None, None) => {}
        (limit, offset) => {
            qb.push(" LIMIT ");
            qb.push_bind(limit.map_or(-1, i64::from));
            if let Some(offset) = offset {
                qb.push(" OFFSET ");
                qb.push_bind(i64::from(offset));
            }
        }
    }
}

/// `%text%` with LIKE wildcards in `text` escaped by backslash.
pub(crate) fn like_contains(text: &str) -> String {
    format!("%{}%", escape_like(text))
}

pub(crate) fn escape_like(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for ch in text.chars() {
        if matches!(ch, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(ch);
    }
    escaped
}

pub(crate) fn dedup(folders: &[Folder]) -> Vec<Folder> {
    let mut seen = Vec::with_capacity(folders.len());
    for folder in folders {
        if !seen.contains(folder) {
            seen.push(*folder);
        }
    }
    seen
}

fn push_uid_in(qb: &mut SqlQuery, ids: &[MessageId]) {
    if ids.is_empty() {
        qb.push(" WHERE 0");
        return;
    }
    qb.push(" WHERE uid IN (");
    for (i, id) in ids.iter().enumerate() {
        if i > 0 {
            qb.push(", ");
        }
        qb.push_bind(id.as_str().to_string());
    }
    qb.push(")");
}

fn require_column(folder: Folder, column: Column) -> Result<()> {
    if folder.has_column(column) {
        Ok(())
    } else {
        Err(Error::validation(format!(
            "column {column} does not exist in {folder}"
        )))
    }
}
