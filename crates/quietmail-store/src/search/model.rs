//! Search query and result types.

use std::fmt;
use std::str::FromStr;

use serde::Serialize;

use crate::folder::{Column, Folder};
use crate::message::Message;
use crate::query::{self, SqlValue};
use crate::{Error, Result};

/// Largest page a search may request.
pub const MAX_PAGE_SIZE: u32 = 1000;

const DEFAULT_PAGE_SIZE: u32 = 50;

/// Field a search filter can test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchField {
    /// Subject line.
    Subject,
    /// Sender address.
    Sender,
    /// Recipient list.
    Recipient,
    /// Body text.
    Body,
    /// `YYYY-MM-DD`.
    Date,
    /// `HH:MM:SS`.
    Time,
    /// Follow-up flag; reads as false in folders without flags.
    Flagged,
    /// Read flag.
    IsRead,
}

impl SearchField {
    /// Every field.
    pub const ALL: [Self; 8] = [
        Self::Subject,
        Self::Sender,
        Self::Recipient,
        Self::Body,
        Self::Date,
        Self::Time,
        Self::Flagged,
        Self::IsRead,
    ];

    /// Underlying column.
    #[must_use]
    pub const fn column(&self) -> Column {
        match self {
            Self::Subject => Column::Subject,
            Self::Sender => Column::Sender,
            Self::Recipient => Column::Recipient,
            Self::Body => Column::Body,
            Self::Date => Column::Date,
            Self::Time => Column::Time,
            Self::Flagged => Column::Flagged,
            Self::IsRead => Column::IsRead,
        }
    }

    /// Field name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        self.column().as_str()
    }

    /// Expression selecting this field in `folder`, a constant where the
    /// folder lacks the column.
    pub(crate) const fn expr(&self, folder: Folder) -> &'static str {
        let column = self.column();
        if folder.has_column(column) {
            column.as_str()
        } else {
            column.placeholder()
        }
    }
}

impl fmt::Display for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchField {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|f| f.as_str() == s)
            .ok_or_else(|| {
                Error::validation(format!(
                    "Invalid search field: {s:?}. Must be one of: subject, sender, recipient, body, date, time, flagged, is_read"
                ))
            })
    }
}

/// Comparison applied by a filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchOperator {
    /// `=`
    Equals,
    /// `!=`
    NotEquals,
    /// Substring match.
    Contains,
    /// Prefix match.
    StartsWith,
    /// Suffix match.
    EndsWith,
    /// `>`
    GreaterThan,
    /// `<`
    LessThan,
    /// `>=`
    GreaterEqual,
    /// `<=`
    LessEqual,
    /// Member of a list.
    In,
    /// Not a member of a list.
    NotIn,
}

impl SearchOperator {
    /// Every operator.
    pub const ALL: [Self; 11] = [
        Self::Equals,
        Self::NotEquals,
        Self::Contains,
        Self::StartsWith,
        Self::EndsWith,
        Self::GreaterThan,
        Self::LessThan,
        Self::GreaterEqual,
        Self::LessEqual,
        Self::In,
        Self::NotIn,
    ];

    /// Textual form.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Equals => "=",
            Self::NotEquals => "!=",
            Self::Contains => "contains",
            Self::StartsWith => "starts_with",
            Self::EndsWith => "ends_with",
            Self::GreaterThan => ">",
            Self::LessThan => "<",
            Self::GreaterEqual => ">=",
            Self::LessEqual => "<=",
            Self::In => "in",
            Self::NotIn => "not_in",
        }
    }

    /// Whether the operator takes a list value.
    #[must_use]
    pub const fn takes_list(&self) -> bool {
        matches!(self, Self::In | Self::NotIn)
    }

    /// Whether the operator is a LIKE pattern match.
    #[must_use]
    pub const fn is_pattern(&self) -> bool {
        matches!(self, Self::Contains | Self::StartsWith | Self::EndsWith)
    }
}

impl fmt::Display for SearchOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SearchOperator {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::ALL
            .iter()
            .copied()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| Error::validation(format!("Unsupported operator: {s:?}")))
    }
}

/// Value compared against by a filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterValue {
    /// A single value.
    Scalar(SqlValue),
    /// A list, for `in` / `not_in`.
    List(Vec<SqlValue>),
}

impl From<&str> for FilterValue {
    fn from(value: &str) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<String> for FilterValue {
    fn from(value: String) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<bool> for FilterValue {
    fn from(value: bool) -> Self {
        Self::Scalar(value.into())
    }
}

impl From<i64> for FilterValue {
    fn from(value: i64) -> Self {
        Self::Scalar(value.into())
    }
}

impl<T: Into<SqlValue>> From<Vec<T>> for FilterValue {
    fn from(values: Vec<T>) -> Self {
        Self::List(values.into_iter().map(Into::into).collect())
    }
}

/// One `field operator value` test.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchFilter {
    field: SearchField,
    operator: SearchOperator,
    value: FilterValue,
}

impl SearchFilter {
    /// Create a filter, checking that the value suits the operator.
    ///
    /// # Errors
    ///
    /// Returns a validation error if a list operator gets a scalar or an
    /// empty list, another operator gets a list, or an ordering or pattern
    /// operator gets NULL.
    pub fn new(
        field: SearchField,
        operator: SearchOperator,
        value: impl Into<FilterValue>,
    ) -> Result<Self> {
        let value = value.into();
        match (&value, operator.takes_list()) {
            (FilterValue::List(items), true) if items.is_empty() => {
                return Err(Error::validation(format!(
                    "operator {operator} needs a non-empty list"
                )));
            }
            (FilterValue::List(_), true) | (FilterValue::Scalar(_), false) => {}
            (FilterValue::Scalar(_), true) => {
                return Err(Error::validation(format!(
                    "operator {operator} needs a list value"
                )));
            }
            (FilterValue::List(_), false) => {
                return Err(Error::validation(format!(
                    "operator {operator} needs a single value"
                )));
            }
        }
        if value == FilterValue::Scalar(SqlValue::Null)
            && !matches!(operator, SearchOperator::Equals | SearchOperator::NotEquals)
        {
            return Err(Error::validation(format!(
                "operator {operator} cannot compare with NULL"
            )));
        }
        Ok(Self {
            field,
            operator,
            value,
        })
    }

    /// Create a filter from textual field and operator names.
    ///
    /// # Errors
    ///
    /// Returns a validation error for unknown names, or as [`new`](Self::new).
    pub fn parse(field: &str, operator: &str, value: impl Into<FilterValue>) -> Result<Self> {
        Self::new(field.parse()?, operator.parse()?, value)
    }

    /// Field tested.
    #[must_use]
    pub const fn field(&self) -> SearchField {
        self.field
    }

    /// Operator applied.
    #[must_use]
    pub const fn operator(&self) -> SearchOperator {
        self.operator
    }

    /// Value compared against.
    #[must_use]
    pub const fn value(&self) -> &FilterValue {
        &self.value
    }
}

/// Result ordering key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OrderBy {
    /// Date, then time.
    #[default]
    Date,
    /// Time of day.
    Time,
    /// Subject.
    Subject,
    /// Sender.
    Sender,
}

impl OrderBy {
    /// Column name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Date => "date",
            Self::Time => "time",
            Self::Subject => "subject",
            Self::Sender => "sender",
        }
    }
}

impl FromStr for OrderBy {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "date" => Ok(Self::Date),
            "time" => Ok(Self::Time),
            "subject" => Ok(Self::Subject),
            "sender" => Ok(Self::Sender),
            other => Err(Error::validation(format!(
                "Invalid order_by: {other:?}. Must be one of: date, time, subject, sender"
            ))),
        }
    }
}

/// A validated search. Build one with [`SearchQueryBuilder`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub(crate) keyword: Option<String>,
    pub(crate) filters: Vec<SearchFilter>,
    pub(crate) folders: Vec<Folder>,
    pub(crate) fields: Vec<Column>,
    pub(crate) limit: u32,
    pub(crate) offset: u32,
    pub(crate) order_by: OrderBy,
    pub(crate) descending: bool,
}

impl SearchQuery {
    /// Start building a query.
    #[must_use]
    pub fn builder() -> SearchQueryBuilder {
        SearchQueryBuilder::default()
    }

    /// Keyword, if any.
    #[must_use]
    pub fn keyword(&self) -> Option<&str> {
        self.keyword.as_deref()
    }

    /// Structured filters.
    #[must_use]
    pub fn filters(&self) -> &[SearchFilter] {
        &self.filters
    }

    /// Folders searched.
    #[must_use]
    pub fn folders(&self) -> &[Folder] {
        &self.folders
    }

    /// Page size.
    #[must_use]
    pub const fn limit(&self) -> u32 {
        self.limit
    }

    /// Rows skipped.
    #[must_use]
    pub const fn offset(&self) -> u32 {
        self.offset
    }

    /// Whether the query has nothing to match on.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keyword.is_none() && self.filters.is_empty()
    }
}

/// Fluent construction of a [`SearchQuery`]. All validation happens in
/// [`build`](Self::build).
#[derive(Debug)]
pub struct SearchQueryBuilder {
    keyword: Option<String>,
    filters: Vec<SearchFilter>,
    folders: Vec<Folder>,
    fields: Vec<Column>,
    limit: u32,
    offset: u32,
    order_by: OrderBy,
    descending: bool,
    error: Option<Error>,
}

impl Default for SearchQueryBuilder {
    fn default() -> Self {
        Self {
            keyword: None,
            filters: Vec::new(),
            folders: Folder::ALL.to_vec(),
            fields: Vec::new(),
            limit: DEFAULT_PAGE_SIZE,
            offset: 0,
            order_by: OrderBy::Date,
            descending: true,
            error: None,
        }
    }
}

impl SearchQueryBuilder {
    /// Match `keyword` as a substring of the keyword fields.
    #[must_use]
    pub fn keyword(mut self, keyword: impl Into<String>) -> Self {
        self.keyword = Some(keyword.into());
        self
    }

    /// Add a filter.
    #[must_use]
    pub fn filter(
        mut self,
        field: SearchField,
        operator: SearchOperator,
        value: impl Into<FilterValue>,
    ) -> Self {
        match SearchFilter::new(field, operator, value) {
            Ok(filter) => self.filters.push(filter),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Add a filter given by textual field and operator names.
    #[must_use]
    pub fn filter_parsed(mut self, field: &str, operator: &str, value: impl Into<FilterValue>) -> Self {
        match SearchFilter::parse(field, operator, value) {
            Ok(filter) => self.filters.push(filter),
            Err(e) => self.fail(e),
        }
        self
    }

    /// Add an already built filter.
    #[must_use]
    pub fn with_filter(mut self, filter: SearchFilter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Search only `folder`.
    #[must_use]
    pub fn in_folder(mut self, folder: Folder) -> Self {
        self.folders = vec![folder];
        self
    }

    /// Search `folders`.
    #[must_use]
    pub fn in_folders(mut self, folders: &[Folder]) -> Self {
        self.folders = folders.to_vec();
        self
    }

    /// Restrict keyword matching to `fields`.
    #[must_use]
    pub fn fields(mut self, fields: &[Column]) -> Self {
        self.fields = fields.to_vec();
        self
    }

    /// Page size.
    #[must_use]
    pub const fn limit(mut self, limit: u32) -> Self {
        self.limit = limit;
        self
    }

    /// Rows to skip.
    #[must_use]
    pub const fn offset(mut self, offset: u32) -> Self {
        self.offset = offset;
        self
    }

    /// Ordering.
    #[must_use]
    pub const fn order_by(mut self, order_by: OrderBy, descending: bool) -> Self {
        self.order_by = order_by;
        self.descending = descending;
        self
    }

    fn fail(&mut self, error: Error) {
        if self.error.is_none() {
            self.error = Some(error);
        }
    }

    /// Validate and produce the query.
    ///
    /// # Errors
    ///
    /// Returns the first validation error: a bad filter, a keyword over the
    /// length limit, an unsearchable keyword field, no folders, or a limit
    /// outside `1..=MAX_PAGE_SIZE`.
    pub fn build(self) -> Result<SearchQuery> {
        if let Some(error) = self.error {
            return Err(error);
        }

        let keyword = self.keyword.filter(|k| !k.trim().is_empty());
        if let Some(keyword) = &keyword {
            query::validate_keyword(keyword)?;
        }
        if let Some(bad) = self
            .fields
            .iter()
            .find(|f| !query::SEARCHABLE_COLUMNS.contains(f))
        {
            return Err(Error::validation(format!("Invalid search field: {bad}")));
        }
        if self.folders.is_empty() {
            return Err(Error::validation("at least one folder is required"));
        }
        if self.limit == 0 {
            return Err(Error::validation("limit must be positive"));
        }
        if self.limit > MAX_PAGE_SIZE {
            return Err(Error::validation(format!(
                "limit cannot exceed {MAX_PAGE_SIZE}"
            )));
        }

        Ok(SearchQuery {
            keyword,
            filters: self.filters,
            folders: query::dedup(&self.folders),
            fields: self.fields,
            limit: self.limit,
            offset: self.offset,
            order_by: self.order_by,
            descending: self.descending,
        })
    }
}

/// One page of search results.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    /// Matching messages; each knows its folder.
    pub messages: Vec<Message>,
    /// Matches across all pages and folders.
    pub total_count: u64,
    /// Time spent, in milliseconds.
    pub query_time_ms: f64,
    /// Folders that were searched.
    pub folders_searched: Vec<Folder>,
    /// Offset of this page.
    pub offset: u32,
}

impl SearchResult {
    pub(crate) const fn empty(folders_searched: Vec<Folder>, offset: u32) -> Self {
        Self {
            messages: Vec::new(),
            total_count: 0,
            query_time_ms: 0.0,
            folders_searched,
            offset,
        }
    }

    /// Whether matches exist beyond this page.
    #[must_use]
    pub fn has_more(&self) -> bool {
        (u64::from(self.offset) + self.messages.len() as u64) < self.total_count
    }

    /// Messages of this page grouped by folder, in result order.
    #[must_use]
    pub fn by_folder(&self) -> Vec<(Folder, Vec<&Message>)> {
        let mut groups: Vec<(Folder, Vec<&Message>)> = Vec::new();
        for message in &self.messages {
            let folder = message.folder();
            match groups.iter_mut().find(|(f, _)| *f == folder) {
                Some((_, group)) => group.push(message),
                None => groups.push((folder, vec![message])),
            }
        }
        groups
    }
}
