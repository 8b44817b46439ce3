//! Typed search across folders.
//!
//! A [`SearchQuery`] combines an optional keyword, matched as a substring of
//! the keyword fields, with any number of [`SearchFilter`]s. Queries are
//! validated when built, so [`SearchService::search`] only fails on I/O.

mod model;
mod service;

pub use model::{
    FilterValue, MAX_PAGE_SIZE, OrderBy, SearchField, SearchFilter, SearchOperator, SearchQuery,
    SearchQueryBuilder, SearchResult,
};
pub use service::SearchService;
