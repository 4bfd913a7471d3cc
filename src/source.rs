//! Record source abstraction.
//!
//! A [`RecordSource`] answers one `(group, date)` lookup with the flat rows
//! the tree is assembled from. The PostgREST implementation lives in
//! [`crate::supabase`]; tests plug in an in-memory one.

use crate::error::AppError;
use crate::tree::FlatRecord;

/// A fully resolved query, defaults already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaterBalanceQuery {
    pub group_name: String,
    pub stat_date: String,
}

#[async_trait::async_trait]
pub trait RecordSource: Send + Sync {
    fn name(&self) -> &str;
    async fn fetch(&self, query: &WaterBalanceQuery) -> Result<Vec<FlatRecord>, AppError>;
}
