use super::Query;
use crate::entity::Entity;
use crate::error::OrmResult;
use crate::storage::Storage;
use tokio::sync::OnceCell;

/// One page of a query plus its total row count.
///
/// The page is fetched at most once. The total count runs a separate count
/// query over the same predicate, also at most once, and only when asked for.
pub struct PagedList<'a, S, E> {
    storage: &'a S,
    query: Query<E>,
    list: OnceCell<Vec<E>>,
    total: OnceCell<u64>,
}

impl<'a, S: Storage, E: Entity> PagedList<'a, S, E> {
    pub(crate) fn new(storage: &'a S, query: Query<E>) -> Self {
        Self {
            storage,
            query,
            list: OnceCell::new(),
            total: OnceCell::new(),
        }
    }

    /// Rows of this page.
    pub async fn list(&self) -> OrmResult<&[E]> {
        let list = self
            .list
            .get_or_try_init(|| self.query.find_list(self.storage))
            .await?;
        Ok(list.as_slice())
    }

    /// Matching rows across all pages.
    pub async fn total_count(&self) -> OrmResult<u64> {
        self.total
            .get_or_try_init(|| self.query.find_count(self.storage))
            .await
            .copied()
    }

    pub fn page_size(&self) -> u64 {
        self.query.desc.max_rows.unwrap_or(0)
    }

    /// Zero-based index of this page.
    pub fn page_index(&self) -> u64 {
        match self.page_size() {
            0 => 0,
            size => self.query.desc.first_row.unwrap_or(0) / size,
        }
    }

    pub async fn total_page_count(&self) -> OrmResult<u64> {
        let total = self.total_count().await?;
        Ok(match self.page_size() {
            0 => 0,
            size => total.div_ceil(size),
        })
    }

    pub async fn has_next(&self) -> OrmResult<bool> {
        let end = self.query.desc.first_row.unwrap_or(0) + self.page_size();
        Ok(end < self.total_count().await?)
    }

    pub fn has_prev(&self) -> bool {
        self.query.desc.first_row.unwrap_or(0) > 0
    }

    /// Take the page rows, fetching them if needed.
    pub async fn into_list(self) -> OrmResult<Vec<E>> {
        self.list().await?;
        Ok(self.list.into_inner().unwrap_or_default())
    }
}
