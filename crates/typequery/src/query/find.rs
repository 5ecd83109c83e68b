//! Terminal operations: compile, execute and map rows back to entities.

use super::{PagedList, Query, QueryDescriptor, QueryIterator};
use crate::compile::{self, CompiledStatement, SecondaryFetch, Shape};
use crate::entity::{Entity, Record};
use crate::error::{BuildError, OrmError, OrmResult};
use crate::expr::{Expr, Leaf, Op, Target};
use crate::storage::{Row, RowStream, Storage};
use crate::value::{FromValue, Value};
use futures_util::future::BoxFuture;
use std::collections::{HashMap, HashSet};
use std::hash::Hash;

/// Row locks are only meaningful inside a transaction.
fn check_lock<S: Storage>(desc: &QueryDescriptor, storage: &S) -> OrmResult<()> {
    if desc.lock.is_locking() && !storage.in_transaction() {
        return Err(OrmError::TransactionRequired(format!(
            "{:?} on {} needs an active transaction",
            desc.lock, desc.schema.name
        )));
    }
    Ok(())
}

pub(crate) async fn fetch_rows<S: Storage>(
    storage: &S,
    desc: &QueryDescriptor,
    stmt: &CompiledStatement,
) -> OrmResult<Vec<Row>> {
    tracing::debug!(
        target: "typequery.sql",
        entity = desc.schema.name,
        label = desc.label.as_deref(),
        params = stmt.params().len(),
        sql = stmt.sql(),
        "query"
    );
    match desc.label.as_deref() {
        Some(tag) => storage.query_tagged(tag, stmt.sql(), stmt.params()).await,
        None => storage.query(stmt.sql(), stmt.params()).await,
    }
}

pub(crate) async fn open_stream<S: Storage>(
    storage: &S,
    desc: &QueryDescriptor,
    stmt: &CompiledStatement,
) -> OrmResult<RowStream> {
    tracing::debug!(
        target: "typequery.sql",
        entity = desc.schema.name,
        label = desc.label.as_deref(),
        params = stmt.params().len(),
        sql = stmt.sql(),
        "stream"
    );
    match desc.label.as_deref() {
        Some(tag) => storage.query_stream_tagged(tag, stmt.sql(), stmt.params()).await,
        None => storage.query_stream(stmt.sql(), stmt.params()).await,
    }
}

/// Load root records with joined to-one fetches and secondary to-many fetches.
pub(crate) fn load_records<'a, S: Storage>(
    storage: &'a S,
    desc: &'a QueryDescriptor,
) -> BoxFuture<'a, OrmResult<Vec<Record>>> {
    Box::pin(async move {
        let stmt = compile::compile(desc, Shape::Entities)?;
        let rows = fetch_rows(storage, desc, &stmt).await?;
        let mut records = rows
            .iter()
            .map(|row| stmt.plan().assemble(row))
            .collect::<OrmResult<Vec<_>>>()?;
        load_secondary(storage, &stmt, &mut records).await?;
        Ok(records)
    })
}

/// Run each secondary fetch of `stmt` for the given owners, in key batches.
pub(crate) async fn load_secondary<S: Storage>(
    storage: &S,
    stmt: &CompiledStatement,
    records: &mut [Record],
) -> OrmResult<()> {
    for fetch in stmt.secondary_fetches() {
        let keys = owner_keys(records, fetch);
        let mut grouped: HashMap<Value, Vec<Record>> = HashMap::new();

        for chunk in keys.chunks(fetch.template.fetch_batch_size.max(1)) {
            let Some(link) = fetch.template.link_column else {
                return Err(OrmError::Compilation(format!(
                    "secondary fetch of '{}' has no link column",
                    fetch.relation
                )));
            };
            let mut child = fetch.template.clone();
            child.predicates.push(Expr::Leaf(Leaf {
                target: Target::Column(link),
                op: Op::In {
                    values: chunk.to_vec(),
                    negated: false,
                },
            }));
            for mut record in load_records(storage, &child).await? {
                let key = record.link.take().unwrap_or(Value::Null);
                grouped.entry(key).or_default().push(record);
            }
        }

        for record in records.iter_mut() {
            visit_owners(record, fetch.owner.segments(), &mut |owner| {
                let children = owner
                    .value(fetch.owner_key)
                    .and_then(|key| grouped.get(key))
                    .cloned()
                    .unwrap_or_default();
                owner.attach(fetch.relation, children);
            });
        }
    }
    Ok(())
}

/// Distinct non-null owner keys in first-seen order.
fn owner_keys(records: &mut [Record], fetch: &SecondaryFetch) -> Vec<Value> {
    let mut seen = HashSet::new();
    let mut keys = Vec::new();
    for record in records.iter_mut() {
        visit_owners(record, fetch.owner.segments(), &mut |owner| {
            if let Some(key) = owner.value(fetch.owner_key).filter(|k| !k.is_null()) {
                if seen.insert(key.clone()) {
                    keys.push(key.clone());
                }
            }
        });
    }
    keys
}

fn visit_owners<F>(record: &mut Record, path: &[&'static str], f: &mut F)
where
    F: FnMut(&mut Record),
{
    match path.split_first() {
        None => f(record),
        Some((head, rest)) => {
            if let Some(children) = record.relation_mut(head) {
                for child in children {
                    visit_owners(child, rest, f);
                }
            }
        }
    }
}

fn first_column<T: FromValue>(row: &Row, column: &str) -> OrmResult<T> {
    let value = row
        .get(0)
        .ok_or_else(|| OrmError::decode(column, "row has no columns"))?;
    T::from_value(value).map_err(|msg| OrmError::decode(column, msg))
}

impl<E: Entity> Query<E> {
    /// Compile the entity statement without executing it.
    pub fn compile(&self) -> OrmResult<CompiledStatement> {
        compile::compile(&self.desc, Shape::Entities)
    }

    /// SQL of the entity statement, with `?` placeholders.
    pub fn generated_sql(&self) -> OrmResult<String> {
        self.compile().map(|stmt| stmt.sql().to_string())
    }

    /// SQL of the row count statement for the same predicate.
    pub fn count_sql(&self) -> OrmResult<String> {
        compile::compile(&self.desc, Shape::Count).map(|stmt| stmt.sql().to_string())
    }

    /// All matching entities; empty when nothing matches.
    pub async fn find_list<S: Storage>(&self, storage: &S) -> OrmResult<Vec<E>> {
        check_lock(&self.desc, storage)?;
        let records = load_records(storage, &self.desc).await?;
        records.iter().map(E::from_record).collect()
    }

    /// Exactly one entity: `NotFound` on zero rows, `TooManyRows` on more.
    pub async fn find_one<S: Storage>(&self, storage: &S) -> OrmResult<E> {
        self.find_one_or_empty(storage).await?.ok_or_else(|| {
            OrmError::not_found(format!("no {} matched the query", self.desc.schema.name))
        })
    }

    /// At most one entity; `TooManyRows` when more match.
    pub async fn find_one_or_empty<S: Storage>(&self, storage: &S) -> OrmResult<Option<E>> {
        check_lock(&self.desc, storage)?;
        let records = load_records(storage, &self.desc).await?;
        match records.as_slice() {
            [] => Ok(None),
            [record] => E::from_record(record).map(Some),
            many => Err(OrmError::too_many_rows(1, many.len())),
        }
    }

    /// Primary keys of the matching rows.
    pub async fn find_ids<K: FromValue, S: Storage>(&self, storage: &S) -> OrmResult<Vec<K>> {
        check_lock(&self.desc, storage)?;
        let stmt = compile::compile(&self.desc, Shape::Ids)?;
        let pk = self.desc.schema.primary_key;
        fetch_rows(storage, &self.desc, &stmt)
            .await?
            .iter()
            .map(|row| first_column(row, pk))
            .collect()
    }

    /// Entities keyed by primary key, or by the property given to `set_map_key`.
    pub async fn find_map<K, S>(&self, storage: &S) -> OrmResult<HashMap<K, E>>
    where
        K: FromValue + Eq + Hash,
        S: Storage,
    {
        check_lock(&self.desc, storage)?;
        let key = self.desc.map_key.unwrap_or(self.desc.schema.primary_key);
        let records = load_records(storage, &self.desc).await?;
        let mut map = HashMap::with_capacity(records.len());
        for record in &records {
            map.insert(record.get::<K>(key)?, E::from_record(record)?);
        }
        Ok(map)
    }

    /// Values of the single selected property.
    pub async fn find_single_attribute_list<T: FromValue, S: Storage>(
        &self,
        storage: &S,
    ) -> OrmResult<Vec<T>> {
        check_lock(&self.desc, storage)?;
        let stmt = compile::compile(&self.desc, Shape::SingleAttribute)?;
        let column = self
            .desc
            .projection
            .first()
            .map(ToString::to_string)
            .unwrap_or_default();
        fetch_rows(storage, &self.desc, &stmt)
            .await?
            .iter()
            .map(|row| first_column(row, &column))
            .collect()
    }

    /// Number of matching root rows.
    pub async fn find_count<S: Storage>(&self, storage: &S) -> OrmResult<u64> {
        let stmt = compile::compile(&self.desc, Shape::Count)?;
        let rows = fetch_rows(storage, &self.desc, &stmt).await?;
        match rows.first() {
            Some(row) => first_column(row, "count"),
            None => Ok(0),
        }
    }

    /// Whether any row matches.
    pub async fn exists<S: Storage>(&self, storage: &S) -> OrmResult<bool> {
        let mut desc = self.desc.clone();
        desc.max_rows = Some(1);
        desc.first_row = None;
        desc.order_by.clear();
        desc.lock = super::LockMode::None;
        let stmt = compile::compile(&desc, Shape::Ids)?;
        Ok(!fetch_rows(storage, &desc, &stmt).await?.is_empty())
    }

    /// Stream entities one at a time.
    ///
    /// The iterator holds an open cursor; call [`QueryIterator::close`] or read
    /// it to the end.
    pub async fn find_iterate<'a, S: Storage>(
        &self,
        storage: &'a S,
    ) -> OrmResult<QueryIterator<'a, S, E>> {
        check_lock(&self.desc, storage)?;
        let stmt = compile::compile(&self.desc, Shape::Entities)?;
        let stream = open_stream(storage, &self.desc, &stmt).await?;
        Ok(QueryIterator::new(
            storage,
            stmt,
            stream,
            self.desc.fetch_batch_size,
        ))
    }

    /// Visit every matching entity; the cursor is closed however `f` ends.
    pub async fn find_each<S, F>(&self, storage: &S, mut f: F) -> OrmResult<()>
    where
        S: Storage,
        F: FnMut(E) -> OrmResult<()>,
    {
        let mut iter = self.find_iterate(storage).await?;
        let result = loop {
            match iter.next().await {
                Ok(Some(entity)) => {
                    if let Err(e) = f(entity) {
                        break Err(e);
                    }
                }
                Ok(None) => break Ok(()),
                Err(e) => break Err(e),
            }
        };
        iter.close();
        result
    }

    /// One page of results plus a lazily computed total count.
    ///
    /// Requires `set_max_rows` as the page size.
    pub fn find_paged_list<'a, S: Storage>(&self, storage: &'a S) -> OrmResult<PagedList<'a, S, E>> {
        if let Some(err) = &self.desc.build_error {
            return Err(err.clone().into());
        }
        match self.desc.max_rows {
            Some(size) if size > 0 => Ok(PagedList::new(storage, self.clone())),
            _ => Err(BuildError::InvalidUsage(
                "find_paged_list needs set_max_rows as the page size".to_string(),
            )
            .into()),
        }
    }
}
