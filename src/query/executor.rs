//! Entry execution engine

use super::{check_fields, project, CompiledFilters, ListQuery, OrderBy, Page, Predicate};
use crate::schema::{Table, TableId};
use crate::storage::document::{Document, Entry, EntryId, Value};
use crate::validation::{validate_document, FieldErrors, UNIQUE_MESSAGE};
use crate::{Engine, Error, Result};

/// Create an entry after validating `input` against the table's columns
pub(crate) async fn create_entry(engine: &Engine, table: TableId, input: Document, user: &str) -> Result<Entry> {
    let mut catalog = engine.catalog.write().await;
    let definition = catalog.table(table)?.clone();

    let data = validate_document(&definition, &input)?;
    check_unique(engine, &definition, &data, None).await?;

    let entry = engine.store.insert(table, data).await?;
    catalog.table_mut(table)?.touch(user);
    catalog.flush_table(table)?;

    tracing::debug!(table = %definition.slug, entry = entry.id, "created entry");
    Ok(entry)
}

/// Replace the whole document of an entry
pub(crate) async fn update_entry(
    engine: &Engine,
    table: TableId,
    id: EntryId,
    input: Document,
    user: &str,
) -> Result<Entry> {
    let mut catalog = engine.catalog.write().await;
    let definition = catalog.table(table)?.clone();

    let mut entry = engine
        .store
        .get(table, id)
        .await?
        .ok_or_else(|| Error::EntryNotFound {
            table: definition.name.clone(),
            id,
        })?;

    let data = validate_document(&definition, &input)?;
    check_unique(engine, &definition, &data, Some(id)).await?;

    entry.data = data;
    engine.store.replace(&entry).await?;
    catalog.table_mut(table)?.touch(user);
    catalog.flush_table(table)?;

    tracing::debug!(table = %definition.slug, entry = id, "updated entry");
    Ok(entry)
}

pub(crate) async fn delete_entry(engine: &Engine, table: TableId, id: EntryId, user: &str) -> Result<()> {
    let mut catalog = engine.catalog.write().await;
    let name = catalog.table(table)?.name.clone();

    if !engine.store.delete(table, id).await? {
        return Err(Error::EntryNotFound { table: name, id });
    }
    catalog.table_mut(table)?.touch(user);
    catalog.flush_table(table)?;
    Ok(())
}

pub(crate) async fn get_entry(engine: &Engine, table: TableId, id: EntryId) -> Result<Entry> {
    let name = engine.catalog.read().await.table(table)?.name.clone();
    engine
        .store
        .get(table, id)
        .await?
        .ok_or(Error::EntryNotFound { table: name, id })
}

/// Reject values of `unique` columns already held by another entry
pub(crate) async fn check_unique(engine: &Engine, table: &Table, data: &Document, own_id: Option<EntryId>) -> Result<()> {
    let mut errors = FieldErrors::default();

    for column in table.columns.iter().filter(|c| c.unique) {
        let Some(value) = data.get(&column.name).filter(|v| !matches!(v, Value::Null)) else {
            continue;
        };
        let holders = engine
            .store
            .find_by_values(table.id, &column.name, std::slice::from_ref(value))
            .await?;
        if holders.iter().any(|e| Some(e.id) != own_id) {
            errors.insert(column.name.clone(), UNIQUE_MESSAGE);
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.into())
    }
}

/// Walk a table in bounded pages, keeping entries that pass the filters
///
/// Stops after `limit` matches when one is given.
pub(crate) async fn scan_matching(
    engine: &Engine,
    table: TableId,
    filters: &CompiledFilters,
    predicate: Option<&Predicate>,
    limit: Option<usize>,
) -> Result<Vec<Entry>> {
    let batch = engine.config.scan_batch_size;
    let mut matched = Vec::new();
    let mut cursor = None;

    loop {
        let page = engine.store.scan(table, cursor, batch).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.id);
        let exhausted = page.len() < batch;

        for entry in page {
            if filters.matches(&entry.data) && predicate.map_or(true, |p| p.matches(&entry)) {
                matched.push(entry);
                if limit.map_or(false, |l| matched.len() >= l) {
                    return Ok(matched);
                }
            }
        }

        if exhausted {
            break;
        }
    }

    Ok(matched)
}

/// List entries with filters, ordering, pagination and projection
pub(crate) async fn list_entries(engine: &Engine, table: TableId, query: &ListQuery) -> Result<Page<Entry>> {
    let definition = engine.catalog.read().await.table(table)?.clone();
    let known = |f: &str| definition.has_column(f) || f == "id" || f == "date_created";

    let ordering = OrderBy::parse(query.ordering.as_deref().unwrap_or("id"));
    check_fields(&definition.name, ordering.fields(), known)?;
    if let Some(fields) = &query.fields {
        check_fields(&definition.name, fields.iter().map(String::as_str), |f| definition.has_column(f))?;
    }

    let predicate = match query.q.as_deref().map(str::trim).filter(|q| !q.is_empty()) {
        Some(q) => Some(Predicate::compile(q, &definition)?),
        None => None,
    };
    let filters = query.filters.compile(&definition);

    let mut entries = scan_matching(engine, table, &filters, predicate.as_ref(), None).await?;
    entries.sort_by(|a, b| ordering.compare(a, b));

    tracing::debug!(table = %definition.slug, matched = entries.len(), "listed entries");
    let page = Page::from_vec(entries, query.page, engine.config.page_size);
    let fields = query.fields.as_deref();
    Ok(page.map(|mut entry| {
        entry.data = project(&entry.data, fields);
        entry
    }))
}
