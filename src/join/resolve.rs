//! Filter resolution
//!
//! 1. collect the join values present on the primary side (paged scan)
//! 2. walk the secondary table page by page, keeping rows whose join
//!    value is among them; only the requested result page is retained
//! 3. fetch the primary rows for that page with one batched lookup
//! 4. merge each secondary row with the lowest-id primary row sharing
//!    its join value

use super::check_configuration;
use crate::query::{Page, PageRequest};
use crate::schema::Table;
use crate::storage::document::{Document, Entry, Value};
use crate::{Engine, Error, Result};
use std::collections::{HashMap, HashSet};

/// Output key of `field` from `table`
fn prefixed(table: &Table, field: &str) -> String {
    format!("{}__{}", table.slug, field)
}

/// Every distinct join key of `field` in `table`
async fn join_keys(engine: &Engine, table: &Table, field: &str) -> Result<HashSet<String>> {
    let batch = engine.config.scan_batch_size;
    let mut keys = HashSet::new();
    let mut cursor = None;
    loop {
        let page = engine.store.scan(table.id, cursor, batch).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.id);
        let exhausted = page.len() < batch;

        keys.extend(page.iter().filter_map(|e| e.get(field).and_then(Value::join_key)));

        if exhausted {
            break;
        }
    }
    Ok(keys)
}

/// A matching secondary row kept for the requested page
struct Matched {
    key: String,
    value: Value,
    entry: Entry,
}

/// Compute one page of a filter's joined records
pub(crate) async fn resolve_filter_entries(
    engine: &Engine,
    id: u64,
    fields: Option<&[String]>,
    request: PageRequest,
) -> Result<Page<Document>> {
    let (filter, primary, secondary) = {
        let catalog = engine.catalog.read().await;
        let filter = catalog.filter(id)?.clone();
        check_configuration(&catalog, &filter.primary, &filter.secondary)?;
        let primary = catalog.table(filter.primary.table)?.clone();
        let secondary = catalog.table(filter.joined()?.table)?.clone();
        (filter, primary, secondary)
    };
    let p_side = &filter.primary;
    let s_side = filter.joined()?;

    let mut default_fields: Vec<String> = p_side.fields.iter().map(|f| prefixed(&primary, f)).collect();
    for field in &s_side.fields {
        let key = prefixed(&secondary, field);
        if !default_fields.contains(&key) {
            default_fields.push(key);
        }
    }
    if let Some(requested) = fields {
        let unknown: Vec<String> = requested
            .iter()
            .filter(|f| !default_fields.contains(f))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(Error::UnknownFieldReference {
                table: filter.name.clone(),
                fields: unknown,
            });
        }
    }

    let primary_keys = join_keys(engine, &primary, &p_side.join_field).await?;

    let (offset, size) = request.bounds(engine.config.page_size);
    let batch = engine.config.scan_batch_size;
    let mut count = 0;
    let mut window: Vec<Matched> = Vec::new();
    let mut cursor = None;
    loop {
        let page = engine.store.scan(secondary.id, cursor, batch).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.id);
        let exhausted = page.len() < batch;

        for entry in page {
            let Some(value) = entry.get(&s_side.join_field).cloned() else {
                continue;
            };
            let Some(key) = value.join_key().filter(|k| primary_keys.contains(k)) else {
                continue;
            };
            if count >= offset && count < offset + size {
                window.push(Matched { key, value, entry });
            }
            count += 1;
        }

        if exhausted {
            break;
        }
    }

    let mut lookup: Vec<Value> = Vec::new();
    let mut seen = HashSet::new();
    for m in &window {
        if seen.insert(m.key.clone()) {
            lookup.push(m.value.clone());
        }
    }

    let mut partners: HashMap<String, Entry> = HashMap::new();
    if !lookup.is_empty() {
        for entry in engine
            .store
            .find_by_values(primary.id, &p_side.join_field, &lookup)
            .await?
        {
            let Some(key) = entry.get(&p_side.join_field).and_then(Value::join_key) else {
                continue;
            };
            match partners.get(&key) {
                Some(existing) if existing.id <= entry.id => {}
                _ => {
                    partners.insert(key, entry);
                }
            }
        }
    }

    let mut results = Vec::with_capacity(window.len());
    for m in window {
        let Some(partner) = partners.get(&m.key) else {
            tracing::debug!(filter = id, entry = m.entry.id, "primary partner vanished during resolution");
            continue;
        };
        let mut record = Document::new();
        for field in &s_side.fields {
            let value = m.entry.get(field).cloned().unwrap_or(Value::Null);
            record.insert(prefixed(&secondary, field), value);
        }
        for field in &p_side.fields {
            let value = partner.get(field).cloned().unwrap_or(Value::Null);
            record.insert(prefixed(&primary, field), value);
        }
        if let Some(requested) = fields {
            record.retain(|k, _| requested.contains(k));
        }
        results.push(record);
    }

    tracing::debug!(filter = id, matched = count, returned = results.len(), "resolved filter");
    Ok(Page {
        count,
        page: request.page.max(1),
        page_size: size,
        results,
    })
}

#[cfg(test)]
mod tests {
    use crate::join::{FilterSpec, JoinSide};
    use crate::query::PageRequest;
    use crate::schema::{ColumnSpec, ColumnType, TableId};
    use crate::storage::document::{document, Value};
    use crate::Engine;

    async fn seed(engine: &Engine) -> (TableId, TableId) {
        let db = engine.create_database("Shop").await.unwrap();
        let clients = engine
            .create_table(
                db.id,
                "Clients",
                vec![
                    ColumnSpec::new("Code", ColumnType::Text),
                    ColumnSpec::new("Name", ColumnType::Text),
                ],
                "ana",
            )
            .await
            .unwrap();
        let orders = engine
            .create_table(
                db.id,
                "Orders",
                vec![
                    ColumnSpec::new("Client", ColumnType::Text),
                    ColumnSpec::new("Total", ColumnType::Float),
                ],
                "ana",
            )
            .await
            .unwrap();

        for (code, name) in [("c1", "Acme"), ("c2", "Globex"), ("c1", "Acme duplicate")] {
            engine
                .create_entry(clients.id, document([("code", code), ("name", name)]), "ana")
                .await
                .unwrap();
        }
        for (client, total) in [("c1", 10.0), ("c3", 5.0), ("c2", 7.5), ("c1", 2.5)] {
            engine
                .create_entry(
                    orders.id,
                    document([("client", Value::from(client)), ("total", Value::Float(total))]),
                    "ana",
                )
                .await
                .unwrap();
        }
        (clients.id, orders.id)
    }

    fn spec(clients: TableId, orders: TableId) -> FilterSpec {
        FilterSpec {
            name: "Orders by client".into(),
            primary: JoinSide::new(clients, ["code", "name"], "code"),
            secondary: vec![JoinSide::new(orders, ["client", "total"], "client")],
        }
    }

    #[tokio::test]
    async fn test_inner_join_with_prefixed_keys() {
        let engine = Engine::in_memory();
        let (clients, orders) = seed(&engine).await;
        let filter = engine.create_filter(spec(clients, orders), "ana").await.unwrap();

        let page = engine
            .resolve_filter_entries(filter.id, None, PageRequest::default())
            .await
            .unwrap();
        assert_eq!(page.count, 3);
        let totals: Vec<_> = page.results.iter().map(|r| r["orders__total"].clone()).collect();
        assert_eq!(totals, vec![Value::Float(10.0), Value::Float(7.5), Value::Float(2.5)]);
        // Duplicated primary values pair with the lowest id
        assert_eq!(page.results[0]["clients__name"], Value::from("Acme"));
        assert_eq!(page.results[0]["clients__code"], Value::from("c1"));
        assert_eq!(page.results[0].len(), 4);
    }

    #[tokio::test]
    async fn test_paging_and_projection() {
        let engine = Engine::in_memory();
        let (clients, orders) = seed(&engine).await;
        let filter = engine.create_filter(spec(clients, orders), "ana").await.unwrap();

        let fields = vec!["clients__name".to_string()];
        let page = engine
            .resolve_filter_entries(filter.id, Some(&fields), PageRequest::new(2, 2))
            .await
            .unwrap();
        assert_eq!(page.count, 3);
        assert_eq!(page.results, vec![document([("clients__name", "Acme")])]);

        let bad = vec!["clients__age".to_string()];
        assert!(engine
            .resolve_filter_entries(filter.id, Some(&bad), PageRequest::default())
            .await
            .is_err());
    }
}
