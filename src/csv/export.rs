//! CSV export
//!
//! Writes the header (column internal names) and then one row per
//! matching entry, walking the table page by page so large tables are
//! never held in memory at once.

use crate::query::FieldFilters;
use crate::schema::TableId;
use crate::storage::document::Value;
use crate::{Engine, Result};
use std::io::Write;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Stream the matching entries of `table` into `out`
pub(crate) async fn write_csv<W: Write>(
    engine: &Engine,
    table: TableId,
    filters: &FieldFilters,
    out: W,
) -> Result<usize> {
    let definition = engine.get_table(table).await?;
    let compiled = filters.compile(&definition);
    let columns = definition.column_names();

    let mut out = out;
    if engine.config.csv_bom {
        out.write_all(UTF8_BOM)?;
    }
    let mut writer = ::csv::WriterBuilder::new()
        .delimiter(engine.config.delimiter_byte())
        .from_writer(out);
    writer.write_record(&columns)?;

    let batch = engine.config.scan_batch_size;
    let mut cursor = None;
    let mut written = 0;
    loop {
        let page = engine.store.scan(table, cursor, batch).await?;
        let Some(last) = page.last() else {
            break;
        };
        cursor = Some(last.id);
        let exhausted = page.len() < batch;

        for entry in page.iter().filter(|e| compiled.matches(&e.data)) {
            let row = columns
                .iter()
                .map(|c| entry.get(c).map(Value::to_text).unwrap_or_default());
            writer.write_record(row)?;
            written += 1;
        }

        if exhausted {
            break;
        }
    }

    writer.flush()?;
    tracing::info!(table = %definition.slug, rows = written, "exported csv");
    Ok(written)
}

/// Export into an in-memory buffer
pub(crate) async fn export_csv(engine: &Engine, table: TableId, filters: &FieldFilters) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_csv(engine, table, filters, &mut buffer).await?;
    Ok(buffer)
}
