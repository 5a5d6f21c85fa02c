//! CSV import
//!
//! Rows are processed one at a time and independently: a row that fails
//! coercion or a required check is recorded with its raw cells and never
//! aborts the batch.

use super::infer::{infer_type, parse_with_format};
use super::{CsvImport, DetectedField, FieldMapping, ImportReport, ImportRowError, ImportTarget, PreparedImport};
use crate::query::check_unique;
use crate::schema::{normalize_name, Column, ColumnSpec, ColumnType, Table};
use crate::storage::document::{Document, Value};
use crate::validation::{truthy, REQUIRED_MESSAGE, UNIQUE_MESSAGE};
use crate::{Engine, Error, Result};
use chrono::Utc;
use indexmap::IndexMap;
use std::collections::BTreeMap;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Parsed contents of an uploaded file
struct CsvRows {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
}

fn read_rows(content: &[u8], delimiter: char) -> Result<CsvRows> {
    if !delimiter.is_ascii() {
        return Err(Error::CsvError {
            message: format!("delimiter must be a single ASCII character, got '{}'", delimiter),
        });
    }
    let content = content.strip_prefix(UTF8_BOM).unwrap_or(content);

    let mut reader = ::csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .from_reader(content);

    let headers: Vec<String> = reader
        .byte_headers()?
        .iter()
        .map(|h| String::from_utf8_lossy(h).trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.byte_records() {
        let record = record?;
        rows.push(record.iter().map(|c| String::from_utf8_lossy(c).into_owned()).collect());
    }
    Ok(CsvRows { headers, rows })
}

/// Keep an uploaded file and detect its fields
pub(crate) async fn prepare_csv_import(
    engine: &Engine,
    file_name: &str,
    content: Vec<u8>,
    delimiter: char,
    user: &str,
) -> Result<PreparedImport> {
    let parsed = read_rows(&content, delimiter)?;
    if parsed.headers.iter().all(String::is_empty) {
        return Err(Error::CsvError {
            message: "the file has no header row".to_string(),
        });
    }

    let sample = engine.config.inference_sample_rows;
    let fields: Vec<DetectedField> = parsed
        .headers
        .iter()
        .enumerate()
        .filter(|(_, header)| !header.is_empty())
        .map(|(index, header)| {
            let samples = parsed
                .rows
                .iter()
                .take(sample)
                .filter_map(|row| row.get(index).map(String::as_str));
            let (field_type, field_format) = infer_type(samples);
            DetectedField {
                original_name: header.clone(),
                display_name: header.split_whitespace().collect::<Vec<_>>().join(" "),
                name: normalize_name(header),
                field_type,
                field_format,
            }
        })
        .collect();

    let mut catalog = engine.catalog.write().await;
    let id = catalog.allocate_import_id()?;
    catalog.store_upload(id, content)?;
    catalog.save_import(CsvImport {
        id,
        file_name: file_name.to_string(),
        owner: user.to_string(),
        delimiter,
        fields: fields.clone(),
        mapping: Vec::new(),
        table: None,
        errors_count: 0,
        imports_count: 0,
        errors: Vec::new(),
        date_created: Utc::now(),
    })?;

    tracing::info!(import = id, file = file_name, rows = parsed.rows.len(), fields = fields.len(), "prepared csv import");
    Ok(PreparedImport {
        import_id: id,
        detected_fields: fields,
    })
}

/// One mapped field, resolved against the target table
struct ResolvedField {
    /// Header position in the file
    index: usize,
    original_name: String,
    column: Column,
    format: Option<String>,
}

/// Check the mapping against the file and the target table, creating
/// the table first when asked to
async fn resolve_mapping(
    engine: &Engine,
    headers: &[String],
    target: &ImportTarget,
    mapping: &[FieldMapping],
    user: &str,
) -> Result<(Table, Vec<ResolvedField>)> {
    let missing: Vec<&str> = mapping
        .iter()
        .map(|m| m.original_name.as_str())
        .filter(|name| !headers.iter().any(|h| h == name))
        .collect();
    if !missing.is_empty() {
        return Err(Error::CsvError {
            message: format!("column(s) not found in file: {}", missing.join(", ")),
        });
    }

    let table = match target {
        ImportTarget::Existing(id) => engine.get_table(*id).await?,
        ImportTarget::New { database, name } => {
            let specs = mapping
                .iter()
                .map(|m| {
                    let mut spec = ColumnSpec::new(m.field_name.clone(), m.field_type.unwrap_or_default());
                    spec.required = m.required;
                    spec
                })
                .collect();
            engine.create_table(*database, name, specs, user).await?
        }
    };

    let mut unknown = Vec::new();
    let mut resolved = Vec::with_capacity(mapping.len());
    for m in mapping {
        let name = normalize_name(&m.field_name);
        let Some(column) = table.column(&name) else {
            unknown.push(name);
            continue;
        };
        if let Some(declared) = m.field_type {
            if declared != column.field_type {
                return Err(Error::CsvError {
                    message: format!(
                        "'{}' is mapped as {} but column '{}' is {}",
                        m.original_name, declared, column.name, column.field_type
                    ),
                });
            }
        }
        resolved.push(ResolvedField {
            index: headers.iter().position(|h| *h == m.original_name).unwrap_or_default(),
            original_name: m.original_name.clone(),
            column: column.clone(),
            format: m.field_format.clone(),
        });
    }
    if !unknown.is_empty() {
        return Err(Error::UnknownFieldReference {
            table: table.name.clone(),
            fields: unknown,
        });
    }

    let unmapped: Vec<&str> = table
        .columns
        .iter()
        .filter(|c| c.required && !resolved.iter().any(|f| f.column.name == c.name))
        .map(|c| c.name.as_str())
        .collect();
    if !unmapped.is_empty() {
        return Err(Error::CsvError {
            message: format!("required column(s) not mapped: {}", unmapped.join(", ")),
        });
    }

    Ok((table, resolved))
}

/// Short name of an error's type, as reported for a failed cell
fn error_kind<E>(_: &E) -> String {
    let full = std::any::type_name::<E>();
    full.rsplit("::").next().unwrap_or(full).to_string()
}

/// Coerce one non-empty cell by its column type
fn coerce_cell(field: &ResolvedField, raw: &str) -> std::result::Result<Value, String> {
    match field.column.field_type {
        ColumnType::Int => raw.trim().parse::<i64>().map(Value::Int).map_err(|e| error_kind(&e)),
        ColumnType::Float => raw.trim().parse::<f64>().map(Value::Float).map_err(|e| error_kind(&e)),
        ColumnType::Date => match &field.format {
            Some(format) => parse_with_format(raw, format)
                .map(Value::Date)
                .map_err(|e| error_kind(&e)),
            None => crate::storage::document::parse_datetime(raw)
                .map(Value::Date)
                .ok_or_else(|| "ParseError".to_string()),
        },
        ColumnType::Bool => Ok(Value::Bool(truthy(&Value::from(raw)))),
        _ => Ok(Value::String(raw.to_string())),
    }
}

/// Apply a field mapping to a prepared import
pub(crate) async fn run_csv_import(
    engine: &Engine,
    import_id: u64,
    target: ImportTarget,
    mapping: Vec<FieldMapping>,
    user: &str,
) -> Result<ImportReport> {
    let (descriptor, content) = {
        let catalog = engine.catalog.read().await;
        (catalog.csv_import(import_id)?.clone(), catalog.upload(import_id)?)
    };
    let parsed = read_rows(&content, descriptor.delimiter)?;
    let (table, fields) = resolve_mapping(engine, &parsed.headers, &target, &mapping, user).await?;

    tracing::info!(import = import_id, table = %table.slug, rows = parsed.rows.len(), "running csv import");
    let mut report = ImportReport {
        table: Some(table.id),
        ..Default::default()
    };

    for cells in &parsed.rows {
        let mut data = Document::new();
        let mut errors = BTreeMap::new();

        for field in &fields {
            let raw = cells.get(field.index).map(String::as_str).unwrap_or("");
            if raw.is_empty() {
                if field.column.required {
                    errors.insert(field.original_name.clone(), REQUIRED_MESSAGE.to_string());
                }
                data.insert(field.column.name.clone(), Value::Null);
                continue;
            }

            match coerce_cell(field, raw) {
                Ok(value) => {
                    if field.column.field_type == ColumnType::Enum {
                        engine
                            .catalog
                            .write()
                            .await
                            .merge_choices(table.id, &field.column.name, [raw])?;
                    }
                    data.insert(field.column.name.clone(), value);
                }
                Err(kind) => {
                    errors.insert(field.original_name.clone(), kind);
                }
            }
        }

        if errors.is_empty() {
            if let Err(Error::Validation(unique)) = check_unique(engine, &table, &data, None).await {
                for column in unique.fields.keys() {
                    if let Some(field) = fields.iter().find(|f| &f.column.name == column) {
                        errors.insert(field.original_name.clone(), UNIQUE_MESSAGE.to_string());
                    }
                }
            }
        }

        if errors.is_empty() {
            engine.store.insert(table.id, data).await?;
            report.imports_count += 1;
        } else {
            let row = parsed
                .headers
                .iter()
                .enumerate()
                .map(|(i, h)| (h.clone(), cells.get(i).cloned().unwrap_or_default()))
                .collect::<IndexMap<_, _>>();
            tracing::warn!(import = import_id, errors = ?errors, "skipping csv row");
            report.errors.push(ImportRowError { row, errors });
            report.errors_count += 1;
        }
    }

    let mut catalog = engine.catalog.write().await;
    if report.imports_count > 0 {
        catalog.table_mut(table.id)?.touch(user);
        catalog.flush_table(table.id)?;
    }
    let mut descriptor = descriptor;
    descriptor.mapping = mapping;
    descriptor.table = Some(table.id);
    descriptor.errors_count = report.errors_count;
    descriptor.imports_count = report.imports_count;
    descriptor.errors = report.errors.clone();
    catalog.save_import(descriptor)?;

    tracing::info!(
        import = import_id,
        imported = report.imports_count,
        failed = report.errors_count,
        "finished csv import"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_rows_strips_bom_and_keeps_short_rows() {
        let content = b"\xEF\xBB\xBFname;age\nAna;30\nBob\n";
        let parsed = read_rows(content, ';').unwrap();
        assert_eq!(parsed.headers, vec!["name", "age"]);
        assert_eq!(parsed.rows, vec![vec!["Ana", "30"], vec!["Bob"]]);
    }

    #[test]
    fn test_error_kind_names_the_type() {
        let err = "x".parse::<i64>().unwrap_err();
        assert_eq!(error_kind(&err), "ParseIntError");
        let err = "x".parse::<f64>().unwrap_err();
        assert_eq!(error_kind(&err), "ParseFloatError");
    }
}
