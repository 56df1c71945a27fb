use std::collections::HashSet;
use std::fs::File;
use std::path::Path;

use csv::ReaderBuilder;
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::Value;
use tracing::info;

use crate::db::{Document, Store, CSV_DATA};
use crate::error::{ImportError, ValidationError};

/// Load a CSV file (header row + rows) into the `csv_data` collection.
///
/// The whole file is validated and parsed before the store is touched, so a
/// rejected file never leaves partial rows behind.
pub fn import_csv(uri: &str, path: &Path) -> Result<usize, ImportError> {
    check_extension(path)?;
    let docs = read_table(path)?;
    if docs.is_empty() {
        info!("{} has a header but no rows", path.display());
        return Ok(0);
    }

    let mut store = Store::open(uri)?;
    let inserted = store.insert_many(CSV_DATA, &docs)?;
    info!("Inserted {} records into '{}' collection", inserted, CSV_DATA);
    Ok(inserted)
}

fn check_extension(path: &Path) -> Result<(), ValidationError> {
    let is_csv = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("csv"));
    if is_csv {
        Ok(())
    } else {
        Err(ValidationError::Extension(path.display().to_string()))
    }
}

/// Parse every row into a document keyed by column header.
fn read_table(path: &Path) -> Result<Vec<Document>, ValidationError> {
    let name = path.display().to_string();
    let malformed = |source| ValidationError::Malformed {
        path: name.clone(),
        source,
    };

    let file = File::open(path).map_err(|source| ValidationError::Io {
        path: name.clone(),
        source,
    })?;
    let mut rdr = ReaderBuilder::new().has_headers(true).from_reader(file);

    let headers: Vec<String> = rdr
        .headers()
        .map_err(malformed)?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();
    if headers.is_empty() || headers.iter().all(String::is_empty) {
        return Err(ValidationError::MissingHeader(name.clone()));
    }
    let mut seen = HashSet::new();
    if let Some(dup) = headers.iter().find(|h| !seen.insert(h.as_str())) {
        return Err(ValidationError::DuplicateColumn {
            path: name.clone(),
            column: dup.clone(),
        });
    }

    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {pos} rows ({per_sec})")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );

    let mut docs = Vec::new();
    for record in rdr.records() {
        let record = record.map_err(malformed)?;
        let doc: Document = headers
            .iter()
            .zip(record.iter())
            .map(|(h, cell)| (h.clone(), typed_cell(cell)))
            .collect();
        docs.push(doc);
        pb.inc(1);
    }
    pb.finish_and_clear();

    Ok(docs)
}

/// Cells become null, integers, floats or booleans when they look like one.
fn typed_cell(raw: &str) -> Value {
    let v = raw.trim();
    if v.is_empty() {
        return Value::Null;
    }
    if let Ok(i) = v.parse::<i64>() {
        return Value::from(i);
    }
    if let Ok(f) = v.parse::<f64>() {
        if f.is_finite() {
            return Value::from(f);
        }
    }
    match v {
        "true" | "True" | "TRUE" => Value::Bool(true),
        "false" | "False" | "FALSE" => Value::Bool(false),
        _ => Value::String(raw.to_string()),
    }
}
