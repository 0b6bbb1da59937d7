//! CSV source datasets.
//!
//! Rows are handed out as [`SourceRow`]s keyed by header name. Missing
//! trailing cells become empty strings so every row carries every column.

use crate::error::ProducerError;
use orderstream_core::event::{EventType, SourceRow};
use std::path::{Path, PathBuf};

/// Locations of the three source datasets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSet {
    /// Orders CSV.
    pub orders: PathBuf,
    /// Order-items CSV.
    pub items: PathBuf,
    /// Payments CSV.
    pub payments: PathBuf,
}

impl SourceSet {
    /// Datasets paired with the envelope variant built from their rows, in
    /// emission-candidate order.
    #[must_use]
    pub fn datasets(&self) -> [(EventType, &Path); 3] {
        [
            (EventType::OrderSnapshot, self.orders.as_path()),
            (EventType::ItemAdded, self.items.as_path()),
            (EventType::PaymentReceived, self.payments.as_path()),
        ]
    }
}

/// Stream every row of the CSV at `path` into `visit`.
///
/// Returns the number of rows visited.
///
/// # Errors
///
/// Returns [`ProducerError::Source`] if the file cannot be opened or a record
/// cannot be read.
pub fn for_each_row(
    path: &Path,
    mut visit: impl FnMut(SourceRow),
) -> Result<usize, ProducerError> {
    let source_error = |reason: String| ProducerError::Source {
        path: path.display().to_string(),
        reason,
    };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_path(path)
        .map_err(|e| source_error(e.to_string()))?;
    let headers = reader
        .headers()
        .map_err(|e| source_error(e.to_string()))?
        .clone();

    let mut count = 0;
    for record in reader.records() {
        let record = record.map_err(|e| source_error(e.to_string()))?;
        let row = headers
            .iter()
            .enumerate()
            .map(|(index, column)| {
                (
                    column.to_string(),
                    record.get(index).unwrap_or_default().to_string(),
                )
            })
            .collect();
        visit(row);
        count += 1;
    }

    tracing::debug!(path = %path.display(), rows = count, "Source dataset read");
    Ok(count)
}

/// Read every row of the CSV at `path`.
///
/// # Errors
///
/// Returns [`ProducerError::Source`] if the file cannot be read.
pub fn read_rows(path: &Path) -> Result<Vec<SourceRow>, ProducerError> {
    let mut rows = Vec::new();
    for_each_row(path, |row| rows.push(row))?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;
    use std::io::Write;

    #[test]
    fn short_rows_are_padded_with_empty_cells() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "order_id,payment_sequential,payment_value").unwrap();
        writeln!(file, "o1,1,10.5").unwrap();
        writeln!(file, "o2,2").unwrap();

        let rows = read_rows(file.path()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].get("payment_value").map(String::as_str), Some("10.5"));
        assert_eq!(rows[1].get("payment_value").map(String::as_str), Some(""));
    }

    #[test]
    fn quoted_cells_keep_commas() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "order_id,order_status").unwrap();
        writeln!(file, "\"o,1\",delivered").unwrap();

        let rows = read_rows(file.path()).unwrap();
        assert_eq!(rows[0].get("order_id").map(String::as_str), Some("o,1"));
    }

    #[test]
    fn missing_file_is_a_source_error() {
        let result = read_rows(Path::new("/nonexistent/orders.csv"));
        assert!(matches!(result, Err(ProducerError::Source { .. })));
    }
}
