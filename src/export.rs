//! Delimited-text export of result tables

use anyhow::{Context, Result};
use serde::Serialize;
use std::io::Write;

/// Write `rows` with a header taken from the serialized field names
pub fn write_csv<T: Serialize, W: Write>(rows: &[T], output: W, delimiter: u8) -> Result<()> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_writer(output);

    for row in rows {
        writer.serialize(row).context("Failed to serialize row")?;
    }
    writer.flush().context("Failed to flush CSV output")?;
    Ok(())
}

/// Comma-separated text, as served for download
pub fn to_csv<T: Serialize>(rows: &[T]) -> Result<String> {
    let mut buffer = Vec::new();
    write_csv(rows, &mut buffer, b',')?;
    String::from_utf8(buffer).context("CSV output was not UTF-8")
}
