//! CSV export of computed window records.

use std::fs::File;
use std::io::{self, Write};
use std::path::Path;

use crate::backfill::WindowRecord;

/// Column header of the long-format export.
const HEADER: [&str; 4] = ["tier", "window_end", "field", "value"];

/// Exports window records to a CSV file at the given path.
///
/// Writes one row per field, ordered by tier, then window end, then the
/// record's own field order. Produces identical output for identical inputs.
///
/// # Arguments
///
/// * `records` - Completed window records
/// * `path` - Output file path
///
/// # Errors
///
/// Returns an `io::Error` if file creation or writing fails.
pub fn export_csv(records: &[WindowRecord], path: &Path) -> io::Result<()> {
    let file = File::create(path)?;
    let buf = io::BufWriter::new(file);
    write_csv(records, buf)
}

/// Writes window records as CSV to any writer.
///
/// # Errors
///
/// Returns an `io::Error` if writing fails.
pub fn write_csv(records: &[WindowRecord], writer: impl Write) -> io::Result<()> {
    let mut wtr = csv::WriterBuilder::new().from_writer(writer);
    wtr.write_record(HEADER)?;

    let mut ordered: Vec<&WindowRecord> = records.iter().collect();
    ordered.sort_by_key(|r| (r.tier, r.window_end));

    for r in ordered {
        let tier = r.tier.label();
        let window_end = r.window_end.to_rfc3339();
        for (field, value) in &r.fields {
            let value = value.to_string();
            wtr.write_record([tier, window_end.as_str(), field.as_str(), value.as_str()])?;
        }
    }

    wtr.flush()?;
    Ok(())
}
