//! Candidate list loading
//!
//! Candidates arrive either as the columnar (parquet) snapshot of the upstream
//! filtering step or as a CSV export of it. The id column is configurable;
//! files that only carry legacy numeric ids in an `avid` column are converted,
//! and single-column CSV files without a header are read one id per line.

use arrow_array::{Array, ArrayRef, Int32Array, Int64Array, LargeStringArray, StringArray, UInt64Array};
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use parquet::errors::ParquetError;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

use crate::error::{HarvestError, Result};
use crate::ids::{av_to_bv, is_public_id};

const LEGACY_COLUMN: &str = "avid";

/// Where the ids of a candidate file live
enum IdColumn {
    Public(usize),
    Legacy(usize),
}

fn find_id_column(names: &[&str], column: &str) -> Option<IdColumn> {
    if let Some(idx) = names.iter().position(|h| *h == column) {
        return Some(IdColumn::Public(idx));
    }
    names.iter().position(|h| *h == LEGACY_COLUMN).map(IdColumn::Legacy)
}

fn missing_column(path: &Path, column: &str, names: &[&str]) -> HarvestError {
    HarvestError::Config(format!(
        "{} has no '{}' or '{}' column (found: {})",
        path.display(),
        column,
        LEGACY_COLUMN,
        names.join(", ")
    ))
}

/// Load candidate ids from `path`, de-duplicated in first-seen order.
///
/// Files ending in `.parquet` are read as columnar snapshots, anything else as
/// CSV. An unreadable file or one without a usable id column is an error;
/// callers treat it as fatal.
pub fn load_candidates(path: &Path, column: &str) -> Result<Vec<String>> {
    if !path.is_file() {
        return Err(HarvestError::io(
            path,
            std::io::Error::new(std::io::ErrorKind::NotFound, "candidate file not found"),
        ));
    }

    let is_parquet = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("parquet"));
    let raw = if is_parquet {
        read_parquet(path, column)?
    } else {
        read_csv(path, column)?
    };

    let total = raw.len();
    let ids = dedup_preserving_order(raw);
    let odd = ids.iter().filter(|id| !is_public_id(id)).count();
    if odd > 0 {
        warn!("⚠️ {} candidate ids in {} do not look like BV ids", odd, path.display());
    }
    info!(
        "📄 Loaded {} candidates from {} ({} duplicates dropped)",
        ids.len(),
        path.display(),
        total - ids.len()
    );
    Ok(ids)
}

fn read_csv(path: &Path, column: &str) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers = reader.headers()?.clone();
    let names: Vec<&str> = headers.iter().collect();

    let (idx, legacy) = match find_id_column(&names, column) {
        Some(IdColumn::Public(idx)) => (idx, false),
        Some(IdColumn::Legacy(idx)) => {
            info!("No '{}' column in {}, converting '{}' ids", column, path.display(), LEGACY_COLUMN);
            (idx, true)
        }
        None if names.len() == 1 => return read_headerless(path),
        None => return Err(missing_column(path, column, &names)),
    };

    let mut values = Vec::new();
    for record in reader.records() {
        if let Some(value) = record?.get(idx) {
            values.push(value.to_string());
        }
    }
    Ok(if legacy { convert_legacy(values) } else { values })
}

fn read_headerless(path: &Path) -> Result<Vec<String>> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_path(path)?;
    let mut ids = Vec::new();
    for record in reader.records() {
        if let Some(id) = record?.get(0) {
            ids.push(id.to_string());
        }
    }
    Ok(ids)
}

fn read_parquet(path: &Path, column: &str) -> Result<Vec<String>> {
    let file = std::fs::File::open(path).map_err(|e| HarvestError::io(path, e))?;
    let builder = ParquetRecordBatchReaderBuilder::try_new(file)?;

    let schema = builder.schema().clone();
    let names: Vec<&str> = schema.fields().iter().map(|field| field.name().as_str()).collect();
    let (idx, legacy) = match find_id_column(&names, column) {
        Some(IdColumn::Public(idx)) => (idx, false),
        Some(IdColumn::Legacy(idx)) => {
            info!("No '{}' column in {}, converting '{}' ids", column, path.display(), LEGACY_COLUMN);
            (idx, true)
        }
        None => return Err(missing_column(path, column, &names)),
    };

    let mask = ProjectionMask::roots(builder.parquet_schema(), [idx]);
    let reader = builder.with_projection(mask).build()?;

    let mut values = Vec::new();
    for batch in reader {
        let batch = batch.map_err(ParquetError::from)?;
        append_values(batch.column(0), &mut values).map_err(|kind| {
            HarvestError::Config(format!("unsupported id column type {} in {}", kind, path.display()))
        })?;
    }
    Ok(if legacy { convert_legacy(values) } else { values })
}

/// Append the non-null values of an id column as strings
fn append_values(array: &ArrayRef, out: &mut Vec<String>) -> std::result::Result<(), String> {
    let any = array.as_any();
    if let Some(values) = any.downcast_ref::<StringArray>() {
        out.extend(values.iter().flatten().map(|v| v.trim().to_string()));
    } else if let Some(values) = any.downcast_ref::<LargeStringArray>() {
        out.extend(values.iter().flatten().map(|v| v.trim().to_string()));
    } else if let Some(values) = any.downcast_ref::<Int64Array>() {
        out.extend(values.iter().flatten().map(|v| v.to_string()));
    } else if let Some(values) = any.downcast_ref::<UInt64Array>() {
        out.extend(values.iter().flatten().map(|v| v.to_string()));
    } else if let Some(values) = any.downcast_ref::<Int32Array>() {
        out.extend(values.iter().flatten().map(|v| v.to_string()));
    } else {
        return Err(array.data_type().to_string());
    }
    Ok(())
}

fn convert_legacy(values: Vec<String>) -> Vec<String> {
    values
        .into_iter()
        .filter_map(|value| match parse_legacy_id(&value) {
            Some(av) => Some(av_to_bv(av)),
            None => {
                warn!("Skipping unparseable legacy id '{}'", value);
                None
            }
        })
        .collect()
}

fn parse_legacy_id(value: &str) -> Option<u64> {
    let digits = value
        .strip_prefix("av")
        .or_else(|| value.strip_prefix("AV"))
        .unwrap_or(value);
    digits.parse().ok()
}

/// Drop empty and repeated ids, keeping the first occurrence
pub fn dedup_preserving_order(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter()
        .filter(|id| !id.is_empty() && seen.insert(id.clone()))
        .collect()
}

/// Shuffle so no upstream ordering biases which candidates get tried first.
/// A seed makes the order reproducible.
pub fn shuffle(ids: &mut [String], seed: Option<u64>) {
    match seed {
        Some(seed) => fastrand::Rng::with_seed(seed).shuffle(ids),
        None => fastrand::shuffle(ids),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow_array::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn write(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_named_column_with_duplicates() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "c.csv", "title,bvid\nx,BV1\ny,BV2\nz,BV1\nw,\n");
        assert_eq!(load_candidates(&path, "bvid").unwrap(), vec!["BV1", "BV2"]);
    }

    #[test]
    fn test_legacy_column_is_converted() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "c.csv", "avid,views\n170001,10\nav2,5\nbad,1\n");
        assert_eq!(
            load_candidates(&path, "bvid").unwrap(),
            vec!["BV17x411w7KC", "BV1xx411c7mD"]
        );
    }

    #[test]
    fn test_headerless_one_per_line() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "c.txt", "BV1\nBV2\nBV3\n");
        assert_eq!(load_candidates(&path, "bvid").unwrap(), vec!["BV1", "BV2", "BV3"]);
    }

    #[test]
    fn test_header_without_id_column_is_error() {
        let dir = TempDir::new().unwrap();
        let path = write(&dir, "c.csv", "title,video_id\nsome title,BV1\nother,BV2\n");
        let err = load_candidates(&path, "bvid").unwrap_err();
        assert!(matches!(err, HarvestError::Config(_)));
        assert!(err.to_string().contains("'bvid'"), "{}", err);
    }

    fn write_parquet(dir: &TempDir, name: &str, column: &str, values: ArrayRef) -> std::path::PathBuf {
        let path = dir.path().join(name);
        let batch = RecordBatch::try_from_iter(vec![
            (column, values),
            ("views", Arc::new(Int64Array::from(vec![10, 20, 30])) as ArrayRef),
        ])
        .unwrap();
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = ArrowWriter::try_new(file, batch.schema(), None).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        path
    }

    #[test]
    fn test_parquet_snapshot_column() {
        let dir = TempDir::new().unwrap();
        let ids = Arc::new(StringArray::from(vec![Some("BV1"), None, Some("BV1")])) as ArrayRef;
        let path = write_parquet(&dir, "step_1_df.parquet", "bvid", ids);
        assert_eq!(load_candidates(&path, "bvid").unwrap(), vec!["BV1"]);
    }

    #[test]
    fn test_parquet_legacy_column_is_converted() {
        let dir = TempDir::new().unwrap();
        let ids = Arc::new(Int64Array::from(vec![170001, 2, 170001])) as ArrayRef;
        let path = write_parquet(&dir, "snapshot.parquet", "avid", ids);
        assert_eq!(
            load_candidates(&path, "bvid").unwrap(),
            vec!["BV17x411w7KC", "BV1xx411c7mD"]
        );
    }

    #[test]
    fn test_parquet_without_id_column_is_error() {
        let dir = TempDir::new().unwrap();
        let titles = Arc::new(StringArray::from(vec!["a", "b", "c"])) as ArrayRef;
        let path = write_parquet(&dir, "snapshot.parquet", "title", titles);
        assert!(matches!(
            load_candidates(&path, "bvid"),
            Err(HarvestError::Config(_))
        ));
    }

    #[test]
    fn test_missing_file_is_error() {
        let dir = TempDir::new().unwrap();
        assert!(load_candidates(&dir.path().join("nope.csv"), "bvid").is_err());
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let ids: Vec<String> = (0..50).map(|i| format!("BV{}", i)).collect();
        let mut a = ids.clone();
        let mut b = ids.clone();
        shuffle(&mut a, Some(7));
        shuffle(&mut b, Some(7));
        assert_eq!(a, b);

        a.sort();
        let mut sorted = ids;
        sorted.sort();
        assert_eq!(a, sorted);
    }
}
