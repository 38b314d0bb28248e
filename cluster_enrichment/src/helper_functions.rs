use std::fs::File;
use std::path::{Path, PathBuf};

use polars::prelude::*;
use tracing::{error, info};

use crate::diffexp::BARCODE_COLUMN;

pub fn read_csv(file_path: &Path) -> PolarsResult<DataFrame> {
    CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(PathBuf::from(file_path)))?
        .finish()
}

/// Writes a tab-separated file the dashboard can load with `sep='\t'`.
pub fn write_tsv(df: &mut DataFrame, path: &Path) -> PolarsResult<()> {
    let mut file = File::create(path)?;
    CsvWriter::new(&mut file)
        .include_header(true)
        .with_separator(b'\t')
        .finish(df)
        .map_err(|e| {
            error!("Failed to write {}: {}", path.display(), e);
            e
        })?;
    info!("Wrote {} rows to {}", df.height(), path.display());
    Ok(())
}

/// Inner join of cluster membership with a projection on `Barcode`.
pub fn merge_projection(clusters: &DataFrame, projection: &DataFrame) -> PolarsResult<DataFrame> {
    clusters.join(
        projection,
        [BARCODE_COLUMN],
        [BARCODE_COLUMN],
        JoinArgs::from(JoinType::Inner),
        None,
    )
}
