//! Canonical gene symbols from the NCBI `gene_info` table.
//!
//! Every official symbol and each of its synonyms is registered, uppercased,
//! as a key pointing at the uppercased official symbol. When two genes claim
//! the same synonym the record read later wins.

use std::collections::HashMap;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use flate2::read::GzDecoder;
use polars::prelude::*;
use serde::Deserialize;
use tracing::{debug, info};

use crate::errors::PipelineResult;

/// `gene_info` marks empty cells with a dash.
const MISSING: &str = "-";
pub const FEATURE_COLUMN: &str = "Feature Name";
pub const SYMBOL_COLUMN: &str = "Symbol";

/// The two `gene_info` columns the lookup needs; the rest are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct GeneInfoRecord {
    #[serde(rename = "Symbol")]
    pub symbol: String,
    #[serde(rename = "Synonyms", default)]
    pub synonyms: String,
}

impl GeneInfoRecord {
    fn symbol(&self) -> Option<&str> {
        present(&self.symbol)
    }

    fn synonyms(&self) -> impl Iterator<Item = &str> {
        present(&self.synonyms)
            .into_iter()
            .flat_map(|s| s.split('|'))
            .filter_map(present)
    }
}

fn present(value: &str) -> Option<&str> {
    let value = value.trim();
    if value.is_empty() || value == MISSING {
        None
    } else {
        Some(value)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SymbolMap {
    lookup: HashMap<String, String>,
}

impl SymbolMap {
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = GeneInfoRecord>,
    {
        let mut lookup = HashMap::new();
        for record in records {
            let Some(symbol) = record.symbol() else {
                debug!("Skipping gene_info record without a symbol");
                continue;
            };
            let canonical = symbol.to_uppercase();
            for key in std::iter::once(symbol).chain(record.synonyms()) {
                lookup.insert(key.to_uppercase(), canonical.clone());
            }
        }
        Self { lookup }
    }

    /// Reads a tab-separated `gene_info` file, gunzipping it when the name ends in `.gz`.
    pub fn from_path(path: &Path) -> PipelineResult<Self> {
        info!("Reading gene symbols from {}", path.display());
        let file = BufReader::new(File::open(path)?);
        let reader: Box<dyn Read> = if path.extension().is_some_and(|ext| ext == "gz") {
            Box::new(GzDecoder::new(file))
        } else {
            Box::new(file)
        };
        Self::from_reader(reader)
    }

    pub fn from_reader<R: Read>(reader: R) -> PipelineResult<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b'\t')
            .quoting(false)
            .from_reader(reader);
        let records = rdr
            .deserialize::<GeneInfoRecord>()
            .collect::<Result<Vec<_>, _>>()?;
        let map = Self::from_records(records);
        info!("Symbol lookup holds {} keys", map.len());
        Ok(map)
    }

    /// Case-insensitive exact match; no fuzzy or prefix matching.
    pub fn resolve(&self, raw: &str) -> Option<&str> {
        self.lookup.get(&raw.to_uppercase()).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lookup.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lookup.is_empty()
    }

    /// Adds a `Symbol` column resolved from `Feature Name`.
    pub fn annotate(&self, df: &mut DataFrame) -> PolarsResult<()> {
        let features = df.column(FEATURE_COLUMN)?.str()?;
        let symbols: Vec<Option<String>> = features
            .into_iter()
            .map(|feature| feature.and_then(|f| self.resolve(f)).map(str::to_string))
            .collect();

        let resolved = symbols.iter().filter(|s| s.is_some()).count();
        info!("Resolved {} of {} features to NCBI symbols", resolved, symbols.len());

        df.with_column(Series::new(SYMBOL_COLUMN.into(), symbols))?;
        Ok(())
    }
}
