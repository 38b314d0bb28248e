use std::collections::HashSet;
use std::path::Path;

use polars::prelude::*;
use tracing::{debug, info};

use crate::errors::{PipelineError, PipelineResult};
use crate::helper_functions::read_csv;
use crate::symbols::SYMBOL_COLUMN;

pub const CLUSTER_COLUMN: &str = "Cluster";
pub const BARCODE_COLUMN: &str = "Barcode";

pub fn fold_change_column(cluster: &str) -> String {
    format!("Cluster {} Log2 fold change", cluster)
}

pub fn adjusted_p_column(cluster: &str) -> String {
    format!("Cluster {} Adjusted p value", cluster)
}

pub fn coefficient_column(cluster: &str) -> String {
    format!("Cluster {} CD", cluster)
}

/// Per-cluster statistics, decided once when the table is parsed.
///
/// Graph-based clustering from Cell Ranger ships fold change / adjusted p
/// pairs; the characteristic-direction notebook ships a single `CD` score.
#[derive(Debug, Clone, PartialEq)]
pub enum ClusterStatistics {
    Statistical {
        fold_change: Vec<Option<f64>>,
        adjusted_p: Vec<Option<f64>>,
    },
    Coefficient {
        score: Vec<Option<f64>>,
    },
}

impl ClusterStatistics {
    /// An adjusted p value column wins over a `CD` column; with neither the
    /// input is malformed and the whole run stops.
    pub fn from_frame(df: &DataFrame, cluster: &str) -> PipelineResult<Self> {
        let p_col = adjusted_p_column(cluster);
        let cd_col = coefficient_column(cluster);

        if has_column(df, &p_col) {
            let fc_col = fold_change_column(cluster);
            if !has_column(df, &fc_col) {
                return Err(PipelineError::MissingColumn { cluster: cluster.to_string() });
            }
            debug!("Cluster {}: statistical selection on '{}'", cluster, p_col);
            Ok(ClusterStatistics::Statistical {
                fold_change: float_column(df, &fc_col)?,
                adjusted_p: float_column(df, &p_col)?,
            })
        } else if has_column(df, &cd_col) {
            debug!("Cluster {}: coefficient selection on '{}'", cluster, cd_col);
            Ok(ClusterStatistics::Coefficient {
                score: float_column(df, &cd_col)?,
            })
        } else {
            Err(PipelineError::MissingColumn { cluster: cluster.to_string() })
        }
    }

    pub fn method(&self) -> &'static str {
        match self {
            ClusterStatistics::Statistical { .. } => "statistical",
            ClusterStatistics::Coefficient { .. } => "coefficient",
        }
    }
}

fn has_column(df: &DataFrame, name: &str) -> bool {
    df.get_column_names().iter().any(|c| c.as_str() == name)
}

fn float_column(df: &DataFrame, name: &str) -> PolarsResult<Vec<Option<f64>>> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

pub fn load_diff_expression(path: &Path) -> PolarsResult<DataFrame> {
    info!("Reading differential expression from {}", path.display());
    let df = read_csv(path)?;
    info!("Differential expression table: {} features x {} columns", df.height(), df.width());
    Ok(df)
}

/// Cluster membership with `Cluster` cast to string so ids match column names.
pub fn load_clusters(path: &Path) -> PolarsResult<DataFrame> {
    info!("Reading cluster membership from {}", path.display());
    let mut df = read_csv(path)?;
    let clusters = df.column(CLUSTER_COLUMN)?.cast(&DataType::String)?;
    df.with_column(clusters)?;
    Ok(df)
}

/// Distinct cluster ids in order of first appearance.
pub fn cluster_ids(clusters: &DataFrame) -> PolarsResult<Vec<String>> {
    let mut seen = HashSet::new();
    let mut ids = Vec::new();
    for cluster in clusters.column(CLUSTER_COLUMN)?.str()?.into_iter().flatten() {
        if seen.insert(cluster) {
            ids.push(cluster.to_string());
        }
    }
    Ok(ids)
}

/// The resolved `Symbol` column, one entry per feature row.
pub fn resolved_symbols(df: &DataFrame) -> PolarsResult<Vec<Option<String>>> {
    Ok(df
        .column(SYMBOL_COLUMN)?
        .str()?
        .into_iter()
        .map(|s| s.map(str::to_string))
        .collect())
}
