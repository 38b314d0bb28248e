//! Drives Enrichr over every (cluster, direction, category, library)
//! combination and collects the top rows into one table.
//!
//! Work is laid out as data first: one submission unit per non-empty gene
//! set, then one [`FetchRequest`] per catalog library for each unit that was
//! submitted. Each request resolves to its own [`FetchOutcome`], so a failing
//! library never touches its siblings and the row order always follows the
//! catalog order.

use std::path::Path;

use tracing::{error, info, warn};

use crate::config::LibraryCatalog;
use crate::enrichr::{EnrichmentService, EnrichmentTerm, Submission};
use crate::errors::{EnrichmentError, PipelineResult};
use crate::selection::{ClusterGeneSet, Direction};

pub const ENRICHMENT_COLUMNS: [&str; 12] = [
    "rank",
    "term",
    "pvalue",
    "zscore",
    "combinedscore",
    "overlapping_genes",
    "adjusted_pvalue",
    "link",
    "library",
    "category",
    "direction",
    "cluster",
];

#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentResultRow {
    pub rank: i64,
    pub term: String,
    pub pvalue: f64,
    pub zscore: f64,
    pub combined_score: f64,
    pub overlapping_genes: Vec<String>,
    pub adjusted_pvalue: f64,
    pub link: String,
    pub library: String,
    pub category: String,
    pub direction: Direction,
    pub cluster: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FetchRequest<'a> {
    pub cluster: &'a str,
    pub direction: Direction,
    pub category: &'a str,
    pub library: &'a str,
}

#[derive(Debug)]
pub struct FetchOutcome<'a> {
    pub request: FetchRequest<'a>,
    pub result: Result<Vec<EnrichmentTerm>, EnrichmentError>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnitStatus {
    Submitted { link: String },
    Failed { reason: String },
}

/// What happened to one (cluster, direction) gene list.
#[derive(Debug, Clone, PartialEq)]
pub struct UnitReport {
    pub cluster: String,
    pub direction: Direction,
    pub status: UnitStatus,
}

#[derive(Debug, Default)]
pub struct Aggregation {
    pub rows: Vec<EnrichmentResultRow>,
    pub units: Vec<UnitReport>,
    pub failed_fetches: usize,
}

impl Aggregation {
    pub fn failed_units(&self) -> usize {
        self.units
            .iter()
            .filter(|u| matches!(u.status, UnitStatus::Failed { .. }))
            .count()
    }
}

/// Every library of the catalog, in traversal order, for one submitted list.
pub fn fetch_requests<'a>(
    cluster: &'a str,
    direction: Direction,
    catalog: &'a LibraryCatalog,
) -> Vec<FetchRequest<'a>> {
    catalog
        .iter()
        .flat_map(|category| {
            category.libraries.iter().map(move |library| FetchRequest {
                cluster,
                direction,
                category: &category.name,
                library,
            })
        })
        .collect()
}

pub fn aggregate<S>(
    service: &S,
    gene_sets: &[ClusterGeneSet],
    catalog: &LibraryCatalog,
    top_n_results: usize,
) -> Aggregation
where
    S: EnrichmentService + ?Sized,
{
    let mut aggregation = Aggregation::default();

    for gene_set in gene_sets {
        for direction in Direction::ALL {
            let genes = gene_set.genes(direction);
            if genes.is_empty() {
                info!("cluster {} {}: empty, skipping", gene_set.cluster, direction);
                continue;
            }

            let description = format!("cluster {} {}", gene_set.cluster, direction);
            let submission = match service.submit(genes, &description) {
                Ok(submission) => submission,
                Err(e) => {
                    error!("{} could not be submitted, skipping its libraries: {}", description, e);
                    aggregation.units.push(UnitReport {
                        cluster: gene_set.cluster.clone(),
                        direction,
                        status: UnitStatus::Failed { reason: e.to_string() },
                    });
                    continue;
                }
            };
            info!("{}: list {} at {}", description, submission.short_id, submission.link);

            let outcomes: Vec<FetchOutcome> = fetch_requests(&gene_set.cluster, direction, catalog)
                .into_iter()
                .map(|request| FetchOutcome {
                    request,
                    result: service.fetch_top_results(submission.user_list_id, request.library),
                })
                .collect();

            for outcome in outcomes {
                match outcome.result {
                    Ok(terms) => aggregation
                        .rows
                        .extend(top_rows(terms, top_n_results, &submission, &outcome.request)),
                    Err(e) => {
                        warn!(
                            "{}: {} {} {} cluster {} failed, continuing: {}",
                            submission.link,
                            outcome.request.library,
                            outcome.request.category,
                            outcome.request.direction,
                            outcome.request.cluster,
                            e
                        );
                        aggregation.failed_fetches += 1;
                    }
                }
            }

            aggregation.units.push(UnitReport {
                cluster: gene_set.cluster.clone(),
                direction,
                status: UnitStatus::Submitted { link: submission.link.clone() },
            });
        }
    }

    aggregation
}

/// Lowest p values first, cut to `top_n_results`, stamped with where they came from.
pub fn top_rows(
    mut terms: Vec<EnrichmentTerm>,
    top_n_results: usize,
    submission: &Submission,
    request: &FetchRequest,
) -> Vec<EnrichmentResultRow> {
    terms.sort_by(|a, b| a.pvalue.total_cmp(&b.pvalue));
    terms
        .into_iter()
        .take(top_n_results)
        .map(|t| EnrichmentResultRow {
            rank: t.rank,
            term: t.term,
            pvalue: t.pvalue,
            zscore: t.zscore,
            combined_score: t.combined_score,
            overlapping_genes: t.overlapping_genes,
            adjusted_pvalue: t.adjusted_pvalue,
            link: submission.link.clone(),
            library: request.library.to_string(),
            category: request.category.to_string(),
            direction: request.direction,
            cluster: request.cluster.to_string(),
        })
        .collect()
}

/// Writes `df_enrich.tsv`. The header is written even when nothing succeeded.
pub fn write_enrichment_table(rows: &[EnrichmentResultRow], path: &Path) -> PipelineResult<()> {
    let mut wtr = csv::WriterBuilder::new().delimiter(b'\t').from_path(path)?;
    wtr.write_record(ENRICHMENT_COLUMNS)?;

    for row in rows {
        wtr.write_record(&[
            row.rank.to_string(),
            row.term.clone(),
            row.pvalue.to_string(),
            row.zscore.to_string(),
            row.combined_score.to_string(),
            row.overlapping_genes.join(";"),
            row.adjusted_pvalue.to_string(),
            row.link.clone(),
            row.library.clone(),
            row.category.clone(),
            row.direction.to_string(),
            row.cluster.clone(),
        ])?;
    }
    wtr.flush()?;
    info!("Wrote {} enrichment rows to {}", rows.len(), path.display());
    Ok(())
}
