use std::fs;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::aggregate::{aggregate, write_enrichment_table, UnitStatus};
use crate::config::{InputLayout, PipelineConfig, Projection};
use crate::diffexp::{cluster_ids, load_clusters, load_diff_expression, resolved_symbols, ClusterStatistics};
use crate::enrichr::EnrichmentService;
use crate::errors::PipelineResult;
use crate::helper_functions::{merge_projection, read_csv, write_tsv};
use crate::selection::{select, ClusterGeneSet, SelectionParams};
use crate::symbols::SymbolMap;
use polars::prelude::*;

pub const ANNOTATED_TABLE: &str = "df.tsv";
pub const ENRICHMENT_TABLE: &str = "df_enrich.tsv";

#[derive(Debug, Default)]
pub struct PipelineSummary {
    pub clusters: usize,
    pub enrichment_rows: usize,
    pub failed_units: usize,
    pub failed_fetches: usize,
    pub outputs: Vec<PathBuf>,
}

/// Runs the whole pipeline over one analysis directory.
///
/// Inputs are loaded and every cluster's gene sets are selected before any
/// file is written or any Enrichr call is made, so malformed input leaves
/// the output directory untouched.
pub fn run<S>(
    config: &PipelineConfig,
    base_dir: &Path,
    output_dir: &Path,
    service: &S,
) -> PipelineResult<PipelineSummary>
where
    S: EnrichmentService + ?Sized,
{
    let layout = InputLayout::from_base(base_dir);

    let mut diff_expression = load_diff_expression(&layout.diff_expression)?;
    let clusters = load_clusters(&layout.clusters)?;
    let ids = cluster_ids(&clusters)?;
    info!("Found {} clusters: {:?}", ids.len(), ids);

    let symbols = SymbolMap::from_path(&config.gene_info_path_in(base_dir))?;
    if symbols.is_empty() {
        warn!("Symbol lookup is empty, every gene set will come out empty");
    }
    symbols.annotate(&mut diff_expression)?;

    let params = SelectionParams {
        n_genes: config.n_genes,
        significance: config.significance,
    };
    let gene_sets = select_gene_sets(&diff_expression, &ids, &params)?;

    fs::create_dir_all(output_dir)?;
    let mut summary = PipelineSummary {
        clusters: ids.len(),
        ..PipelineSummary::default()
    };

    let annotated_path = output_dir.join(ANNOTATED_TABLE);
    write_tsv(&mut diff_expression, &annotated_path)?;
    summary.outputs.push(annotated_path);
    summary
        .outputs
        .extend(write_projections(&clusters, &layout.projections, output_dir)?);

    let aggregation = aggregate(service, &gene_sets, &config.libraries, config.top_n_results);
    let enrichment_path = output_dir.join(ENRICHMENT_TABLE);
    write_enrichment_table(&aggregation.rows, &enrichment_path)?;
    summary.outputs.push(enrichment_path);

    for unit in &aggregation.units {
        if let UnitStatus::Failed { reason } = &unit.status {
            warn!("cluster {} {} was not enriched: {}", unit.cluster, unit.direction, reason);
        }
    }

    summary.enrichment_rows = aggregation.rows.len();
    summary.failed_units = aggregation.failed_units();
    summary.failed_fetches = aggregation.failed_fetches;
    Ok(summary)
}

/// Parses each cluster's statistics once and selects its gene sets. A
/// cluster without usable columns aborts the run.
pub fn select_gene_sets(
    diff_expression: &DataFrame,
    cluster_ids: &[String],
    params: &SelectionParams,
) -> PipelineResult<Vec<ClusterGeneSet>> {
    let symbols = resolved_symbols(diff_expression)?;
    cluster_ids
        .iter()
        .map(|cluster| -> PipelineResult<ClusterGeneSet> {
            let stats = ClusterStatistics::from_frame(diff_expression, cluster)?;
            Ok(select(cluster, &stats, &symbols, params))
        })
        .collect()
}

/// Merges cluster membership into each projection; optional projections
/// that are absent are skipped.
fn write_projections(
    clusters: &DataFrame,
    projections: &[Projection],
    output_dir: &Path,
) -> PipelineResult<Vec<PathBuf>> {
    let mut written = Vec::new();
    for projection in projections {
        if !projection.required && !projection.path.exists() {
            warn!("No projection at {}, skipping {}", projection.path.display(), projection.output_name);
            continue;
        }
        info!("Reading projection from {}", projection.path.display());
        let coordinates = read_csv(&projection.path)?;
        let mut merged = merge_projection(clusters, &coordinates)?;
        let path = output_dir.join(projection.output_name);
        write_tsv(&mut merged, &path)?;
        written.push(path);
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::tests::FakeEnrichr;
    use crate::config::LibraryCategory;
    use crate::errors::PipelineError;

    fn write(base: &Path, relative: &str, contents: &str) {
        let path = base.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// Cluster 0 carries fold change / p value pairs, cluster 1 only a CD score.
    fn analysis_dir(clusters: &str) -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path();
        write(
            base,
            "diffexp/graphclust/differential_expression.csv",
            "Feature Name,Cluster 0 Log2 fold change,Cluster 0 Adjusted p value,Cluster 1 CD\n\
             Trp53,2.5,0.001,0.8\n\
             Mdm2,1.2,0.02,-0.4\n\
             Cdkn1a,-3.0,0.004,0.3\n\
             Gm42418,4.0,0.0001,-0.9\n\
             Actb,0.1,0.6,0.05\n",
        );
        write(base, "clustering/graphclust/clusters.csv", clusters);
        write(
            base,
            "umap/2_components/projection.csv",
            "Barcode,UMAP-1,UMAP-2\nAAAC-1,0.5,1.5\nAAAG-1,-2.0,0.25\nAAAT-1,3.0,-1.0\n",
        );
        write(
            base,
            "pca/10_components/projection.csv",
            "Barcode,PC-1,PC-2\nAAAC-1,0.1,0.2\nAAAG-1,0.3,0.4\nAAAT-1,0.5,0.6\n",
        );
        write(
            base,
            "Homo_sapiens.gene_info",
            "#tax_id\tGeneID\tSymbol\tSynonyms\n\
             9606\t7157\tTP53\tP53|TRP53\n\
             9606\t4193\tMDM2\tHDMX|hdm2\n\
             9606\t1026\tCDKN1A\tP21|CIP1\n\
             9606\t60\tACTB\t-\n",
        );
        dir
    }

    fn test_config() -> PipelineConfig {
        PipelineConfig {
            gene_info_path: PathBuf::from("Homo_sapiens.gene_info"),
            pacing_secs: 0.0,
            libraries: vec![LibraryCategory::new("Pathways", &["WikiPathways_2019_Mouse", "KEGG_2019_Mouse"])],
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn runs_end_to_end() {
        let input = analysis_dir("Barcode,Cluster\nAAAC-1,0\nAAAG-1,1\nAAAT-1,0\n");
        let output = tempfile::tempdir().unwrap();
        let service = FakeEnrichr::default().failing_library("KEGG_2019_Mouse");

        let summary = run(&test_config(), input.path(), output.path(), &service).unwrap();

        assert_eq!(summary.clusters, 2);
        // 0 up [TP53, MDM2], 0 down [CDKN1A], 1 up [TP53, CDKN1A, ACTB], 1 down [MDM2]
        assert_eq!(summary.enrichment_rows, 4 * 5);
        assert_eq!(summary.failed_fetches, 4);
        assert_eq!(summary.failed_units, 0);

        let calls = service.calls.borrow();
        assert_eq!(calls[0], "submit cluster 0 up");
        assert_eq!(calls.iter().filter(|c| c.starts_with("submit")).count(), 4);

        let annotated = fs::read_to_string(output.path().join("df.tsv")).unwrap();
        assert!(annotated.lines().next().unwrap().ends_with("\tSymbol"));
        assert!(annotated.lines().any(|l| l.starts_with("Trp53\t") && l.ends_with("\tTP53")));
        assert!(annotated.lines().any(|l| l.starts_with("Gm42418\t") && l.ends_with('\t')));

        let enrich = fs::read_to_string(output.path().join("df_enrich.tsv")).unwrap();
        assert_eq!(enrich.lines().count(), 1 + 20);
        assert!(!enrich.contains("KEGG_2019_Mouse"));

        assert!(output.path().join("df_umap.tsv").exists());
        assert!(output.path().join("df_pca.tsv").exists());
        assert!(!output.path().join("df_tsne.tsv").exists());
    }

    #[test]
    fn selected_sets_follow_cluster_order() {
        let input = analysis_dir("Barcode,Cluster\nAAAC-1,1\nAAAG-1,0\n");
        let mut df = load_diff_expression(&InputLayout::from_base(input.path()).diff_expression).unwrap();
        SymbolMap::from_path(&input.path().join("Homo_sapiens.gene_info"))
            .unwrap()
            .annotate(&mut df)
            .unwrap();

        let sets = select_gene_sets(&df, &["1".to_string(), "0".to_string()], &SelectionParams::default()).unwrap();
        assert_eq!(sets[0].cluster, "1");
        assert_eq!(sets[0].up, vec!["TP53", "CDKN1A", "ACTB"]);
        assert_eq!(sets[0].down, vec!["MDM2"]);
        assert_eq!(sets[1].up, vec!["TP53", "MDM2"]);
        assert_eq!(sets[1].down, vec!["CDKN1A"]);
    }

    #[test]
    fn missing_cluster_columns_abort_before_any_output() {
        let input = analysis_dir("Barcode,Cluster\nAAAC-1,0\nAAAG-1,5\n");
        let output = tempfile::tempdir().unwrap();
        let out_dir = output.path().join("out");
        let service = FakeEnrichr::default();

        match run(&test_config(), input.path(), &out_dir, &service) {
            Err(PipelineError::MissingColumn { cluster }) => assert_eq!(cluster, "5"),
            other => panic!("expected MissingColumn, got {:?}", other),
        }
        assert!(service.calls.borrow().is_empty());
        assert!(!out_dir.exists());
    }
}
