use std::env;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::info;

use crate::errors::{PipelineError, PipelineResult};

pub const DEFAULT_ENRICHR_URL: &str = "https://maayanlab.cloud/Enrichr";
pub const DEFAULT_GENE_INFO: &str = "Homo_sapiens.gene_info.gz";

/// One category of the library catalog, e.g. "Pathways" → WikiPathways libraries.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LibraryCategory {
    pub name: String,
    pub libraries: Vec<String>,
}

impl LibraryCategory {
    pub fn new(name: &str, libraries: &[&str]) -> Self {
        Self {
            name: name.to_string(),
            libraries: libraries.iter().map(|l| l.to_string()).collect(),
        }
    }
}

/// Ordered (category → libraries) catalog. Traversal order of the catalog is
/// the row order of the enrichment table.
pub type LibraryCatalog = Vec<LibraryCategory>;

pub fn default_catalog() -> LibraryCatalog {
    vec![
        LibraryCategory::new("Diseases", &["UK_Biobank_GWAS_v1", "GWAS_Catalog_2019", "DisGeNET"]),
        LibraryCategory::new(
            "Phenotypes",
            &["MGI_Mammalian_Phenotype_Level_4_2019", "Human_Phenotype_Ontology"],
        ),
        LibraryCategory::new("Cell Type", &["Human_Gene_Atlas", "Mouse_Gene_Atlas", "ARCHS4_Tissues"]),
        LibraryCategory::new("Pathways", &["WikiPathways_2019_Mouse", "WikiPathways_2019_Human"]),
        LibraryCategory::new(
            "Transcription",
            &["ARCHS4_TFs_Coexp", "ENCODE_and_ChEA_Consensus_TFs_from_ChIP-X"],
        ),
    ]
}

/// Run parameters. Every field has a default so a config file only needs to
/// name what it changes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Maximum genes per up/down set.
    pub n_genes: usize,
    /// Rows kept per (cluster, direction, library).
    pub top_n_results: usize,
    /// Adjusted p value cutoff for the statistical selection method.
    pub significance: f64,
    pub enrichr_url: String,
    /// Pause before and after every Enrichr call.
    pub pacing_secs: f64,
    pub request_timeout_secs: u64,
    /// NCBI gene_info table, relative paths resolve against the input directory.
    pub gene_info_path: PathBuf,
    pub libraries: LibraryCatalog,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            n_genes: 250,
            top_n_results: 5,
            significance: 0.05,
            enrichr_url: DEFAULT_ENRICHR_URL.to_string(),
            pacing_secs: 1.0,
            request_timeout_secs: 120,
            gene_info_path: PathBuf::from(DEFAULT_GENE_INFO),
            libraries: default_catalog(),
        }
    }
}

impl PipelineConfig {
    /// Reads an optional JSON config, then applies `ENRICHR_URL` and
    /// `GENE_INFO_PATH` from the environment.
    pub fn load(path: Option<&Path>) -> PipelineResult<Self> {
        let mut config = match path {
            Some(path) => {
                info!("Reading configuration from {}", path.display());
                let reader = BufReader::new(File::open(path)?);
                serde_json::from_reader(reader)?
            }
            None => PipelineConfig::default(),
        };

        if let Ok(url) = env::var("ENRICHR_URL") {
            config.enrichr_url = url;
        }
        if let Some(gene_info) = env::var_os("GENE_INFO_PATH") {
            config.gene_info_path = PathBuf::from(gene_info);
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> PipelineResult<()> {
        if self.n_genes == 0 {
            return Err(PipelineError::Config("n_genes must be positive".into()));
        }
        if self.top_n_results == 0 {
            return Err(PipelineError::Config("top_n_results must be positive".into()));
        }
        if !(0.0..=1.0).contains(&self.significance) {
            return Err(PipelineError::Config(format!(
                "significance must lie in [0, 1], got {}",
                self.significance
            )));
        }
        if !self.pacing_secs.is_finite() || self.pacing_secs < 0.0 {
            return Err(PipelineError::Config(format!(
                "pacing_secs must be a non-negative number, got {}",
                self.pacing_secs
            )));
        }
        Ok(())
    }

    pub fn pacing(&self) -> Duration {
        Duration::from_secs_f64(self.pacing_secs)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn gene_info_path_in(&self, base_dir: &Path) -> PathBuf {
        if self.gene_info_path.is_absolute() {
            self.gene_info_path.clone()
        } else {
            base_dir.join(&self.gene_info_path)
        }
    }
}

/// Where the upstream analysis leaves its files (10x `analysis/` layout).
#[derive(Debug, Clone)]
pub struct InputLayout {
    pub diff_expression: PathBuf,
    pub clusters: PathBuf,
    pub projections: Vec<Projection>,
}

/// A 2D/PCA coordinate table and the dashboard file it is merged into.
#[derive(Debug, Clone)]
pub struct Projection {
    pub path: PathBuf,
    pub output_name: &'static str,
    pub required: bool,
}

impl InputLayout {
    pub fn from_base(base: &Path) -> Self {
        Self {
            diff_expression: base.join("diffexp/graphclust/differential_expression.csv"),
            clusters: base.join("clustering/graphclust/clusters.csv"),
            projections: vec![
                Projection {
                    path: base.join("umap/2_components/projection.csv"),
                    output_name: "df_umap.tsv",
                    required: true,
                },
                Projection {
                    path: base.join("tsne/2_components/projection.csv"),
                    output_name: "df_tsne.tsv",
                    required: false,
                },
                Projection {
                    path: base.join("pca/10_components/projection.csv"),
                    output_name: "df_pca.tsv",
                    required: false,
                },
            ],
        }
    }
}
