// src/enrichr.rs

use std::thread;
use std::time::Duration;

use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, Response};
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, USER_AGENT};
use serde::Deserialize;
use serde_json::Value;
use tracing::debug;

use crate::config::PipelineConfig;
use crate::errors::EnrichmentError;

/// An uploaded gene list: the id to query libraries with and a link to share.
#[derive(Debug, Clone, PartialEq)]
pub struct Submission {
    pub user_list_id: u64,
    pub short_id: String,
    pub link: String,
}

#[derive(Deserialize, Debug)]
struct AddListResponse {
    #[serde(rename = "userListId")]
    user_list_id: u64,
    #[serde(rename = "shortId")]
    short_id: String,
}

/// One row of an Enrichr library result, in the order the service ranks them.
#[derive(Debug, Clone, PartialEq)]
pub struct EnrichmentTerm {
    pub rank: i64,
    pub term: String,
    pub pvalue: f64,
    pub zscore: f64,
    pub combined_score: f64,
    pub overlapping_genes: Vec<String>,
    pub adjusted_pvalue: f64,
}

/// The two Enrichr operations the pipeline needs. Implementations make one
/// attempt per call and never retry.
pub trait EnrichmentService {
    fn submit(&self, genes: &[String], description: &str) -> Result<Submission, EnrichmentError>;

    fn fetch_top_results(&self, user_list_id: u64, library: &str) -> Result<Vec<EnrichmentTerm>, EnrichmentError>;
}

pub struct EnrichrClient {
    client: Client,
    base_url: String,
    pacing: Duration,
}

impl EnrichrClient {
    pub fn new(base_url: &str, pacing: Duration, timeout: Duration) -> Result<Self, EnrichmentError> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(USER_AGENT, HeaderValue::from_static("cluster_enrichment/0.1"));

        let client = Client::builder()
            .default_headers(headers)
            .timeout(timeout)
            .build()?;

        Ok(Self::with_client(client, base_url, pacing))
    }

    pub fn from_config(config: &PipelineConfig) -> Result<Self, EnrichmentError> {
        Self::new(&config.enrichr_url, config.pacing(), config.request_timeout())
    }

    pub fn with_client(client: Client, base_url: &str, pacing: Duration) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            pacing,
        }
    }

    pub fn share_link(&self, short_id: &str) -> String {
        format!("{}/enrich?dataset={}", self.base_url, short_id)
    }

    /// Enrichr throttles aggressively; sleep on both sides of every call.
    fn paced<T>(&self, call: impl FnOnce() -> Result<T, EnrichmentError>) -> Result<T, EnrichmentError> {
        thread::sleep(self.pacing);
        let result = call();
        thread::sleep(self.pacing);
        result
    }
}

impl EnrichmentService for EnrichrClient {
    fn submit(&self, genes: &[String], description: &str) -> Result<Submission, EnrichmentError> {
        let url = format!("{}/addList", self.base_url);
        debug!("POST {} ({} genes, '{}')", url, genes.len(), description);

        let added: AddListResponse = self.paced(|| {
            let form = Form::new()
                .text("list", genes.join("\n"))
                .text("description", description.to_string());
            let response = self.client.post(&url).multipart(form).send()?;
            let response = ensure_success(response, |status, body| EnrichmentError::Submission { status, body })?;
            Ok(response.json()?)
        })?;

        Ok(Submission {
            user_list_id: added.user_list_id,
            link: self.share_link(&added.short_id),
            short_id: added.short_id,
        })
    }

    fn fetch_top_results(&self, user_list_id: u64, library: &str) -> Result<Vec<EnrichmentTerm>, EnrichmentError> {
        let url = format!("{}/enrich", self.base_url);
        debug!("GET {} userListId={} backgroundType={}", url, user_list_id, library);

        let payload: Value = self.paced(|| {
            let response = self
                .client
                .get(&url)
                .query(&[("userListId", user_list_id.to_string()), ("backgroundType", library.to_string())])
                .send()?;
            let response = ensure_success(response, |status, body| EnrichmentError::Fetch { status, body })?;
            Ok(response.json()?)
        })?;

        parse_enrich_response(&payload, library)
    }
}

fn ensure_success(
    response: Response,
    failure: impl FnOnce(u16, String) -> EnrichmentError,
) -> Result<Response, EnrichmentError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text()?;
    Err(failure(status, body))
}

/// Pulls `payload[library]` apart. Each row is
/// `[rank, term, pvalue, zscore, combined score, genes, adjusted pvalue, ...]`;
/// trailing legacy columns are ignored.
pub fn parse_enrich_response(payload: &Value, library: &str) -> Result<Vec<EnrichmentTerm>, EnrichmentError> {
    let rows = payload
        .get(library)
        .and_then(Value::as_array)
        .ok_or_else(|| EnrichmentError::MalformedResponse(format!("no result array for library {}", library)))?;

    rows.iter()
        .enumerate()
        .map(|(i, row)| parse_row(row).ok_or_else(|| {
            EnrichmentError::MalformedResponse(format!("row {} of {} is not a valid result row: {}", i, library, row))
        }))
        .collect()
}

fn parse_row(row: &Value) -> Option<EnrichmentTerm> {
    let cells = row.as_array()?;
    if cells.len() < 7 {
        return None;
    }
    let rank = cells[0].as_i64().or_else(|| cells[0].as_f64().map(|r| r as i64))?;
    let overlapping_genes = cells[5]
        .as_array()?
        .iter()
        .map(|g| g.as_str().map(str::to_string))
        .collect::<Option<Vec<_>>>()?;

    Some(EnrichmentTerm {
        rank,
        term: cells[1].as_str()?.to_string(),
        pvalue: cells[2].as_f64()?,
        zscore: cells[3].as_f64()?,
        combined_score: cells[4].as_f64()?,
        overlapping_genes,
        adjusted_pvalue: cells[6].as_f64()?,
    })
}
