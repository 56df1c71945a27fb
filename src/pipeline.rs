use std::fmt;
use std::time::Instant;

use serde::Serialize;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::db;
use crate::error::{NetworkError, ParseError, StorageError};
use crate::fetch::{Fetcher, RawPage};
use crate::parser;
use crate::parser::normalize::normalize;

/// Anything that can hand the pipeline a freshly retrieved page.
pub trait PageSource {
    async fn fetch_page(&self) -> Result<RawPage, NetworkError>;
}

impl PageSource for Fetcher {
    async fn fetch_page(&self) -> Result<RawPage, NetworkError> {
        self.fetch().await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Fetching,
    Extracting,
    Normalizing,
    Persisting,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Fetching => "fetching",
            Stage::Extracting => "extracting",
            Stage::Normalizing => "normalizing",
            Stage::Persisting => "persisting",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum StageError {
    #[error(transparent)]
    Network(#[from] NetworkError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}

/// A run stopped at `stage`; `cause` is that stage's own error.
#[derive(Debug, Error)]
#[error("pipeline failed while {stage}")]
pub struct PipelineError {
    pub stage: Stage,
    #[source]
    pub cause: StageError,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub records_persisted: usize,
}

/// Fetch → extract → normalize → persist, one stage after another.
pub struct Pipeline<S> {
    source: S,
    store_uri: String,
    collection: String,
}

impl<S: PageSource> Pipeline<S> {
    pub fn new(source: S, store_uri: impl Into<String>) -> Self {
        Pipeline {
            source,
            store_uri: store_uri.into(),
            collection: db::DEPARTURES.to_string(),
        }
    }

    #[allow(dead_code)]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    pub async fn run(&self) -> Result<RunSummary, PipelineError> {
        let t0 = Instant::now();

        enter(Stage::Fetching);
        let page = self
            .source
            .fetch_page()
            .await
            .map_err(|e| failed(Stage::Fetching, e))?;

        enter(Stage::Extracting);
        let raw = parser::extract(page).map_err(|e| failed(Stage::Extracting, e))?;
        info!("Extracted {} flight rows", raw.len());

        enter(Stage::Normalizing);
        let clean = normalize(raw);
        let empty = clean.iter().filter(|r| r.is_empty()).count();
        if empty > 0 {
            warn!("{} rows had no usable fields and are stored as empty documents", empty);
        }

        enter(Stage::Persisting);
        let records_persisted = db::persist(&self.store_uri, &clean, &self.collection)
            .map_err(|e| failed(Stage::Persisting, e))?;

        info!(
            records_persisted,
            "Pipeline done in {:.1}s",
            t0.elapsed().as_secs_f64()
        );
        Ok(RunSummary { records_persisted })
    }
}

fn enter(stage: Stage) {
    info!(%stage, "Pipeline stage");
}

fn failed(stage: Stage, cause: impl Into<StageError>) -> PipelineError {
    let cause = cause.into();
    error!(%stage, "Pipeline failed: {}", cause);
    PipelineError { stage, cause }
}
