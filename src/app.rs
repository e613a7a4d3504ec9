use std::thread;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::config::Settings;
use crate::domain::{ErrorRecord, MintId, OnChainRecord, OutputRecord};
use crate::error::GibError;
use crate::image::ImageClient;
use crate::offchain::OffChainClient;
use crate::onchain::ChainClient;
use crate::queue::{AttemptOutcome, PendingSet};
use crate::store::{Dataset, RunLayout, Zone};

#[derive(Debug, Clone)]
pub struct RunOptions {
    pub include_images: bool,
    pub max_attempts: Option<u32>,
    pub pause_after_success: Duration,
}

impl RunOptions {
    pub fn from_settings(settings: &Settings, include_images: bool) -> Self {
        Self {
            include_images,
            max_attempts: settings.max_attempts,
            pause_after_success: settings.pause_after_success(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct RunSummary {
    pub total: usize,
    pub passes: u32,
    pub succeeded: Vec<String>,
    pub abandoned: Vec<String>,
    pub error_rows: u64,
    pub unrecorded_errors: u64,
}

#[derive(Debug, Clone)]
pub struct ProgressEvent {
    pub message: String,
    pub elapsed: Option<Duration>,
}

pub trait ProgressSink {
    fn event(&self, event: ProgressEvent);
}

/// Pipeline step at which a mint failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Identify,
    Resolve,
    Metadata,
    Artifact,
    Image,
    Record,
}

impl Stage {
    pub fn reason(&self, error: &GibError) -> &'static str {
        match (self, error) {
            (Stage::Identify, _) => "invalid mint identifier",
            (Stage::Resolve, GibError::Deserialization(_)) => "failed to parse metadata account",
            (Stage::Resolve, _) => "failed to get metadata account",
            (Stage::Metadata, GibError::Parse(_)) => "failed to decode metadata",
            (Stage::Metadata, _) => "error in metadata GET",
            (Stage::Artifact, _) => "failed to save metadata",
            (Stage::Image, _) => "error in downloading image",
            (Stage::Record, _) => "failed to append mint info",
        }
    }
}

#[derive(Debug)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: GibError,
}

impl StageFailure {
    pub fn to_record(&self, mint: &str) -> ErrorRecord {
        ErrorRecord {
            token_id: mint.to_string(),
            reason: self.stage.reason(&self.error).to_string(),
            detail: Some(self.error.to_string()),
        }
    }
}

trait AtStage<T> {
    fn at(self, stage: Stage) -> Result<T, StageFailure>;
}

impl<T> AtStage<T> for Result<T, GibError> {
    fn at(self, stage: Stage) -> Result<T, StageFailure> {
        self.map_err(|error| StageFailure { stage, error })
    }
}

/// Drives every pending mint through resolve → fetch → persist until the
/// pending set is empty.
pub struct App<C: ChainClient, M: OffChainClient, I: ImageClient> {
    layout: RunLayout,
    success: Dataset,
    errors: Dataset,
    chain: C,
    offchain: M,
    images: I,
    options: RunOptions,
}

impl<C: ChainClient, M: OffChainClient, I: ImageClient> App<C, M, I> {
    pub fn new(
        layout: RunLayout,
        zone: Zone,
        chain: C,
        offchain: M,
        images: I,
        options: RunOptions,
    ) -> Self {
        Self {
            success: layout.success_dataset(zone),
            errors: layout.error_dataset(zone),
            layout,
            chain,
            offchain,
            images,
            options,
        }
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    /// Only a failure to create the run directory aborts the run. Every
    /// per-mint failure becomes an error row and the mint is retried on the
    /// next pass. With no attempt ceiling a mint that always fails keeps the
    /// loop going forever.
    pub fn run(
        &self,
        pending: &mut PendingSet,
        sink: &dyn ProgressSink,
    ) -> Result<RunSummary, GibError> {
        let mut summary = RunSummary {
            total: pending.len(),
            ..RunSummary::default()
        };
        if pending.is_empty() {
            return Ok(summary);
        }

        let run_dir = self.layout.ensure_run_dir()?;
        tracing::info!(%run_dir, total = summary.total, "starting run");

        while !pending.is_empty() {
            summary.passes += 1;
            let batch = pending.ids();
            for (index, id) in batch.iter().enumerate() {
                sink.event(ProgressEvent {
                    message: format!(
                        "pass={} working on mint {} out of a current total of {} (original total {}): {id}",
                        summary.passes,
                        index + 1,
                        pending.len(),
                        summary.total
                    ),
                    elapsed: None,
                });

                let start = Instant::now();
                match self.process(id) {
                    Ok(_) => {
                        pending.complete(id);
                        summary.succeeded.push(id.clone());
                        let message = if self.options.include_images {
                            "successfully grabbed metadata and image"
                        } else {
                            "successfully grabbed metadata"
                        };
                        sink.event(ProgressEvent {
                            message: format!("{message}: {id}"),
                            elapsed: Some(start.elapsed()),
                        });
                        if !self.options.pause_after_success.is_zero() {
                            thread::sleep(self.options.pause_after_success);
                        }
                    }
                    Err(failure) => {
                        self.record_failure(id, &failure, &mut summary, sink);
                        if let Some(AttemptOutcome::Abandoned { failures }) =
                            pending.record_failure(id, self.options.max_attempts)
                        {
                            tracing::warn!(mint = %id, failures, "giving up on mint");
                            sink.event(ProgressEvent {
                                message: format!("giving up on {id} after {failures} attempts"),
                                elapsed: None,
                            });
                            summary.abandoned.push(id.clone());
                        }
                    }
                }
            }
        }

        Ok(summary)
    }

    /// Runs one mint end to end. Files are staged and only moved into place
    /// once every required download succeeded; the success row comes last.
    pub fn process(&self, id: &str) -> Result<OutputRecord, StageFailure> {
        let mint = id.parse::<MintId>().at(Stage::Identify)?;
        let onchain = self.chain.resolve(&mint).at(Stage::Resolve)?;
        log_onchain(&onchain);

        let document = self
            .offchain
            .fetch_document(&onchain.uri)
            .at(Stage::Metadata)?;
        tracing::info!(
            mint = %mint,
            uri = %onchain.uri,
            name = %document.record.name,
            image = %document.record.image,
            attributes = document.record.attributes.len(),
            "fetched metadata"
        );
        let record = OutputRecord::new(mint.as_str(), &onchain, &document.record);

        let mut staging = self.layout.stage().at(Stage::Artifact)?;
        staging
            .write(self.layout.artifact_path(&mint), &document.raw)
            .at(Stage::Artifact)?;

        if self.options.include_images {
            if document.record.image.is_empty() {
                tracing::debug!(mint = %mint, "document has no image");
            } else {
                self.layout.ensure_image_dir().at(Stage::Image)?;
                let staged = staging.reserve(self.layout.image_path(&mint));
                let bytes = self
                    .images
                    .download_image(&document.record.image, &staged)
                    .at(Stage::Image)?;
                tracing::debug!(mint = %mint, bytes, "downloaded image");
            }
        }

        staging.commit().at(Stage::Artifact)?;
        self.success.append(&record.fields()).at(Stage::Record)?;
        Ok(record)
    }

    fn record_failure(
        &self,
        id: &str,
        failure: &StageFailure,
        summary: &mut RunSummary,
        sink: &dyn ProgressSink,
    ) {
        let record = failure.to_record(id);
        tracing::warn!(mint = %id, stage = ?failure.stage, error = %failure.error, "mint failed");
        sink.event(ProgressEvent {
            message: format!("{}: {id}: {}", record.reason, failure.error),
            elapsed: None,
        });
        match self.errors.append(&record.fields()) {
            Ok(_) => summary.error_rows += 1,
            Err(err) => {
                summary.unrecorded_errors += 1;
                tracing::warn!(mint = %id, error = %err, "could not append error row");
                sink.event(ProgressEvent {
                    message: format!("error with append info, err: {err}"),
                    elapsed: None,
                });
            }
        }
    }
}

fn log_onchain(onchain: &OnChainRecord) {
    let creators = onchain
        .creators
        .iter()
        .map(|creator| format!("{}:{}:{}", creator.address, creator.share, creator.verified))
        .collect::<Vec<_>>()
        .join(",");
    tracing::info!(
        mint = %onchain.mint,
        name = %onchain.name,
        symbol = %onchain.symbol,
        uri = %onchain.uri,
        is_mutable = onchain.is_mutable,
        seller_fee_basis_points = onchain.seller_fee_basis_points,
        %creators,
        "resolved metadata account"
    );
}
