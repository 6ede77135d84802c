//! Aggregation pipeline: turns accumulated unused posts into one published
//! digest and consumes them.
//!
//! A run goes through these steps, each its own failure boundary:
//! load batch, threshold gate, summarize, persist draft, publish, consume.
//! Posts are only ever flipped to used inside the same transaction that marks
//! the summary posted, after the channel accepted the message.
use std::fmt;
use std::sync::Arc;

use anyhow::anyhow;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{error, info, instrument, warn};

use crate::config::Config;
use crate::db::{self, ConsumeOutcome, Pool, PostForSummary, SummaryLinkState, SummaryWithPosts};
use crate::model::{ChannelStats, PipelineState, Stats, Summary};
use crate::publisher::{render_digest, ChannelPublisher};
use crate::summarizer::{SkipReason, SummarizationError, Summarizer, SummaryOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Respect the configured minimum batch size.
    Normal,
    /// Lower the threshold to a single post. The quality veto still applies.
    Force,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStep {
    LoadBatch,
    Summarize,
    PersistDraft,
    ResolveTarget,
    Publish,
    Consume,
    Query,
}

impl RunStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStep::LoadBatch => "load batch",
            RunStep::Summarize => "summarize",
            RunStep::PersistDraft => "persist draft",
            RunStep::ResolveTarget => "resolve target",
            RunStep::Publish => "publish",
            RunStep::Consume => "consume posts",
            RunStep::Query => "query",
        }
    }
}

impl fmt::Display for RunStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("a summary run is already in progress")]
    AlreadyRunning,
    #[error("store failure during {step}: {source:#}")]
    Store {
        step: RunStep,
        #[source]
        source: anyhow::Error,
    },
    #[error("summarization failed: {0}")]
    Summarization(#[from] SummarizationError),
    #[error("{step} failed for draft summary {summary_id}: {source:#}")]
    Publish {
        summary_id: i64,
        step: RunStep,
        #[source]
        source: anyhow::Error,
    },
    #[error("summary {0} not found")]
    NotFound(i64),
    #[error("summary {0} is already posted")]
    AlreadyPosted(i64),
    #[error("draft summary {0} covers posts that were already consumed")]
    StaleDraft(i64),
    #[error("run task aborted: {0}")]
    Aborted(String),
}

impl PipelineError {
    /// The step a run stopped at, when the failure belongs to one.
    pub fn step(&self) -> Option<RunStep> {
        match self {
            PipelineError::Store { step, .. } | PipelineError::Publish { step, .. } => Some(*step),
            PipelineError::Summarization(_) => Some(RunStep::Summarize),
            _ => None,
        }
    }

    fn store(step: RunStep) -> impl FnOnce(anyhow::Error) -> PipelineError {
        move |source| PipelineError::Store { step, source }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    InsufficientContent { found: usize, required: usize },
    Skipped { reason: SkipReason, batch: usize },
    Published(Summary),
}

impl RunOutcome {
    pub fn summary(&self) -> Option<&Summary> {
        match self {
            RunOutcome::Published(summary) => Some(summary),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineSettings {
    pub min_posts: u32,
    pub max_posts: u32,
    pub target_channel: String,
}

impl From<&Config> for PipelineSettings {
    fn from(cfg: &Config) -> Self {
        Self {
            min_posts: cfg.summary.min_posts,
            max_posts: cfg.summary.max_posts,
            target_channel: cfg.telegram.target_channel.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Pipeline {
    pool: Pool,
    summarizer: Summarizer,
    publisher: Arc<dyn ChannelPublisher>,
    settings: PipelineSettings,
    run_lock: Arc<Mutex<()>>,
}

impl Pipeline {
    pub fn new(
        pool: Pool,
        summarizer: Summarizer,
        publisher: Arc<dyn ChannelPublisher>,
        settings: PipelineSettings,
    ) -> Self {
        Self {
            pool,
            summarizer,
            publisher,
            settings,
            run_lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn state(&self) -> PipelineState {
        match self.run_lock.try_lock() {
            Ok(_) => PipelineState::Idle,
            Err(_) => PipelineState::Running,
        }
    }

    /// Wait for an in-flight run to finish.
    pub async fn wait_idle(&self) {
        let _guard = self.run_lock.lock().await;
    }

    /// Run one aggregation pass. Rejects with `AlreadyRunning` while another
    /// pass holds the run-lock. The pass runs on its own task, so dropping the
    /// returned future does not interrupt it between publish and consume.
    pub async fn run(&self, mode: RunMode) -> Result<RunOutcome, PipelineError> {
        let guard = self
            .run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| PipelineError::AlreadyRunning)?;
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            this.execute(mode).await
        })
        .await
        .map_err(|e| PipelineError::Aborted(e.to_string()))?
    }

    #[instrument(skip(self))]
    async fn execute(&self, mode: RunMode) -> Result<RunOutcome, PipelineError> {
        let batch = db::fetch_unused_posts(&self.pool, self.settings.max_posts)
            .await
            .map_err(PipelineError::store(RunStep::LoadBatch))?;

        let required = match mode {
            RunMode::Normal => self.settings.min_posts as usize,
            RunMode::Force => 1,
        };
        if batch.len() < required {
            info!(found = batch.len(), required, "not enough posts for a summary");
            return Ok(RunOutcome::InsufficientContent {
                found: batch.len(),
                required,
            });
        }

        info!(posts = batch.len(), "generating summary");
        let draft = match self.summarizer.summarize(&batch).await? {
            SummaryOutcome::Draft(draft) => draft,
            SummaryOutcome::Skip(reason) => {
                return Ok(RunOutcome::Skipped {
                    reason,
                    batch: batch.len(),
                })
            }
        };

        let post_ids: Vec<i64> = batch.iter().map(|p: &PostForSummary| p.id).collect();
        let summary = db::create_draft_summary(
            &self.pool,
            &draft.title,
            &draft.content,
            &self.settings.target_channel,
            &post_ids,
        )
        .await
        .map_err(PipelineError::store(RunStep::PersistDraft))?;

        let message_id = self.publish(&summary).await.map_err(|err| {
            warn!(summary_id = summary.id, %err, "publish failed; draft kept, posts stay unused");
            err
        })?;

        self.consume(summary.id, &post_ids, &message_id).await?;

        info!(summary_id = summary.id, posts = post_ids.len(), %message_id, "summary posted");
        Ok(RunOutcome::Published(Summary {
            is_posted: true,
            posted_message_id: Some(message_id),
            ..summary
        }))
    }

    async fn publish(&self, summary: &Summary) -> Result<String, PipelineError> {
        let target = self
            .publisher
            .resolve_channel(&summary.target_channel)
            .await
            .map_err(|source| PipelineError::Publish {
                summary_id: summary.id,
                step: RunStep::ResolveTarget,
                source,
            })?;
        self.publisher
            .send_message(&target, &render_digest(&summary.title, &summary.content))
            .await
            .map_err(|source| PipelineError::Publish {
                summary_id: summary.id,
                step: RunStep::Publish,
                source,
            })
    }

    /// Apply the consume-and-mark-posted transaction. The message is already
    /// out, so an ambiguous failure is resolved by reading back what landed and
    /// retrying at most once; publish is never repeated here.
    async fn consume(
        &self,
        summary_id: i64,
        post_ids: &[i64],
        message_id: &str,
    ) -> Result<(), PipelineError> {
        let err = match db::consume_batch(&self.pool, summary_id, post_ids, message_id).await {
            Ok(ConsumeOutcome::Committed) => return Ok(()),
            Ok(conflict @ ConsumeOutcome::Conflict { .. }) => {
                error!(summary_id, ?conflict, "batch changed underneath the run");
                return Err(PipelineError::Store {
                    step: RunStep::Consume,
                    source: anyhow!("consume conflict for summary {}: {:?}", summary_id, conflict),
                });
            }
            Err(err) => err,
        };

        warn!(summary_id, error = %err, "consume failed; re-checking stored state");
        let state = db::summary_link_state(&self.pool, summary_id).await.ok().flatten();
        match recovery_for(state, post_ids.len()) {
            ConsumeRecovery::Landed => {
                info!(summary_id, "consume had landed despite the error");
                Ok(())
            }
            ConsumeRecovery::Retry => {
                match db::consume_batch(&self.pool, summary_id, post_ids, message_id).await {
                    Ok(ConsumeOutcome::Committed) => Ok(()),
                    Ok(conflict) => Err(PipelineError::Store {
                        step: RunStep::Consume,
                        source: anyhow!("consume retry conflict for summary {}: {:?}", summary_id, conflict),
                    }),
                    Err(source) => {
                        error!(summary_id, "summary published but its posts could not be consumed");
                        Err(PipelineError::Store {
                            step: RunStep::Consume,
                            source,
                        })
                    }
                }
            }
            ConsumeRecovery::Unknown => {
                error!(summary_id, ?state, "summary published but consume state is unknown");
                Err(PipelineError::Store {
                    step: RunStep::Consume,
                    source: err,
                })
            }
        }
    }

    /// Publish a retained draft (left behind by a failed publish) and consume
    /// the batch it was generated from. Refused once any post of that batch
    /// went out with another summary. Runs under the run-lock on its own task,
    /// like `run`.
    pub async fn resend_draft(&self, summary_id: i64) -> Result<Summary, PipelineError> {
        let guard = self
            .run_lock
            .clone()
            .try_lock_owned()
            .map_err(|_| PipelineError::AlreadyRunning)?;
        let this = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            this.resend(summary_id).await
        })
        .await
        .map_err(|e| PipelineError::Aborted(e.to_string()))?
    }

    #[instrument(skip(self))]
    async fn resend(&self, summary_id: i64) -> Result<Summary, PipelineError> {
        let summary = db::get_summary(&self.pool, summary_id)
            .await
            .map_err(PipelineError::store(RunStep::Query))?
            .ok_or(PipelineError::NotFound(summary_id))?;
        if summary.is_posted {
            return Err(PipelineError::AlreadyPosted(summary_id));
        }

        let batch = db::draft_batch(&self.pool, summary_id)
            .await
            .map_err(PipelineError::store(RunStep::LoadBatch))?;
        if !batch.is_intact() {
            warn!(summary_id, consumed = batch.consumed, "draft batch already covered by a later summary");
            return Err(PipelineError::StaleDraft(summary_id));
        }

        let message_id = self.publish(&summary).await?;
        self.consume(summary_id, &batch.post_ids, &message_id).await?;

        info!(summary_id, posts = batch.post_ids.len(), %message_id, "draft re-sent");
        Ok(Summary {
            is_posted: true,
            posted_message_id: Some(message_id),
            ..summary
        })
    }

    pub async fn stats(&self) -> Result<Stats, PipelineError> {
        db::stats(&self.pool, self.settings.min_posts)
            .await
            .map_err(PipelineError::store(RunStep::Query))
    }

    pub async fn channel_stats(&self) -> Result<Vec<ChannelStats>, PipelineError> {
        db::channel_stats(&self.pool)
            .await
            .map_err(PipelineError::store(RunStep::Query))
    }

    pub async fn recent_summaries(&self, limit: u32) -> Result<Vec<SummaryWithPosts>, PipelineError> {
        db::recent_summaries(&self.pool, limit)
            .await
            .map_err(PipelineError::store(RunStep::Query))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ConsumeRecovery {
    /// The transaction committed even though the call reported an error.
    Landed,
    /// Nothing landed; one more attempt is safe.
    Retry,
    Unknown,
}

fn recovery_for(state: Option<SummaryLinkState>, batch: usize) -> ConsumeRecovery {
    match state {
        Some(s) if s.is_posted && s.linked_posts == batch as i64 => ConsumeRecovery::Landed,
        Some(s) if !s.is_posted && s.linked_posts == 0 => ConsumeRecovery::Retry,
        _ => ConsumeRecovery::Unknown,
    }
}
