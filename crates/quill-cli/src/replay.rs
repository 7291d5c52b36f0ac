//! Replays recorded transcripts through the renderer, one task per file.

use anyhow::{Context, Result};
use quill_core::quill_providers::ScriptedBackend;
use quill_core::{
    generate_reply, ChatTarget, Delivery, InMemoryStore, IncomingMessage, Language, Localizer,
    RenderConfig, RenderOutcome, RenderRequest, ReplyServices, TokenEstimator,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Per-run settings shared by every replay.
#[derive(Debug, Clone)]
pub struct ReplaySettings {
    pub target: ChatTarget,
    pub show_thinking: bool,
    pub language: Language,
    /// Stored as the user message that triggered each replay.
    pub prompt: String,
    pub system_prompt: Option<String>,
}

/// Collaborators shared across concurrent replays.
#[derive(Clone)]
pub struct ReplayContext {
    pub delivery: Arc<dyn Delivery>,
    pub store: Arc<InMemoryStore>,
    pub config: Arc<RenderConfig>,
    pub l10n: Arc<Localizer>,
    pub estimator: Arc<TokenEstimator>,
}

impl ReplayContext {
    pub fn new(delivery: Arc<dyn Delivery>, config: RenderConfig) -> Result<Self> {
        Ok(Self {
            delivery,
            store: Arc::new(InMemoryStore::new()),
            config: Arc::new(config),
            l10n: Arc::new(Localizer::new()),
            estimator: Arc::new(TokenEstimator::new()?),
        })
    }
}

/// Result of one transcript, in input order.
#[derive(Debug)]
pub struct ReplayReport {
    pub label: String,
    pub result: Result<RenderOutcome>,
}

/// Label shown for a transcript: its file name.
pub fn replay_label(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .map(str::to_string)
        .unwrap_or_else(|| path.display().to_string())
}

/// Each transcript gets its own conversation, even when two share a name.
fn conversation_id(index: usize, path: &Path) -> String {
    let stem = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("transcript");
    format!("replay-{}-{}", index + 1, stem)
}

/// Replay every transcript concurrently and collect the reports in input order.
pub async fn replay_all(
    context: &ReplayContext,
    settings: &ReplaySettings,
    paths: &[PathBuf],
) -> Vec<ReplayReport> {
    let mut tasks = JoinSet::new();

    for (index, path) in paths.iter().enumerate() {
        let context = context.clone();
        let settings = settings.clone();
        let path = path.clone();
        tasks.spawn(async move {
            let result = replay_one(&context, &settings, index, &path).await;
            (index, replay_label(&path), result)
        });
    }

    let mut reports: Vec<Option<ReplayReport>> = (0..paths.len()).map(|_| None).collect();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((index, label, result)) => {
                if let Err(e) = &result {
                    error!("Replay of {} failed: {:#}", label, e);
                }
                reports[index] = Some(ReplayReport { label, result });
            }
            Err(e) => error!("Replay task panicked: {}", e),
        }
    }

    reports
        .into_iter()
        .enumerate()
        .map(|(index, report)| {
            report.unwrap_or_else(|| ReplayReport {
                label: replay_label(&paths[index]),
                result: Err(anyhow::anyhow!("replay task did not complete")),
            })
        })
        .collect()
}

async fn replay_one(
    context: &ReplayContext,
    settings: &ReplaySettings,
    index: usize,
    path: &Path,
) -> Result<RenderOutcome> {
    let backend = ScriptedBackend::load(path)?;
    info!(
        "Replaying {} ({} events)",
        path.display(),
        backend.events().len()
    );

    let services = ReplyServices {
        delivery: context.delivery.as_ref(),
        backend: &backend,
        store: context.store.as_ref(),
        config: context.config.as_ref(),
        l10n: context.l10n.as_ref(),
        estimator: context.estimator.as_ref(),
    };
    let request = RenderRequest {
        target: settings.target,
        conversation_id: conversation_id(index, path),
        show_thinking: settings.show_thinking,
        language: settings.language,
    };
    let incoming = IncomingMessage {
        system_prompt: settings.system_prompt.clone(),
        ..IncomingMessage::new(settings.prompt.clone())
    };

    generate_reply(&services, request, incoming)
        .await
        .with_context(|| format!("Failed to render {}", path.display()))
}
