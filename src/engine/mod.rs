//! Bulk execution engine: fan-out over a repository list with a bounded
//! worker pool, per-item pre-action policy, progress events, and result
//! aggregation.
//!
//! A failing item never cancels its siblings; the engine aggregates outcomes
//! and returns a [`BulkResult`] even if every item failed. Only a fatal
//! error before dispatch (authentication) aborts the run.

pub mod events;

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::constants::{MAX_CONCURRENCY, SANITIZED_NAME_MAX_LEN};
use crate::error::{MgitError, Result};
use crate::git::GitOps;
use crate::providers::{Provider, Repository};

pub use events::{EventSender, ProgressEvent};

/// Per-item policy when the destination directory already exists.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateMode {
    Skip,
    Pull,
    Force,
}

impl std::str::FromStr for UpdateMode {
    type Err = MgitError;

    fn from_str(value: &str) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "skip" => Ok(UpdateMode::Skip),
            "pull" => Ok(UpdateMode::Pull),
            "force" => Ok(UpdateMode::Force),
            _ => Err(MgitError::invalid_argument(format!(
                "update mode must be skip, pull or force, got '{}'",
                value
            ))),
        }
    }
}

impl std::fmt::Display for UpdateMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            UpdateMode::Skip => write!(f, "skip"),
            UpdateMode::Pull => write!(f, "pull"),
            UpdateMode::Force => write!(f, "force"),
        }
    }
}

/// Options for one bulk run.
#[derive(Debug, Clone)]
pub struct OperationOptions {
    pub update_mode: UpdateMode,
    pub concurrency: usize,
    pub include: Vec<String>,
    pub exclude: Vec<String>,
    pub dry_run: bool,
}

impl Default for OperationOptions {
    fn default() -> Self {
        Self {
            update_mode: UpdateMode::Skip,
            concurrency: 4,
            include: Vec::new(),
            exclude: Vec::new(),
            dry_run: false,
        }
    }
}

/// Terminal state of one repository in a bulk run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum OutcomeKind {
    Cloned,
    Pulled,
    SkippedExisting,
    SkippedDisabled,
    SkippedFiltered,
    ForceOverwritten,
    Failed,
}

impl OutcomeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OutcomeKind::Cloned => "cloned",
            OutcomeKind::Pulled => "pulled",
            OutcomeKind::SkippedExisting => "skipped-existing",
            OutcomeKind::SkippedDisabled => "skipped-disabled",
            OutcomeKind::SkippedFiltered => "skipped-filtered",
            OutcomeKind::ForceOverwritten => "force-overwritten",
            OutcomeKind::Failed => "failed",
        }
    }
}

/// Outcome plus the short reason; failure reasons are already masked.
#[derive(Debug, Clone, Serialize)]
pub struct RepoOutcome {
    pub repo: String,
    pub kind: OutcomeKind,
    pub reason: Option<String>,
}

impl RepoOutcome {
    fn new(repo: &str, kind: OutcomeKind) -> Self {
        Self {
            repo: repo.to_string(),
            kind,
            reason: None,
        }
    }

    fn with_reason(repo: &str, kind: OutcomeKind, reason: impl Into<String>) -> Self {
        Self {
            repo: repo.to_string(),
            kind,
            reason: Some(reason.into()),
        }
    }
}

/// Aggregate counters keyed by outcome plus the failed items for reporting.
#[derive(Debug, Default, Serialize)]
pub struct BulkResult {
    pub outcomes: Vec<RepoOutcome>,
}

impl BulkResult {
    pub fn record(&mut self, outcome: RepoOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn count(&self, kind: OutcomeKind) -> usize {
        self.outcomes.iter().filter(|o| o.kind == kind).count()
    }

    pub fn failed(&self) -> impl Iterator<Item = &RepoOutcome> {
        self.outcomes.iter().filter(|o| o.kind == OutcomeKind::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.failed().next().is_some()
    }

    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    /// One-line summary for the CLI.
    pub fn summary(&self) -> String {
        format!(
            "cloned {}, pulled {}, force-overwritten {}, skipped {}, failed {}",
            self.count(OutcomeKind::Cloned),
            self.count(OutcomeKind::Pulled),
            self.count(OutcomeKind::ForceOverwritten),
            self.count(OutcomeKind::SkippedExisting)
                + self.count(OutcomeKind::SkippedDisabled)
                + self.count(OutcomeKind::SkippedFiltered),
            self.count(OutcomeKind::Failed),
        )
    }
}

/// Reduce a repository name to a safe filesystem segment.
///
/// Path separators, control characters and reserved device names become
/// `_`; consecutive underscores collapse; leading/trailing dots and spaces
/// are stripped; length is capped. Idempotent.
pub fn sanitize_repo_name(name: &str) -> String {
    const RESERVED: &[&str] = &[
        "con", "prn", "aux", "nul", "com1", "com2", "com3", "com4", "com5", "com6", "com7",
        "com8", "com9", "lpt1", "lpt2", "lpt3", "lpt4", "lpt5", "lpt6", "lpt7", "lpt8", "lpt9",
    ];

    let mapped: String = name
        .chars()
        .map(|c| {
            if c == '/' || c == '\\' || c == ':' || c.is_control() {
                '_'
            } else {
                c
            }
        })
        .collect();

    let mut collapsed = String::with_capacity(mapped.len());
    for c in mapped.chars() {
        if c == '_' && collapsed.ends_with('_') {
            continue;
        }
        collapsed.push(c);
    }

    let trimmed = collapsed.trim_matches(|c| c == '.' || c == ' ');

    let stem = trimmed.split('.').next().unwrap_or(trimmed);
    let named = if RESERVED.contains(&stem.to_lowercase().as_str()) {
        "_"
    } else {
        trimmed
    };

    let truncated: String = named.chars().take(SANITIZED_NAME_MAX_LEN).collect();
    let result = truncated.trim_matches(|c| c == '.' || c == ' ').to_string();
    if result.is_empty() {
        "_".to_string()
    } else {
        result
    }
}

/// Asks the user to confirm destroying an existing directory. Returns false
/// to degrade `force` to skip for that item.
pub type ConfirmFn = Arc<dyn Fn(&str) -> bool + Send + Sync>;

enum Action {
    Clone,
    Pull,
    ForceClone,
}

struct WorkItem {
    repo: Repository,
    dest: PathBuf,
    action: Action,
}

pub struct BulkEngine {
    provider: Arc<dyn Provider>,
    git: Arc<dyn GitOps>,
    events: EventSender,
    confirm: ConfirmFn,
    cancel: CancellationToken,
}

impl BulkEngine {
    pub fn new(
        provider: Arc<dyn Provider>,
        git: Arc<dyn GitOps>,
        events: EventSender,
        confirm: ConfirmFn,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            provider,
            git,
            events,
            confirm,
            cancel,
        }
    }

    /// Execute one bulk run over `repos` into `target`.
    ///
    /// Dispatch order is the input order; completion order is unspecified.
    pub async fn run(
        &self,
        repos: Vec<Repository>,
        target: &Path,
        options: &OperationOptions,
    ) -> Result<BulkResult> {
        // Auth failure here is fatal: nothing has been dispatched yet.
        self.provider.authenticate().await?;

        std::fs::create_dir_all(target)
            .map_err(|e| MgitError::io(target, format!("cannot create target: {}", e)))?;

        let mut result = BulkResult::default();
        let mut work = Vec::new();
        let mut claimed_dests: HashSet<PathBuf> = HashSet::new();

        for repo in repos {
            // Include/exclude filtering drops items from the run entirely.
            if !options.include.is_empty() && !options.include.contains(&repo.name) {
                debug!("{}: not in include list", repo.name);
                continue;
            }
            if options.exclude.contains(&repo.name) {
                debug!("{}: in exclude list", repo.name);
                continue;
            }

            if repo.is_disabled {
                result.record(RepoOutcome::with_reason(
                    &repo.name,
                    OutcomeKind::SkippedDisabled,
                    "repository is disabled",
                ));
                continue;
            }

            let dest = target.join(sanitize_repo_name(&repo.name));
            if !claimed_dests.insert(dest.clone()) {
                result.record(RepoOutcome::with_reason(
                    &repo.name,
                    OutcomeKind::SkippedFiltered,
                    "duplicate destination",
                ));
                continue;
            }

            let action = if !dest.exists() {
                Action::Clone
            } else {
                match options.update_mode {
                    UpdateMode::Skip => {
                        result.record(RepoOutcome::with_reason(
                            &repo.name,
                            OutcomeKind::SkippedExisting,
                            "destination exists",
                        ));
                        continue;
                    }
                    UpdateMode::Pull => Action::Pull,
                    UpdateMode::Force => {
                        if (self.confirm)(&repo.name) {
                            Action::ForceClone
                        } else {
                            result.record(RepoOutcome::with_reason(
                                &repo.name,
                                OutcomeKind::SkippedExisting,
                                "force-unconfirmed",
                            ));
                            continue;
                        }
                    }
                }
            };

            if options.dry_run {
                let kind = match action {
                    Action::Clone => OutcomeKind::Cloned,
                    Action::Pull => OutcomeKind::Pulled,
                    Action::ForceClone => OutcomeKind::ForceOverwritten,
                };
                result.record(RepoOutcome::with_reason(&repo.name, kind, "dry-run"));
                continue;
            }

            work.push(WorkItem { repo, dest, action });
        }

        if options.dry_run || work.is_empty() {
            return Ok(result);
        }

        let permits = options.concurrency.clamp(1, MAX_CONCURRENCY);
        let semaphore = Arc::new(Semaphore::new(permits));
        let mut workers = JoinSet::new();

        for item in work {
            let semaphore = semaphore.clone();
            let provider = self.provider.clone();
            let git = self.git.clone();
            let events = self.events.clone();
            let cancel = self.cancel.clone();

            workers.spawn(async move {
                // Acquire failing means the semaphore was closed; treat as
                // cancelled.
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => {
                        return RepoOutcome::with_reason(
                            &item.repo.name,
                            OutcomeKind::SkippedFiltered,
                            "cancelled",
                        )
                    }
                };
                if cancel.is_cancelled() {
                    // Stop dispatching: items not yet started.
                    return RepoOutcome::with_reason(
                        &item.repo.name,
                        OutcomeKind::SkippedFiltered,
                        "cancelled",
                    );
                }

                events.started(&item.repo.name);
                let outcome = execute_item(&*provider, &*git, &events, &cancel, &item).await;
                events.completed(&outcome);
                outcome
            });
        }

        // Aggregation happens-after every worker's completed event.
        while let Some(joined) = workers.join_next().await {
            match joined {
                Ok(outcome) => result.record(outcome),
                Err(e) => warn!("worker panicked: {}", e),
            }
        }

        Ok(result)
    }
}

async fn execute_item(
    provider: &dyn Provider,
    git: &dyn GitOps,
    events: &EventSender,
    cancel: &CancellationToken,
    item: &WorkItem,
) -> RepoOutcome {
    let name = &item.repo.name;

    // The authenticated URL is computed just-in-time and never logged.
    let authed_url = match provider.authenticated_clone_url(&item.repo) {
        Ok(url) => url,
        Err(e) => {
            return RepoOutcome::with_reason(name, OutcomeKind::Failed, e.to_string());
        }
    };

    let (phase_tx, mut phase_rx) = mpsc::unbounded_channel::<String>();
    let phase_events = events.clone();
    let phase_repo = name.clone();
    let forwarder = tokio::spawn(async move {
        let mut last: Option<String> = None;
        while let Some(phase) = phase_rx.recv().await {
            // Coalesce: identical consecutive phases are dropped.
            if last.as_deref() == Some(phase.as_str()) {
                continue;
            }
            phase_events.progress(&phase_repo, &phase);
            last = Some(phase);
        }
    });

    let outcome = match item.action {
        Action::Clone => match git.clone(&authed_url, &item.dest, Some(phase_tx), cancel).await {
            Ok(()) => RepoOutcome::new(name, OutcomeKind::Cloned),
            Err(e) => clone_failure(name, &item.dest, e),
        },
        Action::Pull => match git.pull(&item.dest, cancel).await {
            Ok(()) => RepoOutcome::new(name, OutcomeKind::Pulled),
            Err(MgitError::Cancelled) => {
                RepoOutcome::with_reason(name, OutcomeKind::SkippedFiltered, "cancelled")
            }
            Err(e) => RepoOutcome::with_reason(name, OutcomeKind::Failed, e.to_string()),
        },
        Action::ForceClone => {
            if let Err(e) = std::fs::remove_dir_all(&item.dest) {
                return RepoOutcome::with_reason(
                    name,
                    OutcomeKind::Failed,
                    format!("cannot remove existing directory: {}", e),
                );
            }
            match git.clone(&authed_url, &item.dest, Some(phase_tx), cancel).await {
                Ok(()) => RepoOutcome::new(name, OutcomeKind::ForceOverwritten),
                Err(e) => clone_failure(name, &item.dest, e),
            }
        }
    };

    forwarder.abort();
    outcome
}

/// A failed or interrupted clone leaves no partial working copy behind.
fn clone_failure(name: &str, dest: &Path, err: MgitError) -> RepoOutcome {
    if dest.exists() {
        let _ = std::fs::remove_dir_all(dest);
    }
    match err {
        MgitError::Cancelled => {
            RepoOutcome::with_reason(name, OutcomeKind::SkippedFiltered, "cancelled")
        }
        e => RepoOutcome::with_reason(name, OutcomeKind::Failed, e.to_string()),
    }
}
