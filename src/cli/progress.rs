//! Progress rendering for bulk runs: consumes the engine's typed event
//! channel and drives an indicatif bar on stderr.

use colored::Colorize;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::Duration;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::engine::{OutcomeKind, ProgressEvent};

/// Consume events until the engine drops its sender. Returns the join
/// handle so the caller can await rendering completion before printing the
/// summary.
pub fn spawn_renderer(
    mut rx: UnboundedReceiver<ProgressEvent>,
    total: usize,
    quiet: bool,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        if quiet {
            // Still drain: the engine's sends must never pile up into a
            // UI that does not exist.
            while rx.recv().await.is_some() {}
            return;
        }

        let bar = ProgressBar::new(total as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} [{bar:30}] {pos}/{len} {wide_msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=> "),
        );
        bar.enable_steady_tick(Duration::from_millis(120));

        while let Some(event) = rx.recv().await {
            match event {
                ProgressEvent::Started { repo } => {
                    bar.set_message(repo);
                }
                ProgressEvent::Progress { repo, phase } => {
                    bar.set_message(format!("{}: {}", repo, phase));
                }
                ProgressEvent::Completed { outcome } => {
                    bar.inc(1);
                    let line = match outcome.kind {
                        OutcomeKind::Cloned => {
                            format!("{} {}", "cloned".green(), outcome.repo)
                        }
                        OutcomeKind::Pulled => {
                            format!("{} {}", "pulled".green(), outcome.repo)
                        }
                        OutcomeKind::ForceOverwritten => {
                            format!("{} {}", "replaced".yellow(), outcome.repo)
                        }
                        OutcomeKind::Failed => format!(
                            "{} {}: {}",
                            "failed".red(),
                            outcome.repo,
                            outcome.reason.as_deref().unwrap_or("unknown")
                        ),
                        OutcomeKind::SkippedExisting
                        | OutcomeKind::SkippedDisabled
                        | OutcomeKind::SkippedFiltered => format!(
                            "{} {} ({})",
                            "skipped".dimmed(),
                            outcome.repo,
                            outcome.reason.as_deref().unwrap_or(outcome.kind.as_str())
                        ),
                    };
                    bar.println(line);
                }
                ProgressEvent::Notice { message } => {
                    bar.println(format!("{} {}", "notice".yellow(), message));
                }
            }
        }
        bar.finish_and_clear();
    })
}
