//! Output control and `list` result rendering.
//!
//! `--quiet` is routed here once at CLI startup; informational lines ask
//! [`is_quiet`] before printing, while results and errors always reach the
//! user. Also holds the table/json renderers for query results. Synthetic
//! project names are placeholders and never shown; they render as `-`.

use colored::Colorize;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::providers::Repository;

static QUIET: AtomicBool = AtomicBool::new(false);

/// Record the `--quiet` flag. Called once from the CLI before any output.
pub fn set_quiet(enabled: bool) {
    QUIET.store(enabled, Ordering::Relaxed);
}

pub fn is_quiet() -> bool {
    QUIET.load(Ordering::Relaxed)
}

/// Informational stdout line, dropped under `--quiet`. Results, summaries
/// and error text do not go through here.
pub fn note(message: impl std::fmt::Display) {
    if !is_quiet() {
        println!("{}", message);
    }
}

/// Stable display order: (provider, organization, project, name),
/// case-insensitive.
pub fn sort_for_display(repos: &mut [Repository]) {
    repos.sort_by(|a, b| {
        (
            a.provider.to_string(),
            a.organization.to_lowercase(),
            a.project.to_lowercase(),
            a.name.to_lowercase(),
        )
            .cmp(&(
                b.provider.to_string(),
                b.organization.to_lowercase(),
                b.project.to_lowercase(),
                b.name.to_lowercase(),
            ))
    });
}

fn shown_project(repo: &Repository) -> &str {
    if repo.project_is_synthetic {
        "-"
    } else {
        &repo.project
    }
}

/// Render query matches as an aligned table.
pub fn render_table(repos: &mut [Repository]) -> String {
    sort_for_display(repos);

    let headers = ["PROVIDER", "ACCOUNT", "ORGANIZATION", "PROJECT", "REPOSITORY"];
    let mut widths: Vec<usize> = headers.iter().map(|h| h.len()).collect();
    let rows: Vec<[String; 5]> = repos
        .iter()
        .map(|r| {
            [
                r.provider.to_string(),
                r.account.clone(),
                r.organization.clone(),
                shown_project(r).to_string(),
                r.name.clone(),
            ]
        })
        .collect();
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            widths[i] = widths[i].max(cell.len());
        }
    }

    let mut out = String::new();
    for (i, header) in headers.iter().enumerate() {
        // Pad before styling; ANSI escapes confuse width formatting.
        let padded = format!("{:<width$}  ", header, width = widths[i]);
        out.push_str(&padded.bold().to_string());
    }
    out.push('\n');
    for row in &rows {
        for (i, cell) in row.iter().enumerate() {
            out.push_str(&format!("{:<width$}  ", cell, width = widths[i]));
        }
        out.push('\n');
    }
    out
}

/// Render query matches as one JSON array with stable field names.
pub fn render_json(repos: &mut [Repository]) -> String {
    sort_for_display(repos);
    let items: Vec<_> = repos
        .iter()
        .map(|r| {
            json!({
                "provider": r.provider.to_string(),
                "account": r.account,
                "organization": r.organization,
                "project": if r.project_is_synthetic {
                    serde_json::Value::Null
                } else {
                    json!(r.project)
                },
                "name": r.name,
                "clone_url": r.clone_url,
                "default_branch": r.default_branch,
                "private": r.is_private,
                "disabled": r.is_disabled,
            })
        })
        .collect();
    serde_json::to_string_pretty(&items).unwrap_or_else(|_| "[]".to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::ProviderKind;

    fn repo(provider: ProviderKind, org: &str, project: &str, name: &str) -> Repository {
        Repository {
            name: name.to_string(),
            clone_url: format!("https://example.com/{}/{}.git", org, name),
            ssh_url: None,
            default_branch: Some("main".to_string()),
            is_disabled: false,
            is_private: false,
            size: None,
            provider,
            account: "acct".to_string(),
            organization: org.to_string(),
            project: project.to_string(),
            project_is_synthetic: project == org,
        }
    }

    #[test]
    fn test_quiet_flag_round_trip() {
        assert!(!is_quiet());
        set_quiet(true);
        assert!(is_quiet());
        set_quiet(false);
        assert!(!is_quiet());
    }

    #[test]
    fn test_sort_for_display_is_case_insensitive() {
        let mut repos = vec![
            repo(ProviderKind::GitHub, "acme", "acme", "Zeta"),
            repo(ProviderKind::GitHub, "acme", "acme", "alpha"),
            repo(ProviderKind::AzureDevOps, "acme", "Pay", "api"),
        ];
        sort_for_display(&mut repos);
        assert_eq!(repos[0].provider, ProviderKind::AzureDevOps);
        assert_eq!(repos[1].name, "alpha");
        assert_eq!(repos[2].name, "Zeta");
    }

    #[test]
    fn test_table_hides_synthetic_project() {
        let mut repos = vec![repo(ProviderKind::GitHub, "acme", "acme", "api")];
        let table = render_table(&mut repos);
        assert!(table.contains("api"));
        assert!(table.contains(" - "));
    }

    #[test]
    fn test_json_output_is_parseable() {
        let mut repos = vec![
            repo(ProviderKind::AzureDevOps, "acme", "Pay", "api"),
            repo(ProviderKind::GitHub, "acme", "acme", "site"),
        ];
        let parsed: serde_json::Value = serde_json::from_str(&render_json(&mut repos)).unwrap();
        let items = parsed.as_array().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0]["project"], "Pay");
        assert!(items[1]["project"].is_null());
    }
}
