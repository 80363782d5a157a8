//! Query engine: fan a pattern out across configured accounts and stream
//! matches back as they are found.
//!
//! Accounts run in parallel under a cross-account concurrency cap. One
//! account failing to authenticate is a warning, not an error; the other
//! accounts keep producing. The merged stream deduplicates, enforces the
//! result limit, and signals producers to stop once it is reached.

use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::QueryPattern;
use crate::constants::{QUERY_ACCOUNT_CONCURRENCY, QUERY_STREAM_BUFFER};
use crate::error::Result;
use crate::mask::mask;
use crate::providers::{Provider, Repository};

pub struct QueryEngine {
    providers: Vec<Arc<dyn Provider>>,
    account_concurrency: usize,
}

impl QueryEngine {
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self {
            providers,
            account_concurrency: QUERY_ACCOUNT_CONCURRENCY,
        }
    }

    #[cfg(test)]
    fn with_account_concurrency(mut self, cap: usize) -> Self {
        self.account_concurrency = cap.max(1);
        self
    }

    /// Stream deduplicated matches. The receiver applies back-pressure;
    /// dropping it stops all producers.
    pub fn stream(&self, pattern: QueryPattern, limit: Option<usize>) -> mpsc::Receiver<Repository> {
        let (out_tx, out_rx) = mpsc::channel(QUERY_STREAM_BUFFER);
        let (raw_tx, mut raw_rx) = mpsc::channel::<Repository>(QUERY_STREAM_BUFFER);
        let cancel = CancellationToken::new();

        if self.providers.is_empty() {
            warn!("no provider accounts configured, query yields nothing");
        }

        // Producers: one task per account, gated by the concurrency cap.
        let semaphore = Arc::new(Semaphore::new(self.account_concurrency));
        let mut producers = JoinSet::new();
        for provider in &self.providers {
            let provider = provider.clone();
            let pattern = pattern.clone();
            let tx = raw_tx.clone();
            let cancel = cancel.clone();
            let semaphore = semaphore.clone();
            producers.spawn(async move {
                let _permit = match semaphore.acquire().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };
                if cancel.is_cancelled() {
                    return;
                }
                stream_account(provider, pattern, tx, cancel).await;
            });
        }
        drop(raw_tx);

        // Merge: dedup by identity, enforce the limit, stop producers once
        // it is reached.
        tokio::spawn(async move {
            let mut seen = HashSet::new();
            let mut emitted = 0usize;
            while let Some(repo) = raw_rx.recv().await {
                if !seen.insert(repo.identity()) {
                    continue;
                }
                if out_tx.send(repo).await.is_err() {
                    break;
                }
                emitted += 1;
                if let Some(limit) = limit {
                    if emitted >= limit {
                        break;
                    }
                }
            }
            cancel.cancel();
            raw_rx.close();
            // Producers unblock on the cancel token or the closed channel.
            while producers.join_next().await.is_some() {}
        });

        out_rx
    }

    /// Collect matches up to `limit`.
    pub async fn search(
        &self,
        pattern: QueryPattern,
        limit: Option<usize>,
    ) -> Result<Vec<Repository>> {
        let mut rx = self.stream(pattern, limit);
        let mut matches = Vec::new();
        while let Some(repo) = rx.recv().await {
            matches.push(repo);
        }
        Ok(matches)
    }
}

/// Walk one account: organizations → projects → repository stream, applying
/// the per-segment predicates at each tier.
async fn stream_account(
    provider: Arc<dyn Provider>,
    pattern: QueryPattern,
    tx: mpsc::Sender<Repository>,
    cancel: CancellationToken,
) {
    let account = provider.account_name().to_string();

    // Authenticate lazily on first use; failure skips the account.
    if let Err(e) = provider.authenticate().await {
        warn!("account {}: authentication failed: {}", account, mask(&e.to_string()));
        return;
    }

    let orgs = match provider.list_organizations().await {
        Ok(orgs) => orgs,
        Err(e) => {
            warn!("account {}: cannot list organizations: {}", account, mask(&e.to_string()));
            return;
        }
    };

    for org in orgs.into_iter().filter(|o| pattern.matches_org(&o.name)) {
        if cancel.is_cancelled() {
            return;
        }
        let projects = match provider.list_projects(&org.name).await {
            Ok(projects) => projects,
            Err(e) => {
                warn!(
                    "account {}: cannot list projects of {}: {}",
                    account,
                    org.name,
                    mask(&e.to_string())
                );
                continue;
            }
        };

        for project in projects
            .into_iter()
            .filter(|p| pattern.matches_project(&p.name, p.is_synthetic))
        {
            if cancel.is_cancelled() {
                return;
            }
            let project_arg = if project.is_synthetic {
                None
            } else {
                Some(project.name.as_str())
            };
            let mut repos = match provider
                .list_repositories(&org.name, project_arg, None)
                .await
            {
                Ok(stream) => stream,
                Err(e) => {
                    warn!(
                        "account {}: cannot list repositories of {}/{}: {}",
                        account,
                        org.name,
                        project.name,
                        mask(&e.to_string())
                    );
                    continue;
                }
            };

            loop {
                let item = tokio::select! {
                    item = repos.next() => item,
                    _ = cancel.cancelled() => return,
                };
                let repo = match item {
                    Some(Ok(repo)) => repo,
                    Some(Err(e)) => {
                        warn!(
                            "account {}: listing {}/{} aborted: {}",
                            account,
                            org.name,
                            project.name,
                            mask(&e.to_string())
                        );
                        break;
                    }
                    None => break,
                };
                if !pattern.matches_repo(&repo.name) {
                    continue;
                }
                debug!("match: {}/{}/{}", org.name, project.name, repo.name);
                // Blocking send is the back-pressure point.
                let sent = tokio::select! {
                    sent = tx.send(repo) => sent.is_ok(),
                    _ = cancel.cancelled() => false,
                };
                if !sent {
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MgitError;
    use crate::providers::{
        OrgKind, Organization, Project, ProviderKind, RateLimitInfo, RepoFilters, RepoStream,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// An in-memory provider: org → project → repo names.
    struct StaticProvider {
        account: String,
        kind: ProviderKind,
        has_projects: bool,
        tree: Vec<(&'static str, Vec<(&'static str, Vec<&'static str>)>)>,
        auth_fails: bool,
        listed: Arc<AtomicUsize>,
    }

    impl StaticProvider {
        fn repo(&self, org: &str, project: &str, name: &str) -> Repository {
            Repository {
                name: name.to_string(),
                clone_url: format!("https://example.com/{}/{}.git", org, name),
                ssh_url: None,
                default_branch: Some("main".to_string()),
                is_disabled: false,
                is_private: false,
                size: None,
                provider: self.kind,
                account: self.account.clone(),
                organization: org.to_string(),
                project: project.to_string(),
                project_is_synthetic: !self.has_projects,
            }
        }
    }

    #[async_trait]
    impl Provider for StaticProvider {
        fn kind(&self) -> ProviderKind {
            self.kind
        }
        fn account_name(&self) -> &str {
            &self.account
        }
        fn supports_projects(&self) -> bool {
            self.has_projects
        }
        async fn authenticate(&self) -> crate::error::Result<()> {
            if self.auth_fails {
                Err(MgitError::auth("expired"))
            } else {
                Ok(())
            }
        }
        async fn list_organizations(&self) -> crate::error::Result<Vec<Organization>> {
            Ok(self
                .tree
                .iter()
                .map(|(org, _)| Organization {
                    name: org.to_string(),
                    url: format!("https://example.com/{}", org),
                    kind: OrgKind::Org,
                    provider: self.kind,
                })
                .collect())
        }
        async fn list_projects(&self, org: &str) -> crate::error::Result<Vec<Project>> {
            if !self.has_projects {
                return Ok(vec![Project::synthetic(org)]);
            }
            Ok(self
                .tree
                .iter()
                .find(|(o, _)| *o == org)
                .map(|(_, projects)| {
                    projects
                        .iter()
                        .map(|(p, _)| Project {
                            name: p.to_string(),
                            organization: org.to_string(),
                            is_synthetic: false,
                        })
                        .collect()
                })
                .unwrap_or_default())
        }
        async fn list_repositories(
            &self,
            org: &str,
            project: Option<&str>,
            _filters: Option<&RepoFilters>,
        ) -> crate::error::Result<RepoStream> {
            self.listed.fetch_add(1, Ordering::SeqCst);
            let mut repos = Vec::new();
            if let Some((_, projects)) = self.tree.iter().find(|(o, _)| *o == org) {
                for (p, names) in projects {
                    if project.is_some_and(|want| want != *p) {
                        continue;
                    }
                    let project_name = if self.has_projects { p } else { org };
                    for name in names {
                        repos.push(self.repo(org, project_name, name));
                    }
                }
            }
            let (tx, stream) = RepoStream::channel(QUERY_STREAM_BUFFER);
            tokio::spawn(async move {
                for repo in repos {
                    if tx.send(Ok(repo)).await.is_err() {
                        return;
                    }
                }
            });
            Ok(stream)
        }
        async fn get_repository(
            &self,
            _org: &str,
            _repo: &str,
            _project: Option<&str>,
        ) -> crate::error::Result<Option<Repository>> {
            Ok(None)
        }
        fn authenticated_clone_url(&self, repo: &Repository) -> crate::error::Result<String> {
            Ok(repo.clone_url.clone())
        }
        async fn rate_limit_info(&self) -> Option<RateLimitInfo> {
            None
        }
    }

    fn two_account_setup() -> (QueryEngine, Arc<AtomicUsize>) {
        let listed = Arc::new(AtomicUsize::new(0));
        let ado = StaticProvider {
            account: "work".to_string(),
            kind: ProviderKind::AzureDevOps,
            has_projects: true,
            tree: vec![(
                "Acme",
                vec![("Pay", vec!["api", "web"]), ("Ship", vec!["core"])],
            )],
            auth_fails: false,
            listed: listed.clone(),
        };
        let github = StaticProvider {
            account: "oss".to_string(),
            kind: ProviderKind::GitHub,
            has_projects: false,
            tree: vec![("acme-oss", vec![("acme-oss", vec!["api-gateway", "site"])])],
            auth_fails: false,
            listed: listed.clone(),
        };
        (
            QueryEngine::new(vec![Arc::new(ado), Arc::new(github)]),
            listed,
        )
    }

    #[tokio::test]
    async fn test_wildcard_query_across_accounts() {
        let (engine, _) = two_account_setup();
        let pattern = QueryPattern::parse("*/*/api*").unwrap();
        let mut matches = engine.search(pattern, Some(10)).await.unwrap();
        matches.sort_by(|a, b| a.name.cmp(&b.name));

        assert_eq!(matches.len(), 2);
        assert_eq!(matches[0].name, "api");
        assert_eq!(matches[0].organization, "Acme");
        assert_eq!(matches[0].project, "Pay");
        assert_eq!(matches[1].name, "api-gateway");
        assert_eq!(matches[1].account, "oss");
        assert!(matches[1].project_is_synthetic);
    }

    #[tokio::test]
    async fn test_limit_stops_producers() {
        let (engine, _) = two_account_setup();
        let pattern = QueryPattern::parse("*/*/api*").unwrap();
        let matches = engine.search(pattern, Some(1)).await.unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn test_project_segment_constrains_real_projects() {
        let (engine, _) = two_account_setup();
        let pattern = QueryPattern::parse("*/pay/*").unwrap();
        let mut matches = engine.search(pattern, None).await.unwrap();
        matches.sort_by(|a, b| a.name.cmp(&b.name));

        // Real projects are constrained; the synthetic GitHub project
        // passes trivially.
        let names: Vec<_> = matches.iter().map(|m| m.name.as_str()).collect();
        assert_eq!(names, vec!["api", "api-gateway", "site", "web"]);
        assert!(matches.iter().all(|m| m.project != "Ship"));
    }

    #[tokio::test]
    async fn test_auth_failure_skips_account_only() {
        let listed = Arc::new(AtomicUsize::new(0));
        let broken = StaticProvider {
            account: "broken".to_string(),
            kind: ProviderKind::Bitbucket,
            has_projects: true,
            tree: vec![("ws", vec![("P", vec!["hidden"])])],
            auth_fails: true,
            listed: listed.clone(),
        };
        let github = StaticProvider {
            account: "oss".to_string(),
            kind: ProviderKind::GitHub,
            has_projects: false,
            tree: vec![("acme-oss", vec![("acme-oss", vec!["api"])])],
            auth_fails: false,
            listed: listed.clone(),
        };
        let engine = QueryEngine::new(vec![Arc::new(broken), Arc::new(github)]);

        let matches = engine
            .search(QueryPattern::parse("*/*/*").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].name, "api");
    }

    #[tokio::test]
    async fn test_empty_configuration_yields_nothing() {
        let engine = QueryEngine::new(vec![]);
        let matches = engine
            .search(QueryPattern::parse("*/*/*").unwrap(), None)
            .await
            .unwrap();
        assert!(matches.is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_listings_deduped() {
        let listed = Arc::new(AtomicUsize::new(0));
        let provider = StaticProvider {
            account: "oss".to_string(),
            kind: ProviderKind::GitHub,
            has_projects: false,
            tree: vec![("acme-oss", vec![("acme-oss", vec!["api", "api"])])],
            auth_fails: false,
            listed,
        };
        let engine = QueryEngine::new(vec![Arc::new(provider)]);
        let matches = engine
            .search(QueryPattern::parse("*/*/api").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 1);
    }

    #[tokio::test]
    async fn test_account_concurrency_cap_still_completes() {
        let (engine, _) = two_account_setup();
        let engine = engine.with_account_concurrency(1);
        let matches = engine
            .search(QueryPattern::parse("*/*/*").unwrap(), None)
            .await
            .unwrap();
        assert_eq!(matches.len(), 5);
    }
}
