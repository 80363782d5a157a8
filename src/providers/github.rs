//! GitHub adapter: token auth, no project tier.
//!
//! Organizations are the authenticated user (as a `User` organization) plus
//! every org the user belongs to. Projects are a single synthetic entry per
//! organization. Filters (`language`, `archived`, `topics`) are applied
//! client-side; `archived` maps to `is_disabled`.

use async_trait::async_trait;
use chrono::TimeZone;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::http::{build_client, send_with_retry};
use super::{
    embed_credential, OrgKind, Organization, Project, Provider, ProviderKind, RateLimitInfo,
    RepoFilters, RepoStream, Repository,
};
use crate::config::{Credentials, ProviderAccount};
use crate::constants::{DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_PAGE_SIZE};
use crate::error::{MgitError, Result};

const DEFAULT_API_URL: &str = "https://api.github.com";
const API_VERSION: &str = "2022-11-28";

/// Minimal GitHub repo response (only fields we need).
#[derive(Debug, Clone, Deserialize)]
struct GitHubRepo {
    name: String,
    clone_url: String,
    ssh_url: Option<String>,
    default_branch: Option<String>,
    archived: bool,
    private: bool,
    /// Kilobytes.
    size: Option<u64>,
    language: Option<String>,
    #[serde(default)]
    topics: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct GitHubUser {
    login: String,
    html_url: String,
}

#[derive(Debug, Deserialize)]
struct GitHubOrg {
    login: String,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct RateLimitResponse {
    resources: RateLimitResources,
}

#[derive(Debug, Deserialize)]
struct RateLimitResources {
    core: RateLimitCore,
}

#[derive(Debug, Deserialize)]
struct RateLimitCore {
    limit: u64,
    remaining: u64,
    reset: i64,
}

pub struct GitHubProvider {
    client: reqwest::Client,
    api_url: String,
    token: String,
    account: String,
    /// Authenticated user's login, fetched once on demand.
    login: OnceCell<String>,
}

impl GitHubProvider {
    pub fn new(account: &ProviderAccount) -> Result<Self> {
        let token = match &account.credentials {
            Credentials::GitHubToken { token } => token.clone(),
            _ => return Err(MgitError::config("GitHub account requires a token")),
        };
        let api_url = account
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_API_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: build_client(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))?,
            api_url,
            token,
            account: account.name.clone(),
            login: OnceCell::new(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        request(&self.client, &self.api_url, &self.token, path)
    }

    async fn authenticated_login(&self) -> Result<&str> {
        self.login
            .get_or_try_init(|| async {
                let resp = send_with_retry(self.get("/user"), "github authenticate").await?;
                let user: GitHubUser = resp
                    .json()
                    .await
                    .map_err(|e| MgitError::provider(format!("decode /user: {}", e)))?;
                Ok::<_, MgitError>(user.login)
            })
            .await
            .map(String::as_str)
    }
}

fn request(
    client: &reqwest::Client,
    api_url: &str,
    token: &str,
    path: &str,
) -> reqwest::RequestBuilder {
    client
        .get(format!("{}{}", api_url, path))
        .bearer_auth(token)
        .header("Accept", "application/vnd.github+json")
        .header("X-GitHub-Api-Version", API_VERSION)
}

fn to_repository(repo: GitHubRepo, account: &str, org: &str) -> Repository {
    Repository {
        name: repo.name,
        clone_url: repo.clone_url,
        ssh_url: repo.ssh_url,
        default_branch: repo.default_branch,
        is_disabled: repo.archived,
        is_private: repo.private,
        size: repo.size.map(|kb| kb * 1024),
        provider: ProviderKind::GitHub,
        account: account.to_string(),
        organization: org.to_string(),
        project: org.to_string(),
        project_is_synthetic: true,
    }
}

fn passes_filters(repo: &GitHubRepo, filters: &RepoFilters) -> bool {
    if let Some(language) = &filters.language {
        match &repo.language {
            Some(l) if l.eq_ignore_ascii_case(language) => {}
            _ => return false,
        }
    }
    if let Some(archived) = filters.archived {
        if repo.archived != archived {
            return false;
        }
    }
    filters
        .topics
        .iter()
        .all(|t| repo.topics.iter().any(|have| have.eq_ignore_ascii_case(t)))
}

#[async_trait]
impl Provider for GitHubProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::GitHub
    }

    fn account_name(&self) -> &str {
        &self.account
    }

    fn supports_projects(&self) -> bool {
        false
    }

    async fn authenticate(&self) -> Result<()> {
        self.authenticated_login().await.map(|_| ())
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        let resp = send_with_retry(self.get("/user"), "github list user").await?;
        let user: GitHubUser = resp
            .json()
            .await
            .map_err(|e| MgitError::provider(format!("decode /user: {}", e)))?;

        let mut orgs = vec![Organization {
            name: user.login.clone(),
            url: user.html_url,
            kind: OrgKind::User,
            provider: ProviderKind::GitHub,
        }];
        let _ = self.login.set(user.login);

        let mut page = 1u32;
        loop {
            let resp = send_with_retry(
                self.get(&format!(
                    "/user/orgs?per_page={}&page={}",
                    DEFAULT_PAGE_SIZE, page
                )),
                "github list orgs",
            )
            .await?;
            let batch: Vec<GitHubOrg> = resp
                .json()
                .await
                .map_err(|e| MgitError::provider(format!("decode /user/orgs: {}", e)))?;
            let count = batch.len();
            orgs.extend(batch.into_iter().map(|o| Organization {
                name: o.login,
                url: o.url,
                kind: OrgKind::Org,
                provider: ProviderKind::GitHub,
            }));
            if count < DEFAULT_PAGE_SIZE as usize {
                break;
            }
            page += 1;
        }

        Ok(orgs)
    }

    async fn list_projects(&self, org: &str) -> Result<Vec<Project>> {
        Ok(vec![Project::synthetic(org)])
    }

    async fn list_repositories(
        &self,
        org: &str,
        project: Option<&str>,
        filters: Option<&RepoFilters>,
    ) -> Result<RepoStream> {
        if let Some(p) = project {
            // The synthetic placeholder is the only accepted value.
            if !p.eq_ignore_ascii_case(org) {
                return Err(MgitError::invalid_argument(format!(
                    "github has no projects; got project '{}'",
                    p
                )));
            }
        }

        // The authenticated user's own namespace lists through /user/repos so
        // private repositories are included.
        let own = self
            .authenticated_login()
            .await
            .map(|login| login.eq_ignore_ascii_case(org))
            .unwrap_or(false);
        let base_path = if own {
            "/user/repos?affiliation=owner".to_string()
        } else {
            format!("/orgs/{}/repos?type=all", org)
        };

        let client = self.client.clone();
        let api_url = self.api_url.clone();
        let token = self.token.clone();
        let account = self.account.clone();
        let org = org.to_string();
        let filters = filters.cloned().unwrap_or_default();

        let (tx, stream) = RepoStream::channel(DEFAULT_PAGE_SIZE as usize);
        tokio::spawn(async move {
            let mut page = 1u32;
            loop {
                let path = format!("{}&per_page={}&page={}", base_path, DEFAULT_PAGE_SIZE, page);
                let resp = match send_with_retry(
                    request(&client, &api_url, &token, &path),
                    "github list repos",
                )
                .await
                {
                    Ok(resp) => resp,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
                let batch: Vec<GitHubRepo> = match resp.json().await {
                    Ok(batch) => batch,
                    Err(e) => {
                        let _ = tx
                            .send(Err(MgitError::provider(format!("decode repo list: {}", e))))
                            .await;
                        return;
                    }
                };

                let count = batch.len();
                debug!(org = %org, page, count, "github repo page");
                for repo in batch {
                    if !passes_filters(&repo, &filters) {
                        continue;
                    }
                    if tx.send(Ok(to_repository(repo, &account, &org))).await.is_err() {
                        // Consumer dropped the stream; stop paginating.
                        return;
                    }
                }

                if count < DEFAULT_PAGE_SIZE as usize {
                    return;
                }
                page += 1;
            }
        });

        Ok(stream)
    }

    async fn get_repository(
        &self,
        org: &str,
        repo: &str,
        _project: Option<&str>,
    ) -> Result<Option<Repository>> {
        let resp = send_with_retry(
            self.get(&format!("/repos/{}/{}", org, repo)),
            "github get repo",
        )
        .await;
        match resp {
            Ok(resp) => {
                let repo: GitHubRepo = resp
                    .json()
                    .await
                    .map_err(|e| MgitError::provider(format!("decode repo: {}", e)))?;
                Ok(Some(to_repository(repo, &self.account, org)))
            }
            Err(MgitError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn authenticated_clone_url(&self, repo: &Repository) -> Result<String> {
        embed_credential(&repo.clone_url, None, &self.token)
    }

    async fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        let resp = send_with_retry(self.get("/rate_limit"), "github rate limit")
            .await
            .ok()?;
        let parsed: RateLimitResponse = match resp.json().await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!("cannot decode /rate_limit: {}", e);
                return None;
            }
        };
        Some(RateLimitInfo {
            remaining: parsed.resources.core.remaining,
            limit: Some(parsed.resources.core.limit),
            reset_at: chrono::Utc
                .timestamp_opt(parsed.resources.core.reset, 0)
                .single(),
        })
    }
}
