//! Azure DevOps adapter: organization URL + personal access token.
//!
//! The account is scoped to one organization (the base URL), so
//! `list_organizations` returns exactly that one. The project tier is
//! mandatory: `list_repositories` without a project fails at the port
//! boundary. Disabled repositories surface with `is_disabled=true`; the
//! engine decides to skip them.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;

use super::http::{build_client, send_with_retry};
use super::{
    embed_credential, OrgKind, Organization, Project, Provider, ProviderKind, RateLimitInfo,
    RepoFilters, RepoStream, Repository,
};
use crate::config::{Credentials, ProviderAccount};
use crate::constants::{DEFAULT_HTTP_TIMEOUT_SECS, DEFAULT_PAGE_SIZE};
use crate::error::{MgitError, Result};

const API_VERSION: &str = "7.1";

#[derive(Debug, Deserialize)]
struct ListResponse<T> {
    value: Vec<T>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureProject {
    name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureRepo {
    name: String,
    remote_url: String,
    ssh_url: Option<String>,
    default_branch: Option<String>,
    #[serde(default)]
    is_disabled: bool,
    size: Option<u64>,
    project: AzureRepoProject,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AzureRepoProject {
    name: String,
}

pub struct AzureDevOpsProvider {
    client: reqwest::Client,
    /// Organization base URL, e.g. `https://dev.azure.com/acme`.
    base_url: String,
    org_name: String,
    pat: String,
    account: String,
}

impl AzureDevOpsProvider {
    pub fn new(account: &ProviderAccount) -> Result<Self> {
        let pat = match &account.credentials {
            Credentials::AzurePat { pat } => pat.clone(),
            _ => return Err(MgitError::config("Azure DevOps account requires a pat")),
        };
        let base_url = account
            .base_url
            .clone()
            .ok_or_else(|| MgitError::config("Azure DevOps account requires an organization url"))?
            .trim_end_matches('/')
            .to_string();
        let parsed = url::Url::parse(&base_url)
            .map_err(|e| MgitError::config(format!("invalid organization url: {}", e)))?;
        // The last path segment names the organization; older
        // visualstudio.com URLs carry it in the host instead.
        let org_name = parsed
            .path_segments()
            .and_then(|segments| segments.filter(|s| !s.is_empty()).last())
            .or_else(|| parsed.host_str().map(|h| h.split('.').next().unwrap_or(h)))
            .ok_or_else(|| {
                MgitError::config(format!("cannot derive organization from url '{}'", base_url))
            })?
            .to_string();

        Ok(Self {
            client: build_client(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))?,
            base_url,
            org_name,
            pat,
            account: account.name.clone(),
        })
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        request(&self.client, &self.base_url, &self.pat, path)
    }

    fn require_org(&self, org: &str) -> Result<()> {
        if org.eq_ignore_ascii_case(&self.org_name) {
            Ok(())
        } else {
            Err(MgitError::not_found(format!(
                "this account is scoped to organization '{}', not '{}'",
                self.org_name, org
            )))
        }
    }

    fn to_repository(&self, repo: AzureRepo) -> Repository {
        Repository {
            name: repo.name,
            clone_url: repo.remote_url,
            ssh_url: repo.ssh_url,
            default_branch: repo
                .default_branch
                .map(|b| b.trim_start_matches("refs/heads/").to_string()),
            is_disabled: repo.is_disabled,
            // Azure DevOps repositories are never public to the internet
            // through this API surface.
            is_private: true,
            size: repo.size,
            provider: ProviderKind::AzureDevOps,
            account: self.account.clone(),
            organization: self.org_name.clone(),
            project: repo.project.name,
            project_is_synthetic: false,
        }
    }
}

fn request(
    client: &reqwest::Client,
    base_url: &str,
    pat: &str,
    path: &str,
) -> reqwest::RequestBuilder {
    let separator = if path.contains('?') { '&' } else { '?' };
    client
        .get(format!(
            "{}{}{}api-version={}",
            base_url, path, separator, API_VERSION
        ))
        .basic_auth("", Some(pat))
}

#[async_trait]
impl Provider for AzureDevOpsProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::AzureDevOps
    }

    fn account_name(&self) -> &str {
        &self.account
    }

    fn supports_projects(&self) -> bool {
        true
    }

    async fn authenticate(&self) -> Result<()> {
        send_with_retry(self.get("/_apis/projects?$top=1"), "azure authenticate").await?;
        Ok(())
    }

    async fn list_organizations(&self) -> Result<Vec<Organization>> {
        Ok(vec![Organization {
            name: self.org_name.clone(),
            url: self.base_url.clone(),
            kind: OrgKind::Org,
            provider: ProviderKind::AzureDevOps,
        }])
    }

    async fn list_projects(&self, org: &str) -> Result<Vec<Project>> {
        self.require_org(org)?;

        let mut projects = Vec::new();
        let mut continuation: Option<String> = None;
        loop {
            let path = match &continuation {
                Some(token) => format!(
                    "/_apis/projects?$top={}&continuationToken={}",
                    DEFAULT_PAGE_SIZE, token
                ),
                None => format!("/_apis/projects?$top={}", DEFAULT_PAGE_SIZE),
            };
            let resp = send_with_retry(self.get(&path), "azure list projects").await?;
            let next = resp
                .headers()
                .get("x-ms-continuationtoken")
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            let batch: ListResponse<AzureProject> = resp
                .json()
                .await
                .map_err(|e| MgitError::provider(format!("decode project list: {}", e)))?;
            projects.extend(batch.value.into_iter().map(|p| Project {
                name: p.name,
                organization: self.org_name.clone(),
                is_synthetic: false,
            }));
            match next {
                Some(token) if !token.is_empty() => continuation = Some(token),
                _ => break,
            }
        }
        Ok(projects)
    }

    async fn list_repositories(
        &self,
        org: &str,
        project: Option<&str>,
        _filters: Option<&RepoFilters>,
    ) -> Result<RepoStream> {
        self.require_org(org)?;
        let project = project.ok_or_else(|| {
            MgitError::invalid_argument("Azure DevOps requires a project to list repositories")
        })?;

        let client = self.client.clone();
        let base_url = self.base_url.clone();
        let pat = self.pat.clone();
        let path = format!("/{}/_apis/git/repositories", project);
        let this_org = self.org_name.clone();
        let account = self.account.clone();

        let (tx, stream) = RepoStream::channel(DEFAULT_PAGE_SIZE as usize);
        tokio::spawn(async move {
            // The repositories endpoint returns the full set in one response.
            let resp =
                match send_with_retry(request(&client, &base_url, &pat, &path), "azure list repos")
                    .await
                {
                    Ok(resp) => resp,
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                };
            let batch: ListResponse<AzureRepo> = match resp.json().await {
                Ok(batch) => batch,
                Err(e) => {
                    let _ = tx
                        .send(Err(MgitError::provider(format!("decode repo list: {}", e))))
                        .await;
                    return;
                }
            };
            for repo in batch.value {
                let repo = Repository {
                    name: repo.name,
                    clone_url: repo.remote_url,
                    ssh_url: repo.ssh_url,
                    default_branch: repo
                        .default_branch
                        .map(|b| b.trim_start_matches("refs/heads/").to_string()),
                    is_disabled: repo.is_disabled,
                    is_private: true,
                    size: repo.size,
                    provider: ProviderKind::AzureDevOps,
                    account: account.clone(),
                    organization: this_org.clone(),
                    project: repo.project.name,
                    project_is_synthetic: false,
                };
                if tx.send(Ok(repo)).await.is_err() {
                    return;
                }
            }
        });

        Ok(stream)
    }

    async fn get_repository(
        &self,
        org: &str,
        repo: &str,
        project: Option<&str>,
    ) -> Result<Option<Repository>> {
        self.require_org(org)?;
        let project = project.ok_or_else(|| {
            MgitError::invalid_argument("Azure DevOps requires a project to look up a repository")
        })?;

        let resp = send_with_retry(
            self.get(&format!("/{}/_apis/git/repositories/{}", project, repo)),
            "azure get repo",
        )
        .await;
        match resp {
            Ok(resp) => {
                let repo: AzureRepo = resp
                    .json()
                    .await
                    .map_err(|e| MgitError::provider(format!("decode repo: {}", e)))?;
                Ok(Some(self.to_repository(repo)))
            }
            Err(MgitError::NotFound { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    fn authenticated_clone_url(&self, repo: &Repository) -> Result<String> {
        embed_credential(&repo.clone_url, None, &self.pat)
    }

    /// Azure DevOps does not publish a request quota.
    async fn rate_limit_info(&self) -> Option<RateLimitInfo> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account(base_url: &str) -> ProviderAccount {
        ProviderAccount {
            name: "work".to_string(),
            kind: ProviderKind::AzureDevOps,
            base_url: Some(base_url.to_string()),
            credentials: Credentials::AzurePat {
                pat: "patsecret".to_string(),
            },
            default_org: None,
            default_project: None,
        }
    }

    #[test]
    fn test_org_name_from_url() {
        let provider = account("https://dev.azure.com/acme/");
        let provider = AzureDevOpsProvider::new(&provider).unwrap();
        assert_eq!(provider.org_name, "acme");
    }

    #[tokio::test]
    async fn test_list_repositories_requires_project() {
        let provider = AzureDevOpsProvider::new(&account("https://dev.azure.com/acme")).unwrap();
        let err = provider
            .list_repositories("acme", None, None)
            .await
            .err()
            .expect("project is mandatory");
        assert!(matches!(err, MgitError::InvalidArgument { .. }));
    }

    #[tokio::test]
    async fn test_list_repositories_maps_fields() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/Pay/_apis/git/repositories")
            .match_query(mockito::Matcher::Any)
            .with_body(
                r#"{"value":[
                    {"name":"api","remoteUrl":"https://org@dev.azure.com/acme/Pay/_git/api",
                     "sshUrl":"git@ssh.dev.azure.com:v3/acme/Pay/api",
                     "defaultBranch":"refs/heads/main","isDisabled":false,"size":1024,
                     "project":{"name":"Pay"}},
                    {"name":"legacy","remoteUrl":"https://org@dev.azure.com/acme/Pay/_git/legacy",
                     "isDisabled":true,"project":{"name":"Pay"}}
                ]}"#,
            )
            .create_async()
            .await;

        let provider = AzureDevOpsProvider::new(&account(&server.url())).unwrap();
        // The mock server URL has a port, so the org segment derivation is
        // bypassed by matching on whatever it produced.
        let org = provider.org_name.clone();
        let repos = provider
            .list_repositories(&org, Some("Pay"), None)
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].name, "api");
        assert_eq!(repos[0].default_branch.as_deref(), Some("main"));
        assert_eq!(repos[0].project, "Pay");
        assert!(!repos[0].project_is_synthetic);
        assert!(repos[1].is_disabled);
    }

    #[tokio::test]
    async fn test_project_pagination_follows_continuation_token() {
        let mut server = mockito::Server::new_async().await;
        let first = server
            .mock("GET", "/_apis/projects")
            .match_query(mockito::Matcher::Regex(r"^\$top=100&api-version".to_string()))
            .with_header("x-ms-continuationtoken", "page2")
            .with_body(r#"{"value":[{"name":"Pay"}]}"#)
            .create_async()
            .await;
        let second = server
            .mock("GET", "/_apis/projects")
            .match_query(mockito::Matcher::Regex(
                "continuationToken=page2".to_string(),
            ))
            .with_body(r#"{"value":[{"name":"Ship"}]}"#)
            .create_async()
            .await;

        let provider = AzureDevOpsProvider::new(&account(&server.url())).unwrap();
        let org = provider.org_name.clone();
        let projects = provider.list_projects(&org).await.unwrap();

        assert_eq!(
            projects.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["Pay", "Ship"]
        );
        first.assert_async().await;
        second.assert_async().await;
    }

    #[test]
    fn test_authenticated_clone_url_replaces_userinfo() {
        let provider = AzureDevOpsProvider::new(&account("https://dev.azure.com/acme")).unwrap();
        let repo = Repository {
            name: "api".to_string(),
            clone_url: "https://acme@dev.azure.com/acme/Pay/_git/api".to_string(),
            ssh_url: None,
            default_branch: Some("main".to_string()),
            is_disabled: false,
            is_private: true,
            size: None,
            provider: ProviderKind::AzureDevOps,
            account: "work".to_string(),
            organization: "acme".to_string(),
            project: "Pay".to_string(),
            project_is_synthetic: false,
        };
        let authed = provider.authenticated_clone_url(&repo).unwrap();
        assert_eq!(authed, "https://patsecret@dev.azure.com/acme/Pay/_git/api");
        assert!(crate::mask::mask(&authed).contains("***@dev.azure.com"));
    }
}
