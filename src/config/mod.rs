//! Configuration resolution: file + environment → one immutable value.
//!
//! The on-disk format is YAML with two sections (`global`, `providers`).
//! Credential strings support `${NAME}` environment interpolation, and
//! well-known environment variables override file values. Resolution runs
//! once at startup; nothing downstream reads the environment or the file
//! again.
//!
//! ```yaml
//! global:
//!   concurrency: 4
//!   update_mode: skip
//!   default_provider: work
//! providers:
//!   work:
//!     kind: azuredevops
//!     base_url: https://dev.azure.com/acme
//!     pat: ${AZURE_DEVOPS_EXT_PAT}
//!     default_project: Pay
//!   oss:
//!     kind: github
//!     token: ${GITHUB_TOKEN}
//! ```

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::constants::{CONFIG_DIR_NAME, CONFIG_ENV_VAR, CONFIG_FILE_NAME};
use crate::engine::UpdateMode;
use crate::error::{MgitError, Result};
use crate::providers::ProviderKind;

/// Credential material, one closed shape per provider kind.
#[derive(Debug, Clone)]
pub enum Credentials {
    AzurePat { pat: String },
    GitHubToken { token: String },
    BitbucketAppPassword { username: String, app_password: String },
}

impl Credentials {
    /// The secret part, for masking checks and login validation messages.
    pub fn secret(&self) -> &str {
        match self {
            Credentials::AzurePat { pat } => pat,
            Credentials::GitHubToken { token } => token,
            Credentials::BitbucketAppPassword { app_password, .. } => app_password,
        }
    }
}

/// A named, resolved configuration for one adapter instance.
#[derive(Debug, Clone)]
pub struct ProviderAccount {
    pub name: String,
    pub kind: ProviderKind,
    pub base_url: Option<String>,
    pub credentials: Credentials,
    pub default_org: Option<String>,
    pub default_project: Option<String>,
}

/// `global` section defaults.
#[derive(Debug, Clone)]
pub struct GlobalSettings {
    pub concurrency: usize,
    pub update_mode: UpdateMode,
    pub default_provider: Option<String>,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            concurrency: num_cpus::get().min(8).max(1),
            update_mode: UpdateMode::Skip,
            default_provider: None,
        }
    }
}

/// The fully resolved, validated configuration tree.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub global: GlobalSettings,
    pub accounts: Vec<ProviderAccount>,
    /// Where the file was (or would be) loaded from; `config path` shows it.
    pub path: PathBuf,
}

impl ResolvedConfig {
    pub fn account(&self, name: &str) -> Option<&ProviderAccount> {
        self.accounts.iter().find(|a| a.name == name)
    }

    /// The account picked by `--provider`, the configured default, or the
    /// only one configured.
    pub fn select_account(&self, requested: Option<&str>) -> Result<&ProviderAccount> {
        if let Some(name) = requested {
            return self.account(name).ok_or_else(|| {
                MgitError::invalid_argument(format!("unknown provider account: {}", name))
            });
        }
        if let Some(default) = &self.global.default_provider {
            if let Some(account) = self.account(default) {
                return Ok(account);
            }
            return Err(MgitError::config(format!(
                "default_provider '{}' is not a configured account",
                default
            )));
        }
        match self.accounts.as_slice() {
            [only] => Ok(only),
            [] => Err(MgitError::config(
                "no provider accounts configured; run `mgit login` first",
            )),
            _ => Err(MgitError::invalid_argument(
                "several accounts configured; pick one with --provider",
            )),
        }
    }
}

// --- on-disk shape ---------------------------------------------------------

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    global: GlobalSection,
    #[serde(default)]
    providers: BTreeMap<String, AccountSection>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct GlobalSection {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    concurrency: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    update_mode: Option<UpdateMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_provider: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct AccountSection {
    kind: Option<ProviderKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    base_url: Option<String>,
    // Credential fields; which ones are required depends on `kind`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pat: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    api_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    app_password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_org: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    default_project: Option<String>,
}

lazy_static! {
    static ref ENV_INTERPOLATION: Regex = Regex::new(r"\$\{(?P<name>[A-Za-z_][A-Za-z0-9_]*)\}").unwrap();
}

/// Expand `${NAME}` references against the process environment.
fn interpolate(value: &str) -> Result<String> {
    let mut missing = None;
    let expanded = ENV_INTERPOLATION.replace_all(value, |caps: &regex::Captures<'_>| {
        let name = &caps["name"];
        match std::env::var(name) {
            Ok(v) => v,
            Err(_) => {
                missing = Some(name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(MgitError::config(format!(
            "environment variable {} referenced in config is not set",
            name
        ))),
        None => Ok(expanded.into_owned()),
    }
}

/// Default config file location: `$MGIT_CONFIG` or `~/.config/mgit/config.yaml`.
pub fn default_config_path() -> Result<PathBuf> {
    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        return Ok(PathBuf::from(shellexpand::tilde(&path).as_ref()));
    }
    let base = dirs::config_dir()
        .ok_or_else(|| MgitError::config("cannot determine user config directory"))?;
    Ok(base.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Refuse group/other-accessible config files; credentials live in them.
#[cfg(unix)]
fn check_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    let metadata = std::fs::metadata(path)
        .map_err(|e| MgitError::config(format!("cannot stat {}: {}", path.display(), e)))?;
    let mode = metadata.permissions().mode();
    if mode & 0o077 != 0 {
        return Err(MgitError::config(format!(
            "config file {} is accessible to other users (mode {:o}); chmod 600 it",
            path.display(),
            mode & 0o777
        )));
    }
    Ok(())
}

#[cfg(not(unix))]
fn check_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// Load and resolve configuration. A missing file resolves to an empty
/// account list with defaults; a malformed or world-readable file is an error.
pub fn resolve(path_override: Option<&Path>) -> Result<ResolvedConfig> {
    let path = match path_override {
        Some(p) => p.to_path_buf(),
        None => default_config_path()?,
    };

    let file = if path.exists() {
        check_permissions(&path)?;
        let content = std::fs::read_to_string(&path)
            .map_err(|e| MgitError::config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_yaml_ng::from_str::<ConfigFile>(&content)
            .map_err(|e| MgitError::config(format!("cannot parse {}: {}", path.display(), e)))?
    } else {
        debug!("no config file at {}, using defaults", path.display());
        ConfigFile::default()
    };

    let mut accounts = Vec::new();
    for (name, section) in &file.providers {
        accounts.push(resolve_account(name, section)?);
    }

    let defaults = GlobalSettings::default();
    let global = GlobalSettings {
        concurrency: file.global.concurrency.unwrap_or(defaults.concurrency).max(1),
        update_mode: file.global.update_mode.unwrap_or(defaults.update_mode),
        default_provider: file.global.default_provider,
    };

    Ok(ResolvedConfig {
        global,
        accounts,
        path,
    })
}

/// Environment override for one credential field:
/// `MGIT_<PROVIDER>_<FIELD>` first, then the legacy name recognized verbatim.
fn env_override(provider: &str, field: &str, legacy: Option<&str>) -> Option<String> {
    let well_known = format!("MGIT_{}_{}", provider, field);
    if let Ok(v) = std::env::var(&well_known) {
        if !v.is_empty() {
            return Some(v);
        }
    }
    if let Some(name) = legacy {
        if let Ok(v) = std::env::var(name) {
            if !v.is_empty() {
                return Some(v);
            }
        }
    }
    None
}

fn resolve_field(
    file_value: Option<&String>,
    provider: &str,
    field: &str,
    legacy: Option<&str>,
) -> Result<Option<String>> {
    if let Some(v) = env_override(provider, field, legacy) {
        return Ok(Some(v));
    }
    match file_value {
        Some(v) => Ok(Some(interpolate(v)?)),
        None => Ok(None),
    }
}

fn require(value: Option<String>, account: &str, field: &str) -> Result<String> {
    value.filter(|v| !v.is_empty()).ok_or_else(|| {
        MgitError::config(format!("account '{}': missing required field '{}'", account, field))
    })
}

fn resolve_account(name: &str, section: &AccountSection) -> Result<ProviderAccount> {
    let kind = section.kind.ok_or_else(|| {
        MgitError::config(format!("account '{}': missing required field 'kind'", name))
    })?;

    let (base_url, credentials) = match kind {
        ProviderKind::AzureDevOps => {
            let url = resolve_field(
                section.url.as_ref().or(section.base_url.as_ref()),
                "AZUREDEVOPS",
                "URL",
                None,
            )?;
            let pat = resolve_field(
                section.pat.as_ref(),
                "AZUREDEVOPS",
                "PAT",
                Some("AZURE_DEVOPS_EXT_PAT"),
            )?;
            (
                Some(require(url, name, "url")?),
                Credentials::AzurePat {
                    pat: require(pat, name, "pat")?,
                },
            )
        }
        ProviderKind::GitHub => {
            let token = resolve_field(
                section.token.as_ref(),
                "GITHUB",
                "TOKEN",
                Some("GITHUB_TOKEN"),
            )?;
            let api_url = resolve_field(
                section.api_url.as_ref().or(section.base_url.as_ref()),
                "GITHUB",
                "API_URL",
                None,
            )?;
            (
                api_url,
                Credentials::GitHubToken {
                    token: require(token, name, "token")?,
                },
            )
        }
        ProviderKind::Bitbucket => {
            let username = resolve_field(
                section.username.as_ref(),
                "BITBUCKET",
                "USERNAME",
                Some("BITBUCKET_USERNAME"),
            )?;
            let app_password = resolve_field(
                section.app_password.as_ref(),
                "BITBUCKET",
                "APP_PASSWORD",
                Some("BITBUCKET_APP_PASSWORD"),
            )?;
            (
                section.base_url.clone(),
                Credentials::BitbucketAppPassword {
                    username: require(username, name, "username")?,
                    app_password: require(app_password, name, "app_password")?,
                },
            )
        }
    };

    Ok(ProviderAccount {
        name: name.to_string(),
        kind,
        base_url,
        credentials,
        default_org: section.default_org.clone(),
        default_project: section.default_project.clone(),
    })
}

// --- writing (login / config set) ------------------------------------------

/// Add or replace one account in the config file, creating it `0600` if
/// needed. Credential values are written as given (callers may pass
/// `${NAME}` references to keep secrets out of the file).
pub fn write_account(
    path: &Path,
    name: &str,
    kind: ProviderKind,
    fields: &BTreeMap<String, String>,
) -> Result<()> {
    let mut file = read_file_for_update(path)?;

    let mut section = AccountSection {
        kind: Some(kind),
        ..Default::default()
    };
    for (key, value) in fields {
        match key.as_str() {
            "base_url" => section.base_url = Some(value.clone()),
            "url" => section.url = Some(value.clone()),
            "pat" => section.pat = Some(value.clone()),
            "token" => section.token = Some(value.clone()),
            "api_url" => section.api_url = Some(value.clone()),
            "username" => section.username = Some(value.clone()),
            "app_password" => section.app_password = Some(value.clone()),
            "default_org" => section.default_org = Some(value.clone()),
            "default_project" => section.default_project = Some(value.clone()),
            other => {
                return Err(MgitError::invalid_argument(format!(
                    "unknown credential field: {}",
                    other
                )))
            }
        }
    }
    file.providers.insert(name.to_string(), section);

    write_file(path, &file)
}

/// Set a `global` section key.
pub fn write_global(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut file = read_file_for_update(path)?;
    match key {
        "concurrency" => {
            file.global.concurrency = Some(value.parse().map_err(|_| {
                MgitError::invalid_argument(format!("concurrency must be a number, got '{}'", value))
            })?)
        }
        "update_mode" => {
            file.global.update_mode = Some(value.parse()?);
        }
        "default_provider" => file.global.default_provider = Some(value.to_string()),
        other => {
            return Err(MgitError::invalid_argument(format!(
                "unknown global setting: {}",
                other
            )))
        }
    }
    write_file(path, &file)
}

fn read_file_for_update(path: &Path) -> Result<ConfigFile> {
    if path.exists() {
        check_permissions(path)?;
        let content = std::fs::read_to_string(path)
            .map_err(|e| MgitError::config(format!("cannot read {}: {}", path.display(), e)))?;
        serde_yaml_ng::from_str(&content)
            .map_err(|e| MgitError::config(format!("cannot parse {}: {}", path.display(), e)))
    } else {
        Ok(ConfigFile::default())
    }
}

fn write_file(path: &Path, file: &ConfigFile) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| MgitError::config(format!("cannot create {}: {}", parent.display(), e)))?;
    }
    let content = serde_yaml_ng::to_string(file)
        .map_err(|e| MgitError::config(format!("cannot serialize config: {}", e)))?;
    std::fs::write(path, content)
        .map_err(|e| MgitError::config(format!("cannot write {}: {}", path.display(), e)))?;

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
            .map_err(|e| MgitError::config(format!("cannot chmod {}: {}", path.display(), e)))?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    fn write_config(dir: &TempDir, content: &str) -> PathBuf {
        let path = dir.path().join("config.yaml");
        let mut f = std::fs::File::create(&path).unwrap();
        f.write_all(content.as_bytes()).unwrap();
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600)).unwrap();
        }
        path
    }

    /// Shield a test from credential variables in the ambient environment.
    fn without_credential_env(test: impl FnOnce()) {
        temp_env::with_vars_unset(
            [
                "MGIT_GITHUB_TOKEN",
                "GITHUB_TOKEN",
                "MGIT_AZUREDEVOPS_PAT",
                "AZURE_DEVOPS_EXT_PAT",
                "MGIT_BITBUCKET_USERNAME",
                "BITBUCKET_USERNAME",
                "MGIT_BITBUCKET_APP_PASSWORD",
                "BITBUCKET_APP_PASSWORD",
            ],
            test,
        );
    }

    #[test]
    fn test_resolve_minimal_github() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "providers:\n  oss:\n    kind: github\n    token: tok123\n",
        );

        without_credential_env(|| {
            let config = resolve(Some(&path)).unwrap();
            assert_eq!(config.accounts.len(), 1);
            let account = &config.accounts[0];
            assert_eq!(account.name, "oss");
            assert_eq!(account.kind, ProviderKind::GitHub);
            assert!(matches!(
                &account.credentials,
                Credentials::GitHubToken { token } if token == "tok123"
            ));
        });
    }

    #[test]
    fn test_resolve_missing_file_is_empty() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nope.yaml");
        let config = resolve(Some(&path)).unwrap();
        assert!(config.accounts.is_empty());
        assert!(config.global.concurrency >= 1);
    }

    #[test]
    fn test_resolve_missing_required_field() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "providers:\n  bad:\n    kind: bitbucket\n");
        without_credential_env(|| {
            let err = resolve(Some(&path)).unwrap_err();
            assert!(matches!(err, MgitError::Config { .. }));
            assert!(err.to_string().contains("username"));
        });
    }

    #[test]
    fn test_env_interpolation() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "providers:\n  oss:\n    kind: github\n    token: ${MGIT_TEST_TOKEN_INTERP}\n",
        );
        without_credential_env(|| {
            temp_env::with_var("MGIT_TEST_TOKEN_INTERP", Some("fromenv"), || {
                let config = resolve(Some(&path)).unwrap();
                assert!(matches!(
                    &config.accounts[0].credentials,
                    Credentials::GitHubToken { token } if token == "fromenv"
                ));
            });
        });
    }

    #[test]
    fn test_env_interpolation_missing_var_fails() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "providers:\n  oss:\n    kind: github\n    token: ${MGIT_TEST_TOKEN_UNSET_XYZ}\n",
        );
        without_credential_env(|| {
            temp_env::with_var_unset("MGIT_TEST_TOKEN_UNSET_XYZ", || {
                assert!(resolve(Some(&path)).is_err());
            });
        });
    }

    #[test]
    fn test_env_override_beats_file() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "providers:\n  oss:\n    kind: github\n    token: fromfile\n",
        );
        without_credential_env(|| {
            temp_env::with_var("MGIT_GITHUB_TOKEN", Some("fromenv"), || {
                let config = resolve(Some(&path)).unwrap();
                assert!(matches!(
                    &config.accounts[0].credentials,
                    Credentials::GitHubToken { token } if token == "fromenv"
                ));
            });
        });
    }

    #[test]
    fn test_legacy_env_name() {
        let dir = TempDir::new().unwrap();
        let path = write_config(&dir, "providers:\n  oss:\n    kind: github\n");
        without_credential_env(|| {
            temp_env::with_var("GITHUB_TOKEN", Some("legacy"), || {
                let config = resolve(Some(&path)).unwrap();
                assert!(matches!(
                    &config.accounts[0].credentials,
                    Credentials::GitHubToken { token } if token == "legacy"
                ));
            });
        });
    }

    #[cfg(unix)]
    #[test]
    fn test_world_readable_file_refused() {
        use std::os::unix::fs::PermissionsExt;
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "providers:\n  oss:\n    kind: github\n    token: tok\n",
        );
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
        let err = resolve(Some(&path)).unwrap_err();
        assert!(matches!(err, MgitError::Config { .. }));
        assert!(err.to_string().contains("chmod"));
    }

    #[test]
    fn test_write_account_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.yaml");

        let mut fields = BTreeMap::new();
        fields.insert("username".to_string(), "alice".to_string());
        fields.insert("app_password".to_string(), "ATBBsecret".to_string());
        write_account(&path, "team", ProviderKind::Bitbucket, &fields).unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        without_credential_env(|| {
            let config = resolve(Some(&path)).unwrap();
            let account = config.account("team").unwrap();
            assert!(matches!(
                &account.credentials,
                Credentials::BitbucketAppPassword { username, .. } if username == "alice"
            ));
        });
    }

    #[test]
    fn test_select_account() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "global:\n  default_provider: b\nproviders:\n  a:\n    kind: github\n    token: t1\n  b:\n    kind: github\n    token: t2\n",
        );
        let config = resolve(Some(&path)).unwrap();
        assert_eq!(config.select_account(None).unwrap().name, "b");
        assert_eq!(config.select_account(Some("a")).unwrap().name, "a");
        assert!(config.select_account(Some("missing")).is_err());
    }

    #[test]
    fn test_global_settings_parsed() {
        let dir = TempDir::new().unwrap();
        let path = write_config(
            &dir,
            "global:\n  concurrency: 12\n  update_mode: pull\nproviders: {}\n",
        );
        let config = resolve(Some(&path)).unwrap();
        assert_eq!(config.global.concurrency, 12);
        assert_eq!(config.global.update_mode, UpdateMode::Pull);
    }
}
