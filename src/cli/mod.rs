//! CLI surface and dispatch. The commands delegate into the core engines;
//! exit codes follow the error taxonomy (0 success, 1 partial failure,
//! 2 auth, 3 config, 4 invalid arguments, 130 user cancel).

mod progress;

use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::io::IsTerminal;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::{self, Credentials, ProviderAccount, ResolvedConfig};
use crate::constants::DEFAULT_GIT_TIMEOUT_SECS;
use crate::engine::{BulkEngine, EventSender, OperationOptions, UpdateMode};
use crate::error::{MgitError, Result};
use crate::git::GitRunner;
use crate::mask::mask;
use crate::output::note;
use crate::providers::{create_provider, Provider, ProviderKind, Repository};
use crate::query::engine::QueryEngine;
use crate::query::QueryPattern;

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Show the resolved configuration (credentials masked)
    Show,
    /// Set a global setting (concurrency, update_mode, default_provider)
    Set { key: String, value: String },
    /// Print the configuration file location
    Path,
}

/// Bulk clone, pull and query git repositories across providers
#[derive(Parser, Debug)]
#[command(name = "mgit")]
#[command(author, version = env!("CARGO_PKG_VERSION_FULL"), about, long_about = None)]
#[command(long_version = concat!(env!("CARGO_PKG_VERSION_FULL"), " (", env!("MGIT_COMMIT_HASH"), ")"))]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(short = 'l', long, global = true, default_value = "info")]
    pub loglevel: String,

    /// Suppress informational output (only show results/errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Use an alternate configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Clone every repository of a project into a directory
    CloneAll {
        /// Project (Azure DevOps project, GitHub org/user, Bitbucket workspace)
        project: String,

        /// Target directory (one subdirectory per repository)
        path: PathBuf,

        /// Provider account to use (defaults to the configured default)
        #[arg(short, long)]
        provider: Option<String>,

        /// Concurrent git operations (hard cap 50)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// What to do when a destination already exists
        #[arg(short = 'u', long, value_name = "skip|pull|force")]
        update_mode: Option<String>,

        /// Only these repository names (comma-separated, exact match)
        #[arg(long, value_name = "csv")]
        include: Option<String>,

        /// Skip these repository names (comma-separated, exact match)
        #[arg(long, value_name = "csv")]
        exclude: Option<String>,

        /// Show planned outcomes without touching disk or network
        #[arg(long)]
        dry_run: bool,

        /// Pre-confirm force deletions (non-interactive use)
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Pull every repository of a project (clones missing ones)
    PullAll {
        /// Project (Azure DevOps project, GitHub org/user, Bitbucket workspace)
        project: String,

        /// Target directory (one subdirectory per repository)
        path: PathBuf,

        /// Provider account to use (defaults to the configured default)
        #[arg(short, long)]
        provider: Option<String>,

        /// Concurrent git operations (hard cap 50)
        #[arg(short, long)]
        concurrency: Option<usize>,

        /// Only these repository names (comma-separated, exact match)
        #[arg(long, value_name = "csv")]
        include: Option<String>,

        /// Skip these repository names (comma-separated, exact match)
        #[arg(long, value_name = "csv")]
        exclude: Option<String>,

        /// Show planned outcomes without touching disk or network
        #[arg(long)]
        dry_run: bool,
    },

    /// Query repositories across all accounts with org/project/repo patterns
    List {
        /// Pattern, e.g. "*/*/api*" or "myorg/*/web"
        query: String,

        /// Restrict to these provider accounts (comma-separated)
        #[arg(short, long, value_name = "csv")]
        provider: Option<String>,

        /// Stop after this many matches
        #[arg(long)]
        limit: Option<usize>,

        /// Output format
        #[arg(long, default_value = "table", value_name = "table|json")]
        format: String,
    },

    /// Validate a credential and store it in the configuration
    Login {
        /// Provider kind: azuredevops, github or bitbucket
        #[arg(short, long)]
        provider: String,

        /// Account name (defaults to the provider kind)
        #[arg(short, long)]
        name: Option<String>,

        /// Organization URL (Azure DevOps)
        #[arg(long)]
        url: Option<String>,

        /// Personal access token (Azure DevOps)
        #[arg(long)]
        pat: Option<String>,

        /// Token (GitHub)
        #[arg(long)]
        token: Option<String>,

        /// API URL override (GitHub Enterprise)
        #[arg(long)]
        api_url: Option<String>,

        /// Username (Bitbucket)
        #[arg(long)]
        username: Option<String>,

        /// App password (Bitbucket)
        #[arg(long)]
        app_password: Option<String>,

        /// Default organization for this account
        #[arg(long)]
        default_org: Option<String>,

        /// Default project for this account
        #[arg(long)]
        default_project: Option<String>,

        /// Store without contacting the provider
        #[arg(long)]
        no_validate: bool,
    },

    /// Show or edit the configuration file
    Config {
        #[command(subcommand)]
        command: ConfigCommands,
    },
}

/// Parse and execute. Returns the process exit code.
pub async fn run(cancel_token: CancellationToken) -> Result<i32> {
    let cli = Cli::parse();

    if cli.quiet {
        crate::output::set_quiet(true);
    }

    let log_level =
        crate::logger::LogLevel::from_str(&cli.loglevel).unwrap_or(crate::logger::LogLevel::Info);
    if let Some(config_dir) = config::default_config_path()?.parent() {
        if let Err(e) = crate::logger::init_logger(config_dir, log_level, cli.quiet) {
            eprintln!("Warning: failed to initialize logger: {}", e);
        }
    }

    match cli.command {
        Commands::CloneAll {
            project,
            path,
            provider,
            concurrency,
            update_mode,
            include,
            exclude,
            dry_run,
            yes,
        } => {
            let config = config::resolve(cli.config.as_deref())?;
            let update_mode = match update_mode {
                Some(mode) => UpdateMode::from_str(&mode)?,
                None => config.global.update_mode,
            };
            let options = OperationOptions {
                update_mode,
                concurrency: concurrency.unwrap_or(config.global.concurrency),
                include: split_csv(include.as_deref()),
                exclude: split_csv(exclude.as_deref()),
                dry_run,
            };
            bulk(
                &config, provider.as_deref(), &project, &path, options, yes, cancel_token,
            )
            .await
        }
        Commands::PullAll {
            project,
            path,
            provider,
            concurrency,
            include,
            exclude,
            dry_run,
        } => {
            let config = config::resolve(cli.config.as_deref())?;
            let options = OperationOptions {
                update_mode: UpdateMode::Pull,
                concurrency: concurrency.unwrap_or(config.global.concurrency),
                include: split_csv(include.as_deref()),
                exclude: split_csv(exclude.as_deref()),
                dry_run,
            };
            bulk(
                &config, provider.as_deref(), &project, &path, options, false, cancel_token,
            )
            .await
        }
        Commands::List {
            query,
            provider,
            limit,
            format,
        } => {
            let config = config::resolve(cli.config.as_deref())?;
            list(&config, &query, provider.as_deref(), limit, &format).await
        }
        Commands::Login {
            provider,
            name,
            url,
            pat,
            token,
            api_url,
            username,
            app_password,
            default_org,
            default_project,
            no_validate,
        } => {
            let kind = ProviderKind::from_str(&provider)?;
            let fields = LoginFields {
                url,
                pat,
                token,
                api_url,
                username,
                app_password,
                default_org,
                default_project,
            };
            login(
                cli.config.as_deref(),
                kind,
                name.as_deref(),
                fields,
                no_validate,
            )
            .await
        }
        Commands::Config { command } => {
            let path = match cli.config.as_deref() {
                Some(p) => p.to_path_buf(),
                None => config::default_config_path()?,
            };
            match command {
                ConfigCommands::Show => {
                    let config = config::resolve(cli.config.as_deref())?;
                    show_config(&config);
                    Ok(0)
                }
                ConfigCommands::Set { key, value } => {
                    config::write_global(&path, &key, &value)?;
                    note(format!("set {} = {}", key, value));
                    Ok(0)
                }
                ConfigCommands::Path => {
                    println!("{}", path.display());
                    Ok(0)
                }
            }
        }
    }
}

fn split_csv(value: Option<&str>) -> Vec<String> {
    value
        .map(|v| {
            v.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

/// Map the positional project argument onto the provider hierarchy: it is
/// the project for Azure DevOps and the organization everywhere else.
async fn resolve_scope(
    provider: &Arc<dyn Provider>,
    account: &ProviderAccount,
    project_arg: &str,
) -> Result<(String, Option<String>)> {
    if !provider.supports_projects() && account.default_project.is_some() {
        warn!(
            "account {}: default_project is ignored, {} has no project tier",
            account.name,
            provider.kind()
        );
    }

    if provider.kind() == ProviderKind::AzureDevOps {
        let orgs = provider.list_organizations().await?;
        let org = orgs
            .first()
            .map(|o| o.name.clone())
            .ok_or_else(|| MgitError::config("Azure DevOps account has no organization"))?;
        let project = if project_arg.is_empty() {
            account.default_project.clone()
        } else {
            Some(project_arg.to_string())
        };
        // Validate before any listing or subprocess work starts.
        if project.is_none() {
            return Err(MgitError::invalid_argument(
                "Azure DevOps requires a project; pass one or set default_project",
            ));
        }
        Ok((org, project))
    } else {
        Ok((project_arg.to_string(), None))
    }
}

#[allow(clippy::too_many_arguments)]
async fn bulk(
    config: &ResolvedConfig,
    provider_name: Option<&str>,
    project_arg: &str,
    target: &std::path::Path,
    options: OperationOptions,
    assume_yes: bool,
    cancel_token: CancellationToken,
) -> Result<i32> {
    let account = config.select_account(provider_name)?;
    let provider = create_provider(account)?;

    let (org, project) = resolve_scope(&provider, account, project_arg).await?;
    let repos: Vec<Repository> = provider
        .list_repositories(&org, project.as_deref(), None)
        .await?
        .collect()
        .await?;
    note(format!(
        "{} repositories in {}{}",
        repos.len(),
        org,
        project.as_deref().map(|p| format!("/{}", p)).unwrap_or_default()
    ));

    let (events, rx) = EventSender::channel();
    if let Some(info) = provider.rate_limit_info().await {
        if info.remaining < repos.len() as u64 {
            events.notice(&format!(
                "provider rate limit low: {} requests remaining",
                info.remaining
            ));
        }
    }

    let renderer = progress::spawn_renderer(rx, repos.len(), crate::output::is_quiet());
    let engine = BulkEngine::new(
        provider,
        Arc::new(GitRunner::new(Duration::from_secs(DEFAULT_GIT_TIMEOUT_SECS))),
        events,
        confirm_callback(assume_yes),
        cancel_token.clone(),
    );

    let result = engine.run(repos, target, &options).await;
    // Drop the engine (and its event sender) so the renderer sees the
    // channel close, then wait for it to flush.
    drop(engine);
    let _ = renderer.await;
    let result = result?;

    note(result.summary());
    // Failures are errors, not chatter; they print even under --quiet.
    for failed in result.failed() {
        eprintln!(
            "failed: {}: {}",
            failed.repo,
            failed.reason.as_deref().unwrap_or("unknown")
        );
    }

    if cancel_token.is_cancelled() {
        Ok(130)
    } else if result.has_failures() {
        Ok(1)
    } else {
        Ok(0)
    }
}

/// Force deletions need an explicit go-ahead; `--yes` pre-confirms, a
/// non-interactive session refuses.
fn confirm_callback(assume_yes: bool) -> crate::engine::ConfirmFn {
    Arc::new(move |repo: &str| {
        if assume_yes {
            return true;
        }
        if !std::io::stdin().is_terminal() {
            return false;
        }
        eprint!("delete existing directory for '{}' and re-clone? [y/N] ", repo);
        let mut answer = String::new();
        if std::io::stdin().read_line(&mut answer).is_err() {
            return false;
        }
        matches!(answer.trim().to_lowercase().as_str(), "y" | "yes")
    })
}

async fn list(
    config: &ResolvedConfig,
    query: &str,
    provider_name: Option<&str>,
    limit: Option<usize>,
    format: &str,
) -> Result<i32> {
    let pattern = QueryPattern::parse(query)?;

    let accounts: Vec<&ProviderAccount> = match provider_name {
        Some(names) => {
            let mut subset = Vec::new();
            for name in split_csv(Some(names)) {
                subset.push(config.account(&name).ok_or_else(|| {
                    MgitError::invalid_argument(format!("unknown provider account: {}", name))
                })?);
            }
            subset
        }
        None => config.accounts.iter().collect(),
    };
    if accounts.is_empty() {
        eprintln!("no provider accounts configured; run `mgit login` first");
    }

    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
    for account in accounts {
        match create_provider(account) {
            Ok(provider) => providers.push(provider),
            Err(e) => warn!("account {}: {}", account.name, mask(&e.to_string())),
        }
    }

    let engine = QueryEngine::new(providers);
    let mut matches = engine.search(pattern, limit).await?;

    match format {
        "json" => println!("{}", crate::output::render_json(&mut matches)),
        "table" => {
            if matches.is_empty() {
                note(format!("no repositories matched {}", query));
            } else {
                print!("{}", crate::output::render_table(&mut matches));
            }
        }
        other => {
            return Err(MgitError::invalid_argument(format!(
                "format must be table or json, got '{}'",
                other
            )))
        }
    }
    Ok(0)
}

struct LoginFields {
    url: Option<String>,
    pat: Option<String>,
    token: Option<String>,
    api_url: Option<String>,
    username: Option<String>,
    app_password: Option<String>,
    default_org: Option<String>,
    default_project: Option<String>,
}

async fn login(
    config_path: Option<&std::path::Path>,
    kind: ProviderKind,
    name: Option<&str>,
    fields: LoginFields,
    no_validate: bool,
) -> Result<i32> {
    let name = name.map(str::to_string).unwrap_or_else(|| kind.to_string());

    let required = |value: &Option<String>, flag: &str| -> Result<String> {
        value.clone().ok_or_else(|| {
            MgitError::invalid_argument(format!("--{} is required for {}", flag, kind))
        })
    };

    let (credentials, base_url) = match kind {
        ProviderKind::AzureDevOps => (
            Credentials::AzurePat {
                pat: required(&fields.pat, "pat")?,
            },
            Some(required(&fields.url, "url")?),
        ),
        ProviderKind::GitHub => (
            Credentials::GitHubToken {
                token: required(&fields.token, "token")?,
            },
            fields.api_url.clone(),
        ),
        ProviderKind::Bitbucket => (
            Credentials::BitbucketAppPassword {
                username: required(&fields.username, "username")?,
                app_password: required(&fields.app_password, "app-password")?,
            },
            None,
        ),
    };

    let account = ProviderAccount {
        name: name.clone(),
        kind,
        base_url: base_url.clone(),
        credentials,
        default_org: fields.default_org.clone(),
        default_project: fields.default_project.clone(),
    };

    if !no_validate {
        let provider = create_provider(&account)?;
        provider.authenticate().await?;
        note(format!("credential for '{}' validated", name));
    }

    let path = match config_path {
        Some(p) => p.to_path_buf(),
        None => config::default_config_path()?,
    };
    let mut file_fields = BTreeMap::new();
    let mut insert = |key: &str, value: Option<String>| {
        if let Some(v) = value {
            file_fields.insert(key.to_string(), v);
        }
    };
    insert("url", fields.url);
    insert("pat", fields.pat);
    insert("token", fields.token);
    insert("api_url", fields.api_url);
    insert("username", fields.username);
    insert("app_password", fields.app_password);
    insert("default_org", fields.default_org);
    insert("default_project", fields.default_project);

    config::write_account(&path, &name, kind, &file_fields)?;
    note(format!("account '{}' written to {}", name, path.display()));
    Ok(0)
}

fn show_config(config: &ResolvedConfig) {
    println!("config file: {}", config.path.display());
    println!("global:");
    println!("  concurrency: {}", config.global.concurrency);
    println!("  update_mode: {}", config.global.update_mode);
    if let Some(default) = &config.global.default_provider {
        println!("  default_provider: {}", default);
    }
    println!("providers:");
    for account in &config.accounts {
        println!("  {}:", account.name);
        println!("    kind: {}", account.kind);
        if let Some(url) = &account.base_url {
            println!("    base_url: {}", url);
        }
        match &account.credentials {
            Credentials::AzurePat { .. } => println!("    pat: ********"),
            Credentials::GitHubToken { .. } => println!("    token: ********"),
            Credentials::BitbucketAppPassword { username, .. } => {
                println!("    username: {}", username);
                println!("    app_password: ********");
            }
        }
        if let Some(org) = &account.default_org {
            println!("    default_org: {}", org);
        }
        if let Some(project) = &account.default_project {
            println!("    default_project: {}", project);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_csv() {
        assert_eq!(split_csv(None), Vec::<String>::new());
        assert_eq!(split_csv(Some("a,b")), vec!["a", "b"]);
        assert_eq!(split_csv(Some(" a , b ,")), vec!["a", "b"]);
    }

    #[test]
    fn test_cli_parses_clone_all() {
        let cli = Cli::try_parse_from([
            "mgit",
            "clone-all",
            "Pay",
            "/tmp/repos",
            "--provider",
            "work",
            "--concurrency",
            "8",
            "--update-mode",
            "pull",
            "--exclude",
            "legacy,archive",
            "--dry-run",
        ])
        .unwrap();
        match cli.command {
            Commands::CloneAll {
                project,
                path,
                provider,
                concurrency,
                update_mode,
                exclude,
                dry_run,
                ..
            } => {
                assert_eq!(project, "Pay");
                assert_eq!(path, PathBuf::from("/tmp/repos"));
                assert_eq!(provider.as_deref(), Some("work"));
                assert_eq!(concurrency, Some(8));
                assert_eq!(update_mode.as_deref(), Some("pull"));
                assert_eq!(exclude.as_deref(), Some("legacy,archive"));
                assert!(dry_run);
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_cli_parses_list() {
        let cli = Cli::try_parse_from(["mgit", "list", "*/*/api*", "--limit", "5", "--format", "json"])
            .unwrap();
        match cli.command {
            Commands::List { query, limit, format, .. } => {
                assert_eq!(query, "*/*/api*");
                assert_eq!(limit, Some(5));
                assert_eq!(format, "json");
            }
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn test_cli_requires_subcommand_args() {
        assert!(Cli::try_parse_from(["mgit", "clone-all"]).is_err());
        assert!(Cli::try_parse_from(["mgit", "list"]).is_err());
    }
}
