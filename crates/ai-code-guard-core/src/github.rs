use std::fmt;
use std::fs;
use std::io::{self, Cursor};
use std::path::{Component, Path, PathBuf};

use anyhow::{bail, Context, Result};
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::settings::GuardSettings;

const DEFAULT_ARCHIVE_BASE: &str = "https://github.com";
const FALLBACK_BRANCHES: [&str; 3] = ["master", "main", "develop"];

static REPO_URL: Lazy<Option<Regex>> = Lazy::new(|| {
    Regex::new(
        r"^(?:https?://)?(?:www\.)?github\.com/([A-Za-z0-9_.\-]+)/([A-Za-z0-9_.\-]+?)(?:\.git)?(?:/.*)?$",
    )
    .ok()
});

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RepoUrlError {
    #[error("invalid GitHub repository URL `{0}`: expected https://github.com/<owner>/<repo>")]
    Invalid(String),
}

/// Owner and name of a GitHub repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Local directory name used under the repos directory.
    pub fn dir_name(&self) -> String {
        format!("{}_{}", self.owner, self.name)
    }
}

impl fmt::Display for RepoRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.name)
    }
}

/// Parse `https://github.com/<owner>/<repo>[.git][/...]` into its owner and repository name.
pub fn parse_repo_url(url: &str) -> Result<RepoRef, RepoUrlError> {
    let trimmed = url.trim();
    let captures = REPO_URL
        .as_ref()
        .and_then(|re| re.captures(trimmed))
        .ok_or_else(|| RepoUrlError::Invalid(trimmed.to_string()))?;
    let owner = captures.get(1).map(|m| m.as_str()).unwrap_or_default();
    let name = captures.get(2).map(|m| m.as_str()).unwrap_or_default();
    let dots_only = |segment: &str| segment.chars().all(|c| c == '.');
    if owner.is_empty() || name.is_empty() || dots_only(owner) || dots_only(name) {
        return Err(RepoUrlError::Invalid(trimmed.to_string()));
    }
    Ok(RepoRef {
        owner: owner.to_string(),
        name: name.to_string(),
    })
}

/// A repository extracted on local disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedRepo {
    pub reference: RepoRef,
    /// Branch actually downloaded; differs from the request when a fallback branch was used.
    pub branch: String,
    pub path: PathBuf,
    pub files_extracted: usize,
}

/// Downloads branch archives from GitHub and unpacks them under the repos directory.
#[derive(Debug, Clone)]
pub struct GitHubFetcher {
    http: Client,
    archive_base: String,
    repos_dir: PathBuf,
    token: Option<String>,
}

impl GitHubFetcher {
    pub fn new(settings: &GuardSettings) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!("ai-code-guard/", env!("CARGO_PKG_VERSION")))
            .timeout(settings.timeout)
            .build()
            .context("failed to build GitHub HTTP client")?;
        Ok(Self {
            http,
            archive_base: DEFAULT_ARCHIVE_BASE.to_string(),
            repos_dir: settings.repos_dir(),
            token: settings.github_token.clone(),
        })
    }

    /// Point archive downloads at another host (mirrors, tests).
    pub fn with_archive_base(mut self, base: impl Into<String>) -> Self {
        self.archive_base = base.into().trim_end_matches('/').to_string();
        self
    }

    pub fn repos_dir(&self) -> &Path {
        &self.repos_dir
    }

    fn archive_url(&self, repo: &RepoRef, branch: &str) -> String {
        format!(
            "{}/{}/{}/archive/refs/heads/{}.zip",
            self.archive_base, repo.owner, repo.name, branch
        )
    }

    /// Download `branch` of the repository at `url`, falling back to common default branches on 404.
    #[instrument(name = "fetch_repo", skip(self))]
    pub async fn fetch(&self, url: &str, branch: &str) -> Result<FetchedRepo> {
        let reference = parse_repo_url(url)?;
        let mut attempts = vec![branch.to_string()];
        attempts.extend(
            FALLBACK_BRANCHES
                .iter()
                .filter(|candidate| **candidate != branch)
                .map(|candidate| candidate.to_string()),
        );

        for candidate in &attempts {
            let archive_url = self.archive_url(&reference, candidate);
            info!(url = %archive_url, "downloading repository archive");
            let mut request = self.http.get(&archive_url);
            if let Some(token) = &self.token {
                request = request.bearer_auth(token);
            }
            let response = request
                .send()
                .await
                .with_context(|| format!("failed to download {archive_url}"))?;

            match response.status() {
                StatusCode::OK => {
                    let bytes = response
                        .bytes()
                        .await
                        .with_context(|| format!("failed to read archive body from {archive_url}"))?
                        .to_vec();
                    let target = self.repos_dir.join(reference.dir_name());
                    let extract_target = target.clone();
                    let files_extracted = tokio::task::spawn_blocking(move || {
                        extract_archive(&bytes, &extract_target)
                    })
                    .await
                    .context("archive extraction task panicked")??;
                    info!(
                        repo = %reference,
                        branch = %candidate,
                        files = files_extracted,
                        path = %target.display(),
                        "repository extracted"
                    );
                    return Ok(FetchedRepo {
                        reference,
                        branch: candidate.clone(),
                        path: target,
                        files_extracted,
                    });
                }
                StatusCode::NOT_FOUND => {
                    debug!(branch = %candidate, "branch archive not found");
                    continue;
                }
                status => bail!("Failed to download repository: HTTP status {status}"),
            }
        }

        bail!(
            "Failed to download repository {}: HTTP status 404 for branches {}",
            reference,
            attempts.join(", ")
        )
    }
}

/// Unpack a zip archive into `target`, replacing any previous contents.
///
/// A single top-level directory shared by every entry (GitHub's `<repo>-<branch>/`) is
/// stripped. Entries whose names would escape `target` are skipped. Returns the number of
/// files written.
pub fn extract_archive(bytes: &[u8], target: &Path) -> Result<usize> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).context("repository archive is not a valid zip")?;

    let mut names = Vec::with_capacity(archive.len());
    for idx in 0..archive.len() {
        let entry = archive
            .by_index(idx)
            .with_context(|| format!("failed to read archive entry {idx}"))?;
        names.push(entry.enclosed_name().map(Path::to_path_buf));
    }
    let prefix = common_top_level(&names);

    if target.exists() {
        fs::remove_dir_all(target)
            .with_context(|| format!("failed to remove previous checkout {}", target.display()))?;
    }
    fs::create_dir_all(target)
        .with_context(|| format!("failed to create {}", target.display()))?;

    let mut written = 0usize;
    for (idx, name) in names.iter().enumerate() {
        let Some(name) = name else {
            warn!(entry = idx, "skipping archive entry with unsafe path");
            continue;
        };
        let relative = match &prefix {
            Some(prefix) => match name.strip_prefix(prefix) {
                Ok(rest) => rest.to_path_buf(),
                Err(_) => name.clone(),
            },
            None => name.clone(),
        };
        if relative.as_os_str().is_empty() {
            continue;
        }
        let out_path = target.join(&relative);
        let mut entry = archive
            .by_index(idx)
            .with_context(|| format!("failed to read archive entry {idx}"))?;
        if entry.is_dir() {
            fs::create_dir_all(&out_path)
                .with_context(|| format!("failed to create {}", out_path.display()))?;
            continue;
        }
        if let Some(parent) = out_path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let mut out = fs::File::create(&out_path)
            .with_context(|| format!("failed to create {}", out_path.display()))?;
        io::copy(&mut entry, &mut out)
            .with_context(|| format!("failed to write {}", out_path.display()))?;
        written += 1;
    }
    Ok(written)
}

fn common_top_level(names: &[Option<PathBuf>]) -> Option<PathBuf> {
    let mut shared: Option<&std::ffi::OsStr> = None;
    let mut nested = false;
    for name in names.iter().flatten() {
        let mut components = name.components();
        let first = match components.next() {
            Some(Component::Normal(first)) => first,
            _ => return None,
        };
        if components.next().is_some() {
            nested = true;
        }
        match shared {
            None => shared = Some(first),
            Some(existing) if existing == first => {}
            Some(_) => return None,
        }
    }
    if nested {
        shared.map(PathBuf::from)
    } else {
        None
    }
}
