//! Repository scanner.
//!
//! Discovers git checkouts under a base directory, analyzes each one on the
//! blocking pool, and keeps the results in a path-keyed cache that survives
//! restarts through `<cache_dir>/repository_cache.json`.
//!
//! # Discovery
//!
//! Immediate children of the base path that contain a `.git` marker are
//! repositories. Children without a marker are searched one level deeper.
//!
//! # Concurrency
//!
//! Scans run on a [`JoinSet`] gated by a semaphore sized by
//! `max_concurrent_scans`. The walk and file reads of one repository run in
//! `spawn_blocking`; the git probe runs as an async subprocess. A failure in
//! one repository is recorded as a skipped unit and never aborts the batch.
//!
//! # Read operations
//!
//! [`list_repositories`](RepositoryScanner::list_repositories),
//! [`get_repository`](RepositoryScanner::get_repository),
//! [`read_file`](RepositoryScanner::read_file), and
//! [`search`](RepositoryScanner::search) only ever read the cache: they
//! return nothing until at least one scan has populated it.

use chrono::{Duration, Utc};
use globset::{Glob, GlobSet, GlobSetBuilder};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::{Instant, UNIX_EPOCH};
use tokio::sync::{RwLock, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::RepositoriesConfig;
use crate::detect;
use crate::error::{Error, Result};
use crate::git;
use crate::manifest;
use crate::models::{
    DependencyInfo, FileInfo, FileNode, GitInfo, RepositoryInfo, RepositorySummary, SearchMatch,
};
use crate::outcome::{partition, Outcome, SkippedUnit};
use crate::record;

const CACHE_FILE: &str = "repository_cache.json";

/// Result of one scan pass.
#[derive(Debug, Clone, Serialize)]
pub struct ScanReport {
    pub repositories: Vec<RepositoryInfo>,
    pub skipped: Vec<SkippedUnit>,
    /// Wall-clock seconds for the whole pass.
    pub duration: f64,
}

pub struct RepositoryScanner {
    base_path: PathBuf,
    cache_path: PathBuf,
    ttl: Duration,
    max_concurrent_scans: usize,
    excludes: Arc<GlobSet>,
    cache: RwLock<BTreeMap<String, RepositoryInfo>>,
}

impl RepositoryScanner {
    /// Build a scanner and load any previously persisted cache.
    ///
    /// An inaccessible base path is a configuration error. An unreadable or
    /// outdated cache file is logged and ignored.
    pub async fn open(config: &RepositoriesConfig) -> Result<Self> {
        ensure_base_path(&config.base_path)?;
        let excludes = build_globset(&config.exclude_globs)?;
        let cache_path = config.cache_dir.join(CACHE_FILE);

        let cache = match tokio::fs::read_to_string(&cache_path).await {
            Ok(raw) => match record::decode_repository_cache(&raw) {
                Ok(cache) => {
                    info!(repositories = cache.len(), "loaded repository cache");
                    cache
                }
                Err(e) => {
                    warn!(path = %cache_path.display(), error = %e, "ignoring repository cache");
                    BTreeMap::new()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(e) => {
                warn!(path = %cache_path.display(), error = %e, "ignoring repository cache");
                BTreeMap::new()
            }
        };

        Ok(Self {
            base_path: config.base_path.clone(),
            cache_path,
            ttl: Duration::seconds(config.cache_ttl_secs as i64),
            max_concurrent_scans: config.max_concurrent_scans.max(1),
            excludes: Arc::new(excludes),
            cache: RwLock::new(cache),
        })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Scan every discovered repository, reusing fresh cache entries unless
    /// `force_rescan` is set.
    pub async fn scan(&self, force_rescan: bool) -> Result<Vec<RepositoryInfo>> {
        Ok(self.scan_report(force_rescan).await?.repositories)
    }

    /// Like [`scan`](Self::scan), but also reports the repositories that
    /// failed and why.
    pub async fn scan_report(&self, force_rescan: bool) -> Result<ScanReport> {
        let started = Instant::now();
        ensure_base_path(&self.base_path)?;

        let base = self.base_path.clone();
        let roots = tokio::task::spawn_blocking(move || discover_repositories(&base)).await??;
        info!(base = %self.base_path.display(), found = roots.len(), "starting repository scan");

        let now = Utc::now();
        let mut outcomes: Vec<(String, Outcome<RepositoryInfo>)> = Vec::new();
        let mut pending = Vec::new();
        {
            let cache = self.cache.read().await;
            for root in roots {
                let key = root.to_string_lossy().to_string();
                match cache.get(&key) {
                    Some(cached) if !force_rescan && now - cached.last_scanned < self.ttl => {
                        debug!(repo = %cached.name, "using cached scan");
                        outcomes.push((key, Outcome::Done(cached.clone())));
                    }
                    _ => pending.push((key, root)),
                }
            }
        }

        let semaphore = Arc::new(Semaphore::new(self.max_concurrent_scans));
        let mut set = JoinSet::new();
        for (key, root) in pending {
            let semaphore = semaphore.clone();
            let excludes = self.excludes.clone();
            set.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(e) => return (key.clone(), Outcome::skipped(key, e)),
                };
                match scan_repository(root, excludes).await {
                    Ok(repo) => (key, Outcome::Done(repo)),
                    Err(e) => (key.clone(), Outcome::skipped(key, e)),
                }
            });
        }

        let mut fresh = Vec::new();
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((key, Outcome::Done(repo))) => fresh.push((key, repo)),
                Ok((key, skipped)) => outcomes.push((key, skipped)),
                Err(e) => outcomes.push((String::new(), Outcome::skipped("scan task", e))),
            }
        }

        if !fresh.is_empty() {
            let mut cache = self.cache.write().await;
            for (key, mut repo) in fresh {
                if let Some(previous) = cache.get(&key) {
                    if repo.last_scanned < previous.last_scanned {
                        repo.last_scanned = previous.last_scanned;
                    }
                }
                info!(repo = %repo.name, files = repo.file_count, seconds = repo.scan_duration, "scanned repository");
                cache.insert(key.clone(), repo.clone());
                outcomes.push((key, Outcome::Done(repo)));
            }
        }

        if let Err(e) = self.save_cache().await {
            warn!(path = %self.cache_path.display(), error = %e, "failed to persist repository cache");
        }

        outcomes.sort_by(|a, b| a.0.cmp(&b.0));
        let (repositories, skipped) = partition(outcomes.into_iter().map(|(_, o)| o));
        for unit in &skipped {
            warn!(repo = %unit.unit, reason = %unit.reason, "skipped repository");
        }

        let duration = started.elapsed().as_secs_f64();
        info!(scanned = repositories.len(), skipped = skipped.len(), seconds = duration, "repository scan complete");

        Ok(ScanReport {
            repositories,
            skipped,
            duration,
        })
    }

    async fn save_cache(&self) -> Result<()> {
        let encoded = {
            let cache = self.cache.read().await;
            record::encode_repository_cache(&cache)?
        };
        record::write_atomic(&self.cache_path, &encoded).await
    }

    /// All cached repositories, sorted by name.
    pub async fn repositories(&self) -> Vec<RepositoryInfo> {
        let cache = self.cache.read().await;
        let mut repos: Vec<RepositoryInfo> = cache.values().cloned().collect();
        repos.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| a.path.cmp(&b.path)));
        repos
    }

    pub async fn list_repositories(&self) -> Vec<RepositorySummary> {
        self.repositories()
            .await
            .iter()
            .map(RepositorySummary::from)
            .collect()
    }

    /// First cached repository with this name, by path order.
    pub async fn get_repository(&self, name: &str) -> Option<RepositoryInfo> {
        let cache = self.cache.read().await;
        cache.values().find(|r| r.name == name).cloned()
    }

    fn not_found(name: &str) -> Error {
        Error::NotFound(format!("repository '{}'", name))
    }

    /// Dependencies of a repository grouped by ecosystem.
    pub async fn dependencies(&self, name: &str) -> Result<BTreeMap<String, Vec<DependencyInfo>>> {
        let repo = self
            .get_repository(name)
            .await
            .ok_or_else(|| Self::not_found(name))?;
        let mut grouped: BTreeMap<String, Vec<DependencyInfo>> = BTreeMap::new();
        for dep in repo.dependencies {
            grouped.entry(dep.ecosystem.clone()).or_default().push(dep);
        }
        Ok(grouped)
    }

    pub async fn file_structure(
        &self,
        name: &str,
        max_depth: usize,
    ) -> Result<BTreeMap<String, FileNode>> {
        let repo = self
            .get_repository(name)
            .await
            .ok_or_else(|| Self::not_found(name))?;
        Ok(FileNode::truncate_tree(&repo.file_structure, max_depth))
    }

    /// Read a file inside a cached repository. Paths that are absolute or
    /// climb out of the repository root are rejected.
    pub async fn read_file(&self, name: &str, relative_path: &str) -> Result<String> {
        let repo = self
            .get_repository(name)
            .await
            .ok_or_else(|| Self::not_found(name))?;

        let rel = Path::new(relative_path);
        if relative_path.is_empty()
            || rel
                .components()
                .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(Error::Validation(format!(
                "path '{}' is outside repository '{}'",
                relative_path, name
            )));
        }

        let root = PathBuf::from(&repo.path);
        let full = root.join(rel);
        let canonical_root = tokio::fs::canonicalize(&root).await?;
        let canonical = tokio::fs::canonicalize(&full).await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("file '{}' in repository '{}'", relative_path, name))
            } else {
                Error::Io(e)
            }
        })?;
        if !canonical.starts_with(&canonical_root) {
            return Err(Error::Validation(format!(
                "path '{}' is outside repository '{}'",
                relative_path, name
            )));
        }

        let bytes = tokio::fs::read(&canonical).await?;
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    /// Case-insensitive substring search over source files of the cached
    /// repositories, optionally restricted to `repo_names`. Matches come back
    /// in repository, file, then line order.
    pub async fn search(
        &self,
        pattern: &str,
        repo_names: Option<&[String]>,
        limit: Option<usize>,
    ) -> Result<Vec<SearchMatch>> {
        if pattern.is_empty() {
            return Err(Error::Validation("search pattern must not be empty".into()));
        }

        let targets: Vec<(String, PathBuf)> = self
            .repositories()
            .await
            .into_iter()
            .filter(|r| repo_names.map_or(true, |names| names.iter().any(|n| n == &r.name)))
            .map(|r| (r.name, PathBuf::from(r.path)))
            .collect();

        let needle = pattern.to_lowercase();
        let excludes = self.excludes.clone();
        let limit = limit.unwrap_or(usize::MAX);
        let matches = tokio::task::spawn_blocking(move || {
            let mut matches = Vec::new();
            for (name, root) in targets {
                if matches.len() >= limit {
                    break;
                }
                search_repository(&name, &root, &needle, &excludes, limit, &mut matches);
            }
            matches
        })
        .await?;

        Ok(matches)
    }
}

fn ensure_base_path(base: &Path) -> Result<()> {
    match std::fs::metadata(base) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(Error::Config(format!(
            "repository base path is not a directory: {}",
            base.display()
        ))),
        Err(e) => Err(Error::Config(format!(
            "repository base path {} is not accessible: {}",
            base.display(),
            e
        ))),
    }
}

fn build_globset(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        let glob = Glob::new(pattern)
            .map_err(|e| Error::Config(format!("invalid exclude glob '{}': {}", pattern, e)))?;
        builder.add(glob);
    }
    builder
        .build()
        .map_err(|e| Error::Config(format!("invalid exclude globs: {}", e)))
}

fn has_git_marker(dir: &Path) -> bool {
    dir.join(".git").exists()
}

fn sorted_subdirs(dir: &Path) -> std::io::Result<Vec<PathBuf>> {
    let mut dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        }
    }
    dirs.sort();
    Ok(dirs)
}

fn discover_repositories(base: &Path) -> Result<Vec<PathBuf>> {
    let top = sorted_subdirs(base).map_err(|e| {
        Error::Config(format!(
            "repository base path {} is not readable: {}",
            base.display(),
            e
        ))
    })?;

    let mut roots = Vec::new();
    for dir in top {
        if has_git_marker(&dir) {
            roots.push(dir);
            continue;
        }
        match sorted_subdirs(&dir) {
            Ok(nested) => roots.extend(nested.into_iter().filter(|d| has_git_marker(d))),
            Err(e) => warn!(dir = %dir.display(), error = %e, "skipping unreadable directory"),
        }
    }
    Ok(roots)
}

fn relative_slash_path(root: &Path, path: &Path) -> String {
    let rel = path.strip_prefix(root).unwrap_or(path);
    rel.components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Walk a repository, pruning skip-listed and excluded directories.
fn walk_repository<'a>(
    root: &'a Path,
    excludes: &'a GlobSet,
) -> impl Iterator<Item = walkdir::Result<walkdir::DirEntry>> + 'a {
    WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(move |e| {
            if e.depth() == 0 {
                return true;
            }
            let name = e.file_name().to_string_lossy();
            if e.file_type().is_dir() && detect::SKIP_DIRS.contains(&name.as_ref()) {
                return false;
            }
            !excludes.is_match(relative_slash_path(root, e.path()))
        })
}

/// Everything gathered from one repository's working tree.
struct TreeScan {
    files: Vec<FileInfo>,
    frameworks: BTreeSet<String>,
    dependencies: Vec<DependencyInfo>,
}

fn collect_files(root: &Path, excludes: &GlobSet) -> Vec<FileInfo> {
    let mut files = Vec::new();
    for entry in walk_repository(root, excludes) {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                warn!(repo = %root.display(), error = %e, "skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().is_file() {
            continue;
        }
        let meta = match entry.metadata() {
            Ok(meta) => meta,
            Err(e) => {
                warn!(file = %entry.path().display(), error = %e, "skipping unreadable file");
                continue;
            }
        };

        let file_name = entry.file_name().to_string_lossy();
        let path = relative_slash_path(root, entry.path());
        let modified_secs = meta
            .modified()
            .unwrap_or(UNIX_EPOCH)
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_secs() as i64;

        files.push(FileInfo {
            language: detect::detect_language(&file_name).map(str::to_string),
            is_config: detect::is_config_file(&file_name),
            is_test: detect::is_test_file(&path),
            path,
            size: meta.len(),
            modified: chrono::DateTime::from_timestamp(modified_secs, 0).unwrap_or_default(),
        });
    }
    files
}

fn read_lossy(path: &Path) -> std::io::Result<String> {
    std::fs::read(path).map(|bytes| String::from_utf8_lossy(&bytes).into_owned())
}

fn analyze_tree(root: &Path, excludes: &GlobSet) -> TreeScan {
    let files = collect_files(root, excludes);
    let mut frameworks = BTreeSet::new();
    let mut dependencies = Vec::new();

    // Manifests anywhere in the tree feed framework detection; only the
    // root-level ones contribute dependencies.
    for file in &files {
        let file_name = file.path.rsplit('/').next().unwrap_or(file.path.as_str());
        let Some(rule) = detect::manifest_rule(file_name) else {
            continue;
        };
        let content = match read_lossy(&root.join(&file.path)) {
            Ok(content) => content,
            Err(e) => {
                warn!(file = %file.path, error = %e, "skipping unreadable manifest");
                continue;
            }
        };
        let parsed = match manifest::parse_manifest(file_name, &content) {
            Ok(deps) => deps,
            Err(e) => {
                warn!(file = %file.path, error = %e, "skipping malformed manifest");
                Vec::new()
            }
        };
        let names: Vec<String> = parsed.iter().map(|d| d.name.clone()).collect();
        frameworks.extend(
            detect::frameworks_in_manifest(rule, &content, &names)
                .into_iter()
                .map(str::to_string),
        );
        if file.path == file_name {
            dependencies.extend(parsed);
        }
    }

    for language in detect::SAMPLED_LANGUAGES {
        let sample = files
            .iter()
            .filter(|f| f.language.as_deref() == Some(*language))
            .take(detect::SAMPLE_LIMIT);
        for file in sample {
            match read_lossy(&root.join(&file.path)) {
                Ok(content) => frameworks.extend(
                    detect::frameworks_in_source(&content)
                        .into_iter()
                        .map(str::to_string),
                ),
                Err(e) => debug!(file = %file.path, error = %e, "skipping unreadable source"),
            }
        }
    }

    TreeScan {
        files,
        frameworks,
        dependencies,
    }
}

/// Languages ordered by file count (descending, then name), and the primary
/// language: the most frequent, lexicographically smallest on ties.
pub fn rank_languages(files: &[FileInfo]) -> (String, Vec<String>) {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for file in files {
        if let Some(lang) = file.language.as_deref() {
            *counts.entry(lang).or_default() += 1;
        }
    }
    let mut ranked: Vec<(&str, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));

    let primary = ranked
        .first()
        .map(|(lang, _)| lang.to_string())
        .unwrap_or_else(|| "unknown".to_string());
    (primary, ranked.into_iter().map(|(l, _)| l.to_string()).collect())
}

fn empty_dir() -> FileNode {
    FileNode::Directory {
        children: BTreeMap::new(),
        truncated: false,
    }
}

fn insert_node(level: &mut BTreeMap<String, FileNode>, parts: &[&str], leaf: FileNode) {
    match parts {
        [] => {}
        [name] => {
            level.insert(name.to_string(), leaf);
        }
        [dir, rest @ ..] => {
            let node = level.entry(dir.to_string()).or_insert_with(empty_dir);
            if let FileNode::File { .. } = node {
                *node = empty_dir();
            }
            if let FileNode::Directory { children, .. } = node {
                insert_node(children, rest, leaf);
            }
        }
    }
}

pub fn build_file_tree(files: &[FileInfo]) -> BTreeMap<String, FileNode> {
    let mut tree = BTreeMap::new();
    for file in files {
        let parts: Vec<&str> = file.path.split('/').collect();
        insert_node(
            &mut tree,
            &parts,
            FileNode::File {
                size: file.size,
                language: file.language.clone(),
                is_config: file.is_config,
                is_test: file.is_test,
            },
        );
    }
    tree
}

fn assemble(
    root: &Path,
    scan: TreeScan,
    git_info: Option<GitInfo>,
    scan_duration: f64,
) -> RepositoryInfo {
    let (primary_language, languages) = rank_languages(&scan.files);
    RepositoryInfo {
        name: root
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| root.to_string_lossy().to_string()),
        path: root.to_string_lossy().to_string(),
        primary_language,
        languages,
        frameworks: scan.frameworks.into_iter().collect(),
        dependencies: scan.dependencies,
        file_structure: build_file_tree(&scan.files),
        git_info,
        size_bytes: scan.files.iter().map(|f| f.size).sum(),
        file_count: scan.files.len(),
        last_scanned: Utc::now(),
        scan_duration,
    }
}

async fn scan_repository(root: PathBuf, excludes: Arc<GlobSet>) -> Result<RepositoryInfo> {
    let started = Instant::now();
    let walk_root = root.clone();
    let scan = tokio::task::spawn_blocking(move || analyze_tree(&walk_root, &excludes)).await?;
    let git_info = git::probe(&root).await;
    Ok(assemble(&root, scan, git_info, started.elapsed().as_secs_f64()))
}

fn search_repository(
    name: &str,
    root: &Path,
    needle: &str,
    excludes: &GlobSet,
    limit: usize,
    matches: &mut Vec<SearchMatch>,
) {
    for entry in walk_repository(root, excludes) {
        let Ok(entry) = entry else { continue };
        if !entry.file_type().is_file() || !detect::is_searchable(&entry.file_name().to_string_lossy()) {
            continue;
        }
        let content = match read_lossy(entry.path()) {
            Ok(content) => content,
            Err(e) => {
                debug!(file = %entry.path().display(), error = %e, "skipping unreadable file");
                continue;
            }
        };
        let file_path = relative_slash_path(root, entry.path());
        for (idx, line) in content.lines().enumerate() {
            if line.to_lowercase().contains(needle) {
                matches.push(SearchMatch {
                    repository: name.to_string(),
                    file_path: file_path.clone(),
                    line_number: idx + 1,
                    line_content: line.trim().to_string(),
                });
                if matches.len() >= limit {
                    return;
                }
            }
        }
    }
}
