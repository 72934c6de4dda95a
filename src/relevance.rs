//! Relevance scoring of repositories and tables against task text.
//!
//! # Repository score
//!
//! Points accumulate against a maximum of 10 and are divided by 10, clamped
//! to `[0, 1]`:
//!
//! | Signal | Points |
//! |--------|--------|
//! | keyword contained in the repository name | 1.0 each, at most 3.0 |
//! | primary language is a task technology | 2.0 |
//! | secondary language is a task technology | 0.5 each, at most 1.0 |
//! | framework is a task keyword | 0.7 each, at most 2.0 |
//! | more than 100 files / more than 50 files | 0.5 / 0.3 |
//! | last commit under 30 days / under 90 days | 0.5 / 0.3 |
//! | share of task technologies the repository stack covers | × 1.5 |
//!
//! The only clock-dependent term is recency, and it takes `now` explicitly in
//! [`score_repository_at`].
//!
//! # Table score
//!
//! Unnormalized and used only for ranking: 3 per keyword in the table name,
//! 1 per keyword per column name, 2 per keyword in the table comment.

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashSet};
use tokio::sync::Mutex;
use tracing::debug;

use crate::cache::TtlCache;
use crate::models::{RepositoryInfo, TableInfo};

/// Technology category to the lowercase substrings that signal it.
pub const TECHNOLOGY_KEYWORDS: &[(&str, &[&str])] = &[
    ("java", &["java", "spring", "maven", "gradle", "jpa", "hibernate"]),
    ("javascript", &["javascript", "js", "node", "npm", "react", "angular", "vue"]),
    ("typescript", &["typescript", "ts", "angular", "react"]),
    ("python", &["python", "django", "flask", "pip", "fastapi"]),
    ("database", &["database", "sql", "oracle", "mysql", "postgres", "table", "schema"]),
    ("api", &["api", "rest", "graphql", "endpoint", "service"]),
    ("frontend", &["frontend", "ui", "component", "css", "html", "angular", "react"]),
    ("backend", &["backend", "service", "api", "database", "server"]),
];

pub const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "in", "on", "at", "to", "for", "of", "with", "by",
    "from", "is", "are", "was", "were", "be", "been", "have", "has", "had", "do", "does", "did",
    "will", "would", "could", "should", "may", "might", "must", "can", "this", "that", "these",
    "those", "i", "you", "he", "she", "it", "we", "they", "me", "him", "her", "us", "them", "my",
    "your", "his", "our", "their", "what", "when", "where", "why", "how", "who", "which",
];

/// Most tables returned by [`rank_tables`].
pub const MAX_RELEVANT_TABLES: usize = 10;

const MAX_POINTS: f64 = 10.0;

static WORD: Lazy<Regex> = Lazy::new(|| Regex::new(r"\w+").expect("valid regex"));

/// Lowercase word tokens longer than two characters, minus stop words,
/// de-duplicated in first-seen order.
pub fn extract_keywords(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let mut seen = HashSet::new();
    WORD.find_iter(&lower)
        .map(|m| m.as_str())
        .filter(|w| w.chars().count() > 2 && !STOP_WORDS.contains(w))
        .filter(|w| seen.insert(w.to_string()))
        .map(str::to_string)
        .collect()
}

/// Technology categories any of whose keywords occurs in the text.
pub fn identify_technologies(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    TECHNOLOGY_KEYWORDS
        .iter()
        .filter(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(tech, _)| tech.to_string())
        .collect()
}

fn technology_words(tech: &str) -> &'static [&'static str] {
    TECHNOLOGY_KEYWORDS
        .iter()
        .find(|(name, _)| *name == tech)
        .map(|(_, words)| *words)
        .unwrap_or(&[])
}

/// Fraction of task technologies whose keyword list hits any of the
/// repository's languages or frameworks.
pub fn tech_alignment(repo: &RepositoryInfo, technologies: &[String]) -> f64 {
    if technologies.is_empty() {
        return 0.0;
    }
    let indicators: Vec<String> = repo
        .languages
        .iter()
        .chain(repo.frameworks.iter())
        .map(|s| s.to_lowercase())
        .collect();
    let aligned = technologies
        .iter()
        .filter(|tech| {
            technology_words(tech)
                .iter()
                .any(|w| indicators.iter().any(|ind| ind.contains(w)))
        })
        .count();
    aligned as f64 / technologies.len() as f64
}

/// Normalized relevance of a repository, in `[0, 1]`.
pub fn score_repository_at(
    repo: &RepositoryInfo,
    keywords: &[String],
    technologies: &[String],
    now: DateTime<Utc>,
) -> f64 {
    let mut points = 0.0;

    let name = repo.name.to_lowercase();
    let name_hits = keywords.iter().filter(|k| name.contains(k.as_str())).count();
    points += (name_hits as f64).min(3.0);

    let primary = repo.primary_language.to_lowercase();
    if technologies.iter().any(|t| *t == primary) {
        points += 2.0;
    }

    let secondary_hits = repo
        .languages
        .iter()
        .map(|l| l.to_lowercase())
        .filter(|l| *l != primary && technologies.iter().any(|t| t == l))
        .count();
    points += (secondary_hits as f64 * 0.5).min(1.0);

    let framework_hits = repo
        .frameworks
        .iter()
        .filter(|f| keywords.iter().any(|k| *k == f.to_lowercase()))
        .count();
    points += (framework_hits as f64 * 0.7).min(2.0);

    if repo.file_count > 100 {
        points += 0.5;
    } else if repo.file_count > 50 {
        points += 0.3;
    }

    if let Some(git) = &repo.git_info {
        let days = (now - git.last_commit_date).num_days();
        if days < 30 {
            points += 0.5;
        } else if days < 90 {
            points += 0.3;
        }
    }

    points += tech_alignment(repo, technologies) * 1.5;

    (points / MAX_POINTS).clamp(0.0, 1.0)
}

pub fn score_repository(repo: &RepositoryInfo, keywords: &[String], technologies: &[String]) -> f64 {
    score_repository_at(repo, keywords, technologies, Utc::now())
}

pub fn score_table(table: &TableInfo, keywords: &[String]) -> i64 {
    let name = table.name.to_lowercase();
    let mut score = 0;
    for keyword in keywords {
        let keyword = keyword.to_lowercase();
        if name.contains(&keyword) {
            score += 3;
        }
        for column in &table.columns {
            if column.name.to_lowercase().contains(&keyword) {
                score += 1;
            }
        }
        if let Some(comment) = &table.comment {
            if comment.to_lowercase().contains(&keyword) {
                score += 2;
            }
        }
    }
    score
}

/// Tables with a positive score, highest first, at most
/// [`MAX_RELEVANT_TABLES`]. Equal scores keep their input order.
pub fn rank_tables(tables: &[TableInfo], keywords: &[String]) -> Vec<(String, i64)> {
    let mut scored: Vec<(String, i64)> = tables
        .iter()
        .map(|t| (t.name.clone(), score_table(t, keywords)))
        .filter(|(_, score)| *score > 0)
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.truncate(MAX_RELEVANT_TABLES);
    scored
}

/// Repository scoring with a per-description result cache.
pub struct RelevanceEngine {
    cache: Mutex<TtlCache<String, BTreeMap<String, f64>>>,
}

impl RelevanceEngine {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            cache: Mutex::new(TtlCache::new(ttl_secs)),
        }
    }

    /// Score every candidate against a task description.
    ///
    /// A cached result is reused only if it covers every candidate.
    pub async fn score_all(
        &self,
        description: &str,
        repos: &[RepositoryInfo],
    ) -> BTreeMap<String, f64> {
        let key = hex::encode(Sha256::digest(description.as_bytes()));
        let mut cache = self.cache.lock().await;
        if let Some(hit) = cache.get(&key) {
            if repos.iter().all(|r| hit.contains_key(&r.name)) {
                debug!(candidates = repos.len(), "relevance cache hit");
                return hit;
            }
        }

        let keywords = extract_keywords(description);
        let technologies = identify_technologies(description);
        let now = Utc::now();
        let scores: BTreeMap<String, f64> = repos
            .iter()
            .map(|r| (r.name.clone(), score_repository_at(r, &keywords, &technologies, now)))
            .collect();
        cache.insert(key, scores.clone());
        scores
    }
}
