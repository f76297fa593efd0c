//! Resource Classifier: picks the caching strategy for a request URL.
//!
//! Precedence is `never` → `static` → `dynamic` → `html`. Extension based
//! matches run before the page heuristic so a stylesheet is never treated
//! as a navigation.

use hashbrown::HashSet;
use regex::Regex;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::{Result, ServiceWorkerError};

/// Class of a resource, one per caching strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceClass {
    /// Build asset: cache-first against the static cache.
    Static,
    /// Navigable page (and anything unrecognised): network-first.
    Html,
    /// Semi-volatile asset: stale-while-revalidate.
    Dynamic,
    /// Deny-listed: straight to the network, never cached.
    Never,
}

/// Classification rule table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassificationRules {
    /// Regexes over the full URL that must never be cached.
    pub never_patterns: Vec<String>,

    /// Regexes over the full URL for stale-while-revalidate resources.
    pub dynamic_patterns: Vec<String>,

    /// File extensions (without dot) treated as static assets.
    pub static_extensions: Vec<String>,
}

impl Default for ClassificationRules {
    fn default() -> Self {
        Self {
            never_patterns: [
                r"^https://.*\.firebaseio\.com",
                r"^https://.*\.googleapis\.com/.*firebase",
                r"^https://.*\.gstatic\.com/.*firebase",
                r"^https://(securetoken|identitytoolkit)\.googleapis\.com",
                r"^https://[^/]+\.supabase\.co/",
                r"/api/",
                r"\?.*nocache",
            ]
            .map(String::from)
            .to_vec(),
            dynamic_patterns: [
                r"^https://fonts\.googleapis\.com",
                r"^https://fonts\.gstatic\.com",
                r"\.(?:png|jpg|jpeg|svg|gif|webp)$",
                r"\.(?:css|js)$",
            ]
            .map(String::from)
            .to_vec(),
            static_extensions: [
                "css", "js", "png", "jpg", "jpeg", "svg", "gif", "webp", "ico", "woff", "woff2",
                "ttf",
            ]
            .map(String::from)
            .to_vec(),
        }
    }
}

/// Compiled classifier. Immutable once built.
#[derive(Debug, Clone)]
pub struct Classifier {
    origin: url::Origin,
    static_paths: HashSet<String>,
    static_extensions: HashSet<String>,
    never: Vec<Regex>,
    dynamic: Vec<Regex>,
}

impl Classifier {
    /// Compile the rules. `manifest` holds absolute URLs of build assets.
    pub fn new(origin: &Url, manifest: &[Url], rules: &ClassificationRules) -> Result<Self> {
        Ok(Self {
            origin: origin.origin(),
            static_paths: manifest.iter().map(|u| u.path().to_string()).collect(),
            static_extensions: rules
                .static_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            never: compile(&rules.never_patterns)?,
            dynamic: compile(&rules.dynamic_patterns)?,
        })
    }

    /// Classify a URL.
    pub fn classify(&self, url: &Url) -> ResourceClass {
        if self.is_never_cache(url) {
            ResourceClass::Never
        } else if self.is_static(url) {
            ResourceClass::Static
        } else if self.dynamic.iter().any(|r| r.is_match(url.as_str())) {
            ResourceClass::Dynamic
        } else {
            ResourceClass::Html
        }
    }

    /// Whether the URL is on the deny-list.
    pub fn is_never_cache(&self, url: &Url) -> bool {
        self.never.iter().any(|r| r.is_match(url.as_str()))
    }

    /// Whether the URL looks like a navigable page.
    pub fn is_page(url: &Url) -> bool {
        let path = url.path();
        let last = path.rsplit('/').next().unwrap_or("");
        path == "/" || path.ends_with(".html") || !last.contains('.')
    }

    fn is_static(&self, url: &Url) -> bool {
        if url.origin() == self.origin && self.static_paths.contains(url.path()) {
            return true;
        }
        extension(url).is_some_and(|ext| self.static_extensions.contains(&ext))
    }
}

fn extension(url: &Url) -> Option<String> {
    let last = url.path().rsplit('/').next()?;
    let (_, ext) = last.rsplit_once('.')?;
    Some(ext.to_ascii_lowercase())
}

fn compile(patterns: &[String]) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|p| {
            Regex::new(p).map_err(|source| ServiceWorkerError::InvalidPattern {
                pattern: p.clone(),
                source,
            })
        })
        .collect()
}
