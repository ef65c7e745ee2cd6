//! Template fragment cache.
//!
//! DESIGN
//! ======
//! Fragments are named markup templates served from the component store
//! (`/static/components/{name}.html`). The cache owns one shared pending
//! future per name: the first caller starts the fetch, every concurrent or
//! later caller awaits the same future, so each name is fetched at most once
//! while it succeeds. Fragments are parsed once and cloned for every use.
//!
//! ERROR HANDLING
//! ==============
//! `resolve` is all-or-nothing. It returns a `FragmentSet` only when every
//! requested name loaded, so view setup cannot run against a partial set.
//! A failed entry is evicted after its waiters observe the error; the next
//! separate `resolve` fetches it again. Successful entries never expire.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::{BoxFuture, FutureExt, Shared};
use tracing::{debug, info, warn};

use crate::binder::{self, FieldDecl};
use crate::markup::{self, Element, Node};

pub const TEMPLATE_ATTR: &str = "data-template";

// =============================================================================
// ERROR
// =============================================================================

#[derive(Debug, Clone, thiserror::Error)]
pub enum FragmentError {
    /// The store could not be reached or the body could not be read.
    #[error("fragment `{name}` fetch failed: {message}")]
    Fetch { name: String, message: String },

    /// The store answered with a non-success status.
    #[error("fragment `{name}` fetch returned status {status}")]
    Status { name: String, status: u16 },

    /// The markup has no element or declares an unknown binding.
    #[error("fragment `{name}` is invalid: {message}")]
    Parse { name: String, message: String },

    /// Names are limited to `[a-z0-9_-]` so they map onto a single path segment.
    #[error("invalid fragment name `{0}`")]
    InvalidName(String),

    /// A view asked a resolved set for a name it never requested.
    #[error("fragment `{0}` was not resolved")]
    NotResolved(String),
}

// =============================================================================
// SOURCES
// =============================================================================

/// Where fragment markup comes from. Enables mocking in tests.
#[async_trait::async_trait]
pub trait FragmentSource: Send + Sync {
    /// Fetch the raw markup for `name`.
    ///
    /// # Errors
    ///
    /// Returns a [`FragmentError`] when the markup cannot be retrieved.
    async fn fetch(&self, name: &str) -> Result<String, FragmentError>;
}

/// Component store reached over HTTP.
pub struct HttpFragmentSource {
    http: reqwest::Client,
    base_url: String,
}

impl HttpFragmentSource {
    #[must_use]
    pub fn new(http: reqwest::Client, base_url: &str) -> Self {
        Self { http, base_url: base_url.trim_end_matches('/').to_owned() }
    }

    #[must_use]
    pub fn url_for(&self, name: &str) -> String {
        fragment_url(&self.base_url, name)
    }
}

#[must_use]
pub fn fragment_url(base_url: &str, name: &str) -> String {
    format!("{}/static/components/{name}.html", base_url.trim_end_matches('/'))
}

#[async_trait::async_trait]
impl FragmentSource for HttpFragmentSource {
    async fn fetch(&self, name: &str) -> Result<String, FragmentError> {
        let url = self.url_for(name);
        let fetch_err = |e: reqwest::Error| FragmentError::Fetch { name: name.to_owned(), message: e.to_string() };

        let response = self.http.get(&url).send().await.map_err(fetch_err)?;
        let status = response.status();
        if !status.is_success() {
            return Err(FragmentError::Status { name: name.to_owned(), status: status.as_u16() });
        }
        response.text().await.map_err(fetch_err)
    }
}

/// Component store read from a local directory (`{dir}/{name}.html`).
pub struct DirFragmentSource {
    dir: PathBuf,
}

impl DirFragmentSource {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl FragmentSource for DirFragmentSource {
    async fn fetch(&self, name: &str) -> Result<String, FragmentError> {
        let path = self.dir.join(format!("{name}.html"));
        tokio::fs::read_to_string(&path)
            .await
            .map_err(|e| FragmentError::Fetch { name: name.to_owned(), message: format!("{}: {e}", path.display()) })
    }
}

// =============================================================================
// FRAGMENT
// =============================================================================

/// A parsed template with its slot declarations.
#[derive(Debug, Clone)]
pub struct Fragment {
    name: String,
    template: Element,
    fields: Vec<FieldDecl>,
}

impl Fragment {
    /// Parse markup into a fragment. The template root is the first element
    /// marked `data-template`, else the first top-level element.
    ///
    /// # Errors
    ///
    /// Returns [`FragmentError::Parse`] when the markup has no element or a
    /// slot declares an unknown binding.
    pub fn parse(name: &str, markup: &str) -> Result<Self, FragmentError> {
        let parse_err = |message: String| FragmentError::Parse { name: name.to_owned(), message };
        let nodes = markup::parse_fragment(markup);

        let marked = nodes.iter().find_map(|node| match node {
            Node::Element(el) => el.find(&|e: &Element| e.attr(TEMPLATE_ATTR).is_some()).cloned(),
            Node::Text(_) => None,
        });
        let template = match marked {
            Some(el) => el,
            None => nodes
                .into_iter()
                .find_map(|node| match node {
                    Node::Element(el) => Some(el),
                    Node::Text(_) => None,
                })
                .ok_or_else(|| parse_err("markup contains no element".to_owned()))?,
        };

        let fields = binder::declared_fields(&template).map_err(parse_err)?;
        Ok(Self { name: name.to_owned(), template, fields })
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Declared slots in document order.
    #[must_use]
    pub fn fields(&self) -> &[FieldDecl] {
        &self.fields
    }

    /// A fresh, unbound clone of the template.
    #[must_use]
    pub fn instantiate(&self) -> Element {
        let mut instance = self.template.clone();
        instance.remove_attr(TEMPLATE_ATTR);
        instance
    }
}

/// Fragments returned by a successful [`FragmentCache::resolve`].
#[derive(Debug, Clone, Default)]
pub struct FragmentSet {
    fragments: HashMap<String, Arc<Fragment>>,
}

impl FragmentSet {
    /// # Errors
    ///
    /// Returns [`FragmentError::NotResolved`] for a name outside the set.
    pub fn get(&self, name: &str) -> Result<&Fragment, FragmentError> {
        self.fragments
            .get(name)
            .map(|fragment| &**fragment)
            .ok_or_else(|| FragmentError::NotResolved(name.to_owned()))
    }

    /// # Errors
    ///
    /// Returns [`FragmentError::NotResolved`] for a name outside the set.
    pub fn instantiate(&self, name: &str) -> Result<Element, FragmentError> {
        self.get(name).map(Fragment::instantiate)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fragments.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }
}

// =============================================================================
// CACHE
// =============================================================================

type PendingFragment = Shared<BoxFuture<'static, Result<Arc<Fragment>, FragmentError>>>;
type Entries = Arc<Mutex<HashMap<String, PendingFragment>>>;

/// Owned fragment cache; clones share the same entries.
#[derive(Clone)]
pub struct FragmentCache {
    source: Arc<dyn FragmentSource>,
    entries: Entries,
}

impl FragmentCache {
    #[must_use]
    pub fn new(source: Arc<dyn FragmentSource>) -> Self {
        Self { source, entries: Arc::new(Mutex::new(HashMap::new())) }
    }

    /// Load every name, sharing in-flight fetches with concurrent callers.
    ///
    /// # Errors
    ///
    /// Returns the first [`FragmentError`] among the requested names.
    pub async fn resolve(&self, names: &[&str]) -> Result<FragmentSet, FragmentError> {
        let pending = names
            .iter()
            .map(|name| self.entry(name))
            .collect::<Result<Vec<_>, _>>()?;
        let loaded = futures::future::try_join_all(pending).await?;

        let fragments = loaded
            .into_iter()
            .map(|fragment| (fragment.name().to_owned(), fragment))
            .collect();
        Ok(FragmentSet { fragments })
    }

    /// Load a single fragment.
    ///
    /// # Errors
    ///
    /// Returns a [`FragmentError`] when the fragment cannot be loaded.
    pub async fn get(&self, name: &str) -> Result<Arc<Fragment>, FragmentError> {
        self.entry(name)?.await
    }

    /// A fragment that already finished loading, without starting a fetch.
    #[must_use]
    pub fn cached(&self, name: &str) -> Option<Arc<Fragment>> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        entries.get(name)?.peek()?.as_ref().ok().cloned()
    }

    fn entry(&self, name: &str) -> Result<PendingFragment, FragmentError> {
        if !is_valid_name(name) {
            return Err(FragmentError::InvalidName(name.to_owned()));
        }
        let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(pending) = entries.get(name) {
            return Ok(pending.clone());
        }
        let pending = load(Arc::clone(&self.source), Arc::clone(&self.entries), name.to_owned())
            .boxed()
            .shared();
        entries.insert(name.to_owned(), pending.clone());
        Ok(pending)
    }
}

async fn load(source: Arc<dyn FragmentSource>, entries: Entries, name: String) -> Result<Arc<Fragment>, FragmentError> {
    debug!(fragment = %name, "fetching fragment");
    let result = match source.fetch(&name).await {
        Ok(markup) => Fragment::parse(&name, &markup).map(Arc::new),
        Err(e) => Err(e),
    };
    match &result {
        Ok(fragment) => info!(fragment = %name, fields = fragment.fields().len(), "fragment cached"),
        Err(e) => {
            warn!(fragment = %name, error = %e, "fragment load failed");
            entries.lock().unwrap_or_else(PoisonError::into_inner).remove(&name);
        }
    }
    result
}

fn is_valid_name(name: &str) -> bool {
    !name.is_empty()
        && name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
}

#[cfg(test)]
#[path = "fragment_test.rs"]
mod tests;
