//! Origin-neutral API surface: the [`Origin`] adapter trait, the registry
//! that routes origin keys to adapters, and shared download plumbing.

use crate::error::Error;
use std::io::Read;
use std::time::Duration;
use tracing::warn;

pub const USER_AGENT: &str = concat!("divaforge/", env!("CARGO_PKG_VERSION"));

/// Metadata record for a single remote mod. `hash` is an opaque content
/// fingerprint (an MD5 on GameBanana, an upload date on DivaModArchive) and
/// is only ever compared for equality.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModApiInfo {
    pub id: i64,
    pub hash: String,
    pub image: String,
    pub download: String,
    pub download_count: i64,
    pub like_count: i64,
    /// Set when the origin answered the batch but this entry was malformed.
    /// Error records are cached like successes so a broken entry does not
    /// trigger a re-fetch on every lookup.
    pub error: Option<String>,
}

impl ModApiInfo {
    pub fn error_record(id: i64, detail: String) -> Self {
        Self {
            id,
            hash: "err".to_string(),
            image: "err".to_string(),
            download: "err".to_string(),
            download_count: 0,
            like_count: 0,
            error: Some(detail),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiSearchResult {
    pub name: String,
    pub id: i64,
    pub author: String,
    /// Origin-defined category tag, passed back verbatim when installing.
    pub category: String,
    pub origin: &'static str,
}

/// A remote mod database. Implementations own a process-lifetime metadata
/// cache; dropping the adapter is the only way to flush it.
pub trait Origin {
    fn key(&self) -> &'static str;

    /// Cache lookup only, no network.
    fn cached(&self, id: i64) -> Option<ModApiInfo>;

    /// Resolves a single mod, hitting the network only on a cache miss.
    /// Adapters with a cheaper single-item endpoint override this.
    fn fetch_one(&mut self, id: i64, category: &str) -> Result<ModApiInfo, Error> {
        if let Some(hit) = self.cached(id) {
            return Ok(hit);
        }
        let records = self.fetch_many(&[(id, category.to_string())])?;
        records
            .into_iter()
            .next()
            .ok_or_else(|| Error::OriginUnavailable {
                origin: self.key().to_string(),
                detail: "empty batch response".to_string(),
            })
    }

    /// Resolves a batch of `(id, category)` pairs in one remote call,
    /// skipping ids already cached. The output aligns with the input
    /// positionally; per-item failures come back as error records rather
    /// than failing the batch.
    fn fetch_many(&mut self, ids: &[(i64, String)]) -> Result<Vec<ModApiInfo>, Error>;

    fn search(&mut self, query: &str) -> Result<Vec<ApiSearchResult>, Error>;

    /// Origin favicon bytes, fetched once and cached including the failure
    /// case. Purely cosmetic, so failures collapse to `None`.
    fn favicon(&mut self) -> Option<Vec<u8>>;
}

/// Routes origin keys (as stored in each mod's origin-identity file) to
/// adapters. Unknown keys are a hard error so that a typo never silently
/// reinstalls a mod from the wrong database.
pub struct OriginRegistry {
    origins: Vec<Box<dyn Origin>>,
}

impl Default for OriginRegistry {
    fn default() -> Self {
        Self::new(vec![
            Box::new(crate::gamebanana::GameBanana::new()),
            Box::new(crate::divamodarchive::DivaModArchive::new()),
        ])
    }
}

impl OriginRegistry {
    pub fn new(origins: Vec<Box<dyn Origin>>) -> Self {
        Self { origins }
    }

    pub fn keys(&self) -> Vec<&'static str> {
        self.origins.iter().map(|origin| origin.key()).collect()
    }

    fn adapter(&mut self, origin: &str) -> Result<&mut Box<dyn Origin>, Error> {
        self.origins
            .iter_mut()
            .find(|candidate| candidate.key() == origin)
            .ok_or_else(|| Error::UnsupportedOrigin(origin.to_string()))
    }

    pub fn fetch_mod_data(
        &mut self,
        origin: &str,
        id: i64,
        category: &str,
    ) -> Result<ModApiInfo, Error> {
        self.adapter(origin)?.fetch_one(id, category)
    }

    pub fn multi_fetch_mod_data(
        &mut self,
        origin: &str,
        ids: &[(i64, String)],
    ) -> Result<Vec<ModApiInfo>, Error> {
        self.adapter(origin)?.fetch_many(ids)
    }

    pub fn search_mods(&mut self, origin: &str, query: &str) -> Result<Vec<ApiSearchResult>, Error> {
        self.adapter(origin)?.search(query)
    }

    /// Searches every registered origin, concatenating results. An origin
    /// that errors contributes nothing; the others still answer.
    pub fn search_all(&mut self, query: &str) -> Vec<ApiSearchResult> {
        let mut results = Vec::new();
        for origin in &mut self.origins {
            match origin.search(query) {
                Ok(mut hits) => results.append(&mut hits),
                Err(err) => warn!("search on {} failed: {err}", origin.key()),
            }
        }
        results
    }

    pub fn favicon(&mut self, origin: &str) -> Result<Option<Vec<u8>>, Error> {
        Ok(self.adapter(origin)?.favicon())
    }
}

/// Short-timeout agent for metadata endpoints.
pub(crate) fn http_agent(read_timeout: Duration) -> ureq::Agent {
    ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(read_timeout)
        .timeout_write(Duration::from_secs(10))
        .build()
}

pub(crate) fn origin_unavailable(origin: &'static str, err: ureq::Error) -> Error {
    let detail = match err {
        ureq::Error::Status(code, _) => format!("HTTP {code}"),
        other => other.to_string(),
    };
    Error::OriginUnavailable {
        origin: origin.to_string(),
        detail,
    }
}

pub(crate) fn fetch_favicon(agent: &ureq::Agent, url: &str) -> Option<Vec<u8>> {
    let response = agent.get(url).set("User-Agent", USER_AGENT).call().ok()?;
    let mut bytes = Vec::new();
    response.into_reader().read_to_end(&mut bytes).ok()?;
    Some(bytes)
}

/// Downloads a payload into memory. Mod archives top out around a few
/// hundred MiB, small enough to buffer whole.
pub fn download_mod(url: &str) -> Result<Vec<u8>, Error> {
    let agent = ureq::AgentBuilder::new()
        .timeout_connect(Duration::from_secs(5))
        .timeout_read(Duration::from_secs(60))
        .timeout_write(Duration::from_secs(60))
        .build();
    let response = agent
        .get(url)
        .set("User-Agent", USER_AGENT)
        .call()
        .map_err(|err| match err {
            ureq::Error::Status(code, _) => Error::DownloadFailed(format!("HTTP {code}")),
            other => Error::DownloadFailed(other.to_string()),
        })?;
    let mut payload = Vec::new();
    response
        .into_reader()
        .read_to_end(&mut payload)
        .map_err(|err| Error::DownloadFailed(err.to_string()))?;
    Ok(payload)
}

