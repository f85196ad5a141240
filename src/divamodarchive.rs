use crate::api::{
    self, fetch_favicon, origin_unavailable, ApiSearchResult, ModApiInfo, Origin, USER_AGENT,
};
use crate::error::Error;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const ORIGIN_KEY: &str = "divamodarchive";

const API_BASE: &str = "https://divamodarchive.com/api/v1";
const SEARCH_ENDPOINT: &str = "/posts/latest";
const GET_BY_ID_ENDPOINT: &str = "/posts/";
const GET_BULK_ENDPOINT: &str = "/posts/posts";
const FAVICON_URL: &str = "https://divamodarchive.com/favicon.ico";

/// DivaModArchive posts carry no checksum, so the post's last-modified date
/// stands in as the content fingerprint.
pub struct DivaModArchive {
    agent: ureq::Agent,
    api_base: String,
    favicon_url: String,
    cache: HashMap<i64, ModApiInfo>,
    favicon: Option<Option<Vec<u8>>>,
}

impl DivaModArchive {
    pub fn new() -> Self {
        Self::with_endpoints(API_BASE, FAVICON_URL)
    }

    /// Endpoint injection for tests.
    pub fn with_endpoints(api_base: &str, favicon_url: &str) -> Self {
        Self {
            agent: api::http_agent(Duration::from_secs(10)),
            api_base: api_base.to_string(),
            favicon_url: favicon_url.to_string(),
            cache: HashMap::new(),
            favicon: None,
        }
    }
}

impl Default for DivaModArchive {
    fn default() -> Self {
        Self::new()
    }
}

impl Origin for DivaModArchive {
    fn key(&self) -> &'static str {
        ORIGIN_KEY
    }

    fn cached(&self, id: i64) -> Option<ModApiInfo> {
        self.cache.get(&id).cloned()
    }

    /// Single-post endpoint; cheaper than the bulk route for one id.
    fn fetch_one(&mut self, id: i64, _category: &str) -> Result<ModApiInfo, Error> {
        if let Some(hit) = self.cached(id) {
            return Ok(hit);
        }
        debug!("fetching mod {id} from divamodarchive");
        let response = self
            .agent
            .get(&format!("{}{}{}", self.api_base, GET_BY_ID_ENDPOINT, id))
            .set("User-Agent", USER_AGENT)
            .call()
            .map_err(|err| origin_unavailable(ORIGIN_KEY, err))?;
        let post: Value = response
            .into_json()
            .map_err(|err| Error::OriginUnavailable {
                origin: ORIGIN_KEY.to_string(),
                detail: format!("bad response body: {err}"),
            })?;
        let record = decode_post(id, &post)
            .unwrap_or_else(|reason| ModApiInfo::error_record(id, reason.to_string()));
        self.cache.insert(id, record.clone());
        Ok(record)
    }

    fn fetch_many(&mut self, ids: &[(i64, String)]) -> Result<Vec<ModApiInfo>, Error> {
        let need_fetch: Vec<i64> = ids
            .iter()
            .map(|(id, _)| *id)
            .filter(|id| !self.cache.contains_key(id))
            .collect();
        if !need_fetch.is_empty() {
            debug!("fetching {} mod(s) from divamodarchive", need_fetch.len());
            let mut request = self
                .agent
                .get(&format!("{}{}", self.api_base, GET_BULK_ENDPOINT))
                .set("User-Agent", USER_AGENT);
            for id in &need_fetch {
                request = request.query("post_id", &id.to_string());
            }
            let response = request
                .call()
                .map_err(|err| origin_unavailable(ORIGIN_KEY, err))?;
            let posts: Vec<Value> =
                response
                    .into_json()
                    .map_err(|err| Error::OriginUnavailable {
                        origin: ORIGIN_KEY.to_string(),
                        detail: format!("bad response body: {err}"),
                    })?;
            // Posts come back keyed by their own id, not in request order.
            for post in &posts {
                let Some(id) = post.get("id").and_then(Value::as_i64) else {
                    continue;
                };
                let record = decode_post(id, post)
                    .unwrap_or_else(|reason| ModApiInfo::error_record(id, reason.to_string()));
                self.cache.insert(id, record);
            }
            // Requested posts the origin didn't answer for (deleted, hidden)
            // become error records so the batch stays aligned.
            for id in need_fetch {
                self.cache.entry(id).or_insert_with(|| {
                    ModApiInfo::error_record(id, "missing from origin response".to_string())
                });
            }
        }
        ids.iter()
            .map(|(id, _)| {
                self.cache
                    .get(id)
                    .cloned()
                    .ok_or_else(|| Error::OriginUnavailable {
                        origin: ORIGIN_KEY.to_string(),
                        detail: format!("no record for mod {id} after fetch"),
                    })
            })
            .collect()
    }

    fn search(&mut self, query: &str) -> Result<Vec<ApiSearchResult>, Error> {
        let response = match self
            .agent
            .get(&format!("{}{}", self.api_base, SEARCH_ENDPOINT))
            .set("User-Agent", USER_AGENT)
            .query("name", query)
            .query("game_tag", "0")
            .call()
        {
            Ok(response) => response,
            Err(ureq::Error::Status(404, _)) => return Ok(Vec::new()),
            Err(err) => return Err(origin_unavailable(ORIGIN_KEY, err)),
        };
        let posts: Vec<Value> = response
            .into_json()
            .map_err(|err| Error::OriginUnavailable {
                origin: ORIGIN_KEY.to_string(),
                detail: format!("bad response body: {err}"),
            })?;
        Ok(posts.iter().filter_map(decode_search_hit).collect())
    }

    fn favicon(&mut self) -> Option<Vec<u8>> {
        if let Some(cached) = &self.favicon {
            return cached.clone();
        }
        let fetched = fetch_favicon(&self.agent, &self.favicon_url);
        self.favicon = Some(fetched.clone());
        fetched
    }
}

fn decode_post(id: i64, post: &Value) -> Result<ModApiInfo, &'static str> {
    let hash = post
        .get("date")
        .and_then(Value::as_str)
        .ok_or("missing post date")?;
    let image = post
        .get("image")
        .and_then(Value::as_str)
        .ok_or("missing post image")?;
    let download = post
        .get("link")
        .and_then(Value::as_str)
        .ok_or("missing post link")?;
    let download_count = post
        .get("downloads")
        .and_then(Value::as_i64)
        .ok_or("missing download count")?;
    let like_count = post
        .get("likes")
        .and_then(Value::as_i64)
        .ok_or("missing like count")?;
    Ok(ModApiInfo {
        id,
        hash: hash.to_string(),
        image: image.to_string(),
        download: download.to_string(),
        download_count,
        like_count,
        error: None,
    })
}

fn decode_search_hit(post: &Value) -> Option<ApiSearchResult> {
    // type_tag is a bare integer in the DMA API; keep it opaque.
    let category = match post.get("type_tag")? {
        Value::Number(tag) => tag.to_string(),
        Value::String(tag) => tag.clone(),
        _ => return None,
    };
    Some(ApiSearchResult {
        name: post.get("name")?.as_str()?.to_string(),
        id: post.get("id")?.as_i64()?,
        author: post.get("user")?.get("name")?.as_str()?.to_string(),
        category,
        origin: ORIGIN_KEY,
    })
}
