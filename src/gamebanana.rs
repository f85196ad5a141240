use crate::api::{
    self, fetch_favicon, origin_unavailable, ApiSearchResult, ModApiInfo, Origin, USER_AGENT,
};
use crate::error::Error;
use serde_json::Value;
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

pub const ORIGIN_KEY: &str = "gamebanana";

const API_DOMAIN: &str = "https://api.gamebanana.com";
const GET_DATA_ENDPOINT: &str = "/Core/Item/Data";
const SEARCH_DOMAIN: &str = "https://gamebanana.com";
const SEARCH_ENDPOINT: &str = "/apiv9/Util/Game/Submissions";
const FAVICON_URL: &str = "https://images.gamebanana.com/static/img/favicon/favicon.ico";

/// GameBanana's game id for Project DIVA Mega Mix+.
const DIVA_GAME_ID: &str = "16522";

/// Field selector for the batch endpoint. Answers come back positionally:
/// file listing, preview image, like count, download count.
const FETCH_FIELDS: &str =
    "Files().aFiles(),Preview().sStructuredDataFullsizeUrl(),likes,downloads";

pub struct GameBanana {
    agent: ureq::Agent,
    api_base: String,
    search_base: String,
    favicon_url: String,
    cache: HashMap<i64, ModApiInfo>,
    favicon: Option<Option<Vec<u8>>>,
}

impl GameBanana {
    pub fn new() -> Self {
        Self::with_endpoints(API_DOMAIN, SEARCH_DOMAIN, FAVICON_URL)
    }

    /// Endpoint injection for tests.
    pub fn with_endpoints(api_base: &str, search_base: &str, favicon_url: &str) -> Self {
        Self {
            agent: api::http_agent(Duration::from_secs(10)),
            api_base: api_base.to_string(),
            search_base: search_base.to_string(),
            favicon_url: favicon_url.to_string(),
            cache: HashMap::new(),
            favicon: None,
        }
    }
}

impl Default for GameBanana {
    fn default() -> Self {
        Self::new()
    }
}

impl Origin for GameBanana {
    fn key(&self) -> &'static str {
        ORIGIN_KEY
    }

    fn cached(&self, id: i64) -> Option<ModApiInfo> {
        self.cache.get(&id).cloned()
    }

    fn fetch_many(&mut self, ids: &[(i64, String)]) -> Result<Vec<ModApiInfo>, Error> {
        let need_fetch: Vec<(i64, String)> = ids
            .iter()
            .filter(|(id, _)| !self.cache.contains_key(id))
            .cloned()
            .collect();
        if !need_fetch.is_empty() {
            debug!("fetching {} mod(s) from gamebanana", need_fetch.len());
            let mut request = self
                .agent
                .get(&format!("{}{}", self.api_base, GET_DATA_ENDPOINT))
                .set("User-Agent", USER_AGENT);
            for (index, (id, category)) in need_fetch.iter().enumerate() {
                request = request
                    .query(&format!("itemid[{index}]"), &id.to_string())
                    .query(&format!("fields[{index}]"), FETCH_FIELDS)
                    .query(&format!("itemtype[{index}]"), category);
            }
            let response = request
                .call()
                .map_err(|err| origin_unavailable(ORIGIN_KEY, err))?;
            let items: Vec<Value> =
                response
                    .into_json()
                    .map_err(|err| Error::OriginUnavailable {
                        origin: ORIGIN_KEY.to_string(),
                        detail: format!("bad response body: {err}"),
                    })?;
            for (index, (id, _)) in need_fetch.iter().enumerate() {
                let record = match items.get(index) {
                    Some(elem) => decode_item(*id, elem).unwrap_or_else(|reason| {
                        ModApiInfo::error_record(*id, reason.to_string())
                    }),
                    None => ModApiInfo::error_record(
                        *id,
                        "missing from origin response".to_string(),
                    ),
                };
                self.cache.insert(*id, record);
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
            .get(&format!("{}{}", self.search_base, SEARCH_ENDPOINT))
            .set("User-Agent", USER_AGENT)
            .query("_idGameRow", DIVA_GAME_ID)
            .query("_sName", query)
            .query("_nPerpage", "50")
            .call()
        {
            Ok(response) => response,
            // No submissions matched; GameBanana answers 404 rather than [].
            Err(ureq::Error::Status(404, _)) => return Ok(Vec::new()),
            Err(err) => return Err(origin_unavailable(ORIGIN_KEY, err)),
        };
        let hits: Vec<Value> = response
            .into_json()
            .map_err(|err| Error::OriginUnavailable {
                origin: ORIGIN_KEY.to_string(),
                detail: format!("bad response body: {err}"),
            })?;
        Ok(hits.iter().filter_map(decode_search_hit).collect())
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

/// Decodes one positional answer from the batch endpoint. The file listing is
/// keyed by file id; the newest upload is the one a fresh install would get,
/// so its checksum serves as the mod's fingerprint.
fn decode_item(id: i64, elem: &Value) -> Result<ModApiInfo, &'static str> {
    let files = elem
        .get(0)
        .and_then(Value::as_object)
        .ok_or("missing file listing")?;
    let newest = files
        .values()
        .max_by_key(|file| {
            file.get("_tsDateAdded")
                .and_then(Value::as_i64)
                .unwrap_or(i64::MIN)
        })
        .ok_or("empty file listing")?;
    let hash = newest
        .get("_sMd5Checksum")
        .and_then(Value::as_str)
        .ok_or("file entry missing checksum")?;
    let download = newest
        .get("_sDownloadUrl")
        .and_then(Value::as_str)
        .ok_or("file entry missing download url")?;
    let image = elem
        .get(1)
        .and_then(Value::as_str)
        .ok_or("missing preview image")?;
    let like_count = elem
        .get(2)
        .and_then(Value::as_i64)
        .ok_or("missing like count")?;
    let download_count = elem
        .get(3)
        .and_then(Value::as_i64)
        .ok_or("missing download count")?;
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

fn decode_search_hit(hit: &Value) -> Option<ApiSearchResult> {
    Some(ApiSearchResult {
        name: hit.get("_sName")?.as_str()?.to_string(),
        id: hit.get("_idRow")?.as_i64()?,
        author: hit.get("_aSubmitter")?.get("_sName")?.as_str()?.to_string(),
        category: hit.get("_sModelName")?.as_str()?.to_string(),
        origin: ORIGIN_KEY,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::stub_http_once;

    /// Unroutable endpoint; any request against it fails fast.
    const DEAD: &str = "http://127.0.0.1:1";

    fn item_json(ts: i64, md5: &str, url: &str) -> String {
        format!(
            r#"[{{"100":{{"_tsDateAdded":{ts},"_sMd5Checksum":"{md5}","_sDownloadUrl":"{url}"}}}},"https://img.example/p.png",7,1234]"#
        )
    }

    #[test]
    fn batch_fetch_decodes_and_caches() {
        let body = format!("[{}]", item_json(10, "abc123", "https://dl.example/f.zip"));
        let (base, server) = stub_http_once(200, "application/json", body.as_bytes());
        let mut origin = GameBanana::with_endpoints(&base, DEAD, DEAD);

        let records = origin
            .fetch_many(&[(42, "Mod".to_string())])
            .expect("fetch");
        server.join().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, 42);
        assert_eq!(records[0].hash, "abc123");
        assert_eq!(records[0].download, "https://dl.example/f.zip");
        assert_eq!(records[0].download_count, 1234);
        assert_eq!(records[0].like_count, 7);
        assert!(!records[0].is_error());

        // Second lookup is served from cache; the stub is gone by now.
        let again = origin.fetch_one(42, "Mod").expect("cache hit");
        assert_eq!(again, records[0]);
    }

    #[test]
    fn newest_file_wins() {
        let body = r#"[[{"1":{"_tsDateAdded":5,"_sMd5Checksum":"old","_sDownloadUrl":"o"},"2":{"_tsDateAdded":9,"_sMd5Checksum":"new","_sDownloadUrl":"n"}},"img",0,0]]"#;
        let (base, server) = stub_http_once(200, "application/json", body.as_bytes());
        let mut origin = GameBanana::with_endpoints(&base, DEAD, DEAD);
        let record = origin.fetch_one(7, "Mod").expect("fetch");
        server.join().unwrap();
        assert_eq!(record.hash, "new");
        assert_eq!(record.download, "n");
    }

    #[test]
    fn malformed_entry_becomes_error_record() {
        let good = item_json(10, "aaa", "u");
        let body = format!("[{good},[null,\"img\",0,0],{good}]");
        let (base, server) = stub_http_once(200, "application/json", body.as_bytes());
        let mut origin = GameBanana::with_endpoints(&base, DEAD, DEAD);

        let batch = vec![
            (1, "Mod".to_string()),
            (2, "Mod".to_string()),
            (3, "Mod".to_string()),
        ];
        let records = origin.fetch_many(&batch).expect("fetch");
        server.join().unwrap();
        assert_eq!(records.len(), 3);
        assert!(!records[0].is_error());
        assert!(records[1].is_error());
        assert_eq!(records[1].hash, "err");
        assert!(!records[2].is_error());

        // The error record is cached too.
        let cached = origin.fetch_one(2, "Mod").expect("cached error record");
        assert!(cached.is_error());
    }

    #[test]
    fn cached_ids_are_not_refetched() {
        let body = format!("[{}]", item_json(1, "first", "u1"));
        let (base, server) = stub_http_once(200, "application/json", body.as_bytes());
        let mut origin = GameBanana::with_endpoints(&base, DEAD, DEAD);
        origin.fetch_one(5, "Mod").expect("prime cache");
        server.join().unwrap();

        // 5 is cached, so a batch of just 5 must not touch the network even
        // though the endpoint is now dead.
        let records = origin.fetch_many(&[(5, "Mod".to_string())]).expect("cache");
        assert_eq!(records[0].hash, "first");
    }

    #[test]
    fn server_error_is_origin_unavailable() {
        let (base, server) = stub_http_once(500, "text/plain", b"boom");
        let mut origin = GameBanana::with_endpoints(&base, DEAD, DEAD);
        let err = origin.fetch_one(9, "Mod").unwrap_err();
        server.join().unwrap();
        assert!(matches!(err, Error::OriginUnavailable { .. }));
    }

    #[test]
    fn search_maps_submissions() {
        let body = r#"[{"_idRow":333,"_sName":"Neon Stage","_sModelName":"Mod","_aSubmitter":{"_sName":"piper"}}]"#;
        let (base, server) = stub_http_once(200, "application/json", body.as_bytes());
        let mut origin = GameBanana::with_endpoints(DEAD, &base, DEAD);
        let hits = origin.search("neon").expect("search");
        server.join().unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, 333);
        assert_eq!(hits[0].name, "Neon Stage");
        assert_eq!(hits[0].author, "piper");
        assert_eq!(hits[0].category, "Mod");
        assert_eq!(hits[0].origin, ORIGIN_KEY);
    }

    #[test]
    fn search_404_means_no_results() {
        let (base, server) = stub_http_once(404, "text/plain", b"not found");
        let mut origin = GameBanana::with_endpoints(DEAD, &base, DEAD);
        let hits = origin.search("nothing matches this").expect("search");
        server.join().unwrap();
        assert!(hits.is_empty());
    }
}
