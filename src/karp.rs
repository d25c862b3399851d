use crate::error::{Result, ServiceError};
use crate::query::{KarpQuery, overflow_word};
use crate::settings::ModeProfile;
use reqwest::header::AUTHORIZATION;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};

pub const DEFAULT_KARP_URL: &str = "https://ws.spraakbanken.gu.se/ws/karp/v5";

const BAD_CREDENTIALS: &str = "Bad username or password?";

/// HTTP client for the Karp web service.
#[derive(Clone)]
pub struct KarpClient {
    http: reqwest::Client,
    base_url: String,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SearchResponse {
    pub hits: Hits,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hits {
    #[serde(deserialize_with = "hit_total")]
    pub total: u64,
    #[serde(default)]
    pub hits: Vec<Hit>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Hit {
    #[serde(rename = "_source", default)]
    pub source: Value,
}

impl SearchResponse {
    pub fn total(&self) -> u64 {
        self.hits.total
    }

    pub fn into_sources(self) -> Vec<Value> {
        self.hits.hits.into_iter().map(|hit| hit.source).collect()
    }
}

/// `total` is a plain count, or `{"value": count}` on newer indices.
fn hit_total<'de, D>(deserializer: D) -> std::result::Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    let total = match &value {
        Value::Number(number) => number.as_u64(),
        Value::Object(map) => map.get("value").and_then(Value::as_u64),
        Value::String(text) => text.trim().parse().ok(),
        _ => None,
    };
    total.ok_or_else(|| D::Error::custom(format!("hit total {value} is not a count")))
}

#[derive(Debug, Deserialize)]
struct StatResponse {
    #[serde(default)]
    stat_table: Vec<Vec<Value>>,
}

/// Answer of Karp's `checkuser`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KarpUser {
    #[serde(default)]
    pub authenticated: bool,
    #[serde(default)]
    pub permitted_resources: PermittedResources,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PermittedResources {
    #[serde(default)]
    pub lexica: Value,
}

impl KarpUser {
    pub fn may_edit(&self, resource: &str) -> bool {
        match &self.permitted_resources.lexica {
            Value::Object(lexica) => lexica.contains_key(resource),
            Value::Array(lexica) => lexica.iter().any(|lexicon| lexicon.as_str() == Some(resource)),
            _ => false,
        }
    }

    pub fn ensure_may_edit(&self, resource: &str) -> Result<()> {
        if self.may_edit(resource) {
            return Ok(());
        }
        debug!(%resource, lexica = %self.permitted_resources.lexica, "resource not permitted");
        Err(ServiceError::Authentication(
            "You are not allowed to edit the resource".to_string(),
        ))
    }
}

impl KarpClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| ServiceError::Upstream(format!("cannot build http client: {err}")))?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn search(&self, profile: &ModeProfile, query: &KarpQuery) -> Result<SearchResponse> {
        self.get_json("query", profile, query).await
    }

    /// Runs the overflow check for a search without a word: counts the entries of
    /// the subtypes and returns the word to narrow the search with, if needed.
    pub async fn limit_query(
        &self,
        subtypes: &[String],
        lang: &str,
        profile: &ModeProfile,
    ) -> Result<Option<String>> {
        let count = KarpQuery::count(profile, subtypes, lang);
        let total = self.search(profile, &count).await?.total();
        let word = overflow_word(total, lang, profile);
        if let Some(letter) = &word {
            info!(mode = %profile.name, total, limit = profile.overflow_size, %letter, "search narrowed to first letter");
        }
        Ok(word)
    }

    /// Every non-empty subtype bucket Karp reports for the mode.
    pub async fn subtype_buckets(&self, profile: &ModeProfile) -> Result<BTreeSet<String>> {
        let query = KarpQuery::subtype_buckets(profile, profile.overflow_size);
        let stats: StatResponse = self.get_json("statlist", profile, &query).await?;
        Ok(stats
            .stat_table
            .into_iter()
            .filter_map(|row| row.into_iter().next())
            .filter_map(|name| match name {
                Value::String(name) if !name.is_empty() => Some(name),
                _ => None,
            })
            .collect())
    }

    /// Checks the caller's Basic credentials with Karp.
    pub async fn authenticate(&self, authorization: Option<&str>) -> Result<KarpUser> {
        let Some(credentials) = authorization.filter(|value| value.starts_with("Basic ")) else {
            debug!("no basic credentials supplied");
            return Err(ServiceError::Authentication(BAD_CREDENTIALS.to_string()));
        };
        match self.check_user(credentials).await {
            Ok(user) if user.authenticated => Ok(user),
            Ok(_) => {
                debug!("karp rejected the credentials");
                Err(ServiceError::Authentication(BAD_CREDENTIALS.to_string()))
            }
            Err(err) => {
                warn!(error = %err, "credential check failed");
                Err(ServiceError::Authentication(BAD_CREDENTIALS.to_string()))
            }
        }
    }

    async fn check_user(&self, authorization: &str) -> Result<KarpUser> {
        let response = self
            .http
            .get(self.endpoint("checkuser"))
            .header(AUTHORIZATION, authorization)
            .send()
            .await
            .map_err(upstream)?;
        decode(response).await
    }

    pub async fn fetch_css(&self, url: &str) -> Result<String> {
        let response = self.http.get(url).send().await.map_err(upstream)?;
        let response = response.error_for_status().map_err(upstream)?;
        response.text().await.map_err(upstream)
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        profile: &ModeProfile,
        query: &KarpQuery,
    ) -> Result<T> {
        debug!(%endpoint, ?query, "calling karp");
        let response = self
            .http
            .get(self.endpoint(endpoint))
            .basic_auth(&profile.username, Some(&profile.password))
            .query(query)
            .send()
            .await
            .map_err(upstream)?;
        decode(response).await
    }

    fn endpoint(&self, name: &str) -> String {
        format!("{}/{name}", self.base_url)
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let response = response.error_for_status().map_err(upstream)?;
    response.json().await.map_err(upstream)
}

fn upstream(err: reqwest::Error) -> ServiceError {
    ServiceError::Upstream(err.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn total_accepts_number_and_object() {
        let plain: SearchResponse =
            serde_json::from_value(json!({"hits": {"total": 12, "hits": []}})).unwrap();
        assert_eq!(plain.total(), 12);
        let wrapped: SearchResponse =
            serde_json::from_value(json!({"hits": {"total": {"value": 7}}})).unwrap();
        assert_eq!(wrapped.total(), 7);
    }

    #[test]
    fn replies_without_a_usable_total_are_rejected() {
        for reply in [
            json!({}),
            json!({"error": "index unavailable"}),
            json!({"hits": {"hits": []}}),
            json!({"hits": {"total": 2.5}}),
            json!({"hits": {"total": "many"}}),
            json!({"hits": {"total": {"relation": "eq"}}}),
        ] {
            assert!(serde_json::from_value::<SearchResponse>(reply.clone()).is_err(), "{reply}");
        }
        let text: SearchResponse =
            serde_json::from_value(json!({"hits": {"total": "12"}})).unwrap();
        assert_eq!(text.total(), 12);
    }

    #[test]
    fn sources_are_extracted_in_order() {
        let response: SearchResponse = serde_json::from_value(json!({
            "hits": {"total": 2, "hits": [{"_source": {"n": 1}}, {"_source": {"n": 2}}]}
        }))
        .unwrap();
        assert_eq!(response.into_sources(), vec![json!({"n": 1}), json!({"n": 2})]);
    }

    #[test]
    fn permissions_accept_maps_and_lists() {
        let by_map: KarpUser = serde_json::from_value(json!({
            "authenticated": true,
            "permitted_resources": {"lexica": {"term-swefin": {"write": true}}}
        }))
        .unwrap();
        assert!(by_map.may_edit("term-swefin"));
        assert!(!by_map.may_edit("term-sweyid"));

        let by_list: KarpUser = serde_json::from_value(json!({
            "authenticated": true,
            "permitted_resources": {"lexica": ["term-sweyid"]}
        }))
        .unwrap();
        assert!(by_list.may_edit("term-sweyid"));

        let nothing: KarpUser = serde_json::from_value(json!({"authenticated": false})).unwrap();
        assert!(!nothing.may_edit("term-swefin"));
        assert_eq!(nothing.ensure_may_edit("term-swefin").unwrap_err().status(), 401);
        assert!(by_map.ensure_may_edit("term-swefin").is_ok());
    }

    #[test]
    fn base_url_loses_trailing_slash() {
        let client = KarpClient::new("http://karp.test/v5/", Duration::from_secs(1)).unwrap();
        assert_eq!(client.base_url(), "http://karp.test/v5");
        assert_eq!(client.endpoint("query"), "http://karp.test/v5/query");
    }
}
