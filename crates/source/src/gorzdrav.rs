//! HTTP client for the St. Petersburg public appointment API.
//!
//! Every endpoint answers with the same envelope:
//! `{ "result": [...], "success": bool, "errorCode": int, "message": string? }`.
//! A well-formed envelope with `success: false` is an upstream rejection,
//! distinct from transport and decoding failures.

use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;
use vaccibot_core::{Facility, Region, ServiceSlot};

use crate::error::SourceError;
use crate::traits::DataSource;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope {
    #[serde(default)]
    result: serde_json::Value,
    success: bool,
    #[serde(default)]
    error_code: i64,
    #[serde(default)]
    message: Option<String>,
}

/// Decode an API envelope, returning its `result` list on success.
///
/// A `null` or absent result on a successful response is an empty list.
pub fn parse_envelope<T: DeserializeOwned>(body: &[u8], what: &str) -> Result<Vec<T>, SourceError> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(|source| SourceError::Decode {
        what: what.to_string(),
        source,
    })?;

    if !envelope.success {
        return Err(SourceError::UpstreamRejected {
            what: what.to_string(),
            error_code: envelope.error_code,
            message: envelope.message,
        });
    }

    if envelope.result.is_null() {
        return Ok(Vec::new());
    }

    serde_json::from_value(envelope.result).map_err(|source| SourceError::Decode {
        what: what.to_string(),
        source,
    })
}

/// Talks to the booking API over HTTPS.
///
/// Rate limiting and deadlines are applied by
/// [`RateLimitedFetcher`](crate::RateLimitedFetcher), not here.
#[derive(Debug, Clone)]
pub struct GorzdravClient {
    base_url: String,
    http: reqwest::Client,
}

impl GorzdravClient {
    /// Creates a client rooted at `base_url` (e.g. `https://gorzdrav.spb.ru/_api/api`).
    pub fn new(base_url: impl Into<String>) -> Result<Self, SourceError> {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .user_agent(concat!("vaccibot/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| SourceError::Transport {
                url: base_url.clone(),
                source,
            })?;
        Ok(Self { base_url, http })
    }

    pub fn regions_url(&self) -> String {
        format!("{}/district", self.base_url)
    }

    pub fn facilities_url(&self, region: &Region) -> String {
        format!(
            "{}/district/{}/lpu?covidVaccination=true",
            self.base_url, region.id
        )
    }

    pub fn service_slots_url(&self, facility: &Facility) -> String {
        format!("{}/lpu/{}/speciality", self.base_url, facility.id)
    }

    async fn get<T: DeserializeOwned>(&self, url: String, what: &str) -> Result<Vec<T>, SourceError> {
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|source| SourceError::Transport {
                url: url.clone(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::HttpStatus {
                url,
                status: status.as_u16(),
            });
        }

        let body = response
            .bytes()
            .await
            .map_err(|source| SourceError::Transport {
                url: url.clone(),
                source,
            })?;

        let items = parse_envelope(&body, what)?;
        debug!(url = %url, count = items.len(), "upstream answered");
        Ok(items)
    }
}

#[async_trait::async_trait]
impl DataSource for GorzdravClient {
    async fn list_regions(&self) -> Result<Vec<Region>, SourceError> {
        self.get(self.regions_url(), "regions").await
    }

    async fn list_facilities(&self, region: &Region) -> Result<Vec<Facility>, SourceError> {
        let what = format!("facilities of region {}", region.id);
        self.get(self.facilities_url(region), &what).await
    }

    async fn list_service_slots(
        &self,
        facility: &Facility,
    ) -> Result<Vec<ServiceSlot>, SourceError> {
        let what = format!("slots of facility {}", facility.id);
        self.get(self.service_slots_url(facility), &what).await
    }
}
