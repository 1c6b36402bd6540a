//! HTTP client for the Nightscout REST API.
//!
//! Only the two reads the tuning flow needs: the active profile and a sample
//! of temp basal treatments.

use std::collections::HashMap;
use std::time::Duration;

use autotune_core::profile::RawProfile;
use autotune_core::types::Timestamp;
use chrono::{DateTime, SecondsFormat, Utc};
use reqwest::Url;
use serde::de::DeserializeOwned;
use serde::Deserialize;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Number of temp basal treatments sampled for the `rate` check.
const TEMP_BASAL_SAMPLE: &str = "10";

pub const TEMP_BASAL_RATE_WARNING: &str = "Temporary basal records in this Nightscout \
    instance do not include a \"rate\" property. They will not be taken into account by Autotune.";

#[derive(Debug, thiserror::Error)]
pub enum NightscoutError {
    #[error("Invalid Nightscout URL '{0}'")]
    InvalidUrl(String),

    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Nightscout API error ({status}): {body}")]
    Api { status: u16, body: String },

    #[error("Malformed Nightscout response from {url}: {reason}")]
    Malformed { url: String, reason: String },

    #[error("Nightscout has no default profile '{0}' in its profile store")]
    MissingDefaultProfile(String),
}

/// Where a loaded profile came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileSource {
    ProfileSwitch,
    CurrentProfile,
}

#[derive(Debug, Clone)]
pub struct LoadedProfile {
    /// Origin of the site after following redirects, with any path dropped.
    pub base_url: Url,
    pub profile: RawProfile,
    pub activated_at: Option<Timestamp>,
    pub source: ProfileSource,
}

#[derive(Debug, Deserialize)]
struct ProfileSwitch {
    #[serde(default)]
    created_at: Option<String>,
    #[serde(default)]
    profile: Option<String>,
    #[serde(default, rename = "profileJson")]
    profile_json: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProfileDocument {
    #[serde(rename = "defaultProfile")]
    default_profile: String,
    #[serde(default)]
    store: HashMap<String, RawProfile>,
    #[serde(default)]
    units: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TempBasal {
    #[serde(default)]
    rate: Option<serde_json::Value>,
}

pub struct NightscoutClient {
    client: reqwest::Client,
}

impl NightscoutClient {
    pub fn new() -> Result<Self, NightscoutError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self { client })
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    /// Load the profile in effect now.
    ///
    /// The most recent Profile Switch carrying an embedded profile wins. If it
    /// has no timezone, the timezone (and units, when missing) come from the
    /// default entry of the current profile document. Without a usable switch
    /// the default entry itself is returned.
    pub async fn load_profile(&self, url: &str) -> Result<LoadedProfile, NightscoutError> {
        let input = parse_site_url(url)?;

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let switch_url = endpoint(
            &input,
            "/api/v1/treatments.json",
            &[
                ("find[eventType][$eq]", "Profile Switch"),
                ("find[created_at][$lte]", now.as_str()),
                ("count", "1"),
            ],
        )?;
        let (final_url, switches): (Url, Vec<ProfileSwitch>) = self.get_json(switch_url).await?;
        let base_url = origin(&final_url)?;

        let mut from_switch = None;
        if let Some(switch) = switches.into_iter().next() {
            if let Some(json) = switch.profile_json.as_deref().filter(|j| !j.is_empty()) {
                let mut profile: RawProfile =
                    serde_json::from_str(json).map_err(|e| NightscoutError::Malformed {
                        url: base_url.to_string(),
                        reason: format!("profileJson: {e}"),
                    })?;
                profile.name = switch.profile.clone();
                let activated_at = switch
                    .created_at
                    .as_deref()
                    .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
                    .map(|t| t.with_timezone(&Utc));

                if profile.timezone.as_deref().is_some_and(|tz| !tz.is_empty()) {
                    tracing::debug!(base_url = %base_url, "Using profile from Profile Switch");
                    return Ok(LoadedProfile {
                        base_url,
                        profile,
                        activated_at,
                        source: ProfileSource::ProfileSwitch,
                    });
                }
                from_switch = Some((profile, activated_at));
            }
        }

        let current_url = endpoint(&base_url, "/api/v1/profile/current", &[])?;
        let (_, document): (Url, ProfileDocument) = self.get_json(current_url).await?;
        let mut default = document
            .store
            .get(&document.default_profile)
            .cloned()
            .ok_or_else(|| NightscoutError::MissingDefaultProfile(document.default_profile.clone()))?;

        match from_switch {
            Some((mut profile, activated_at)) => {
                profile.timezone = default.timezone;
                if profile.units.is_none() {
                    profile.units = document.units;
                }
                Ok(LoadedProfile {
                    base_url,
                    profile,
                    activated_at,
                    source: ProfileSource::ProfileSwitch,
                })
            }
            None => {
                default.name = Some(document.default_profile);
                if default.units.is_none() {
                    default.units = document.units;
                }
                Ok(LoadedProfile {
                    base_url,
                    profile: default,
                    activated_at: None,
                    source: ProfileSource::CurrentProfile,
                })
            }
        }
    }

    /// Whether recent temp basal treatments carry a `rate`. The tuning tool
    /// ignores those that don't. No temp basals at all counts as `true`.
    pub async fn temp_basals_have_rate(&self, base_url: &Url) -> Result<bool, NightscoutError> {
        let url = endpoint(
            base_url,
            "/api/v1/treatments.json",
            &[
                ("find[eventType][$eq]", "Temp Basal"),
                ("count", TEMP_BASAL_SAMPLE),
            ],
        )?;
        let (_, treatments): (Url, Vec<TempBasal>) = self.get_json(url).await?;
        Ok(treatments.is_empty() || treatments.iter().any(|t| t.rate.is_some()))
    }

    // ---- private helpers ----

    async fn get_json<T: DeserializeOwned>(&self, url: Url) -> Result<(Url, T), NightscoutError> {
        let response = self
            .client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await?;
        let response = Self::ensure_success(response).await?;
        let final_url = response.url().clone();
        let text = response.text().await?;
        let value = serde_json::from_str(&text).map_err(|e| NightscoutError::Malformed {
            url: final_url.to_string(),
            reason: e.to_string(),
        })?;
        Ok((final_url, value))
    }

    async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, NightscoutError> {
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(NightscoutError::Api {
                status: status.as_u16(),
                body,
            });
        }
        Ok(response)
    }
}

/// Parse a user-supplied site URL. Only `http` and `https` are accepted here.
pub fn parse_site_url(url: &str) -> Result<Url, NightscoutError> {
    let parsed = Url::parse(url.trim()).map_err(|_| NightscoutError::InvalidUrl(url.to_string()))?;
    match parsed.scheme() {
        "http" | "https" if parsed.host_str().is_some() => Ok(parsed),
        _ => Err(NightscoutError::InvalidUrl(url.to_string())),
    }
}

fn origin(url: &Url) -> Result<Url, NightscoutError> {
    url.join("/").map_err(|_| NightscoutError::InvalidUrl(url.to_string()))
}

fn endpoint(base: &Url, path: &str, query: &[(&str, &str)]) -> Result<Url, NightscoutError> {
    let mut url = base
        .join(path)
        .map_err(|_| NightscoutError::InvalidUrl(base.to_string()))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query.iter().copied());
    }
    Ok(url)
}
