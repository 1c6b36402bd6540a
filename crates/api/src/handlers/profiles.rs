//! Handlers for the `/profiles` resource.
//!
//! Converts a Nightscout profile into the tuning tool's input format, either
//! fetched live from the site or supplied by the caller.

use autotune_core::profile::{Normalized, NormalizedProfile, ProfileOverrides, RawProfile};
use autotune_core::types::Timestamp;
use autotune_core::units::GlucoseUnits;
use autotune_nightscout::{ProfileSource, TEMP_BASAL_RATE_WARNING};
use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::error::AppResult;
use crate::response::DataResponse;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ConvertRequest {
    /// Nightscout site URL.
    pub url: String,
    #[serde(default)]
    pub overrides: ProfileOverrides,
}

#[derive(Debug, Deserialize)]
pub struct NormalizeRequest {
    pub profile: RawProfile,
    #[serde(default)]
    pub overrides: ProfileOverrides,
}

/// A profile loaded from Nightscout next to its normalized form.
#[derive(Debug, Serialize)]
pub struct ConvertedProfile {
    /// Site origin after redirects. Submit jobs against this URL.
    pub base_url: String,
    pub profile_name: Option<String>,
    pub source: &'static str,
    pub activated_at: Option<Timestamp>,
    pub units: GlucoseUnits,
    pub timezone: Option<String>,
    pub raw: RawProfile,
    pub profile: NormalizedProfile,
    pub warnings: Vec<String>,
}

/// POST /api/v1/profiles/convert
///
/// Fetch the active profile from a Nightscout site and normalize it.
/// Returns 422 when the profile needs single-value overrides.
pub async fn convert(
    State(state): State<AppState>,
    Json(input): Json<ConvertRequest>,
) -> AppResult<Json<DataResponse<ConvertedProfile>>> {
    let loaded = state.nightscout.load_profile(&input.url).await?;
    let Normalized {
        profile,
        units,
        timezone,
        mut warnings,
    } = state.submissions.prepare(&loaded.profile, input.overrides)?;

    match state.nightscout.temp_basals_have_rate(&loaded.base_url).await {
        Ok(true) => {}
        Ok(false) => warnings.push(TEMP_BASAL_RATE_WARNING.to_string()),
        Err(e) => {
            tracing::warn!(base_url = %loaded.base_url, error = %e, "Temp basal check failed");
        }
    }

    let source = match loaded.source {
        ProfileSource::ProfileSwitch => "profile_switch",
        ProfileSource::CurrentProfile => "current_profile",
    };
    let base_url = loaded.base_url.as_str().trim_end_matches('/').to_string();
    tracing::info!(base_url = %base_url, source, "Profile converted");

    Ok(Json(DataResponse {
        data: ConvertedProfile {
            base_url,
            profile_name: loaded.profile.name.clone(),
            source,
            activated_at: loaded.activated_at,
            units,
            timezone,
            raw: loaded.profile,
            profile,
            warnings,
        },
    }))
}

/// POST /api/v1/profiles/normalize
pub async fn normalize(
    State(state): State<AppState>,
    Json(input): Json<NormalizeRequest>,
) -> AppResult<Json<DataResponse<Normalized>>> {
    let normalized = state.submissions.prepare(&input.profile, input.overrides)?;
    Ok(Json(DataResponse { data: normalized }))
}
