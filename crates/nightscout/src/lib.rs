//! Nightscout data-service client.

pub mod client;

pub use client::{
    parse_site_url, LoadedProfile, NightscoutClient, NightscoutError, ProfileSource,
    TEMP_BASAL_RATE_WARNING,
};
