#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Reverse geocoding client for municipality/region classification.
//!
//! Used as the delegated fallback when the static bounding-box router
//! cannot classify a point. This is the one place in the pipeline with a
//! same-request retry policy: up to 3 attempts with exponential backoff.
//! Every feature-service query elsewhere uses the fallback-chain strategy
//! instead of retrying the same request.
//!
//! Best-effort by contract: `Ok(None)` means "no answer", and callers
//! degrade to "region unknown" on any error.
//!
//! See <https://nominatim.org/release-docs/develop/api/Reverse/>

use std::time::Duration;

use plot_enrich_models::GeoPoint;

/// Maximum attempts for one reverse lookup (1 initial + 2 retries, with
/// 2s/4s backoff between attempts).
const MAX_ATTEMPTS: u32 = 3;

/// Errors from reverse geocoding operations.
#[derive(Debug, thiserror::Error)]
pub enum GeocodeError {
    /// HTTP request failed.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Response parsing failed.
    #[error("Parse error: {message}")]
    Parse {
        /// Description of the parsing failure.
        message: String,
    },

    /// Rate limit exceeded after all retries.
    #[error("Rate limit exceeded")]
    RateLimited,
}

/// Administrative context resolved for a point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReverseGeocodeResult {
    /// Municipality (city/town/village), when resolved.
    pub municipality: Option<String>,
    /// First-level administrative region (CCAA, Bundesland, distrito).
    pub region: Option<String>,
    /// ISO 3166-1 alpha-2 country code, uppercased.
    pub country_code: Option<String>,
    /// Full display name from the provider.
    pub display_name: Option<String>,
}

/// Reverse-geocodes a WGS84 point, retrying transient failures.
///
/// The caller is responsible for politeness delays between distinct
/// lookups (the public Nominatim instance allows 1 request per second).
///
/// # Errors
///
/// Returns [`GeocodeError`] if all attempts fail. A well-formed "no
/// result" response is `Ok(None)`.
pub async fn reverse_lookup(
    client: &reqwest::Client,
    base_url: &str,
    point: &GeoPoint,
) -> Result<Option<ReverseGeocodeResult>, GeocodeError> {
    let lat = point.latitude.to_string();
    let lon = point.longitude.to_string();

    let mut last_error: Option<GeocodeError> = None;

    for attempt in 0..MAX_ATTEMPTS {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << attempt); // 2s, 4s
            log::warn!("reverse geocode retry {attempt}/{} in {delay:?}", MAX_ATTEMPTS - 1);
            tokio::time::sleep(delay).await;
        }

        let result = client
            .get(base_url)
            .query(&[
                ("lat", lat.as_str()),
                ("lon", lon.as_str()),
                ("format", "jsonv2"),
                ("zoom", "10"),
            ])
            .send()
            .await;

        match result {
            Err(e) => {
                if attempt + 1 < MAX_ATTEMPTS {
                    log::warn!("reverse geocode transient error: {e}");
                    last_error = Some(GeocodeError::Http(e));
                    continue;
                }
                return Err(GeocodeError::Http(e));
            }
            Ok(response) => {
                let status = response.status();
                if status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
                    log::warn!("reverse geocode HTTP {status}");
                    last_error = Some(if status.is_server_error() {
                        GeocodeError::Parse {
                            message: format!("HTTP {status}"),
                        }
                    } else {
                        GeocodeError::RateLimited
                    });
                    continue;
                }
                let body: serde_json::Value = response.json().await?;
                return Ok(parse_response(&body));
            }
        }
    }

    Err(last_error.unwrap_or(GeocodeError::RateLimited))
}

/// Parses a Nominatim reverse response into the administrative context.
/// An `"error"` payload (ocean, out of coverage) is a clean `None`.
fn parse_response(body: &serde_json::Value) -> Option<ReverseGeocodeResult> {
    if body.get("error").is_some() {
        return None;
    }

    let address = body.get("address")?;
    let field = |keys: &[&str]| -> Option<String> {
        keys.iter()
            .find_map(|key| address.get(*key).and_then(serde_json::Value::as_str))
            .map(String::from)
    };

    Some(ReverseGeocodeResult {
        municipality: field(&["city", "town", "village", "municipality"]),
        region: field(&["state", "region", "province"]),
        country_code: field(&["country_code"]).map(|code| code.to_uppercase()),
        display_name: body
            .get("display_name")
            .and_then(serde_json::Value::as_str)
            .map(String::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_reverse_result() {
        let body = serde_json::json!({
            "display_name": "Barcelona, Barcelonès, Catalunya, España",
            "address": {
                "city": "Barcelona",
                "state": "Catalunya",
                "country_code": "es"
            }
        });
        let result = parse_response(&body).unwrap();
        assert_eq!(result.municipality.as_deref(), Some("Barcelona"));
        assert_eq!(result.region.as_deref(), Some("Catalunya"));
        assert_eq!(result.country_code.as_deref(), Some("ES"));
    }

    #[test]
    fn municipality_falls_back_through_place_kinds() {
        let body = serde_json::json!({
            "address": {"village": "Rupit", "state": "Catalunya"}
        });
        let result = parse_response(&body).unwrap();
        assert_eq!(result.municipality.as_deref(), Some("Rupit"));
    }

    #[test]
    fn error_payload_is_clean_none() {
        let body = serde_json::json!({"error": "Unable to geocode"});
        assert!(parse_response(&body).is_none());
    }

    #[test]
    fn missing_address_is_none() {
        assert!(parse_response(&serde_json::json!({})).is_none());
    }
}
