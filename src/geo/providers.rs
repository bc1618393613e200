//! Geolocation/ASN providers

use crate::error::GeoLookupError;
use async_trait::async_trait;
use serde::Deserialize;
use std::net::IpAddr;
use std::time::Duration;
use tracing::warn;

/// ASN/organization and location of an address
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeoInfo {
    /// ASN and organization, e.g. "AS15169 Google LLC"
    pub asn: String,
    /// "city, country", or just the country
    pub location: String,
}

/// A source of geolocation data
///
/// `ip == None` asks about the caller's own public address.
#[async_trait]
pub trait GeoProvider: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// Look up `ip`, or the caller's own address when `None`
    async fn lookup(&self, ip: Option<IpAddr>) -> Result<GeoInfo, GeoLookupError>;
}

/// Supported HTTP geolocation APIs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeoApi {
    /// ip-api.com JSON API
    IpApiCom,
    /// ipinfo.io JSON API
    IpInfoIo,
}

impl GeoApi {
    /// Request URL for `ip`, or for the caller's own address
    pub fn url(&self, ip: Option<IpAddr>) -> String {
        match (self, ip) {
            (GeoApi::IpApiCom, Some(ip)) => {
                format!("http://ip-api.com/json/{ip}?fields=status,country,city,as,query")
            }
            (GeoApi::IpApiCom, None) => "http://ip-api.com/json?fields=status,as,query".to_string(),
            (GeoApi::IpInfoIo, Some(ip)) => format!("https://ipinfo.io/{ip}/json"),
            (GeoApi::IpInfoIo, None) => "https://ipinfo.io/json".to_string(),
        }
    }

    /// Providers in fallback order
    pub fn all() -> &'static [GeoApi] {
        &[GeoApi::IpApiCom, GeoApi::IpInfoIo]
    }

    /// Interpret a response body
    pub fn parse(&self, body: &str) -> Result<GeoInfo, GeoLookupError> {
        match self {
            GeoApi::IpApiCom => parse_ip_api(body),
            GeoApi::IpInfoIo => parse_ipinfo(body),
        }
    }
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    #[serde(default)]
    status: String,
    #[serde(rename = "as", default)]
    asn: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    country: String,
}

#[derive(Debug, Deserialize)]
struct IpInfoResponse {
    #[serde(default)]
    org: String,
    #[serde(default)]
    city: String,
    #[serde(default)]
    country: String,
}

/// Join city and country, omitting a blank city
pub fn format_location(city: &str, country: &str) -> String {
    let city = city.trim();
    if city.is_empty() {
        country.to_string()
    } else {
        format!("{city}, {country}")
    }
}

fn parse_ip_api(body: &str) -> Result<GeoInfo, GeoLookupError> {
    let resp: IpApiResponse =
        serde_json::from_str(body).map_err(|e| GeoLookupError::ParseError(e.to_string()))?;
    if resp.status != "success" {
        return Err(GeoLookupError::Unusable(format!("status {:?}", resp.status)));
    }
    if resp.asn.trim().is_empty() {
        return Err(GeoLookupError::Unusable("missing ASN".to_string()));
    }
    Ok(GeoInfo {
        location: format_location(&resp.city, &resp.country),
        asn: resp.asn,
    })
}

fn parse_ipinfo(body: &str) -> Result<GeoInfo, GeoLookupError> {
    let resp: IpInfoResponse =
        serde_json::from_str(body).map_err(|e| GeoLookupError::ParseError(e.to_string()))?;
    if resp.org.trim().is_empty() {
        return Err(GeoLookupError::Unusable("missing org".to_string()));
    }
    Ok(GeoInfo {
        location: format_location(&resp.city, &resp.country),
        asn: resp.org,
    })
}

/// [`GeoProvider`] calling one of the HTTP APIs
pub struct HttpGeoProvider {
    api: GeoApi,
    client: reqwest::Client,
}

impl HttpGeoProvider {
    /// Create a provider whose requests time out after `timeout`
    pub fn new(api: GeoApi, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                warn!("Failed to configure HTTP client ({e}), using defaults");
                reqwest::Client::new()
            });
        Self { api, client }
    }
}

#[async_trait]
impl GeoProvider for HttpGeoProvider {
    fn name(&self) -> &'static str {
        match self.api {
            GeoApi::IpApiCom => "ip-api.com",
            GeoApi::IpInfoIo => "ipinfo.io",
        }
    }

    async fn lookup(&self, ip: Option<IpAddr>) -> Result<GeoInfo, GeoLookupError> {
        let response = self.client.get(self.api.url(ip)).send().await.map_err(|e| {
            if e.is_timeout() {
                GeoLookupError::Timeout
            } else {
                GeoLookupError::HttpError(e.to_string())
            }
        })?;
        let body = response
            .error_for_status()
            .map_err(|e| GeoLookupError::HttpError(e.to_string()))?
            .text()
            .await
            .map_err(|e| GeoLookupError::HttpError(e.to_string()))?;
        self.api.parse(&body)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_urls() {
        let ip: IpAddr = "8.8.8.8".parse().unwrap();
        assert_eq!(
            GeoApi::IpApiCom.url(Some(ip)),
            "http://ip-api.com/json/8.8.8.8?fields=status,country,city,as,query"
        );
        assert_eq!(
            GeoApi::IpApiCom.url(None),
            "http://ip-api.com/json?fields=status,as,query"
        );
        assert_eq!(GeoApi::IpInfoIo.url(Some(ip)), "https://ipinfo.io/8.8.8.8/json");
        assert_eq!(GeoApi::IpInfoIo.url(None), "https://ipinfo.io/json");
        assert_eq!(GeoApi::all(), &[GeoApi::IpApiCom, GeoApi::IpInfoIo]);
    }

    #[test]
    fn test_parse_ip_api_success() {
        let body = r#"{"status":"success","country":"United States","city":"Mountain View","as":"AS15169 Google LLC","query":"8.8.8.8"}"#;
        let info = GeoApi::IpApiCom.parse(body).unwrap();
        assert_eq!(info.asn, "AS15169 Google LLC");
        assert_eq!(info.location, "Mountain View, United States");
    }

    #[test]
    fn test_parse_ip_api_unusable() {
        let failed = r#"{"status":"fail","message":"reserved range","query":"10.0.0.1"}"#;
        assert!(matches!(
            GeoApi::IpApiCom.parse(failed),
            Err(GeoLookupError::Unusable(_))
        ));
        let blank_as = r#"{"status":"success","as":"  ","country":"X"}"#;
        assert!(GeoApi::IpApiCom.parse(blank_as).is_err());
        assert!(matches!(
            GeoApi::IpApiCom.parse("<html>"),
            Err(GeoLookupError::ParseError(_))
        ));
    }

    #[test]
    fn test_parse_ipinfo() {
        let body = r#"{"ip":"1.1.1.1","city":"","country":"AU","org":"AS13335 Cloudflare, Inc."}"#;
        let info = GeoApi::IpInfoIo.parse(body).unwrap();
        assert_eq!(info.asn, "AS13335 Cloudflare, Inc.");
        assert_eq!(info.location, "AU");

        assert!(GeoApi::IpInfoIo.parse(r#"{"ip":"1.1.1.1","bogon":true}"#).is_err());
    }

    #[test]
    fn test_format_location() {
        assert_eq!(format_location("Paris", "France"), "Paris, France");
        assert_eq!(format_location(" ", "France"), "France");
    }
}
