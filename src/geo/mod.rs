//! IP geolocation and ASN lookup

pub mod providers;
pub mod service;

pub use providers::{GeoApi, GeoInfo, GeoProvider, HttpGeoProvider};
pub use service::{GeoAsnLookupService, LOCAL_NETWORK, LOOKUP_FAILED, USER_ASN_LOOKUP_FAILED};
