//! Header parsing for credentials, client address and device identity.

use axum::http::{header, HeaderMap};
use secrecy::SecretString;
use std::net::IpAddr;

use crate::session::{classify_user_agent, device_fingerprint, DeviceInfo, Location};

pub const DEVICE_ID_HEADER: &str = "x-device-id";

const GEO_COUNTRY_HEADER: &str = "x-geo-country";
const GEO_REGION_HEADER: &str = "x-geo-region";
const GEO_CITY_HEADER: &str = "x-geo-city";

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Bearer credential from `Authorization`, if present and non-empty.
#[must_use]
pub fn extract_bearer(headers: &HeaderMap) -> Option<SecretString> {
    let value = header_str(headers, header::AUTHORIZATION.as_str())?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    if token.is_empty() {
        return None;
    }
    Some(SecretString::from(token.to_string()))
}

/// First `x-forwarded-for` hop, else `x-real-ip`, else the peer address.
#[must_use]
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return Some(ip.to_string());
    }
    header_str(headers, "x-real-ip")
        .map(str::to_string)
        .or_else(|| peer.map(|ip| ip.to_string()))
}

/// Per-request facts used for session bookkeeping.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RequestContext {
    pub ip: Option<String>,
    pub user_agent: Option<String>,
    pub device_id: Option<String>,
    pub country: Option<String>,
    pub region: Option<String>,
    pub city: Option<String>,
}

impl RequestContext {
    #[must_use]
    pub fn from_headers(headers: &HeaderMap, peer: Option<IpAddr>) -> Self {
        let owned = |name: &str| header_str(headers, name).map(str::to_string);
        Self {
            ip: client_ip(headers, peer),
            user_agent: owned(header::USER_AGENT.as_str()),
            device_id: owned(DEVICE_ID_HEADER),
            country: owned(GEO_COUNTRY_HEADER),
            region: owned(GEO_REGION_HEADER),
            city: owned(GEO_CITY_HEADER),
        }
    }

    #[must_use]
    pub fn fingerprint(&self) -> String {
        device_fingerprint(self.device_id.as_deref(), self.user_agent.as_deref())
    }

    #[must_use]
    pub fn device(&self) -> DeviceInfo {
        DeviceInfo {
            device_type: classify_user_agent(self.user_agent.as_deref()),
            fingerprint: self.fingerprint(),
            user_agent: self.user_agent.clone(),
        }
    }

    #[must_use]
    pub fn location(&self) -> Location {
        Location {
            ip: self.ip.clone(),
            country: self.country.clone(),
            region: self.region.clone(),
            city: self.city.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use secrecy::ExposeSecret;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut map = HeaderMap::new();
        for (name, value) in pairs {
            map.insert(*name, HeaderValue::from_static(value));
        }
        map
    }

    #[test]
    fn bearer_is_extracted() {
        let map = headers(&[("authorization", "Bearer abc.def")]);
        let token = extract_bearer(&map).unwrap();
        assert_eq!(token.expose_secret(), "abc.def");

        let map = headers(&[("authorization", "bearer   xyz ")]);
        assert_eq!(extract_bearer(&map).unwrap().expose_secret(), "xyz");
    }

    #[test]
    fn bearer_rejects_other_schemes_and_blanks() {
        assert!(extract_bearer(&headers(&[("authorization", "Basic dXNlcg==")])).is_none());
        assert!(extract_bearer(&headers(&[("authorization", "Bearer ")])).is_none());
        assert!(extract_bearer(&headers(&[("authorization", "Bearer")])).is_none());
        assert!(extract_bearer(&HeaderMap::new()).is_none());
    }

    #[test]
    fn client_ip_prefers_forwarded_for() {
        let map = headers(&[
            ("x-forwarded-for", " 203.0.113.7 , 10.0.0.1"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        assert_eq!(client_ip(&map, None).as_deref(), Some("203.0.113.7"));
    }

    #[test]
    fn client_ip_falls_back_to_real_ip_then_peer() {
        let map = headers(&[("x-real-ip", "198.51.100.2")]);
        assert_eq!(client_ip(&map, None).as_deref(), Some("198.51.100.2"));

        let peer: IpAddr = "192.0.2.1".parse().unwrap();
        assert_eq!(
            client_ip(&HeaderMap::new(), Some(peer)).as_deref(),
            Some("192.0.2.1")
        );
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }

    #[test]
    fn context_builds_device_and_location() {
        let map = headers(&[
            ("user-agent", "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) Mobile"),
            ("x-geo-country", "DE"),
            ("x-real-ip", "198.51.100.2"),
        ]);
        let ctx = RequestContext::from_headers(&map, None);
        let device = ctx.device();
        assert_eq!(device.fingerprint, "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0) Mobile");
        assert_eq!(device.device_type, crate::session::DeviceType::Mobile);
        let location = ctx.location();
        assert_eq!(location.country.as_deref(), Some("DE"));
        assert_eq!(location.ip.as_deref(), Some("198.51.100.2"));
    }

    #[test]
    fn device_id_header_overrides_user_agent() {
        let map = headers(&[("user-agent", "curl/8.0"), ("x-device-id", "dev-1")]);
        assert_eq!(RequestContext::from_headers(&map, None).fingerprint(), "dev-1");
    }
}
