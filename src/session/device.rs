//! Device descriptors derived from request headers.

use super::DeviceType;

/// Bound on the user-agent prefix used as a fallback fingerprint.
pub const FINGERPRINT_MAX_LEN: usize = 100;

/// Stable device fingerprint: explicit device id if provided, otherwise a
/// bounded prefix of the user agent.
#[must_use]
pub fn device_fingerprint(device_id: Option<&str>, user_agent: Option<&str>) -> String {
    if let Some(id) = device_id.map(str::trim).filter(|id| !id.is_empty()) {
        return truncate(id, FINGERPRINT_MAX_LEN);
    }
    match user_agent.map(str::trim).filter(|ua| !ua.is_empty()) {
        Some(ua) => truncate(ua, FINGERPRINT_MAX_LEN),
        None => "unknown".to_string(),
    }
}

/// Rough device class from a user agent string.
#[must_use]
pub fn classify_user_agent(user_agent: Option<&str>) -> DeviceType {
    let Some(ua) = user_agent.filter(|ua| !ua.trim().is_empty()) else {
        return DeviceType::Unknown;
    };
    let ua = ua.to_ascii_lowercase();
    if ua.contains("ipad") || ua.contains("tablet") {
        DeviceType::Tablet
    } else if ua.contains("mobi") || ua.contains("iphone") || ua.contains("android") {
        DeviceType::Mobile
    } else {
        DeviceType::Desktop
    }
}

// Char-boundary safe prefix.
fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}
