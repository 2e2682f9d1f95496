//! Event enrichment
//!
//! Fills the geo and user-agent derived columns before processing. The
//! user-agent sniffer is deliberately small: substring rules covering the
//! browsers and platforms that show up in practice. Enrichment never fails
//! an event.

use eventide_core::Event;

/// Geographic lookup result supplied by the caller (e.g. a GeoIP resolver
/// in the HTTP layer).
#[derive(Debug, Clone, Default)]
pub struct GeoInfo {
    pub country: Option<String>,
    pub city: Option<String>,
}

/// Parsed user-agent fields.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct UserAgentInfo {
    pub browser: Option<String>,
    pub os: Option<String>,
    pub device_type: Option<String>,
}

/// Best-effort user-agent sniffing.
pub fn parse_user_agent(ua: &str) -> UserAgentInfo {
    let browser = if ua.contains("Edg/") || ua.contains("Edge/") {
        Some("Edge")
    } else if ua.contains("OPR/") || ua.contains("Opera") {
        Some("Opera")
    } else if ua.contains("Firefox/") {
        Some("Firefox")
    } else if ua.contains("Chrome/") {
        Some("Chrome")
    } else if ua.contains("Safari/") {
        Some("Safari")
    } else if ua.contains("MSIE") || ua.contains("Trident/") {
        Some("Internet Explorer")
    } else {
        None
    };

    let os = if ua.contains("Windows") {
        Some("Windows")
    } else if ua.contains("iPhone") || ua.contains("iPad") || ua.contains("iOS") {
        Some("iOS")
    } else if ua.contains("Mac OS X") || ua.contains("Macintosh") {
        Some("macOS")
    } else if ua.contains("Android") {
        Some("Android")
    } else if ua.contains("Linux") {
        Some("Linux")
    } else {
        None
    };

    let lowered = ua.to_ascii_lowercase();
    let device_type = if lowered.contains("bot") || lowered.contains("crawler") || lowered.contains("spider") {
        Some("bot")
    } else if ua.contains("iPad") || lowered.contains("tablet") {
        Some("tablet")
    } else if ua.contains("Mobile") || ua.contains("iPhone") || ua.contains("Android") {
        Some("mobile")
    } else {
        Some("desktop")
    };

    UserAgentInfo {
        browser: browser.map(String::from),
        os: os.map(String::from),
        device_type: device_type.map(String::from),
    }
}

/// Fill enrichment columns that are still empty. Existing values win.
pub fn enrich_event(event: &mut Event, geo: Option<&GeoInfo>, ua: Option<&UserAgentInfo>) {
    if let Some(geo) = geo {
        if event.country.is_none() {
            event.country = geo.country.clone();
        }
        if event.city.is_none() {
            event.city = geo.city.clone();
        }
    }

    let parsed;
    let ua = match ua {
        Some(ua) => Some(ua),
        None => match &event.user_agent {
            Some(raw) => {
                parsed = parse_user_agent(raw);
                Some(&parsed)
            }
            None => None,
        },
    };

    if let Some(ua) = ua {
        if event.browser.is_none() {
            event.browser = ua.browser.clone();
        }
        if event.os.is_none() {
            event.os = ua.os.clone();
        }
        if event.device_type.is_none() {
            event.device_type = ua.device_type.clone();
        }
    }
}
