//! Shared User-Agent string for API and image requests.

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/nicksrandall/esa-export";

/// Default User-Agent for every outbound request (identifies the tool).
#[must_use]
pub(crate) fn default_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("esa-export/{version} (+{PROJECT_UA_URL})")
}
