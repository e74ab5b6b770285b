//! Coarse device fingerprint derived from the user agent.

/// Derive a low-resolution platform/client summary from a user-agent string.
///
/// Sent as a `fingerprint` field on login, OTP, and refresh calls as a
/// secondary anti-replay signal, alongside the cookie-held session id.
/// Deliberately coarse: platform family and client family only.
pub fn derive(user_agent: &str) -> String {
    let ua = user_agent.to_ascii_lowercase();

    let platform = if ua.contains("android") {
        "android"
    } else if ua.contains("iphone") || ua.contains("ipad") {
        "ios"
    } else if ua.contains("windows") {
        "windows"
    } else if ua.contains("mac os") || ua.contains("macintosh") {
        "macos"
    } else if ua.contains("linux") {
        "linux"
    } else {
        "other"
    };

    let client = if ua.contains("tably-client") {
        "sdk"
    } else if ua.contains("edg/") {
        "edge"
    } else if ua.contains("firefox") {
        "firefox"
    } else if ua.contains("chrome") {
        "chrome"
    } else if ua.contains("safari") {
        "safari"
    } else {
        "other"
    };

    format!("{platform}:{client}")
}
