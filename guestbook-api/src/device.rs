/// Short human description of the submitting device, eg. `Mobile · Firefox`
pub fn device_from_user_agent(ua: &str) -> String {
    let ua = ua.to_ascii_lowercase();
    let device = if ua.contains("mobile") {
        "Mobile"
    } else if ua.contains("tablet") {
        "Tablet"
    } else {
        "Desktop"
    };
    let browser = if ua.contains("edge") || ua.contains("edg/") {
        "Edge"
    } else if ua.contains("chrome") {
        "Chrome"
    } else if ua.contains("firefox") {
        "Firefox"
    } else if ua.contains("safari") {
        "Safari"
    } else if ua.contains("msie") || ua.contains("trident") {
        "IE"
    } else {
        "Unknown browser"
    };
    format!("{device} · {browser}")
}
