use rand::seq::IndexedRandom;

pub const FE_VERSION: &str = "prod-fe-1.0.79";

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36 Edg/139.0.0.0",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/139.0.0.0 Safari/537.36",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Browser-shaped header set the upstream expects on every call.
pub fn browser_headers(base_url: &str, chat_id: &str) -> Vec<(String, String)> {
    let mut headers = vec![
        ("Content-Type".to_string(), "application/json".to_string()),
        (
            "Accept".to_string(),
            "application/json, text/event-stream".to_string(),
        ),
        ("Connection".to_string(), "keep-alive".to_string()),
        ("Cache-Control".to_string(), "no-cache".to_string()),
        ("User-Agent".to_string(), random_user_agent().to_string()),
        (
            "Accept-Language".to_string(),
            "zh-CN,zh;q=0.9,en;q=0.8".to_string(),
        ),
        ("X-FE-Version".to_string(), FE_VERSION.to_string()),
        ("Origin".to_string(), base_url.to_string()),
    ];
    if chat_id.is_empty() {
        headers.push(("Referer".to_string(), format!("{base_url}/")));
    } else {
        headers.push(("Referer".to_string(), format!("{base_url}/c/{chat_id}")));
    }
    headers
}
