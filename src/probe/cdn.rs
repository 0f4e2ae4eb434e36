//! CDN front detection.
//!
//! A Cloudflare edge answers `/cdn-cgi/trace` on every zone it fronts, so a
//! live probe of that path is the exclusion signal the classifier uses. The
//! provider-token match is a cheap diagnostic helper on top of it.

use anyhow::anyhow;
use std::sync::OnceLock;
use std::time::Duration;

const TRACE_TIMEOUT: Duration = Duration::from_secs(5);

/// Field markers a genuine `/cdn-cgi/trace` body contains.
const TRACE_MARKERS: &[&str] = &["fl=", "h=", "colo=", "gateway="];

/// Substrings of well-known CDN provider hostnames.
const PROVIDER_TOKENS: &[&str] = &[
    "cloudflare",
    "amazonaws",
    "fastly",
    "maxcdn",
    "keycdn",
    "jsdelivr",
    "unpkg",
    "cdnjs",
    "bootstrapcdn",
    "fontawesome",
    "akamai",
    "edgecast",
    "chinacache",
    "qiniu",
    "upyun",
];

fn trace_client() -> anyhow::Result<&'static reqwest::Client> {
    static CLIENT: OnceLock<anyhow::Result<reqwest::Client>> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            // Verification stays on here: this request goes to the domain
            // itself, not to an arbitrary scanned endpoint.
            reqwest::Client::builder()
                .timeout(TRACE_TIMEOUT)
                .build()
                .map_err(|err| anyhow!(err))
        })
        .as_ref()
        .map_err(|err| anyhow!("failed to build trace client: {err}"))
}

/// True when the domain is fronted by Cloudflare. Any network or parse
/// failure counts as "not detected"; the probe is a one-shot side channel.
pub async fn is_cloudflare(domain: &str) -> bool {
    if domain.is_empty() {
        return false;
    }
    let Ok(client) = trace_client() else {
        return false;
    };

    let url = format!("https://{domain}/cdn-cgi/trace");
    let response = match client.get(&url).send().await {
        Ok(response) => response,
        Err(_) => return false,
    };
    if response.status() != reqwest::StatusCode::OK {
        return false;
    }
    match response.text().await {
        Ok(body) => body_is_trace(&body),
        Err(_) => false,
    }
}

fn body_is_trace(body: &str) -> bool {
    TRACE_MARKERS.iter().any(|marker| body.contains(marker))
}

/// Broader CDN check: provider-token match on the name, then the Cloudflare
/// probe. Diagnostic helper; the classifier excludes on Cloudflare alone.
pub async fn is_cdn(domain: &str) -> bool {
    matches_provider_token(domain) || is_cloudflare(domain).await
}

fn matches_provider_token(domain: &str) -> bool {
    let lower = domain.to_ascii_lowercase();
    PROVIDER_TOKENS.iter().any(|token| lower.contains(token))
}
