use async_trait::async_trait;
use serde_json::json;

use courier_core::{Capability, CourierError, Result, ToolSpec};

use crate::sandbox::SandboxTool;
use crate::ssrf;

const MAX_BODY_BYTES: usize = 262_144;

/// HTTP fetch with SSRF protection.
///
/// The host is validated before DNS resolution and every resolved address
/// is checked before connecting. Redirects are not followed — a redirect to
/// an internal address would bypass the pre-connect check.
pub struct WebFetchTool {
    client: reqwest::Client,
}

impl WebFetchTool {
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| CourierError::Config(format!("web fetch client: {e}")))?;
        Ok(Self { client })
    }

    async fn check_target(url: &str) -> Result<()> {
        let host = ssrf::extract_host(url)?;
        if ssrf::is_blocked_host(&host) {
            return Err(CourierError::ToolDenied {
                tool: "web_fetch".into(),
                reason: format!("host is not publicly routable: {host}"),
            });
        }

        // Literal IPs were checked above; names must resolve to public
        // addresses only.
        if host.parse::<std::net::IpAddr>().is_err() {
            let addrs = tokio::net::lookup_host((host.as_str(), 443))
                .await
                .map_err(|e| CourierError::ToolExecution {
                    tool: "web_fetch".into(),
                    reason: format!("DNS resolution failed for {host}: {e}"),
                })?;
            for addr in addrs {
                if ssrf::is_blocked_addr(addr.ip()) {
                    return Err(CourierError::ToolDenied {
                        tool: "web_fetch".into(),
                        reason: format!("{host} resolves to a non-public address"),
                    });
                }
            }
        }
        Ok(())
    }
}

#[async_trait]
impl SandboxTool for WebFetchTool {
    fn spec(&self) -> ToolSpec {
        ToolSpec {
            name: "web_fetch".into(),
            description: "Fetch the contents of a public http(s) URL".into(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "url": { "type": "string", "description": "The URL to fetch" }
                },
                "required": ["url"]
            }),
            capability: Capability::Web,
        }
    }

    async fn execute(&self, arguments: &serde_json::Value) -> Result<String> {
        let url = arguments
            .get("url")
            .and_then(|v| v.as_str())
            .ok_or_else(|| CourierError::ToolExecution {
                tool: "web_fetch".into(),
                reason: "missing 'url' parameter".into(),
            })?;

        Self::check_target(url).await?;

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| CourierError::ToolExecution {
                tool: "web_fetch".into(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        let mut body = resp.text().await.map_err(|e| CourierError::ToolExecution {
            tool: "web_fetch".into(),
            reason: e.to_string(),
        })?;
        if body.len() > MAX_BODY_BYTES {
            body.truncate(MAX_BODY_BYTES);
            body.push_str("\n... [truncated]");
        }
        Ok(format!("HTTP {status}\n\n{body}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn refuses_private_and_metadata_targets_before_connecting() {
        for url in [
            "http://127.0.0.1:8080/admin",
            "http://169.254.169.254/latest/meta-data/",
            "http://10.0.0.5/internal",
            "http://localhost/",
            "http://[::1]/",
        ] {
            let err = WebFetchTool::check_target(url).await.unwrap_err();
            assert!(matches!(err, CourierError::ToolDenied { .. }), "{url}");
        }
    }

    #[tokio::test]
    async fn refuses_non_http_schemes() {
        let err = WebFetchTool::check_target("file:///etc/passwd")
            .await
            .unwrap_err();
        assert!(matches!(err, CourierError::ToolDenied { .. }));
    }
}
