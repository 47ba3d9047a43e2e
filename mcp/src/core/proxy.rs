//! HTTP proxy support for SSE and streamable transports.

use super::config::ProxyConfig;
use crate::error::{McpError, McpResult};

/// Apply proxy settings to a client builder.
///
/// The builder is returned unbuilt so auth headers can still be added.
pub(super) fn apply_proxy_to_builder(
    mut builder: reqwest::ClientBuilder,
    proxy_cfg: &ProxyConfig,
) -> McpResult<reqwest::ClientBuilder> {
    if let Some(http_proxy) = &proxy_cfg.http {
        let proxy = reqwest::Proxy::http(http_proxy)
            .map_err(|e| McpError::Config(format!("Invalid HTTP proxy: {}", e)))?;
        builder = builder.proxy(finish_proxy(proxy, proxy_cfg));
    }

    if let Some(https_proxy) = &proxy_cfg.https {
        let proxy = reqwest::Proxy::https(https_proxy)
            .map_err(|e| McpError::Config(format!("Invalid HTTPS proxy: {}", e)))?;
        builder = builder.proxy(finish_proxy(proxy, proxy_cfg));
    }

    Ok(builder)
}

/// Exclusions and credentials shared by both schemes.
fn finish_proxy(mut proxy: reqwest::Proxy, proxy_cfg: &ProxyConfig) -> reqwest::Proxy {
    if let Some(no_proxy) = &proxy_cfg.no_proxy {
        proxy = proxy.no_proxy(reqwest::NoProxy::from_string(no_proxy));
    }
    if let (Some(username), Some(password)) = (&proxy_cfg.username, &proxy_cfg.password) {
        proxy = proxy.basic_auth(username, password);
    }
    proxy
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_http_and_https() {
        let cfg = ProxyConfig {
            http: Some("http://proxy:8080".to_string()),
            https: Some("http://proxy:8443".to_string()),
            no_proxy: Some("localhost".to_string()),
            username: Some("ops".to_string()),
            password: Some("secret".to_string()),
        };
        let builder = apply_proxy_to_builder(reqwest::Client::builder(), &cfg).unwrap();
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_empty_config_is_noop() {
        let builder =
            apply_proxy_to_builder(reqwest::Client::builder(), &ProxyConfig::default()).unwrap();
        assert!(builder.build().is_ok());
    }

    #[test]
    fn test_invalid_proxy_url() {
        let cfg = ProxyConfig {
            http: Some("not a url".to_string()),
            ..ProxyConfig::default()
        };
        assert!(matches!(
            apply_proxy_to_builder(reqwest::Client::builder(), &cfg),
            Err(McpError::Config(_))
        ));
    }
}
