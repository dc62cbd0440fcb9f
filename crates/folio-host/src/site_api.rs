//! HTTP client for the blog backend's start-up endpoints.

use std::time::Duration;

use async_trait::async_trait;
use folio_extension::bootstrap::steps::SiteApi;
use folio_extension::{ExtensionError, ModuleDescriptor, SiteSettings, UserInfo};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;

/// Talks to `{base}/settings`, `{base}/user`, `{base}/modules/theme` and
/// `{base}/modules/plugins`. Responses may be wrapped in `{ "data": ... }`.
#[derive(Debug, Clone)]
pub struct HttpSiteApi {
    client: reqwest::Client,
    base: String,
}

/// Strip the backend's optional `{ "data": ... }` envelope.
fn unwrap_envelope(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut map) if map.contains_key("data") => {
            map.remove("data").unwrap_or_default()
        }
        other => other,
    }
}

impl HttpSiteApi {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, ExtensionError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("folio-host/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base: base.trim_end_matches('/').to_string(),
        })
    }

    /// GET `path` and decode it. `Ok(None)` for 401/404 and JSON `null`.
    async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ExtensionError> {
        let url = format!("{}{path}", self.base);
        let resp = self.client.get(&url).send().await?;

        let status = resp.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::UNAUTHORIZED {
            return Ok(None);
        }
        if !status.is_success() {
            return Err(ExtensionError::SiteApi(format!("GET {url}: HTTP {status}")));
        }

        let value = unwrap_envelope(resp.json::<serde_json::Value>().await?);
        if value.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(value)?))
    }
}

#[async_trait]
impl SiteApi for HttpSiteApi {
    async fn fetch_settings(&self) -> Result<SiteSettings, ExtensionError> {
        self.get_json("/settings")
            .await?
            .ok_or_else(|| ExtensionError::SiteApi("site settings are missing".into()))
    }

    async fn fetch_user(&self) -> Result<Option<UserInfo>, ExtensionError> {
        self.get_json("/user").await
    }

    async fn fetch_theme(&self) -> Result<Option<ModuleDescriptor>, ExtensionError> {
        self.get_json("/modules/theme").await
    }

    async fn fetch_plugins(&self) -> Result<Vec<ModuleDescriptor>, ExtensionError> {
        Ok(self.get_json("/modules/plugins").await?.unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api(server: &MockServer) -> HttpSiteApi {
        HttpSiteApi::new(&format!("{}/api/", server.uri()), Duration::from_secs(5)).unwrap()
    }

    async fn mock_get(server: &MockServer, route: &str, response: ResponseTemplate) {
        Mock::given(method("GET"))
            .and(path(route))
            .respond_with(response)
            .mount(server)
            .await;
    }

    #[test]
    fn test_unwrap_envelope() {
        assert_eq!(unwrap_envelope(json!({"data": {"a": 1}})), json!({"a": 1}));
        assert_eq!(unwrap_envelope(json!({"a": 1})), json!({"a": 1}));
        assert_eq!(unwrap_envelope(json!([1, 2])), json!([1, 2]));
    }

    #[tokio::test]
    async fn test_fetch_settings_with_envelope() {
        let server = MockServer::start().await;
        mock_get(
            &server,
            "/api/settings",
            ResponseTemplate::new(200).set_body_json(json!({
                "code": 0,
                "data": {"siteName": "Folio", "domain": "blog.example.com", "installed": true}
            })),
        )
        .await;

        let settings = api(&server).fetch_settings().await.unwrap();
        assert_eq!(settings.site_name, "Folio");
        assert_eq!(settings.domain, "blog.example.com");
        assert!(settings.installed);
    }

    #[tokio::test]
    async fn test_fetch_settings_server_error() {
        let server = MockServer::start().await;
        mock_get(&server, "/api/settings", ResponseTemplate::new(500)).await;

        let err = api(&server).fetch_settings().await.unwrap_err();
        assert!(matches!(err, ExtensionError::SiteApi(_)));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_fetch_user_anonymous() {
        let server = MockServer::start().await;
        mock_get(&server, "/api/user", ResponseTemplate::new(401)).await;

        assert!(api(&server).fetch_user().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fetch_modules() {
        let server = MockServer::start().await;
        mock_get(
            &server,
            "/api/modules/theme",
            ResponseTemplate::new(200).set_body_json(json!({
                "moduleName": "aurora",
                "entry": "https://cdn.example.com/aurora.wasm",
                "styles": ["https://cdn.example.com/aurora.css"]
            })),
        )
        .await;
        mock_get(
            &server,
            "/api/modules/plugins",
            ResponseTemplate::new(200).set_body_json(json!({"data": [
                {"moduleName": "gallery", "entry": "https://cdn.example.com/gallery.wasm"},
                {"moduleName": "seo", "entry": "https://cdn.example.com/seo.wasm"}
            ]})),
        )
        .await;

        let api = api(&server);
        let theme = api.fetch_theme().await.unwrap().unwrap();
        assert_eq!(theme.module_name, "aurora");
        assert_eq!(theme.styles.len(), 1);

        let plugins = api.fetch_plugins().await.unwrap();
        let names: Vec<_> = plugins.iter().map(|p| p.module_name.as_str()).collect();
        assert_eq!(names, vec!["gallery", "seo"]);
    }

    #[tokio::test]
    async fn test_no_theme_configured() {
        let server = MockServer::start().await;
        mock_get(
            &server,
            "/api/modules/theme",
            ResponseTemplate::new(200).set_body_json(json!({"data": null})),
        )
        .await;

        assert!(api(&server).fetch_theme().await.unwrap().is_none());
    }
}
