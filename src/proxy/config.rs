use url::Url;

use super::error::ProxyError;

/// Default per-cookie ceiling, attributes included.
pub const COOKIE_MAX_LENGTH: usize = 4096;

/// Shared proxy settings, read-only after startup.
#[derive(Debug, Clone)]
pub(crate) struct ProxySettings {
    pub(crate) app_url: Url,
    pub(crate) base_url: Url,
    pub(crate) client_id: String,
    pub(crate) cookie_name: String,
    pub(crate) cookie_domain: Option<String>,
    pub(crate) hosted_login: bool,
    pub(crate) logout_suffix: String,
    pub(crate) app_logout_route: String,
    pub(crate) identity_cookie_prefix: String,
    pub(crate) mount_path: String,
    pub(crate) max_cookie_length: usize,
}

impl ProxySettings {
    fn defaults(app_url: Url, base_url: Url, client_id: String) -> Self {
        Self {
            app_url,
            base_url,
            client_id,
            cookie_name: "fe_session".into(),
            cookie_domain: None,
            hosted_login: false,
            logout_suffix: "/logout".into(),
            app_logout_route: "/account/logout".into(),
            identity_cookie_prefix: "fe_".into(),
            mount_path: "/api/identity".into(),
            max_cookie_length: COOKIE_MAX_LENGTH,
        }
    }

    /// Cookies are `Secure` only when the app itself is served over https.
    pub(crate) fn is_secure(&self) -> bool {
        self.app_url.scheme() == "https"
    }

    /// Domain written on cookies handed to the browser.
    pub(crate) fn cookie_domain(&self) -> String {
        self.cookie_domain
            .clone()
            .or_else(|| self.app_url.host_str().map(str::to_string))
            .unwrap_or_else(|| "localhost".into())
    }

    pub(crate) fn base_url_host(&self) -> Option<&str> {
        self.base_url.host_str()
    }
}

/// Identity proxy configuration.
///
/// Required fields are constructor parameters. Use
/// [`from_env()`](ProxyConfig::from_env) for convention-based setup, or
/// [`new()`](ProxyConfig::new) with `with_*` methods for full control.
pub struct ProxyConfig {
    pub(crate) settings: ProxySettings,
    pub(crate) password: String,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

impl ProxyConfig {
    /// Create config with the required fields.
    ///
    /// - `app_url`: URL the browser uses for this application
    /// - `base_url`: URL of the identity service
    /// - `client_id`: identity service client ID
    /// - `password`: session sealing password (at least 32 characters)
    #[must_use]
    pub fn new(
        app_url: Url,
        base_url: Url,
        client_id: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            settings: ProxySettings::defaults(app_url, base_url, client_id.into()),
            password: password.into(),
        }
    }

    /// Create config from environment variables.
    ///
    /// # Required env vars
    /// - `IDENTITY_APP_URL`: application URL as seen by the browser
    /// - `IDENTITY_BASE_URL`: identity service URL
    /// - `IDENTITY_CLIENT_ID`: identity service client ID
    /// - `IDENTITY_ENCRYPTION_PASSWORD`: session sealing password
    ///
    /// # Optional env vars
    /// - `IDENTITY_COOKIE_NAME`: session cookie base name (default `fe_session`)
    /// - `IDENTITY_COOKIE_DOMAIN`: cookie domain (default: app URL host)
    /// - `IDENTITY_HOSTED_LOGIN`: `"1"` or `"true"` to answer logouts with a hosted-logout redirect
    ///
    /// # Errors
    ///
    /// Returns [`ProxyError::Config`] if required env vars are missing or URLs are invalid.
    pub fn from_env() -> Result<Self, ProxyError> {
        let app_url = required_url("IDENTITY_APP_URL")?;
        let base_url = required_url("IDENTITY_BASE_URL")?;
        let client_id = required("IDENTITY_CLIENT_ID")?;
        let password = required("IDENTITY_ENCRYPTION_PASSWORD")?;

        let mut config = Self::new(app_url, base_url, client_id, password);

        if let Ok(name) = std::env::var("IDENTITY_COOKIE_NAME") {
            config = config.with_cookie_name(name);
        }
        if let Ok(domain) = std::env::var("IDENTITY_COOKIE_DOMAIN") {
            config = config.with_cookie_domain(domain);
        }
        let hosted_login = matches!(
            std::env::var("IDENTITY_HOSTED_LOGIN").as_deref(),
            Ok("1") | Ok("true"),
        );

        Ok(config.with_hosted_login(hosted_login))
    }

    #[must_use]
    pub fn with_cookie_name(mut self, name: impl Into<String>) -> Self {
        self.settings.cookie_name = name.into();
        self
    }

    #[must_use]
    pub fn with_cookie_domain(mut self, domain: impl Into<String>) -> Self {
        self.settings.cookie_domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_hosted_login(mut self, enabled: bool) -> Self {
        self.settings.hosted_login = enabled;
        self
    }

    /// Upstream paths ending with this suffix are treated as logouts (default `/logout`).
    #[must_use]
    pub fn with_logout_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.settings.logout_suffix = suffix.into();
        self
    }

    /// The application's own logout page; a `Referer` pointing at it is never
    /// used as the post-logout redirect (default `/account/logout`).
    #[must_use]
    pub fn with_app_logout_route(mut self, route: impl Into<String>) -> Self {
        self.settings.app_logout_route = route.into();
        self
    }

    /// Cookies with this prefix are forwarded upstream as headers (default `fe_`).
    #[must_use]
    pub fn with_identity_cookie_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.settings.identity_cookie_prefix = prefix.into();
        self
    }

    /// Path the proxy routes are mounted under (default `/api/identity`).
    #[must_use]
    pub fn with_mount_path(mut self, path: impl Into<String>) -> Self {
        self.settings.mount_path = path.into();
        self
    }

    #[must_use]
    pub fn with_max_cookie_length(mut self, max: usize) -> Self {
        self.settings.max_cookie_length = max;
        self
    }
}

fn required(name: &'static str) -> Result<String, ProxyError> {
    std::env::var(name).map_err(|_| ProxyError::Config(format!("{name} is required")))
}

fn required_url(name: &'static str) -> Result<Url, ProxyError> {
    required(name)?
        .parse()
        .map_err(|e| ProxyError::Config(format!("{name}: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ProxyConfig {
        ProxyConfig::new(
            "https://app.example".parse().unwrap(),
            "https://auth.example".parse().unwrap(),
            "client-1",
            "0123456789abcdef0123456789abcdef",
        )
    }

    #[test]
    fn test_defaults() {
        let config = config();
        assert_eq!(config.settings.cookie_name, "fe_session");
        assert_eq!(config.settings.cookie_domain(), "app.example");
        assert_eq!(config.settings.base_url_host(), Some("auth.example"));
        assert!(config.settings.is_secure());
        assert!(!config.settings.hosted_login);
    }

    #[test]
    fn test_overrides() {
        let config = config()
            .with_cookie_name("sess")
            .with_cookie_domain(".example")
            .with_hosted_login(true);
        assert_eq!(config.settings.cookie_name, "sess");
        assert_eq!(config.settings.cookie_domain(), ".example");
        assert!(config.settings.hosted_login);
    }

    #[test]
    fn test_http_app_is_not_secure() {
        let config = ProxyConfig::new(
            "http://localhost:3000".parse().unwrap(),
            "https://auth.example".parse().unwrap(),
            "client-1",
            "0123456789abcdef0123456789abcdef",
        );
        assert!(!config.settings.is_secure());
        assert_eq!(config.settings.cookie_domain(), "localhost");
    }

    #[test]
    fn test_debug_hides_password() {
        let rendered = format!("{:?}", config());
        assert!(!rendered.contains("0123456789abcdef"));
    }
}
