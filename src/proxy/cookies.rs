use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, HeaderValue};
use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use time::{Duration, OffsetDateTime};

use super::config::{COOKIE_MAX_LENGTH, ProxySettings};
use crate::error::Error;

/// Options for [`CookieManager::create`].
#[derive(Debug, Clone, Default)]
pub struct CreateCookieOptions {
    /// Base cookie name; the manager's session cookie name when `None`.
    pub name: Option<String>,
    pub value: String,
    /// The manager's cookie domain when `None`.
    pub domain: Option<String>,
    /// `/` when `None`.
    pub path: Option<String>,
    /// `true` when `None`.
    pub http_only: Option<bool>,
    /// Also sets `SameSite=None`.
    pub secure: bool,
    pub expires: Option<OffsetDateTime>,
}

impl CreateCookieOptions {
    #[must_use]
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    #[must_use]
    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    #[must_use]
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_http_only(mut self, http_only: bool) -> Self {
        self.http_only = Some(http_only);
        self
    }

    #[must_use]
    pub fn with_secure(mut self, secure: bool) -> Self {
        self.secure = secure;
        self
    }

    #[must_use]
    pub fn with_expires(mut self, expires: OffsetDateTime) -> Self {
        self.expires = Some(expires);
        self
    }
}

/// Creates, reassembles and removes the chunked session cookie.
///
/// Browsers cap each cookie at roughly 4 KiB, so a sealed session is stored
/// as `<name>-1`, `<name>-2`, ... with every serialized `Set-Cookie` value
/// kept under the ceiling. Concatenating the chunk values in index order
/// yields the sealed session again.
#[derive(Debug, Clone)]
pub struct CookieManager {
    cookie_name: String,
    cookie_domain: String,
    upstream_host: Option<String>,
    refresh_cookie_names: Vec<String>,
    max_length: usize,
}

impl CookieManager {
    #[must_use]
    pub fn new(cookie_name: impl Into<String>, cookie_domain: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            cookie_domain: cookie_domain.into(),
            upstream_host: None,
            refresh_cookie_names: Vec::new(),
            max_length: COOKIE_MAX_LENGTH,
        }
    }

    pub(crate) fn from_settings(settings: &ProxySettings) -> Self {
        let mut manager = Self::new(&settings.cookie_name, settings.cookie_domain())
            .with_refresh_cookie_names(refresh_cookie_names(
                &settings.identity_cookie_prefix,
                &settings.client_id,
            ))
            .with_max_cookie_length(settings.max_cookie_length);
        if let Some(host) = settings.base_url_host() {
            manager = manager.with_upstream_host(host);
        }
        manager
    }

    /// Host whose `Domain` attribute is rewritten to the cookie domain.
    #[must_use]
    pub fn with_upstream_host(mut self, host: impl Into<String>) -> Self {
        self.upstream_host = Some(host.into());
        self
    }

    /// Names always included in a removal set.
    #[must_use]
    pub fn with_refresh_cookie_names(mut self, names: Vec<String>) -> Self {
        self.refresh_cookie_names = names;
        self
    }

    #[must_use]
    pub fn with_max_cookie_length(mut self, max: usize) -> Self {
        self.max_length = max;
        self
    }

    #[must_use]
    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    #[must_use]
    pub fn cookie_domain(&self) -> &str {
        &self.cookie_domain
    }

    /// Serialize `options` into one or more `Set-Cookie` values.
    ///
    /// # Errors
    ///
    /// Returns [`Error::CookieTooLarge`] if the attributes alone leave no
    /// room for the value under the size ceiling.
    pub fn create(&self, options: &CreateCookieOptions) -> Result<Vec<String>, Error> {
        let name = options.name.as_deref().unwrap_or(&self.cookie_name);
        tracing::debug!(cookie = %name, "Creating cookie");

        let single = self.serialize(options, &indexed_name(name, 1), &options.value);
        if single.len() <= self.max_length {
            return Ok(vec![single]);
        }

        let chunks = self.split_into_chunks(name, options)?;
        tracing::debug!(cookie = %name, count = chunks.len(), "Created chunked cookie");
        Ok(chunks)
    }

    fn split_into_chunks(
        &self,
        name: &str,
        options: &CreateCookieOptions,
    ) -> Result<Vec<String>, Error> {
        let too_large = || Error::CookieTooLarge {
            name: name.to_string(),
            max: self.max_length,
        };

        let mut chunks = Vec::new();
        let mut rest = options.value.as_str();
        let mut index = 1;
        while !rest.is_empty() {
            let chunk_name = indexed_name(name, index);
            let overhead = self.serialize(options, &chunk_name, "").len();
            let room = self
                .max_length
                .checked_sub(overhead)
                .filter(|room| *room > 0)
                .ok_or_else(too_large)?;

            let mut end = room.min(rest.len());
            while !rest.is_char_boundary(end) {
                end -= 1;
            }
            if end == 0 {
                return Err(too_large());
            }

            let (chunk, tail) = rest.split_at(end);
            chunks.push(self.serialize(options, &chunk_name, chunk));
            rest = tail;
            index += 1;
        }
        if chunks.is_empty() {
            return Err(too_large());
        }
        Ok(chunks)
    }

    fn serialize(&self, options: &CreateCookieOptions, name: &str, value: &str) -> String {
        let mut builder = Cookie::build((name.to_string(), value.to_string()))
            .http_only(options.http_only.unwrap_or(true))
            .domain(
                options
                    .domain
                    .clone()
                    .unwrap_or_else(|| self.cookie_domain.clone()),
            )
            .path(options.path.clone().unwrap_or_else(|| "/".into()));

        if let Some(expires) = options.expires {
            builder = builder.expires(expires);
        }
        if options.secure {
            builder = builder.secure(true).same_site(SameSite::None);
        }
        builder.build().to_string()
    }

    /// Rebuild the sealed session from `<name>-1`, `<name>-2`, ... stopping
    /// at the first missing index. `None` when `<name>-1` is absent.
    #[must_use]
    pub fn reassemble(&self, jar: &CookieJar) -> Option<String> {
        let mut value = String::new();
        let mut index = 1;
        while let Some(chunk) = jar.get(&indexed_name(&self.cookie_name, index)) {
            value.push_str(chunk.value());
            index += 1;
        }

        if index == 1 {
            tracing::debug!(cookie = %self.cookie_name, "Session cookie not found");
            return None;
        }
        tracing::debug!(cookie = %self.cookie_name, count = index - 1, "Session cookie found");
        Some(value)
    }

    /// [`reassemble`](Self::reassemble) straight from request headers.
    #[must_use]
    pub fn reassemble_from_headers(&self, headers: &HeaderMap) -> Option<String> {
        self.reassemble(&CookieJar::from_headers(headers))
    }

    /// Rebuild the sealed session from already-parsed cookies, ordering the
    /// chunks by their numeric index.
    #[must_use]
    pub fn reassemble_from_parsed(&self, cookies: &[Cookie<'_>]) -> Option<String> {
        let mut chunks: Vec<(u32, &str)> = cookies
            .iter()
            .filter_map(|c| chunk_index(c.name(), &self.cookie_name).map(|i| (i, c.value())))
            .collect();
        if chunks.is_empty() {
            return None;
        }
        chunks.sort_by_key(|(index, _)| *index);
        Some(chunks.into_iter().map(|(_, value)| value).collect())
    }

    /// Indexed session cookie names present in the request, up to the first gap.
    #[must_use]
    pub fn cookies_to_remove(&self, jar: &CookieJar) -> Vec<String> {
        (1..)
            .map(|index| indexed_name(&self.cookie_name, index))
            .take_while(|name| jar.get(name).is_some())
            .collect()
    }

    /// Empty, already-expired `Set-Cookie` values for `names` plus the
    /// refresh-token cookie names.
    #[must_use]
    pub fn removal_headers(&self, names: &[String], secure: bool, domain: &str) -> Vec<String> {
        let mut all: Vec<&str> = names.iter().map(String::as_str).collect();
        for refresh in &self.refresh_cookie_names {
            if !all.contains(&refresh.as_str()) {
                all.push(refresh);
            }
        }

        all.into_iter()
            .map(|name| {
                let mut builder = Cookie::build((name.to_string(), ""))
                    .http_only(true)
                    .domain(domain.to_string())
                    .path("/")
                    .max_age(Duration::ZERO)
                    .expires(OffsetDateTime::UNIX_EPOCH);
                if secure {
                    builder = builder.secure(true).same_site(SameSite::None);
                }
                builder.build().to_string()
            })
            .collect()
    }

    /// Append removal cookies to `response_headers`, keeping any `Set-Cookie`
    /// values already staged.
    ///
    /// With `names == None` the removal set is every indexed session cookie
    /// the request carries.
    pub fn stage_removal(
        &self,
        response_headers: &mut HeaderMap,
        request_headers: &HeaderMap,
        names: Option<Vec<String>>,
        secure: bool,
    ) {
        let names =
            names.unwrap_or_else(|| self.cookies_to_remove(&CookieJar::from_headers(request_headers)));

        for header in self.removal_headers(&names, secure, &self.cookie_domain) {
            match HeaderValue::from_str(&header) {
                Ok(value) => {
                    response_headers.append(SET_COOKIE, value);
                }
                Err(e) => tracing::warn!(error = %e, "Skipping invalid removal cookie"),
            }
        }
    }

    /// Adapt upstream `Set-Cookie` values for the browser.
    ///
    /// On insecure connections `Secure` and `SameSite=None` are dropped; a
    /// `Domain` equal to the upstream host becomes the cookie domain. All
    /// other attributes pass through unchanged.
    #[must_use]
    pub fn normalize_set_cookie(&self, headers: &[String], secure: bool) -> Vec<String> {
        headers
            .iter()
            .map(|header| self.normalize_one(header, secure))
            .collect()
    }

    fn normalize_one(&self, header: &str, secure: bool) -> String {
        let mut parts = header.split(';').map(str::trim).filter(|p| !p.is_empty());
        let mut out: Vec<String> = parts.next().map(str::to_string).into_iter().collect();

        for attr in parts {
            if !secure
                && (attr.eq_ignore_ascii_case("Secure") || attr.eq_ignore_ascii_case("SameSite=None"))
            {
                continue;
            }
            if self.is_upstream_domain(attr) {
                out.push(format!("Domain={}", self.cookie_domain));
                continue;
            }
            out.push(attr.to_string());
        }
        out.join("; ")
    }

    fn is_upstream_domain(&self, attr: &str) -> bool {
        let Some(host) = self.upstream_host.as_deref() else {
            return false;
        };
        let Some((key, value)) = attr.split_once('=') else {
            return false;
        };
        key.trim().eq_ignore_ascii_case("domain") && value.trim().eq_ignore_ascii_case(host)
    }
}

/// `<base>-<index>`
#[must_use]
pub fn indexed_name(base: &str, index: u32) -> String {
    format!("{base}-{index}")
}

fn chunk_index(name: &str, base: &str) -> Option<u32> {
    name.strip_prefix(base)?
        .strip_prefix('-')?
        .parse()
        .ok()
}

/// Refresh-token cookie names the identity service may have set.
fn refresh_cookie_names(prefix: &str, client_id: &str) -> Vec<String> {
    let mut names = vec![format!("{prefix}refresh_{client_id}")];
    let compact = format!("{prefix}refresh_{}", client_id.replace('-', ""));
    if !names.contains(&compact) {
        names.push(compact);
    }
    names
}
