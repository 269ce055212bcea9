use std::sync::Arc;

use super::config::{ProxyConfig, ProxySettings};
use super::cookies::CookieManager;
use super::request::RequestRewriter;
use super::response::ResponseRewriter;
use crate::error::Error;
use crate::seal::SessionCodec;
use crate::token::TokenDeriver;

/// Process-wide services built once from validated configuration.
///
/// Shared by reference between the request and response rewriters; holds
/// no mutable state.
#[derive(Debug)]
pub struct ProxyServices {
    pub(crate) settings: ProxySettings,
    pub(crate) cookies: CookieManager,
    pub(crate) codec: SessionCodec,
}

impl ProxyServices {
    /// Validate `config` and build the shared services.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if the sealing password is too short.
    pub fn new(config: ProxyConfig) -> Result<Self, Error> {
        let codec = SessionCodec::new(&config.password)?;
        let cookies = CookieManager::from_settings(&config.settings);
        Ok(Self {
            settings: config.settings,
            cookies,
            codec,
        })
    }

    #[must_use]
    pub fn cookies(&self) -> &CookieManager {
        &self.cookies
    }

    #[must_use]
    pub fn codec(&self) -> &SessionCodec {
        &self.codec
    }
}

/// Shared state for proxy route handlers.
pub struct ProxyState<D> {
    pub(crate) services: Arc<ProxyServices>,
    pub(crate) deriver: Arc<D>,
}

// Manual Clone: avoid derive adding a `D: Clone` bound.
impl<D> Clone for ProxyState<D> {
    fn clone(&self) -> Self {
        Self {
            services: self.services.clone(),
            deriver: self.deriver.clone(),
        }
    }
}

impl<D: TokenDeriver> ProxyState<D> {
    #[must_use]
    pub fn new(services: Arc<ProxyServices>, deriver: Arc<D>) -> Self {
        Self { services, deriver }
    }

    #[must_use]
    pub fn services(&self) -> &Arc<ProxyServices> {
        &self.services
    }

    #[must_use]
    pub fn request_rewriter(&self) -> RequestRewriter {
        RequestRewriter::new(self.services.clone())
    }

    #[must_use]
    pub fn response_rewriter(&self) -> ResponseRewriter<D> {
        ResponseRewriter::new(self.services.clone(), self.deriver.clone())
    }
}
