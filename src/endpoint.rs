//! REST endpoint paths for webhook and OAuth-style credentials.

use crate::{Error, Result};
use std::fmt;
use url::Url;

/// Parses and normalizes a portal base URL.
///
/// The URL must be absolute, use `http` or `https`, and have a host. The
/// returned URL always ends with exactly one `/`, so method paths join below it.
///
/// # Examples
///
/// ```
/// use bitrix24_client::endpoint::parse_base_url;
///
/// let url = parse_base_url("https://x.bitrix24.ru").unwrap();
/// assert_eq!(url.as_str(), "https://x.bitrix24.ru/");
///
/// assert!(parse_base_url("ftp://x.com").is_err());
/// assert!(parse_base_url("not-a-url").is_err());
/// ```
pub fn parse_base_url(raw: &str) -> Result<Url> {
    let invalid = || Error::ConfigurationError(format!("Invalid base URL: '{}'", raw));

    let mut url = Url::parse(raw.trim()).map_err(|_| invalid())?;
    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        return Err(invalid());
    }

    let path = format!("{}/", url.path().trim_end_matches('/'));
    url.set_path(&path);
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}

/// Builds method URLs under `rest/`.
///
/// With a user id the path is `rest/{user_id}/{credential}/{method}`, otherwise
/// `rest/{credential}/{method}`.
#[derive(Clone, PartialEq, Eq)]
pub struct Endpoint {
    base_url: Url,
    credential: String,
    user_id: Option<u64>,
}

impl Endpoint {
    /// Creates an endpoint from an already normalized base URL.
    pub fn new(base_url: Url, credential: impl Into<String>, user_id: Option<u64>) -> Self {
        Self {
            base_url,
            credential: credential.into(),
            user_id,
        }
    }

    /// The normalized portal URL.
    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    /// The webhook key or access token.
    pub fn credential(&self) -> &str {
        &self.credential
    }

    /// The user id for OAuth-style paths.
    pub fn user_id(&self) -> Option<u64> {
        self.user_id
    }

    /// Returns the absolute URL for a remote method such as `crm.lead.list`.
    ///
    /// # Examples
    ///
    /// ```
    /// use bitrix24_client::endpoint::{parse_base_url, Endpoint};
    ///
    /// let base = parse_base_url("https://x.bitrix24.ru").unwrap();
    ///
    /// let webhook = Endpoint::new(base.clone(), "key", None);
    /// assert_eq!(
    ///     webhook.method_url("crm.lead.get").unwrap().as_str(),
    ///     "https://x.bitrix24.ru/rest/key/crm.lead.get"
    /// );
    ///
    /// let oauth = Endpoint::new(base, "token", Some(1));
    /// assert_eq!(
    ///     oauth.method_url("crm.lead.get").unwrap().as_str(),
    ///     "https://x.bitrix24.ru/rest/1/token/crm.lead.get"
    /// );
    /// ```
    pub fn method_url(&self, method: &str) -> Result<Url> {
        if method.trim().is_empty() {
            return Err(Error::ConfigurationError(
                "Method name must not be empty".to_string(),
            ));
        }
        let path = match self.user_id {
            Some(user_id) => format!("rest/{}/{}/{}", user_id, self.credential, method),
            None => format!("rest/{}/{}", self.credential, method),
        };
        Ok(self.base_url.join(&path)?)
    }

    /// A loggable form of the method URL with the credential masked.
    pub fn redacted(&self, method: &str) -> String {
        match self.user_id {
            Some(user_id) => format!("{}rest/{}/***/{}", self.base_url, user_id, method),
            None => format!("{}rest/***/{}", self.base_url, method),
        }
    }
}

impl fmt::Debug for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Endpoint")
            .field("base_url", &self.base_url.as_str())
            .field("credential", &"<redacted>")
            .field("user_id", &self.user_id)
            .finish()
    }
}
