//! Credential extraction from the request subject

use crate::error::AuthzError;
use crate::model::ProxyConfig;
use crate::request::Subject;
use std::fmt;

/// Subject property carrying the application id
pub const APP_ID_ATTRIBUTE: &str = "app_id";
/// Subject property carrying the application key
pub const APP_KEY_ATTRIBUTE: &str = "app_key";
/// Subject property carrying the OIDC client id claim
pub const OIDC_ATTRIBUTE: &str = "client_id";

/// Application credentials forwarded to the backend; blank means absent
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub app_id: String,
    pub app_key: String,
    pub user_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("app_id", &self.app_id)
            .field("app_key", &(!self.app_key.is_empty()))
            .field("user_key", &(!self.user_key.is_empty()))
            .finish()
    }
}

/// Resolve the credentials of a request against the service's auth pattern
///
/// Under the OIDC pattern the application id is read from the `client_id`
/// claim only; a generic `app_id` attribute is ignored. A request with neither
/// an application id nor a user key is unauthenticated.
pub fn resolve(config: &ProxyConfig, subject: Option<&Subject>) -> Result<Credentials, AuthzError> {
    let credentials = subject
        .map(|subject| {
            let app_id_attribute = if config.is_oidc() {
                OIDC_ATTRIBUTE
            } else {
                APP_ID_ATTRIBUTE
            };
            Credentials {
                app_id: subject.property(app_id_attribute).to_string(),
                app_key: subject.property(APP_KEY_ATTRIBUTE).to_string(),
                user_key: subject.user.clone(),
            }
        })
        .unwrap_or_default();

    if credentials.app_id.is_empty() && credentials.user_key.is_empty() {
        return Err(AuthzError::Unauthenticated);
    }

    Ok(credentials)
}
