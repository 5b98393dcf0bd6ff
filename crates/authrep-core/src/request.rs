//! Inbound authorization request as framed by the host adapter

use std::collections::HashMap;

/// Authorization call received from the host
#[derive(Debug, Clone, Default)]
pub struct AuthorizationRequest {
    /// Opaque adapter-configuration blob, decoded into `ServiceConfig`
    pub adapter_config: Option<Vec<u8>>,
    pub instance: Instance,
}

/// Identity and action of the request being authorized
#[derive(Debug, Clone, Default)]
pub struct Instance {
    pub subject: Option<Subject>,
    pub action: Action,
}

/// Caller identity as extracted by the gateway
#[derive(Debug, Clone, Default)]
pub struct Subject {
    /// User-key style credential
    pub user: String,
    /// Attributes such as `app_id`, `app_key` and the OIDC `client_id` claim
    pub properties: HashMap<String, String>,
}

impl Subject {
    /// Property value, treating a missing attribute as empty
    pub fn property(&self, key: &str) -> &str {
        self.properties.get(key).map(String::as_str).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct Action {
    /// Service identifier, used when the adapter config carries none
    pub service: String,
    pub method: String,
    pub path: String,
}
