//! Service Bus connection strings and shared access signature signing.

use crate::entity::EntityPath;
use crate::error::ConfigurationError;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::fmt;
use std::str::FromStr;
use url::Url;

type HmacSha256 = Hmac<Sha256>;

/// Lifetime of generated SAS tokens
const TOKEN_LIFETIME_MINUTES: i64 = 60;

/// Parsed Service Bus connection string
///
/// Accepts the format issued by the Azure portal:
/// `Endpoint=sb://<namespace>.servicebus.windows.net/;SharedAccessKeyName=<name>;SharedAccessKey=<key>`
/// with an optional `EntityPath=<entity>` for entity-scoped keys, or a
/// pre-computed `SharedAccessSignature=<token>` in place of the key pair.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionString {
    endpoint: String,
    credential: Credential,
    entity_path: Option<String>,
}

#[derive(Clone, PartialEq, Eq)]
enum Credential {
    SharedAccessKey { key_name: String, key: String },
    SharedAccessSignature(String),
}

impl ConnectionString {
    /// Parse a connection string
    pub fn parse(raw: &str) -> Result<Self, ConfigurationError> {
        let mut endpoint = None;
        let mut key_name = None;
        let mut key = None;
        let mut signature = None;
        let mut entity_path = None;

        for part in raw.split(';').map(str::trim).filter(|p| !p.is_empty()) {
            let (name, value) = part.split_once('=').ok_or_else(|| ConfigurationError::Parsing {
                message: format!("expected key=value, found '{}'", part),
            })?;

            match name.to_ascii_lowercase().as_str() {
                "endpoint" => endpoint = Some(value.to_string()),
                "sharedaccesskeyname" => key_name = Some(value.to_string()),
                "sharedaccesskey" => key = Some(value.to_string()),
                "sharedaccesssignature" => signature = Some(value.to_string()),
                "entitypath" => entity_path = Some(value.to_string()),
                _ => {} // TransportType and friends do not apply to the REST API
            }
        }

        let endpoint = normalize_endpoint(&endpoint.ok_or_else(|| ConfigurationError::Missing {
            key: "Endpoint".to_string(),
        })?)?;

        let credential = match (key_name, key, signature) {
            (_, _, Some(signature)) => Credential::SharedAccessSignature(signature),
            (Some(key_name), Some(key), None) => Credential::SharedAccessKey { key_name, key },
            (None, _, None) => {
                return Err(ConfigurationError::Missing {
                    key: "SharedAccessKeyName".to_string(),
                })
            }
            (Some(_), None, None) => {
                return Err(ConfigurationError::Missing {
                    key: "SharedAccessKey".to_string(),
                })
            }
        };

        Ok(Self {
            endpoint,
            credential,
            entity_path,
        })
    }

    /// Namespace endpoint as an `http(s)` base URL ending in `/`
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Entity the key is scoped to, if any
    pub fn entity_path(&self) -> Option<&str> {
        self.entity_path.as_deref()
    }

    /// Absolute URL of an entity, with an optional trailing sub-resource
    pub fn entity_url(&self, path: &EntityPath, resource: &str) -> String {
        format!("{}{}{}", self.endpoint, path.as_str(), resource)
    }

    /// Build an `Authorization` header value valid for the next hour
    pub fn authorization(&self) -> Result<String, ConfigurationError> {
        let expiry = (Utc::now() + Duration::minutes(TOKEN_LIFETIME_MINUTES)).timestamp();
        self.authorization_with_expiry(expiry)
    }

    /// Build an `Authorization` header value expiring at the given unix time
    pub fn authorization_with_expiry(&self, expiry: i64) -> Result<String, ConfigurationError> {
        match &self.credential {
            Credential::SharedAccessSignature(token) => Ok(token.clone()),
            Credential::SharedAccessKey { key_name, key } => {
                let resource = match &self.entity_path {
                    Some(entity) => format!("{}{}", self.endpoint, entity),
                    None => self.endpoint.clone(),
                };
                let encoded_resource = urlencoding::encode(&resource);
                let string_to_sign = format!("{}\n{}", encoded_resource, expiry);

                let mut mac = HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| {
                    ConfigurationError::Invalid {
                        message: format!("unusable SharedAccessKey: {}", e),
                    }
                })?;
                mac.update(string_to_sign.as_bytes());
                let signature = STANDARD.encode(mac.finalize().into_bytes());

                Ok(format!(
                    "SharedAccessSignature sr={}&sig={}&se={}&skn={}",
                    encoded_resource,
                    urlencoding::encode(&signature),
                    expiry,
                    key_name
                ))
            }
        }
    }
}

impl FromStr for ConnectionString {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// Keys stay out of logs.
impl fmt::Debug for ConnectionString {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let key_name = match &self.credential {
            Credential::SharedAccessKey { key_name, .. } => Some(key_name.as_str()),
            Credential::SharedAccessSignature(_) => None,
        };
        f.debug_struct("ConnectionString")
            .field("endpoint", &self.endpoint)
            .field("key_name", &key_name)
            .field("entity_path", &self.entity_path)
            .finish_non_exhaustive()
    }
}

/// Map `sb://` endpoints onto the HTTPS REST surface
fn normalize_endpoint(raw: &str) -> Result<String, ConfigurationError> {
    let url = Url::parse(raw).map_err(|e| ConfigurationError::Parsing {
        message: format!("invalid Endpoint '{}': {}", raw, e),
    })?;

    let host = url.host_str().ok_or_else(|| ConfigurationError::Invalid {
        message: format!("Endpoint '{}' has no host", raw),
    })?;
    let authority = match url.port() {
        Some(port) => format!("{}:{}", host, port),
        None => host.to_string(),
    };

    match url.scheme() {
        "sb" | "https" => Ok(format!("https://{}/", authority)),
        "http" => Ok(format!("http://{}/", authority)),
        other => Err(ConfigurationError::Invalid {
            message: format!("unsupported Endpoint scheme '{}'", other),
        }),
    }
}

#[cfg(test)]
#[path = "connection_tests.rs"]
mod tests;
