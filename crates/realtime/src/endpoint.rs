//! Where to connect and how to authenticate.

use secrecy::{ExposeSecret, SecretString};

/// Default service endpoint; the model is appended as a query parameter.
pub const DEFAULT_REALTIME_URL: &str = "wss://api.openai.com/v1/realtime";

/// An API credential, kept out of debug output and logs.
#[derive(Clone)]
pub struct Credential(SecretString);

impl Credential {
    pub fn new(key: impl Into<String>) -> Self {
        Self(SecretString::from(key.into()))
    }

    pub fn expose(&self) -> &str {
        self.0.expose_secret()
    }
}

impl std::fmt::Debug for Credential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Credential(***)")
    }
}

/// A connection target. `Direct` authenticates against the service itself;
/// `Relay` points at a pass-through proxy that injects credentials upstream,
/// so no local credential is required or sent.
#[derive(Debug, Clone)]
pub enum Endpoint {
    Direct { url: String, credential: Credential },
    Relay { url: String },
}

impl Endpoint {
    pub fn direct(credential: Credential) -> Self {
        Endpoint::Direct {
            url: DEFAULT_REALTIME_URL.to_string(),
            credential,
        }
    }

    pub fn relay(url: impl Into<String>) -> Self {
        Endpoint::Relay { url: url.into() }
    }

    /// The URL to dial, with the model selector attached.
    pub fn url_for_model(&self, model: &str) -> String {
        let base = match self {
            Endpoint::Direct { url, .. } => url,
            Endpoint::Relay { url } => url,
        };
        let sep = if base.contains('?') { '&' } else { '?' };
        format!("{base}{sep}model={model}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn credential_debug_is_redacted() {
        let credential = Credential::new("sk-very-secret");
        assert_eq!(format!("{credential:?}"), "Credential(***)");
        assert_eq!(credential.expose(), "sk-very-secret");
    }

    #[test]
    fn model_is_appended_as_query() {
        let endpoint = Endpoint::relay("wss://relay.local/realtime");
        assert_eq!(
            endpoint.url_for_model("gpt-4o-realtime-preview"),
            "wss://relay.local/realtime?model=gpt-4o-realtime-preview"
        );

        let endpoint = Endpoint::relay("wss://relay.local/realtime?region=eu");
        assert_eq!(
            endpoint.url_for_model("m"),
            "wss://relay.local/realtime?region=eu&model=m"
        );
    }
}
