//! Client identifier resolution.

use serde::{Deserialize, Serialize};

/// Longest identifier derived from request metadata, in characters.
pub const MAX_IDENTIFIER_LEN: usize = 100;

const UNKNOWN: &str = "unknown";

/// Anything that can name the quota holder for a call.
///
/// The limiter treats the returned string as an opaque map key.
pub trait IdentifierSource {
    fn client_identifier(&self) -> String;
}

impl IdentifierSource for str {
    fn client_identifier(&self) -> String {
        self.to_string()
    }
}

impl IdentifierSource for String {
    fn client_identifier(&self) -> String {
        self.clone()
    }
}

impl<T: IdentifierSource + ?Sized> IdentifierSource for &T {
    fn client_identifier(&self) -> String {
        (**self).client_identifier()
    }
}

/// Request metadata used to tell anonymous clients apart.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RequestMetadata {
    /// Raw `x-forwarded-for` header
    pub forwarded_for: Option<String>,
    /// Raw `x-real-ip` header
    pub real_ip: Option<String>,
    /// Raw `user-agent` header
    pub user_agent: Option<String>,
}

impl RequestMetadata {
    /// Collect the relevant headers from `(name, value)` pairs. Header names
    /// are matched case-insensitively; the first occurrence wins.
    pub fn from_headers<I, K, V>(headers: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: AsRef<str>,
        V: Into<String>,
    {
        let mut metadata = Self::default();

        for (name, value) in headers {
            let slot = match name.as_ref().to_ascii_lowercase().as_str() {
                "x-forwarded-for" => &mut metadata.forwarded_for,
                "x-real-ip" => &mut metadata.real_ip,
                "user-agent" => &mut metadata.user_agent,
                _ => continue,
            };
            if slot.is_none() {
                *slot = Some(value.into());
            }
        }

        metadata
    }

    /// The client address: the first `x-forwarded-for` hop, else `x-real-ip`.
    pub fn client_ip(&self) -> Option<&str> {
        let forwarded = self
            .forwarded_for
            .as_deref()
            .and_then(|list| list.split(',').next())
            .map(str::trim)
            .filter(|ip| !ip.is_empty());

        forwarded.or_else(|| {
            self.real_ip
                .as_deref()
                .map(str::trim)
                .filter(|ip| !ip.is_empty())
        })
    }
}

impl IdentifierSource for RequestMetadata {
    fn client_identifier(&self) -> String {
        let ip = self.client_ip().unwrap_or(UNKNOWN);
        let user_agent = self
            .user_agent
            .as_deref()
            .filter(|ua| !ua.is_empty())
            .unwrap_or(UNKNOWN);

        format!("{}-{}", ip, user_agent)
            .chars()
            .take(MAX_IDENTIFIER_LEN)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forwarded_for_takes_first_hop() {
        let metadata = RequestMetadata {
            forwarded_for: Some("203.0.113.7, 10.0.0.1".into()),
            real_ip: Some("10.0.0.1".into()),
            user_agent: Some("Mozilla/5.0".into()),
        };
        assert_eq!(metadata.client_identifier(), "203.0.113.7-Mozilla/5.0");
    }

    #[test]
    fn test_falls_back_to_real_ip() {
        let metadata = RequestMetadata {
            forwarded_for: None,
            real_ip: Some("198.51.100.2".into()),
            user_agent: Some("curl/8.0".into()),
        };
        assert_eq!(metadata.client_identifier(), "198.51.100.2-curl/8.0");
    }

    #[test]
    fn test_empty_forwarded_entry_falls_back() {
        let metadata = RequestMetadata {
            forwarded_for: Some(" , 10.0.0.1".into()),
            real_ip: Some("198.51.100.2".into()),
            user_agent: None,
        };
        assert_eq!(metadata.client_identifier(), "198.51.100.2-unknown");
    }

    #[test]
    fn test_missing_everything() {
        assert_eq!(RequestMetadata::default().client_identifier(), "unknown-unknown");
    }

    #[test]
    fn test_identifier_is_truncated() {
        let metadata = RequestMetadata {
            forwarded_for: Some("203.0.113.7".into()),
            real_ip: None,
            user_agent: Some("é".repeat(300)),
        };
        let identifier = metadata.client_identifier();
        assert_eq!(identifier.chars().count(), MAX_IDENTIFIER_LEN);
        assert!(identifier.starts_with("203.0.113.7-é"));
    }

    #[test]
    fn test_from_headers_is_case_insensitive() {
        let metadata = RequestMetadata::from_headers([
            ("X-Forwarded-For", "203.0.113.7"),
            ("User-Agent", "first"),
            ("user-agent", "second"),
            ("accept", "*/*"),
        ]);
        assert_eq!(metadata.forwarded_for.as_deref(), Some("203.0.113.7"));
        assert_eq!(metadata.user_agent.as_deref(), Some("first"));
        assert_eq!(metadata.real_ip, None);
    }

    #[test]
    fn test_plain_strings_are_identifiers() {
        assert_eq!("session-42".client_identifier(), "session-42");
        assert_eq!(String::from("session-42").client_identifier(), "session-42");
    }
}
