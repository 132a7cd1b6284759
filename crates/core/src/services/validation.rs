//! Input validation helpers shared by the services.

use std::borrow::Cow;

use validator::ValidationError;

/// Longest accepted stream or event identifier.
pub const MAX_ID_LEN: usize = 256;

/// Validate a peer domain, optionally with a port (`example.com:8443`).
///
/// Scheme, path, userinfo and whitespace are rejected.
pub fn validate_domain(domain: &str) -> Result<(), ValidationError> {
    let invalid = || {
        let mut err = ValidationError::new("domain");
        err.message = Some(Cow::from(format!("invalid domain: {domain}")));
        err
    };

    if domain.is_empty() || domain.len() > 253 || domain.contains(['/', '@', ' ', '?', '#']) {
        return Err(invalid());
    }

    let host = match domain.rsplit_once(':') {
        Some((host, port)) if !host.contains(':') => {
            port.parse::<u16>().map_err(|_| invalid())?;
            host
        }
        _ => domain,
    };

    match url::Host::parse(host) {
        Ok(url::Host::Domain(_)) => Ok(()),
        _ => Err(invalid()),
    }
}

/// Validate every domain in a list.
pub fn validate_domains(domains: &[String]) -> Result<(), ValidationError> {
    domains.iter().try_for_each(|d| validate_domain(d))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accepts_plain_and_ported_domains() {
        assert!(validate_domain("b.example").is_ok());
        assert!(validate_domain("B.Example").is_ok());
        assert!(validate_domain("localhost:8443").is_ok());
    }

    #[test]
    fn test_rejects_urls_and_garbage() {
        assert!(validate_domain("").is_err());
        assert!(validate_domain("https://b.example").is_err());
        assert!(validate_domain("b.example/inbox").is_err());
        assert!(validate_domain("user@b.example").is_err());
        assert!(validate_domain("b.example:notaport").is_err());
        assert!(validate_domain("127.0.0.1").is_err());
    }

    #[test]
    fn test_validate_domains_reports_first_bad_entry() {
        let domains = vec!["a.example".to_string(), "bad domain".to_string()];
        assert!(validate_domains(&domains).is_err());
    }
}
