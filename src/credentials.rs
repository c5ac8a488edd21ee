//! Random panel settings and the validators for operator overrides.

use rand::Rng;
use regex::Regex;
use std::net::{IpAddr, SocketAddr};
use std::sync::OnceLock;
use thiserror::Error;

pub const SUBDOMAIN_CHARSET: &str = "abcdefghijklmnopqrstuvwxyz0123456789-";
pub const PASSWORD_CHARSET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@#$%^&*()_+[]{}|;:',.<>?";
pub const SUB_PATH_CHARSET: &str =
    "ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789!@$&*_-+;:,.";

/// Names containing this are refused so panels cannot be fingerprinted by name.
pub const RESERVED_NAME_FRAGMENT: &str = "bpb";

pub const NAME_LENGTH: usize = 32;
pub const PASSWORD_LENGTH: usize = 12;
pub const SUB_PATH_LENGTH: usize = 16;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Name cannot contain 'bpb'. Please try again.")]
    ReservedName,

    #[error("Name must start and end with a-z or 0-9 and only contain a-z, 0-9 and '-'. Please try again.")]
    InvalidSubdomain,

    #[error("UUID is not standard, please try again.")]
    InvalidUuid,

    #[error("{0} cannot contain non-standard characters! Please try again.")]
    InvalidCharacters(&'static str),

    #[error("{0} is not a valid IP, domain or host:port. Please try again.")]
    InvalidProxy(String),
}

fn subdomain_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?$").expect("valid regex"))
}

fn hostname_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?i)([a-z0-9]([a-z0-9-]{0,61}[a-z0-9])?\.)+[a-z]{2,}$").expect("valid regex")
    })
}

/// Draw `length` characters uniformly from `charset`.
///
/// With `domain_shaped` set, a hyphen drawn for the first or last position is
/// resampled; nothing else is ever rejected.
pub fn generate(charset: &str, length: usize, domain_shaped: bool) -> String {
    let chars: Vec<char> = charset.chars().collect();
    let mut rng = rand::rng();
    let mut out = String::with_capacity(length);

    for i in 0..length {
        let edge = i == 0 || i + 1 == length;
        loop {
            let c = chars[rng.random_range(0..chars.len())];
            if domain_shaped && edge && c == '-' {
                continue;
            }
            out.push(c);
            break;
        }
    }

    out
}

pub fn generate_subdomain() -> String {
    generate(SUBDOMAIN_CHARSET, NAME_LENGTH, true)
}

pub fn generate_password() -> String {
    generate(PASSWORD_CHARSET, PASSWORD_LENGTH, false)
}

pub fn generate_sub_path() -> String {
    generate(SUB_PATH_CHARSET, SUB_PATH_LENGTH, false)
}

pub fn generate_uuid() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn only_charset(value: &str, charset: &str) -> bool {
    value.chars().all(|c| charset.contains(c))
}

pub fn validate_subdomain(name: &str) -> Result<(), ValidationError> {
    if name
        .to_ascii_lowercase()
        .contains(RESERVED_NAME_FRAGMENT)
    {
        return Err(ValidationError::ReservedName);
    }

    if !subdomain_regex().is_match(name) {
        return Err(ValidationError::InvalidSubdomain);
    }

    Ok(())
}

pub fn validate_uuid(value: &str) -> Result<(), ValidationError> {
    uuid::Uuid::parse_str(value)
        .map(|_| ())
        .map_err(|_| ValidationError::InvalidUuid)
}

pub fn validate_password(value: &str) -> Result<(), ValidationError> {
    if only_charset(value, PASSWORD_CHARSET) {
        Ok(())
    } else {
        Err(ValidationError::InvalidCharacters("Trojan password"))
    }
}

pub fn validate_sub_path(value: &str) -> Result<(), ValidationError> {
    if only_charset(value, SUB_PATH_CHARSET) {
        Ok(())
    } else {
        Err(ValidationError::InvalidCharacters("Subscription path"))
    }
}

pub fn is_valid_hostname(value: &str) -> bool {
    hostname_regex().is_match(value)
}

/// A proxy entry is an IP literal, a hostname, or either of those with a port.
pub fn is_valid_proxy_entry(value: &str) -> bool {
    if value.parse::<IpAddr>().is_ok() || is_valid_hostname(value) {
        return true;
    }

    if let Ok(addr) = value.parse::<SocketAddr>() {
        return addr.port() != 0;
    }

    match value.rsplit_once(':') {
        Some((host, port)) => {
            let port_ok = matches!(port.parse::<u16>(), Ok(p) if p != 0);
            port_ok && (host.parse::<IpAddr>().is_ok() || is_valid_hostname(host))
        }
        None => false,
    }
}

/// Validate a comma separated proxy list, returning every offending entry.
pub fn validate_proxy_list(value: &str) -> Result<(), Vec<ValidationError>> {
    let invalid: Vec<ValidationError> = value
        .split(',')
        .map(str::trim)
        .filter(|entry| !is_valid_proxy_entry(entry))
        .map(|entry| ValidationError::InvalidProxy(entry.to_string()))
        .collect();

    if invalid.is_empty() {
        Ok(())
    } else {
        Err(invalid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generated_values_stay_in_charset() {
        for _ in 0..200 {
            let name = generate_subdomain();
            assert_eq!(name.len(), NAME_LENGTH);
            assert!(name.chars().all(|c| SUBDOMAIN_CHARSET.contains(c)));
            assert!(!name.starts_with('-') && !name.ends_with('-'), "{name}");

            assert!(generate_password()
                .chars()
                .all(|c| PASSWORD_CHARSET.contains(c)));
            assert!(generate_sub_path()
                .chars()
                .all(|c| SUB_PATH_CHARSET.contains(c)));
        }
    }

    #[test]
    fn test_domain_shape_resamples_edges_only() {
        for _ in 0..100 {
            let value = generate("-a", 5, true);
            assert_eq!(value.chars().next(), Some('a'));
            assert_eq!(value.chars().last(), Some('a'));
        }
        let single = generate("-a", 1, true);
        assert_eq!(single, "a");
    }

    #[test]
    fn test_subdomain_rejects_reserved_fragment_any_case() {
        assert_eq!(validate_subdomain("my-bpb-panel"), Err(ValidationError::ReservedName));
        assert_eq!(validate_subdomain("myBPBpanel"), Err(ValidationError::ReservedName));
    }

    #[test]
    fn test_subdomain_pattern() {
        assert!(validate_subdomain("panel-01").is_ok());
        assert!(validate_subdomain("a").is_ok());
        assert_eq!(validate_subdomain("-panel"), Err(ValidationError::InvalidSubdomain));
        assert_eq!(validate_subdomain("panel-"), Err(ValidationError::InvalidSubdomain));
        assert_eq!(validate_subdomain("Panel"), Err(ValidationError::InvalidSubdomain));
        assert_eq!(validate_subdomain("pa_nel"), Err(ValidationError::InvalidSubdomain));
        assert_eq!(validate_subdomain(&"a".repeat(64)), Err(ValidationError::InvalidSubdomain));
        assert!(validate_subdomain(&"a".repeat(63)).is_ok());
    }

    #[test]
    fn test_uuid_and_charset_validators() {
        assert!(validate_uuid(&generate_uuid()).is_ok());
        assert_eq!(validate_uuid("not-a-uuid"), Err(ValidationError::InvalidUuid));
        assert!(validate_password("Abc!@#123").is_ok());
        assert!(validate_password("with space").is_err());
        assert!(validate_sub_path("sub-path_1").is_ok());
        assert!(validate_sub_path("sub/path").is_err());
    }

    #[test]
    fn test_proxy_entries() {
        assert!(is_valid_proxy_entry("1.2.3.4"));
        assert!(is_valid_proxy_entry("2606:4700::1111"));
        assert!(is_valid_proxy_entry("proxy.example.com"));
        assert!(is_valid_proxy_entry("proxy.example.com:443"));
        assert!(is_valid_proxy_entry("1.2.3.4:8443"));
        assert!(is_valid_proxy_entry("[2606:4700::1111]:443"));
        assert!(!is_valid_proxy_entry("proxy.example.com:0"));
        assert!(!is_valid_proxy_entry("proxy.example.com:70000"));
        assert!(!is_valid_proxy_entry("localhost"));
        assert!(!is_valid_proxy_entry(""));
    }

    #[test]
    fn test_proxy_list_reports_each_bad_entry() {
        assert!(validate_proxy_list("1.1.1.1, proxy.example.com:443").is_ok());
        let errors = validate_proxy_list("1.1.1.1, bad_host, x:0").unwrap_err();
        assert_eq!(
            errors,
            vec![
                ValidationError::InvalidProxy("bad_host".to_string()),
                ValidationError::InvalidProxy("x:0".to_string()),
            ]
        );
    }
}
