/// Utility functions for address handling and timestamp formatting
use serde::Serializer;
use std::error::Error;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

/// Normalize a hardware address to the lowercase form used as device id
///
/// BlueZ reports addresses in uppercase (`F4:AE:1A:28:FE:48`) while the
/// collection endpoint and the configuration use lowercase.
pub fn normalize_mac(address: &str) -> String {
    address.trim().to_lowercase()
}

/// Serialize a timestamp as an RFC3339 string for the outbound payload
pub fn serialize_rfc3339<S>(dt: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    let formatted = dt.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&formatted)
}

/// Render an error followed by each of its causes, separated by colons
pub fn error_chain(err: &dyn Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConfigError;
    use url::Url;

    #[test]
    fn error_chain_prints_each_cause_once() {
        let err = ConfigError::from(Url::parse("not a url").unwrap_err());

        assert_eq!(
            error_chain(&err),
            "DATA_ENDPOINT is not a valid URL: relative URL without a base"
        );
    }

    #[test]
    fn normalize_mac_lowercases_and_trims() {
        assert_eq!(normalize_mac(" F4:AE:1A:28:FE:48 "), "f4:ae:1a:28:fe:48");
        assert_eq!(normalize_mac("da:5e:04:87:5c:ef"), "da:5e:04:87:5c:ef");
    }
}
