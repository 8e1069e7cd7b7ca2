//! MaxMind DB country lookup.

use std::net::IpAddr;
use std::path::Path;

use maxminddb::Reader;

use crate::error::RuleError;
use crate::source::GeoIpSource;

/// GeoIP source backed by a MaxMind DB file (GeoLite2 or compatible).
pub struct MaxMindSource {
    reader: Reader<Vec<u8>>,
}

impl MaxMindSource {
    /// Load a database from a file path.
    pub fn from_file(path: &Path) -> Result<Self, RuleError> {
        let reader = Reader::open_readfile(path).map_err(|e| {
            RuleError::GeoIp(format!(
                "failed to open geoip database {}: {e}",
                path.display()
            ))
        })?;
        Ok(Self { reader })
    }

    /// Load a database from raw bytes.
    pub fn from_bytes(data: Vec<u8>) -> Result<Self, RuleError> {
        let reader = Reader::from_source(data)
            .map_err(|e| RuleError::GeoIp(format!("failed to parse geoip database: {e}")))?;
        Ok(Self { reader })
    }
}

impl GeoIpSource for MaxMindSource {
    /// Tries the Country record first, then falls back to the City record
    /// (city-level databases carry the country code there).
    fn country_code(&self, ip: IpAddr) -> Option<String> {
        if let Ok(country) = self.reader.lookup::<maxminddb::geoip2::Country>(ip)
            && let Some(code) = country.country.and_then(|c| c.iso_code)
        {
            return Some(code.to_uppercase());
        }
        if let Ok(city) = self.reader.lookup::<maxminddb::geoip2::City>(ip)
            && let Some(code) = city.country.and_then(|c| c.iso_code)
        {
            return Some(code.to_uppercase());
        }
        None
    }
}

impl std::fmt::Debug for MaxMindSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MaxMindSource").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn max_mind_source_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<MaxMindSource>();
    }

    #[test]
    fn missing_file_reports_the_path() {
        let err = MaxMindSource::from_file(Path::new("/nonexistent/geoip.mmdb")).unwrap_err();
        let message = err.to_string();
        assert!(message.starts_with("geoip error: failed to open geoip database"));
        assert!(message.contains("/nonexistent/geoip.mmdb"));
    }
}
