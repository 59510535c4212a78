//! IP geolocation for new sessions using a MaxMind City MMDB
//!
//! The database is memory-mapped once and shared between clones, so lookups
//! are cheap enough to run inline when a session is first tracked.

use anyhow::{Context, Result};
use maxminddb::{geoip2, Mmap, Reader};
use std::net::IpAddr;
use std::sync::Arc;

use crate::models::Location;

/// GeoIP lookup service. Without a database every lookup yields `None`.
#[derive(Clone, Default)]
pub struct GeoIpService {
    city_reader: Option<Arc<Reader<Mmap>>>,
}

impl GeoIpService {
    /// Open the City database at `city_path`, or build a disabled service
    /// when no path is configured
    pub fn new(city_path: Option<&str>) -> Result<Self> {
        let city_reader = if let Some(path) = city_path {
            let reader = unsafe { Reader::open_mmap(path) }
                .with_context(|| format!("Failed to open GeoIP City database at {}", path))?;
            Some(Arc::new(reader))
        } else {
            None
        };

        Ok(Self { city_reader })
    }

    pub fn is_enabled(&self) -> bool {
        self.city_reader.is_some()
    }

    /// Resolve an address to a location.
    ///
    /// Returns `None` when geo lookup is disabled, the address is not in the
    /// database, or the record carries neither a country nor a city.
    pub fn lookup(&self, ip: IpAddr) -> Option<Location> {
        let reader = self.city_reader.as_ref()?;
        let result = reader.lookup(ip).ok()?;
        let city = result.decode::<geoip2::City>().ok().flatten()?;

        let location = Location {
            country: city.country.iso_code.map(|s| s.to_string()),
            city: city.city.names.english.map(|s| s.to_string()),
            latitude: city.location.latitude,
            longitude: city.location.longitude,
        };

        if location.country.is_none() && location.city.is_none() {
            return None;
        }
        Some(location)
    }

    /// Convenience for callers holding the address as text
    pub fn lookup_str(&self, ip: &str) -> Option<Location> {
        let ip = ip.trim().parse::<IpAddr>().ok()?;
        self.lookup(ip)
    }
}
