//! Visitor location resolution
//!
//! Geo lookup is a collaborator of the tracker: it fills in a session's
//! location when the session is first seen. Without a configured MaxMind
//! database sessions are simply tracked without one.

pub mod geoip;
pub mod ip_extractor;

pub use geoip::GeoIpService;
pub use ip_extractor::extract_client_ip;
