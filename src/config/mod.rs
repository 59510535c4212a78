use anyhow::Context;
use ipnet::IpNet;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database: DatabaseConfig,
    pub api_server: ServerConfig,
    pub tracking: TrackingConfig,
    pub cache: CacheConfig,
    pub geo: GeoConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub backend: DatabaseBackend,
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseBackend {
    Sqlite,
    Postgres,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackingConfig {
    /// Seconds without a ping before a session stops counting as active
    pub session_timeout_secs: u64,
    /// Seconds between session cache sweeps and index cleanups
    pub sweep_interval_secs: u64,
    /// Seconds a (notification, session) pair stays in the in-process dedup set
    pub impression_dedup_ttl_secs: u64,
    /// Seconds between scheduled stats passes; 0 disables the schedule
    pub stats_interval_secs: u64,
}

impl TrackingConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }

    pub fn impression_dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.impression_dedup_ttl_secs)
    }

    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: 300,
            sweep_interval_secs: 60,
            impression_dedup_ttl_secs: 1800,
            stats_interval_secs: 60,
        }
    }
}

/// Lookup cache in front of website resolution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub ttl_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrustedProxyMode {
    /// Use the socket address as-is
    None,
    /// Honour Forwarded / X-Forwarded-For
    Standard,
    /// Honour CF-Connecting-IP
    Cloudflare,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoConfig {
    /// Path to a MaxMind GeoLite2-City / GeoIP2-City database
    pub geoip_city_db_path: Option<String>,
    pub trusted_proxy_mode: TrustedProxyMode,
    /// Proxy ranges whose forwarding headers are trusted
    pub trusted_proxies: Vec<IpNet>,
    /// Fixed number of proxy hops in front of the service, if known
    pub num_trusted_proxies: Option<usize>,
}

impl Default for GeoConfig {
    fn default() -> Self {
        Self {
            geoip_city_db_path: None,
            trusted_proxy_mode: TrustedProxyMode::None,
            trusted_proxies: Vec::new(),
            num_trusted_proxies: None,
        }
    }
}

fn env_parse<T>(name: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("invalid value for {name}: '{raw}'")),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let backend_str =
            std::env::var("DATABASE_BACKEND").unwrap_or_else(|_| "sqlite".to_string());

        let backend = match backend_str.to_lowercase().as_str() {
            "postgres" | "postgresql" => DatabaseBackend::Postgres,
            _ => DatabaseBackend::Sqlite,
        };

        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://./proofpulse.db?mode=rwc".to_string());
        let max_connections = env_parse("DATABASE_MAX_CONNECTIONS", 10u32)?;

        let api_host = std::env::var("API_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let api_port = env_parse("API_PORT", 8080u16)?;

        let defaults = TrackingConfig::default();
        let tracking = TrackingConfig {
            session_timeout_secs: env_parse("SESSION_TIMEOUT_SECS", defaults.session_timeout_secs)?,
            sweep_interval_secs: env_parse(
                "SESSION_SWEEP_INTERVAL_SECS",
                defaults.sweep_interval_secs,
            )?,
            impression_dedup_ttl_secs: env_parse(
                "IMPRESSION_DEDUP_TTL_SECS",
                defaults.impression_dedup_ttl_secs,
            )?,
            stats_interval_secs: env_parse("STATS_INTERVAL_SECS", defaults.stats_interval_secs)?,
        };

        if tracking.sweep_interval_secs == 0 {
            anyhow::bail!("SESSION_SWEEP_INTERVAL_SECS must be greater than zero");
        }

        let cache = CacheConfig {
            max_entries: env_parse("CACHE_MAX_ENTRIES", 10_000u64)?,
            ttl_secs: env_parse("CACHE_TTL_SECS", 300u64)?,
        };

        let trusted_proxy_mode = match std::env::var("TRUSTED_PROXY_MODE")
            .unwrap_or_else(|_| "none".to_string())
            .to_lowercase()
            .as_str()
        {
            "none" => TrustedProxyMode::None,
            "standard" => TrustedProxyMode::Standard,
            "cloudflare" => TrustedProxyMode::Cloudflare,
            other => {
                tracing::warn!(
                    "Unknown TRUSTED_PROXY_MODE '{other}', falling back to 'none'. Supported values: none, standard, cloudflare"
                );
                TrustedProxyMode::None
            }
        };

        let trusted_proxies = std::env::var("TRUSTED_PROXIES")
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| {
                s.parse::<IpNet>()
                    .with_context(|| format!("invalid CIDR in TRUSTED_PROXIES: '{s}'"))
            })
            .collect::<anyhow::Result<Vec<_>>>()?;

        let num_trusted_proxies = std::env::var("NUM_TRUSTED_PROXIES")
            .ok()
            .map(|v| {
                v.trim()
                    .parse::<usize>()
                    .with_context(|| format!("invalid value for NUM_TRUSTED_PROXIES: '{v}'"))
            })
            .transpose()?;

        let geo = GeoConfig {
            geoip_city_db_path: std::env::var("GEOIP_CITY_DB_PATH").ok(),
            trusted_proxy_mode,
            trusted_proxies,
            num_trusted_proxies,
        };

        Ok(Config {
            database: DatabaseConfig {
                backend,
                url: database_url,
                max_connections,
            },
            api_server: ServerConfig {
                host: api_host,
                port: api_port,
            },
            tracking,
            cache,
            geo,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geo_config_round_trips_proxy_ranges() {
        let config = GeoConfig {
            trusted_proxy_mode: TrustedProxyMode::Standard,
            trusted_proxies: vec![
                "10.0.0.0/8".parse().unwrap(),
                "2001:db8::/32".parse().unwrap(),
            ],
            ..Default::default()
        };

        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["trusted_proxy_mode"], "standard");
        assert_eq!(json["trusted_proxies"][0], "10.0.0.0/8");

        let back: GeoConfig = serde_json::from_value(json).unwrap();
        assert_eq!(back.trusted_proxies, config.trusted_proxies);
    }

    #[test]
    fn test_stats_interval_zero_disables_schedule() {
        let tracking = TrackingConfig {
            stats_interval_secs: 0,
            ..Default::default()
        };
        assert_eq!(tracking.stats_interval(), None);
        assert_eq!(
            TrackingConfig::default().stats_interval(),
            Some(Duration::from_secs(60))
        );
    }
}
