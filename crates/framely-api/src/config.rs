//! API configuration.

use std::time::Duration;

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// CORS origins
    pub cors_origins: Vec<String>,
    /// Request timeout
    pub request_timeout: Duration,
    /// Maximum ingested video size in megabytes
    pub max_video_mb: u64,
    /// Accepted upload MIME types
    pub mime_whitelist: Vec<String>,
    /// Environment (development/production)
    pub environment: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8000,
            cors_origins: vec!["*".to_string()],
            request_timeout: Duration::from_secs(30),
            max_video_mb: 512,
            mime_whitelist: vec![
                "video/mp4".to_string(),
                "video/quicktime".to_string(),
                "video/webm".to_string(),
                "video/x-matroska".to_string(),
            ],
            environment: "development".to_string(),
        }
    }
}

impl ApiConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let base = Self::default();
        Self {
            host: std::env::var("API_HOST").unwrap_or(base.host),
            port: std::env::var("API_PORT")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.port),
            cors_origins: std::env::var("CORS_ORIGINS")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(base.cors_origins),
            request_timeout: Duration::from_secs(
                std::env::var("REQUEST_TIMEOUT")
                    .ok()
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(30),
            ),
            max_video_mb: std::env::var("MAX_VIDEO_MB")
                .ok()
                .and_then(|s| s.parse().ok())
                .unwrap_or(base.max_video_mb),
            mime_whitelist: std::env::var("MIME_WHITELIST")
                .map(|s| s.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(base.mime_whitelist),
            environment: std::env::var("ENVIRONMENT").unwrap_or(base.environment),
        }
    }

    /// Upload cap in bytes.
    pub fn max_video_bytes(&self) -> u64 {
        self.max_video_mb * 1024 * 1024
    }

    /// Check if running in production mode.
    pub fn is_production(&self) -> bool {
        self.environment.to_lowercase() == "production"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_whitelist_covers_common_containers() {
        let cfg = ApiConfig::default();
        assert!(cfg.mime_whitelist.iter().any(|m| m == "video/mp4"));
        assert_eq!(cfg.max_video_bytes(), 512 * 1024 * 1024);
    }
}
