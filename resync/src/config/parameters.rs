//! The validated parameter set and the Extract stage's tuning knobs.

use crate::errors::ConfigError;
use crate::store::model::Reprojection;
use crate::utils::parse_timezone;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Geographic transformation used when none is configured.
pub const DEFAULT_TRANSFORMATION: &str = "WGS_1984_To_GDA2020_3";

/// Remote protocol timing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExtractConfig {
    /// Lifetime requested for a generated token, in minutes.
    #[serde(default = "default_token_expiry")]
    pub token_expiry_minutes: u32,
    /// Delay between job status polls, in seconds.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,
    /// Timeout applied to every HTTP request, in seconds.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: f64,
    /// Directory under which replicas are unpacked. Defaults to the system temp dir.
    #[serde(default)]
    pub staging_root: Option<PathBuf>,
}

/// Upper bound on configured poll intervals and request timeouts.
const MAX_TIMING_SECONDS: f64 = 86_400.0;

/// Converts configured seconds, falling back when the value is unusable.
fn seconds(value: f64, fallback: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0))
        .unwrap_or_else(|_| Duration::from_secs_f64(fallback))
}

fn default_token_expiry() -> u32 {
    60
}

fn default_poll_interval() -> f64 {
    10.0
}

fn default_request_timeout() -> f64 {
    120.0
}

impl Default for ExtractConfig {
    fn default() -> Self {
        Self {
            token_expiry_minutes: default_token_expiry(),
            poll_interval_seconds: default_poll_interval(),
            request_timeout_seconds: default_request_timeout(),
            staging_root: None,
        }
    }
}

impl ExtractConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, seconds: f64) -> Self {
        self.poll_interval_seconds = seconds;
        self
    }

    /// Sets the token lifetime.
    #[must_use]
    pub fn with_token_expiry(mut self, minutes: u32) -> Self {
        self.token_expiry_minutes = minutes;
        self
    }

    /// Sets the staging directory.
    #[must_use]
    pub fn with_staging_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.staging_root = Some(root.into());
        self
    }

    /// Gets the poll interval as Duration.
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        seconds(self.poll_interval_seconds, default_poll_interval())
    }

    /// Gets the request timeout as Duration.
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        seconds(self.request_timeout_seconds, default_request_timeout())
    }

    /// Rejects timings that are not a positive number of seconds up to a day.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (key, value) in [
            ("extract.poll_interval_seconds", self.poll_interval_seconds),
            ("extract.request_timeout_seconds", self.request_timeout_seconds),
        ] {
            if !(value.is_finite() && value > 0.0 && value <= MAX_TIMING_SECONDS) {
                return Err(ConfigError::invalid(
                    key,
                    format!("expected seconds in (0, {MAX_TIMING_SECONDS}], got {value}"),
                ));
            }
        }
        Ok(())
    }

    /// Polls allowed before the token would expire; at least one.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn max_poll_attempts(&self) -> u32 {
        let window = f64::from(self.token_expiry_minutes) * 60.0;
        if self.poll_interval_seconds <= 0.0 {
            return 1;
        }
        ((window / self.poll_interval_seconds).floor() as u32).max(1)
    }
}

/// Parameters as read from configuration, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawParameters {
    /// Destination connection.
    #[serde(default, alias = "sde_conn")]
    pub destination: Option<String>,
    /// Table name prefix.
    #[serde(default)]
    pub prefix: Option<String>,
    /// IANA timezone of the survey.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Portal URL.
    #[serde(default)]
    pub portal: Option<String>,
    /// Portal user name.
    #[serde(default)]
    pub username: Option<String>,
    /// Portal password.
    #[serde(default)]
    pub password: Option<String>,
    /// Destination coordinate reference system code.
    #[serde(default)]
    pub reprojection: Option<String>,
    /// Geographic transformation identifier.
    #[serde(default)]
    pub transformation: Option<String>,
    /// Feature service URL.
    #[serde(default)]
    pub service_url: Option<String>,
    /// Remote protocol timing.
    #[serde(default)]
    pub extract: ExtractConfig,
}

fn present(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn require_http(key: &str, url: &str) -> Result<(), ConfigError> {
    if url.starts_with("https://") || url.starts_with("http://") {
        Ok(())
    } else {
        Err(ConfigError::invalid(key, "expected an http(s) URL"))
    }
}

impl RawParameters {
    /// Validates the raw values into a [`Parameters`] set.
    ///
    /// Every missing mandatory key is reported in a single error.
    pub fn validate(self) -> Result<Parameters, ConfigError> {
        let mandatory = [
            ("destination", present(self.destination.as_ref())),
            ("prefix", present(self.prefix.as_ref())),
            ("timezone", present(self.timezone.as_ref())),
            ("portal", present(self.portal.as_ref())),
            ("reprojection", present(self.reprojection.as_ref())),
            ("service_url", present(self.service_url.as_ref())),
        ];
        let missing: Vec<String> = mandatory
            .iter()
            .filter(|(_, value)| value.is_none())
            .map(|(key, _)| (*key).to_string())
            .collect();
        if !missing.is_empty() {
            return Err(ConfigError::MissingParameters(missing));
        }

        let [destination, prefix, timezone, portal, crs, service_url] =
            mandatory.map(|(_, value)| value.unwrap_or_default());

        parse_timezone(&timezone)?;
        if prefix.contains('.') || prefix.contains(char::is_whitespace) {
            return Err(ConfigError::invalid(
                "prefix",
                "must not contain dots or whitespace",
            ));
        }
        require_http("portal", &portal)?;
        require_http("service_url", &service_url)?;
        self.extract.validate()?;

        Ok(Parameters {
            destination,
            prefix,
            timezone,
            portal: portal.trim_end_matches('/').to_string(),
            username: present(self.username.as_ref()),
            password: self.password.filter(|p| !p.is_empty()),
            crs,
            transformation: present(self.transformation.as_ref())
                .unwrap_or_else(|| DEFAULT_TRANSFORMATION.to_string()),
            service_url: service_url.trim_end_matches('/').to_string(),
            extract: self.extract,
        })
    }
}

/// Immutable, validated run parameters.
#[derive(Clone, PartialEq)]
pub struct Parameters {
    /// Destination connection.
    pub destination: String,
    /// Table name prefix.
    pub prefix: String,
    /// IANA timezone of the survey.
    pub timezone: String,
    /// Portal URL without trailing slash.
    pub portal: String,
    /// Portal user name.
    pub username: Option<String>,
    /// Portal password.
    pub password: Option<String>,
    /// Destination coordinate reference system code.
    pub crs: String,
    /// Geographic transformation identifier.
    pub transformation: String,
    /// Feature service URL without trailing slash.
    pub service_url: String,
    /// Remote protocol timing.
    pub extract: ExtractConfig,
}

impl Parameters {
    /// Reprojection settings for spatial tables.
    #[must_use]
    pub fn reprojection(&self) -> Reprojection {
        Reprojection {
            crs: self.crs.clone(),
            transformation: self.transformation.clone(),
        }
    }

    /// Returns true if a username was given without a password.
    #[must_use]
    pub fn needs_password(&self) -> bool {
        self.username.is_some() && self.password.is_none()
    }

    /// Supplies the portal password.
    #[must_use]
    pub fn with_password(mut self, password: impl Into<String>) -> Self {
        self.password = Some(password.into());
        self
    }

    /// Replaces the Extract stage timing.
    #[must_use]
    pub fn with_extract(mut self, extract: ExtractConfig) -> Self {
        self.extract = extract;
        self
    }
}

impl fmt::Debug for Parameters {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Parameters")
            .field("destination", &self.destination)
            .field("prefix", &self.prefix)
            .field("timezone", &self.timezone)
            .field("portal", &self.portal)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "********"))
            .field("crs", &self.crs)
            .field("transformation", &self.transformation)
            .field("service_url", &self.service_url)
            .field("extract", &self.extract)
            .finish()
    }
}
