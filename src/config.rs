//! Runtime settings, loaded from an optional TOML file.

use std::path::Path;

use anyhow::Context;
use serde::Deserialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IngestProfile {
    pub batch_size: usize,
    pub header_lines: usize,
}

impl IngestProfile {
    pub const fn new(batch_size: usize, header_lines: usize) -> Self {
        Self {
            batch_size,
            header_lines,
        }
    }
}

impl Default for IngestProfile {
    fn default() -> Self {
        Self::new(100, 1)
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Profiles {
    pub turns: IngestProfile,
    pub legacy_turns: IngestProfile,
    pub surveys: IngestProfile,
}

impl Default for Profiles {
    fn default() -> Self {
        Self {
            turns: IngestProfile::new(500, 1),
            legacy_turns: IngestProfile::new(100, 1),
            surveys: IngestProfile::new(50, 1),
        }
    }
}

/// The facility and kiosk that full-format turn files are attributed to.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HomeSite {
    pub facility_name: String,
    pub facility_city: String,
    pub facility_address: Option<String>,
    pub kiosk_code: String,
    /// `handling-user` value that marks a turn as issued by the kiosk.
    pub kiosk_user: String,
}

impl Default for HomeSite {
    fn default() -> Self {
        Self {
            facility_name: "CAC SAN MARINO".to_string(),
            facility_city: "GUAYAQUIL".to_string(),
            facility_address: Some("Av. San Marino".to_string()),
            kiosk_code: "TOTEM-SM-01".to_string(),
            kiosk_user: "anfitrion".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    pub abandonment_target_pct: f64,
    pub peak_congestion_turns: f64,
    pub uptime_target_pct: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            abandonment_target_pct: 10.0,
            peak_congestion_turns: 150.0,
            uptime_target_pct: 99.9,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Hours added to source clock times before they are stored. The source system and the
    /// storage clock disagree by this amount in the deployment the data comes from; confirm
    /// before reusing the value elsewhere.
    pub clock_offset_hours: i64,
    pub profiles: Profiles,
    pub site: HomeSite,
    pub thresholds: Thresholds,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            clock_offset_hours: 8,
            profiles: Profiles::default(),
            site: HomeSite::default(),
            thresholds: Thresholds::default(),
        }
    }
}

impl Settings {
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> anyhow::Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (name, profile) in [
            ("turns", &self.profiles.turns),
            ("legacy_turns", &self.profiles.legacy_turns),
            ("surveys", &self.profiles.surveys),
        ] {
            anyhow::ensure!(
                profile.batch_size > 0,
                "profiles.{name}.batch_size must be greater than zero"
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_ingestion_profiles() {
        let settings = Settings::default();
        assert_eq!(settings.profiles.turns, IngestProfile::new(500, 1));
        assert_eq!(settings.profiles.legacy_turns, IngestProfile::new(100, 1));
        assert_eq!(settings.profiles.surveys, IngestProfile::new(50, 1));
        assert_eq!(settings.clock_offset_hours, 8);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let settings = Settings::from_toml(
            r#"
            clock_offset_hours = 0

            [profiles.surveys]
            header_lines = 2

            [thresholds]
            peak_congestion_turns = 90.0
            "#,
        )
        .unwrap();

        assert_eq!(settings.clock_offset_hours, 0);
        assert_eq!(settings.profiles.surveys, IngestProfile::new(100, 2));
        assert_eq!(settings.profiles.turns.batch_size, 500);
        assert_eq!(settings.thresholds.peak_congestion_turns, 90.0);
        assert_eq!(settings.thresholds.abandonment_target_pct, 10.0);
        assert_eq!(settings.site.kiosk_code, "TOTEM-SM-01");
    }

    #[test]
    fn rejects_zero_batch_size() {
        let err = Settings::from_toml("[profiles.turns]\nbatch_size = 0\n").unwrap_err();
        assert!(err.to_string().contains("batch_size"));
    }

    #[test]
    fn rejects_unknown_keys() {
        assert!(Settings::from_toml("batch = 3\n").is_err());
    }
}
