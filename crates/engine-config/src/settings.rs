use crate::{error::ConfigError, job::CollectorSection};
use chrono::{DateTime, Utc};

pub const DEFAULT_BATCH_SIZE: usize = 100;
pub const DEFAULT_CONCURRENCY: usize = 10;
pub const DEFAULT_PAGE_SIZE: u64 = 100;

/// Validated collector options of one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CollectorSettings {
    pub batch_size: usize,
    pub concurrency: usize,
    pub page_size: u64,
    /// Fixed lower time bound. An incremental run replaces it with the
    /// stored watermark when one exists.
    pub since: Option<DateTime<Utc>>,
    pub incremental: bool,
}

impl Default for CollectorSettings {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            concurrency: DEFAULT_CONCURRENCY,
            page_size: DEFAULT_PAGE_SIZE,
            since: None,
            incremental: false,
        }
    }
}

impl CollectorSettings {
    /// Applies defaults and rejects zero sizes.
    pub fn from_section(section: &CollectorSection) -> Result<Self, ConfigError> {
        let settings = Self {
            batch_size: section.batch_size.unwrap_or(DEFAULT_BATCH_SIZE),
            concurrency: section.concurrency.unwrap_or(DEFAULT_CONCURRENCY),
            page_size: section.page_size.unwrap_or(DEFAULT_PAGE_SIZE),
            since: section.since,
            incremental: section.incremental,
        };

        for (name, value) in [
            ("batch_size", settings.batch_size as u64),
            ("concurrency", settings.concurrency as u64),
            ("page_size", settings.page_size),
        ] {
            if value == 0 {
                return Err(ConfigError::Invalid(format!(
                    "collector.{name} must be at least 1"
                )));
            }
        }

        Ok(settings)
    }

    /// Bound handed to the query builder: the watermark when running
    /// incrementally, otherwise the configured `since`.
    pub fn effective_since(&self, watermark: Option<DateTime<Utc>>) -> Option<DateTime<Utc>> {
        if self.incremental {
            watermark.or(self.since)
        } else {
            self.since
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_default_settings() {
        let settings = CollectorSettings::from_section(&CollectorSection::default()).unwrap();
        assert_eq!(settings, CollectorSettings::default());
        assert_eq!(settings.batch_size, 100);
        assert_eq!(settings.concurrency, 10);
        assert_eq!(settings.page_size, 100);
    }

    #[test]
    fn rejects_zero_values() {
        let section = CollectorSection {
            concurrency: Some(0),
            ..Default::default()
        };
        assert!(matches!(
            CollectorSettings::from_section(&section),
            Err(ConfigError::Invalid(msg)) if msg.contains("concurrency")
        ));
    }

    #[test]
    fn watermark_only_applies_to_incremental_runs() {
        let fixed = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let stored = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let mut settings = CollectorSettings {
            since: Some(fixed),
            ..Default::default()
        };
        assert_eq!(settings.effective_since(Some(stored)), Some(fixed));

        settings.incremental = true;
        assert_eq!(settings.effective_since(Some(stored)), Some(stored));
        assert_eq!(settings.effective_since(None), Some(fixed));
    }
}
