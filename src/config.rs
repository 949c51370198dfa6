use serde::Deserialize;

/// Day-count upper bounds for each release-frequency bucket.
///
/// A median release gap of `n` days classifies into the first bucket whose
/// bound it does not exceed, so exact boundary values land in the tighter
/// (more frequent) bucket.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct FrequencyBoundaries {
    pub daily_max_days: i64,
    pub several_per_week_max_days: i64,
    pub weekly_max_days: i64,
    pub biweekly_max_days: i64,
    pub monthly_max_days: i64,
}

impl Default for FrequencyBoundaries {
    fn default() -> Self {
        Self {
            daily_max_days: 2,
            several_per_week_max_days: 5,
            weekly_max_days: 8,
            biweekly_max_days: 15,
            monthly_max_days: 33,
        }
    }
}

/// Externally supplied tuning for the analysis engine.
///
/// Nothing in here is hard-coded inside the reconciler or the statistics
/// engine; callers construct one (or load it from YAML) and pass it in.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnalyzerConfig {
    /// A podcast with no release within this many days is marked dormant.
    pub staleness_days: i64,
    pub boundaries: FrequencyBoundaries,
}

impl Default for AnalyzerConfig {
    fn default() -> Self {
        Self {
            staleness_days: 65,
            boundaries: FrequencyBoundaries::default(),
        }
    }
}

impl AnalyzerConfig {
    pub fn from_yaml(text: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = AnalyzerConfig::default();
        assert_eq!(config.staleness_days, 65);
        assert_eq!(config.boundaries.daily_max_days, 2);
        assert_eq!(config.boundaries.monthly_max_days, 33);
    }

    #[test]
    fn test_from_yaml_overrides() {
        let config = AnalyzerConfig::from_yaml(
            "staleness_days: 30\nboundaries:\n  weekly_max_days: 9\n",
        )
        .unwrap();
        assert_eq!(config.staleness_days, 30);
        assert_eq!(config.boundaries.weekly_max_days, 9);
        // untouched fields keep their defaults
        assert_eq!(config.boundaries.daily_max_days, 2);
    }

    #[test]
    fn test_from_yaml_empty_document_uses_defaults() {
        let config = AnalyzerConfig::from_yaml("{}").unwrap();
        assert_eq!(config, AnalyzerConfig::default());
    }
}
