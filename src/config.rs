use std::fmt;
use std::str::FromStr;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Calendar month, serialized as `"YYYY-MM"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    year: i32,
    month: u32,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self, ModelError> {
        if !(1..=12).contains(&month) {
            return Err(ModelError::Configuration(format!(
                "month must be within 1..=12, got {month}"
            )));
        }
        Ok(Self { year, month })
    }

    pub fn year(self) -> i32 {
        self.year
    }

    /// Calendar month, 1 = January.
    pub fn month(self) -> u32 {
        self.month
    }

    fn index(self) -> i64 {
        self.year as i64 * 12 + (self.month as i64 - 1)
    }

    fn from_index(index: i64) -> Self {
        Self {
            year: index.div_euclid(12) as i32,
            month: index.rem_euclid(12) as u32 + 1,
        }
    }

    pub fn next(self) -> Self {
        Self::from_index(self.index() + 1)
    }

    pub fn add_months(self, months: u32) -> Self {
        Self::from_index(self.index() + months as i64)
    }

    /// Number of months from `self` up to (not including) `end`; zero when `end <= self`.
    pub fn months_until(self, end: YearMonth) -> u32 {
        (end.index() - self.index()).max(0) as u32
    }

    pub fn days(self) -> u32 {
        let first = NaiveDate::from_ymd_opt(self.year, self.month, 1);
        let next = self.next();
        let following = NaiveDate::from_ymd_opt(next.year, next.month, 1);
        match (first, following) {
            (Some(a), Some(b)) => (b - a).num_days() as u32,
            _ => 30,
        }
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year, self.month)
    }
}

impl FromStr for YearMonth {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        let (year, month) = trimmed.split_once('-').ok_or_else(|| {
            ModelError::Configuration(format!("expected YYYY-MM, got '{trimmed}'"))
        })?;
        let year = year
            .parse::<i32>()
            .map_err(|_| ModelError::Configuration(format!("bad year in '{trimmed}'")))?;
        let month = month
            .parse::<u32>()
            .map_err(|_| ModelError::Configuration(format!("bad month in '{trimmed}'")))?;
        YearMonth::new(year, month)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<YearMonth> for String {
    fn from(value: YearMonth) -> Self {
        value.to_string()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DietLimitingNutrient {
    Energy,
    Protein,
    /// Whichever of energy or protein gives the lower sufficiency ratio.
    MostLimiting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PixelErrorPolicy {
    Abort,
    Skip,
}

fn default_grazing_enabled() -> bool {
    true
}

fn default_limiting_nutrient() -> DietLimitingNutrient {
    DietLimitingNutrient::Energy
}

fn default_on_pixel_error() -> PixelErrorPolicy {
    PixelErrorPolicy::Abort
}

fn default_chunk_size() -> usize {
    4096
}

/// Options controlling one simulation run. Months form the half-open range
/// `start_month..end_month`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    pub start_month: YearMonth,
    pub end_month: YearMonth,
    #[serde(default = "default_grazing_enabled")]
    pub grazing_enabled: bool,
    #[serde(default = "default_limiting_nutrient")]
    pub diet_limiting_nutrient: DietLimitingNutrient,
    #[serde(default = "default_on_pixel_error")]
    pub on_pixel_error: PixelErrorPolicy,
    /// Clamp out-of-range climate into bounds instead of rejecting the pixel-month.
    #[serde(default)]
    pub clamp_climate: bool,
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Write `state_*` bands every N months; 0 disables checkpoints.
    #[serde(default)]
    pub checkpoint_interval_months: u32,
    /// Write every state variable band for every month.
    #[serde(default)]
    pub save_state_bands: bool,
    /// Standing biomass (kg/ha, live + standing dead) that grazing must leave behind.
    #[serde(default)]
    pub management_threshold: f64,
}

impl RunConfig {
    pub fn new(start_month: YearMonth, end_month: YearMonth) -> Self {
        Self {
            start_month,
            end_month,
            grazing_enabled: default_grazing_enabled(),
            diet_limiting_nutrient: default_limiting_nutrient(),
            on_pixel_error: default_on_pixel_error(),
            clamp_climate: false,
            chunk_size: default_chunk_size(),
            checkpoint_interval_months: 0,
            save_state_bands: false,
            management_threshold: 0.0,
        }
    }

    pub fn total_months(&self) -> u32 {
        self.start_month.months_until(self.end_month)
    }

    pub fn validate(&self) -> Result<(), ModelError> {
        if self.end_month < self.start_month {
            return Err(ModelError::Configuration(format!(
                "end_month {} precedes start_month {}",
                self.end_month, self.start_month
            )));
        }
        if self.chunk_size == 0 {
            return Err(ModelError::Configuration(
                "chunk_size must be greater than zero".into(),
            ));
        }
        if !self.management_threshold.is_finite() || self.management_threshold < 0.0 {
            return Err(ModelError::Configuration(
                "management_threshold must be a non-negative number".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn year_month_parses_and_formats() {
        let ym: YearMonth = "2016-03".parse().unwrap();
        assert_eq!(ym.year(), 2016);
        assert_eq!(ym.month(), 3);
        assert_eq!(ym.to_string(), "2016-03");
        assert!("2016-13".parse::<YearMonth>().is_err());
        assert!("2016".parse::<YearMonth>().is_err());
    }

    #[test]
    fn year_month_arithmetic_wraps_years() {
        let dec = YearMonth::new(2016, 12).unwrap();
        assert_eq!(dec.next(), YearMonth::new(2017, 1).unwrap());
        assert_eq!(dec.add_months(14), YearMonth::new(2018, 2).unwrap());
        assert_eq!(YearMonth::new(2016, 1).unwrap().months_until(dec), 11);
        assert_eq!(dec.months_until(YearMonth::new(2016, 1).unwrap()), 0);
    }

    #[test]
    fn days_follow_calendar() {
        assert_eq!(YearMonth::new(2016, 2).unwrap().days(), 29);
        assert_eq!(YearMonth::new(2017, 2).unwrap().days(), 28);
        assert_eq!(YearMonth::new(2017, 12).unwrap().days(), 31);
    }

    #[test]
    fn run_config_defaults_from_yaml() {
        let yaml = "start_month: \"2016-01\"\nend_month: \"2017-01\"\n";
        let config: RunConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(config.grazing_enabled);
        assert_eq!(config.diet_limiting_nutrient, DietLimitingNutrient::Energy);
        assert_eq!(config.on_pixel_error, PixelErrorPolicy::Abort);
        assert_eq!(config.total_months(), 12);
        config.validate().unwrap();
    }

    #[test]
    fn reversed_range_is_rejected() {
        let config = RunConfig::new(
            YearMonth::new(2017, 1).unwrap(),
            YearMonth::new(2016, 1).unwrap(),
        );
        assert!(matches!(
            config.validate(),
            Err(ModelError::Configuration(_))
        ));
    }
}
