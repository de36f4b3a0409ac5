use chrono::{Datelike, NaiveDate};
use schemars::JsonSchema;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Tax year running 1 March to the end of February.
///
/// The value is the calendar year the tax year *starts* in, so `TaxYear(2024)`
/// covers 2024-03-01 to 2025-02-28 and is labelled "2024/2025".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaxYear(pub i32);

impl TaxYear {
    /// Resolve the tax year a date falls in
    pub fn from_date(date: NaiveDate) -> Self {
        let year = date.year();
        // January and February still belong to the year that started last March
        if date.month() >= 3 {
            TaxYear(year)
        } else {
            TaxYear(year - 1)
        }
    }

    pub fn start_year(&self) -> i32 {
        self.0
    }

    /// 1 March of the start year
    pub fn start_date(&self) -> NaiveDate {
        NaiveDate::from_ymd_opt(self.0, 3, 1).unwrap_or(NaiveDate::MIN)
    }

    /// Last day of February in the following calendar year
    pub fn end_date(&self) -> NaiveDate {
        let end_year = self.0 + 1;
        let day = if is_leap_year(end_year) { 29 } else { 28 };
        NaiveDate::from_ymd_opt(end_year, 2, day).unwrap_or(NaiveDate::MAX)
    }

    pub fn next(&self) -> TaxYear {
        TaxYear(self.0 + 1)
    }

    /// "YYYY/YYYY" label, e.g. "2024/2025"
    pub fn label(&self) -> String {
        format!("{:04}/{:04}", self.0, self.0 + 1)
    }

    pub fn contains(&self, date: NaiveDate) -> bool {
        TaxYear::from_date(date) == *self
    }
}

/// Gregorian leap year rule
pub fn is_leap_year(year: i32) -> bool {
    year % 4 == 0 && (year % 100 != 0 || year % 400 == 0)
}

impl std::fmt::Display for TaxYear {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tax year '{0}': expected YYYY or YYYY/YYYY")]
pub struct ParseTaxYearError(String);

impl FromStr for TaxYear {
    type Err = ParseTaxYearError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTaxYearError(s.to_string());
        let s = s.trim();
        match s.split_once('/') {
            Some((start, end)) => {
                let start: i32 = start.trim().parse().map_err(|_| err())?;
                let end: i32 = end.trim().parse().map_err(|_| err())?;
                if end != start + 1 {
                    return Err(err());
                }
                Ok(TaxYear(start))
            }
            None => s.parse().map(TaxYear).map_err(|_| err()),
        }
    }
}

impl Serialize for TaxYear {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.label())
    }
}

impl<'de> Deserialize<'de> for TaxYear {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

impl JsonSchema for TaxYear {
    fn schema_name() -> String {
        "TaxYear".to_string()
    }

    fn json_schema(gen: &mut schemars::gen::SchemaGenerator) -> schemars::schema::Schema {
        String::json_schema(gen)
    }
}
