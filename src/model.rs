//! Typed records and the derived datasets built from the two feeds.

use std::fmt;

use chrono::NaiveDateTime;
use serde::Serialize;

use crate::error::PipelineError;
use crate::regions::{self, NATIONAL_LABEL};

/// Header used for the case count in the ranking table.
pub const TOTAL_CASES_LABEL: &str = "Casi totali";

/// One reporting day for a scope (the whole country or one region).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyRecord {
    pub date: NaiveDateTime,
    pub total_cases: i64,
    pub swabs: i64,
    pub active_positive: i64,
    /// Day-over-day change of `active_positive`. Taken from the feed when it
    /// publishes the column, otherwise derived from consecutive records;
    /// always `Some` once the pipeline has run.
    pub active_positive_change: Option<i64>,
    pub deaths: i64,
    pub recovered: i64,
    /// Can be negative when the authority corrects earlier figures.
    pub new_positive: i64,
    pub home_isolation: i64,
    pub hospitalized_mild: i64,
    pub intensive_care: i64,
    /// `total_cases(t) / total_cases(t-1)`; 0 on the first day and whenever
    /// the ratio is not finite.
    pub growth_ratio: f64,
    /// `total_cases / swabs`, only present when requested.
    pub cases_per_swab: Option<f64>,
}

impl DailyRecord {
    /// Day-over-day growth as a percentage, as shown next to the new cases.
    pub fn growth_pct(&self) -> f64 {
        self.growth_ratio * 100.0 - 100.0
    }
}

/// A [`DailyRecord`] tagged with the region that reported it.
#[derive(Debug, Clone, PartialEq)]
pub struct RegionalRecord {
    pub region: String,
    pub lat: Option<f64>,
    pub long: Option<f64>,
    pub daily: DailyRecord,
}

/// Chronological national series, one record per date.
#[derive(Debug, Clone, Default)]
pub struct NationalSeries {
    records: Vec<DailyRecord>,
}

impl NationalSeries {
    pub(crate) fn new(records: Vec<DailyRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[DailyRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The most recent record.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyDataset`] when the feed had no rows.
    pub fn latest(&self) -> Result<&DailyRecord, PipelineError> {
        self.records.last().ok_or_else(|| PipelineError::EmptyDataset {
            scope: NATIONAL_LABEL.to_string(),
        })
    }
}

/// All regional records sorted by region name, then date.
///
/// Each region's records form one contiguous run, so a region's series is a
/// plain sub-slice.
#[derive(Debug, Clone, Default)]
pub struct RegionalTable {
    records: Vec<RegionalRecord>,
}

impl RegionalTable {
    /// `records` must already be in canonical order.
    pub(crate) fn new(records: Vec<RegionalRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[RegionalRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The series of one known region.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyDataset`] if `name` is not one of the
    /// known regions or the feed has no rows for it.
    pub fn region(&self, name: &str) -> Result<&[RegionalRecord], PipelineError> {
        let empty = || PipelineError::EmptyDataset {
            scope: name.to_string(),
        };
        if !regions::is_known(name) {
            return Err(empty());
        }

        let start = self.records.partition_point(|r| r.region.as_str() < name);
        let end = self.records.partition_point(|r| r.region.as_str() <= name);
        if start == end {
            return Err(empty());
        }
        Ok(&self.records[start..end])
    }

    /// One slice per region present, in canonical (alphabetical) order.
    pub fn by_region(&self) -> impl Iterator<Item = &[RegionalRecord]> {
        self.records.chunk_by(|a, b| a.region == b.region)
    }
}

/// One row of the leaderboard.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankingEntry {
    pub rank: usize,
    #[serde(rename = "regione")]
    pub region: String,
    #[serde(rename = "Casi totali")]
    pub total_cases: i64,
    pub date: NaiveDateTime,
    pub lat: Option<f64>,
    pub long: Option<f64>,
}

/// Latest cross-section of all regions, sorted by total cases, highest first.
#[derive(Debug, Clone, Default)]
pub struct RegionRanking {
    entries: Vec<RankingEntry>,
}

impl RegionRanking {
    pub(crate) fn new(entries: Vec<RankingEntry>) -> Self {
        Self { entries }
    }

    pub fn entries(&self) -> &[RankingEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Looks up a region's row by name.
    pub fn get(&self, region: &str) -> Option<&RankingEntry> {
        self.entries.iter().find(|e| e.region == region)
    }
}

/// Which series a view draws from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Scope {
    National,
    Region(String),
}

impl Scope {
    /// Maps a selection control value to a scope. `"Italia"` is the national
    /// scope; anything else names a region.
    pub fn parse(selection: &str) -> Self {
        let selection = selection.trim();
        if selection == NATIONAL_LABEL {
            Scope::National
        } else {
            Scope::Region(selection.to_string())
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Scope::National => f.write_str(NATIONAL_LABEL),
            Scope::Region(name) => f.write_str(name),
        }
    }
}

/// Figures of a scope's latest record, as shown in the overview panel.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Summary {
    pub scope: String,
    pub date: NaiveDateTime,
    pub last_updated: String,
    pub total_cases: i64,
    pub swabs: i64,
    pub active_positive: i64,
    pub deaths: i64,
    pub recovered: i64,
    pub new_positive: i64,
    pub growth_pct: f64,
    pub active_positive_change: i64,
    pub home_isolation: i64,
    pub hospitalized_mild: i64,
    pub intensive_care: i64,
}

impl Summary {
    pub(crate) fn from_record(scope: &Scope, record: &DailyRecord) -> Self {
        Self {
            scope: scope.to_string(),
            date: record.date,
            last_updated: format_last_updated(record.date),
            total_cases: record.total_cases,
            swabs: record.swabs,
            active_positive: record.active_positive,
            deaths: record.deaths,
            recovered: record.recovered,
            new_positive: record.new_positive,
            growth_pct: record.growth_pct(),
            active_positive_change: record.active_positive_change.unwrap_or(0),
            home_isolation: record.home_isolation,
            hospitalized_mild: record.hospitalized_mild,
            intensive_care: record.intensive_care,
        }
    }
}

/// Renders a feed timestamp as `DD/MM/YYYY ore HH:MM:SS`.
pub fn format_last_updated(date: NaiveDateTime) -> String {
    date.format("%d/%m/%Y ore %H:%M:%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn at(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 3, day)
            .unwrap()
            .and_hms_opt(18, 0, 0)
            .unwrap()
    }

    fn record(day: u32, total: i64) -> DailyRecord {
        DailyRecord {
            date: at(day),
            total_cases: total,
            swabs: 0,
            active_positive: 0,
            active_positive_change: Some(0),
            deaths: 0,
            recovered: 0,
            new_positive: 0,
            home_isolation: 0,
            hospitalized_mild: 0,
            intensive_care: 0,
            growth_ratio: 0.0,
            cases_per_swab: None,
        }
    }

    fn regional(region: &str, day: u32, total: i64) -> RegionalRecord {
        RegionalRecord {
            region: region.to_string(),
            lat: None,
            long: None,
            daily: record(day, total),
        }
    }

    #[test]
    fn test_format_last_updated() {
        let date = NaiveDate::from_ymd_opt(2020, 4, 5)
            .unwrap()
            .and_hms_opt(17, 3, 9)
            .unwrap();
        assert_eq!(format_last_updated(date), "05/04/2020 ore 17:03:09");
    }

    #[test]
    fn test_national_latest_on_empty_series() {
        let series = NationalSeries::default();
        match series.latest() {
            Err(PipelineError::EmptyDataset { scope }) => assert_eq!(scope, "Italia"),
            other => panic!("expected EmptyDataset, got {other:?}"),
        }
    }

    #[test]
    fn test_region_slice_is_contiguous_run() {
        let table = RegionalTable::new(vec![
            regional("Abruzzo", 1, 10),
            regional("Abruzzo", 2, 12),
            regional("Lazio", 1, 30),
            regional("Lazio", 2, 31),
            regional("Lazio", 3, 40),
            regional("Veneto", 1, 5),
        ]);

        let lazio = table.region("Lazio").unwrap();
        assert_eq!(lazio.len(), 3);
        assert!(lazio.iter().all(|r| r.region == "Lazio"));
        assert_eq!(table.region("Veneto").unwrap().len(), 1);
        assert_eq!(table.by_region().count(), 3);
    }

    #[test]
    fn test_region_slice_unknown_or_missing() {
        let table = RegionalTable::new(vec![regional("Lazio", 1, 30)]);
        assert!(matches!(
            table.region("Atlantide"),
            Err(PipelineError::EmptyDataset { .. })
        ));
        assert!(matches!(
            table.region("Molise"),
            Err(PipelineError::EmptyDataset { .. })
        ));
    }

    #[test]
    fn test_scope_parse() {
        assert_eq!(Scope::parse("Italia"), Scope::National);
        assert_eq!(Scope::parse(" Lombardia "), Scope::Region("Lombardia".into()));
        assert_eq!(Scope::Region("Lazio".into()).to_string(), "Lazio");
    }

    #[test]
    fn test_growth_pct() {
        let mut r = record(2, 150);
        r.growth_ratio = 1.5;
        assert!((r.growth_pct() - 50.0).abs() < 1e-9);
    }
}
