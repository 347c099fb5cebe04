//! Data preparation pipeline.
//!
//! Turns the two raw feeds into the derived datasets consumed by every view.
//! Each step is a pure transformation; [`Pipeline::run`] applies them in
//! order and returns an immutable [`Dataset`].

use chrono::NaiveDateTime;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::error::{FeedKind, PipelineError};
use crate::model::{
    DailyRecord, NationalSeries, RankingEntry, RegionRanking, RegionalRecord, RegionalTable,
    Scope, Summary,
};
use crate::parser::{
    COL_LAT, COL_LONG, COL_REGION, COL_REGION_CODE, ParsedRow, REQUIRED_COLUMNS, RawTable,
};
use crate::regions;

/// Administrative and free-text columns that carry nothing for the views.
pub const NOISE_COLUMNS: &[&str] = &[
    "stato",
    "note",
    "note_it",
    "note_en",
    "note_test",
    "note_casi",
];

/// Optional derivations and columns to keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Compute `cases_per_swab` for every record.
    pub cases_per_swab: bool,
    /// Keep region codes and coordinates; the ranking falls back to the
    /// reference coordinates when they are dropped.
    pub keep_coordinates: bool,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            cases_per_swab: true,
            keep_coordinates: true,
        }
    }
}

/// Everything the presentation layer reads, built once per load.
#[derive(Debug, Clone)]
pub struct Dataset {
    national: NationalSeries,
    regional: RegionalTable,
    ranking: RegionRanking,
}

impl Dataset {
    pub fn national(&self) -> &NationalSeries {
        &self.national
    }

    pub fn regional(&self) -> &RegionalTable {
        &self.regional
    }

    pub fn ranking(&self) -> &RegionRanking {
        &self.ranking
    }

    /// Records of one scope, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyDataset`] for an unknown or absent region.
    pub fn series(&self, scope: &Scope) -> Result<Vec<&DailyRecord>, PipelineError> {
        match scope {
            Scope::National => Ok(self.national.records().iter().collect()),
            Scope::Region(name) => Ok(self
                .regional
                .region(name)?
                .iter()
                .map(|r| &r.daily)
                .collect()),
        }
    }

    /// `(date, growth_ratio)` pairs of a scope from its second day on; the
    /// first day has no prior value to compare with.
    pub fn growth_series(
        &self,
        scope: &Scope,
    ) -> Result<Vec<(NaiveDateTime, f64)>, PipelineError> {
        Ok(self
            .series(scope)?
            .into_iter()
            .skip(1)
            .map(|r| (r.date, r.growth_ratio))
            .collect())
    }

    /// Latest-record figures for the overview panel.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::EmptyDataset`] if the scope has no rows.
    pub fn summary(&self, scope: &Scope) -> Result<Summary, PipelineError> {
        let latest = match scope {
            Scope::National => self.national.latest()?,
            Scope::Region(name) => {
                let slice = self.regional.region(name)?;
                match slice.last() {
                    Some(r) => &r.daily,
                    None => {
                        return Err(PipelineError::EmptyDataset {
                            scope: name.clone(),
                        });
                    }
                }
            }
        };
        Ok(Summary::from_record(scope, latest))
    }

    /// The national feed's latest timestamp as `DD/MM/YYYY ore HH:MM:SS`.
    pub fn last_updated(&self) -> Result<String, PipelineError> {
        Ok(crate::model::format_last_updated(self.national.latest()?.date))
    }
}

/// Stateless runner for the preparation steps.
#[derive(Debug, Clone, Copy, Default)]
pub struct Pipeline {
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(options: PipelineOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> PipelineOptions {
        self.options
    }

    /// Builds every derived dataset from the two raw feeds.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Schema`] when a required column is missing and
    /// [`PipelineError::Parse`] when a cell cannot be coerced or the dates of
    /// a series are not strictly increasing.
    #[tracing::instrument(
        skip_all,
        fields(national_rows = national.len(), regional_rows = regional.len())
    )]
    pub fn run(&self, national: RawTable, regional: RawTable) -> Result<Dataset, PipelineError> {
        let national = prune_columns(national, self.options);
        let regional = prune_columns(regional, self.options);

        national.require(REQUIRED_COLUMNS)?;
        regional.require(REQUIRED_COLUMNS)?;
        regional.require(&[COL_REGION])?;

        let mut national_records: Vec<DailyRecord> = national
            .parse_rows()?
            .into_iter()
            .map(daily_record)
            .collect();
        check_chronological(FeedKind::National, national_records.iter().map(|r| r.date))?;

        let mut regional_records = regional
            .parse_rows()?
            .into_iter()
            .map(regional_record)
            .collect::<Result<Vec<_>, _>>()?;
        canonical_order(&mut regional_records);
        for run in regional_records.chunk_by(|a, b| a.region == b.region) {
            check_chronological(FeedKind::Regional, run.iter().map(|r| r.daily.date))?;
        }

        derive_series_columns(FeedKind::National, national_records.iter_mut())?;
        for run in regional_records.chunk_by_mut(|a, b| a.region == b.region) {
            derive_series_columns(FeedKind::Regional, run.iter_mut().map(|r| &mut r.daily))?;
        }

        if self.options.cases_per_swab {
            derive_cases_per_swab(national_records.iter_mut());
            derive_cases_per_swab(regional_records.iter_mut().map(|r| &mut r.daily));
        }

        let regional = RegionalTable::new(regional_records);
        let ranking = build_ranking(&regional);

        info!(
            national_records = national_records.len(),
            regional_records = regional.len(),
            regions = ranking.len(),
            "Datasets prepared"
        );

        Ok(Dataset {
            national: NationalSeries::new(national_records),
            regional,
            ranking,
        })
    }
}

/// Step 1: drops the columns no view reads. Absent columns are ignored.
pub fn prune_columns(table: RawTable, options: PipelineOptions) -> RawTable {
    let table = table.without_columns(NOISE_COLUMNS);
    if options.keep_coordinates {
        table
    } else {
        table.without_columns(&[COL_REGION_CODE, COL_LAT, COL_LONG])
    }
}

/// Step 2: sorts regional records by region name, then date.
pub fn canonical_order(records: &mut [RegionalRecord]) {
    records.sort_by(|a, b| {
        a.region
            .cmp(&b.region)
            .then_with(|| a.daily.date.cmp(&b.daily.date))
    });
}

/// `num / den`, or 0 when the result is NaN or infinite.
pub fn finite_ratio(num: f64, den: f64) -> f64 {
    let ratio = num / den;
    if ratio.is_finite() { ratio } else { 0.0 }
}

/// Step 3: growth ratio and active-positive change over one scope's records.
///
/// Callers pass a single scope at a time; the previous value never carries
/// over from another region.
///
/// # Errors
///
/// Returns [`PipelineError::Parse`] when a derived change does not fit in
/// an `i64`.
pub fn derive_series_columns<'a>(
    feed: FeedKind,
    records: impl IntoIterator<Item = &'a mut DailyRecord>,
) -> Result<(), PipelineError> {
    let mut previous: Option<(i64, i64)> = None;
    let mut derived_changes = 0usize;

    for record in records {
        record.growth_ratio = match previous {
            Some((prev_total, _)) if prev_total > 0 => {
                finite_ratio(record.total_cases as f64, prev_total as f64)
            }
            _ => 0.0,
        };

        if record.active_positive_change.is_none() {
            let change = match previous {
                Some((_, prev_active)) => record
                    .active_positive
                    .checked_sub(prev_active)
                    .ok_or_else(|| {
                        PipelineError::parse(
                            feed,
                            None,
                            format!("active positive change overflows on {}", record.date),
                        )
                    })?,
                None => 0,
            };
            record.active_positive_change = Some(change);
            derived_changes += 1;
        }

        previous = Some((record.total_cases, record.active_positive));
    }

    if derived_changes > 0 {
        debug!(derived_changes, "Active positive change derived from series");
    }
    Ok(())
}

/// Step 4: cases per swab, 0 where there were no swabs.
pub fn derive_cases_per_swab<'a>(records: impl IntoIterator<Item = &'a mut DailyRecord>) {
    for record in records {
        record.cases_per_swab = Some(finite_ratio(
            record.total_cases as f64,
            record.swabs as f64,
        ));
    }
}

/// Step 5: the latest record of every region, highest total first.
///
/// Ties keep canonical (alphabetical) order.
pub fn build_ranking(table: &RegionalTable) -> RegionRanking {
    let mut latest: Vec<&RegionalRecord> = table
        .by_region()
        .filter_map(|run| run.last())
        .collect();

    if let Some(newest) = latest.iter().map(|r| r.daily.date).max() {
        for stale in latest.iter().filter(|r| r.daily.date < newest) {
            warn!(
                region = %stale.region,
                date = %stale.daily.date,
                "Region has not reported the latest day"
            );
        }
    }

    latest.sort_by(|a, b| b.daily.total_cases.cmp(&a.daily.total_cases));

    let entries = latest
        .into_iter()
        .enumerate()
        .map(|(i, r)| {
            let reference = regions::find(&r.region);
            RankingEntry {
                rank: i + 1,
                region: r.region.clone(),
                total_cases: r.daily.total_cases,
                date: r.daily.date,
                lat: r.lat.or(reference.map(|g| g.lat)),
                long: r.long.or(reference.map(|g| g.long)),
            }
        })
        .collect();

    RegionRanking::new(entries)
}

fn daily_record(row: ParsedRow) -> DailyRecord {
    DailyRecord {
        date: row.date,
        total_cases: row.total_cases,
        swabs: row.swabs,
        active_positive: row.active_positive,
        active_positive_change: row.active_positive_change,
        deaths: row.deaths,
        recovered: row.recovered,
        new_positive: row.new_positive,
        home_isolation: row.home_isolation,
        hospitalized_mild: row.hospitalized_mild,
        intensive_care: row.intensive_care,
        growth_ratio: 0.0,
        cases_per_swab: None,
    }
}

fn regional_record(mut row: ParsedRow) -> Result<RegionalRecord, PipelineError> {
    let region = match row.region.take() {
        Some(name) if !name.is_empty() => name,
        _ => {
            return Err(PipelineError::parse(
                FeedKind::Regional,
                None,
                format!("row dated {} has no `{COL_REGION}`", row.date),
            ));
        }
    };
    if !regions::is_known(&region) {
        warn!(region = %region, "Region is not in the known list");
    }
    let (lat, long) = (row.lat, row.long);
    Ok(RegionalRecord {
        region,
        lat,
        long,
        daily: daily_record(row),
    })
}

fn check_chronological(
    feed: FeedKind,
    dates: impl Iterator<Item = NaiveDateTime>,
) -> Result<(), PipelineError> {
    let mut previous: Option<NaiveDateTime> = None;
    for date in dates {
        if let Some(prev) = previous
            && date <= prev
        {
            return Err(PipelineError::parse(
                feed,
                None,
                format!("dates not strictly increasing ({date} after {prev})"),
            ));
        }
        previous = Some(date);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_csv;

    const REGIONAL_HEADER: &str = "data,stato,codice_regione,denominazione_regione,lat,long,ricoverati_con_sintomi,terapia_intensiva,totale_ospedalizzati,isolamento_domiciliare,totale_positivi,variazione_totale_positivi,nuovi_positivi,dimessi_guariti,deceduti,totale_casi,tamponi,note_it,note_en";
    const NATIONAL_HEADER: &str = "data,stato,ricoverati_con_sintomi,terapia_intensiva,totale_ospedalizzati,isolamento_domiciliare,totale_positivi,variazione_totale_positivi,nuovi_positivi,dimessi_guariti,deceduti,totale_casi,tamponi,note_it,note_en";

    fn national_csv(totals: &[(u32, i64, i64)]) -> RawTable {
        let mut csv = format!("{NATIONAL_HEADER}\n");
        for (day, total, swabs) in totals {
            csv.push_str(&format!(
                "2020-03-{day:02}T17:00:00,ITA,1,1,2,3,5,,1,1,1,{total},{swabs},,\n"
            ));
        }
        parse_csv(FeedKind::National, csv.as_bytes()).unwrap()
    }

    fn regional_csv(rows: &[(&str, u32, i64)]) -> RawTable {
        let mut csv = format!("{REGIONAL_HEADER}\n");
        for (region, day, total) in rows {
            csv.push_str(&format!(
                "2020-03-{day:02}T17:00:00,ITA,1,{region},,,1,1,2,3,5,1,1,1,1,{total},10,,\n"
            ));
        }
        parse_csv(FeedKind::Regional, csv.as_bytes()).unwrap()
    }

    fn daily(day: u32, total: i64) -> DailyRecord {
        let row = national_csv(&[(day, total, 10)]).parse_rows().unwrap().remove(0);
        daily_record(row)
    }

    fn ratios(dataset: &Dataset, region: &str) -> Vec<f64> {
        dataset
            .series(&Scope::Region(region.to_string()))
            .unwrap()
            .iter()
            .map(|r| r.growth_ratio)
            .collect()
    }

    #[test]
    fn test_two_region_fixture() {
        // Source order is by date, as published upstream.
        let regional = regional_csv(&[
            ("Lazio", 1, 100),
            ("Veneto", 1, 200),
            ("Lazio", 2, 150),
            ("Veneto", 2, 190),
        ]);
        let dataset = Pipeline::default()
            .run(national_csv(&[(1, 300, 1000)]), regional)
            .unwrap();

        assert_eq!(ratios(&dataset, "Lazio"), vec![0.0, 1.5]);
        let veneto = ratios(&dataset, "Veneto");
        assert_eq!(veneto[0], 0.0);
        assert!((veneto[1] - 0.95).abs() < 1e-12);

        let ranking: Vec<_> = dataset
            .ranking()
            .entries()
            .iter()
            .map(|e| (e.region.as_str(), e.total_cases, e.rank))
            .collect();
        assert_eq!(ranking, vec![("Veneto", 190, 1), ("Lazio", 150, 2)]);
    }

    #[test]
    fn test_growth_ratio_does_not_cross_region_boundary() {
        let regional = regional_csv(&[
            ("Abruzzo", 1, 80),
            ("Abruzzo", 2, 100),
            ("Basilicata", 1, 50),
            ("Basilicata", 2, 75),
        ]);
        let dataset = Pipeline::default()
            .run(national_csv(&[(1, 1, 1)]), regional)
            .unwrap();

        let records = dataset.regional().records();
        assert_eq!(records[2].region, "Basilicata");
        assert_eq!(records[2].daily.growth_ratio, 0.0);
        assert_eq!(records[3].daily.growth_ratio, 1.5);
    }

    #[test]
    fn test_zero_denominators_yield_zero() {
        let dataset = Pipeline::default()
            .run(
                national_csv(&[(1, 0, 0), (2, 5, 0), (3, 10, 20)]),
                regional_csv(&[]),
            )
            .unwrap();

        let national = dataset.national().records();
        assert_eq!(national[0].growth_ratio, 0.0);
        assert_eq!(national[1].growth_ratio, 0.0);
        assert_eq!(national[2].growth_ratio, 2.0);
        assert_eq!(national[0].cases_per_swab, Some(0.0));
        assert_eq!(national[1].cases_per_swab, Some(0.0));
        assert_eq!(national[2].cases_per_swab, Some(0.5));
        assert!(
            national
                .iter()
                .all(|r| r.growth_ratio.is_finite() && r.cases_per_swab.unwrap().is_finite())
        );
    }

    #[test]
    fn test_cases_per_swab_is_optional() {
        let options = PipelineOptions {
            cases_per_swab: false,
            keep_coordinates: true,
        };
        let dataset = Pipeline::new(options)
            .run(national_csv(&[(1, 10, 20)]), regional_csv(&[]))
            .unwrap();
        assert_eq!(dataset.national().records()[0].cases_per_swab, None);
    }

    #[test]
    fn test_active_change_derived_when_not_published() {
        // The national fixture leaves `variazione_totale_positivi` empty.
        let csv = format!(
            "{NATIONAL_HEADER}\n\
             2020-03-01T17:00:00,ITA,1,1,2,3,40,,1,1,1,50,100,,\n\
             2020-03-02T17:00:00,ITA,1,1,2,3,55,,1,1,1,70,100,,\n"
        );
        let national = parse_csv(FeedKind::National, csv.as_bytes()).unwrap();
        let dataset = Pipeline::default().run(national, regional_csv(&[])).unwrap();

        let records = dataset.national().records();
        assert_eq!(records[0].active_positive_change, Some(0));
        assert_eq!(records[1].active_positive_change, Some(15));
    }

    #[test]
    fn test_ranking_has_one_row_per_region_and_is_sorted() {
        let mut rows = Vec::new();
        for (i, region) in regions::REGIONS.iter().enumerate() {
            rows.push((region.name, 1, 1000 + i as i64));
            rows.push((region.name, 2, 2000 + (i as i64 * 37) % 500));
        }
        let dataset = Pipeline::default()
            .run(national_csv(&[(1, 1, 1)]), regional_csv(&rows))
            .unwrap();

        let ranking = dataset.ranking();
        assert_eq!(ranking.len(), regions::REGION_COUNT);
        assert!(
            ranking
                .entries()
                .windows(2)
                .all(|w| w[0].total_cases > w[1].total_cases)
        );
        assert!(ranking.entries().iter().all(|e| e.date.format("%d").to_string() == "02"));
        // Coordinates come from the reference table when the feed leaves them empty.
        let lazio = ranking.get("Lazio").unwrap();
        assert_eq!(lazio.lat, regions::find("Lazio").map(|r| r.lat));
    }

    #[test]
    fn test_ranking_ties_keep_canonical_order() {
        let dataset = Pipeline::default()
            .run(
                national_csv(&[(1, 1, 1)]),
                regional_csv(&[("Umbria", 1, 10), ("Marche", 1, 10), ("Lazio", 1, 30)]),
            )
            .unwrap();
        let order: Vec<_> = dataset
            .ranking()
            .entries()
            .iter()
            .map(|e| e.region.as_str())
            .collect();
        assert_eq!(order, vec!["Lazio", "Marche", "Umbria"]);
    }

    #[test]
    fn test_dropping_coordinates_keeps_reference_positions() {
        let options = PipelineOptions {
            cases_per_swab: false,
            keep_coordinates: false,
        };
        let pruned = prune_columns(regional_csv(&[("Lazio", 1, 10)]), options);
        assert!(!pruned.has_column("lat"));
        assert!(!pruned.has_column("codice_regione"));
        assert!(!pruned.has_column("note_it"));
        assert_eq!(prune_columns(pruned.clone(), options), pruned);
    }

    #[test]
    fn test_missing_required_column_is_schema_error() {
        let regional =
            regional_csv(&[("Lazio", 1, 10)]).without_columns(&["denominazione_regione"]);
        let err = Pipeline::default()
            .run(national_csv(&[(1, 1, 1)]), regional)
            .unwrap_err();
        assert!(matches!(
            err,
            PipelineError::Schema {
                feed: FeedKind::Regional,
                ref column,
            } if column == "denominazione_regione"
        ));
    }

    #[test]
    fn test_duplicate_region_day_is_rejected() {
        let err = Pipeline::default()
            .run(
                national_csv(&[(1, 1, 1)]),
                regional_csv(&[("Lazio", 1, 10), ("Lazio", 1, 11)]),
            )
            .unwrap_err();
        assert!(matches!(err, PipelineError::Parse { feed: FeedKind::Regional, .. }));
    }

    #[test]
    fn test_out_of_order_national_row_is_rejected() {
        let err = Pipeline::default()
            .run(national_csv(&[(2, 20, 10), (1, 10, 10)]), regional_csv(&[]))
            .unwrap_err();
        match err {
            PipelineError::Parse { feed, reason, .. } => {
                assert_eq!(feed, FeedKind::National);
                assert!(reason.contains("not strictly increasing"), "{reason}");
            }
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_empty_region_name_is_rejected() {
        let err = Pipeline::default()
            .run(
                national_csv(&[(1, 1, 1)]),
                regional_csv(&[("Lazio", 1, 10), ("  ", 2, 12)]),
            )
            .unwrap_err();
        match err {
            PipelineError::Parse { feed, reason, .. } => {
                assert_eq!(feed, FeedKind::Regional);
                assert!(reason.contains("denominazione_regione"), "{reason}");
            }
            other => panic!("expected Parse error, got {other:?}"),
        }
    }

    #[test]
    fn test_derived_change_overflow_is_parse_error() {
        let mut records = vec![daily(1, 0), daily(2, 0)];
        records[0].active_positive = -2;
        records[1].active_positive = i64::MAX;

        let err = derive_series_columns(FeedKind::National, records.iter_mut()).unwrap_err();
        assert!(matches!(err, PipelineError::Parse { feed: FeedKind::National, .. }));
    }

    #[test]
    fn test_summary_of_empty_national_feed() {
        let dataset = Pipeline::default()
            .run(national_csv(&[]), regional_csv(&[]))
            .unwrap();
        assert!(matches!(
            dataset.summary(&Scope::National),
            Err(PipelineError::EmptyDataset { .. })
        ));
        assert!(dataset.last_updated().is_err());
    }

    #[test]
    fn test_summary_for_region() {
        let dataset = Pipeline::default()
            .run(
                national_csv(&[(1, 1, 1)]),
                regional_csv(&[("Lazio", 1, 100), ("Lazio", 2, 150)]),
            )
            .unwrap();

        let summary = dataset.summary(&Scope::parse("Lazio")).unwrap();
        assert_eq!(summary.scope, "Lazio");
        assert_eq!(summary.total_cases, 150);
        assert!((summary.growth_pct - 50.0).abs() < 1e-9);
        assert_eq!(summary.last_updated, "02/03/2020 ore 17:00:00");

        assert!(matches!(
            dataset.summary(&Scope::parse("Gondor")),
            Err(PipelineError::EmptyDataset { .. })
        ));
        assert_eq!(dataset.growth_series(&Scope::parse("Lazio")).unwrap().len(), 1);
    }

    #[test]
    fn test_finite_ratio() {
        assert_eq!(finite_ratio(1.0, 0.0), 0.0);
        assert_eq!(finite_ratio(0.0, 0.0), 0.0);
        assert_eq!(finite_ratio(f64::NAN, 2.0), 0.0);
        assert_eq!(finite_ratio(3.0, 2.0), 1.5);
    }
}
