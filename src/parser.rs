//! CSV parser for the civil-protection feeds.
//!
//! A document is first read into a [`RawTable`] of named string columns, so
//! columns can be pruned and checked before any typing happens. Typed
//! records are then produced with the explicit coercion rules below:
//!
//! | column(s)                      | rule                                               |
//! |--------------------------------|----------------------------------------------------|
//! | `data`                         | `YYYY-MM-DDTHH:MM:SS`, space or bare date accepted |
//! | counts (`totale_casi`, ...)    | base-10 integer >= 0, empty cell is 0              |
//! | `nuovi_positivi`               | base-10 integer, may be negative, empty cell is 0  |
//! | `variazione_totale_positivi`   | optional, may be negative; derived when absent     |
//! | `lat`, `long`                  | optional float, empty cell is absent               |
//! | `denominazione_regione`        | trimmed string                                     |

use chrono::{NaiveDate, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord};
use serde::{Deserialize, Deserializer, de};
use tracing::debug;

use crate::error::{FeedKind, PipelineError};

pub const COL_DATE: &str = "data";
pub const COL_REGION: &str = "denominazione_regione";
pub const COL_TOTAL_CASES: &str = "totale_casi";
pub const COL_SWABS: &str = "tamponi";
pub const COL_ACTIVE_POSITIVE: &str = "totale_positivi";
pub const COL_ACTIVE_POSITIVE_CHANGE: &str = "variazione_totale_positivi";
pub const COL_DEATHS: &str = "deceduti";
pub const COL_RECOVERED: &str = "dimessi_guariti";
pub const COL_NEW_POSITIVE: &str = "nuovi_positivi";
pub const COL_HOME_ISOLATION: &str = "isolamento_domiciliare";
pub const COL_HOSPITALIZED_MILD: &str = "ricoverati_con_sintomi";
pub const COL_INTENSIVE_CARE: &str = "terapia_intensiva";
pub const COL_LAT: &str = "lat";
pub const COL_LONG: &str = "long";
pub const COL_REGION_CODE: &str = "codice_regione";

/// Columns every feed must carry after pruning.
pub const REQUIRED_COLUMNS: &[&str] = &[
    COL_DATE,
    COL_TOTAL_CASES,
    COL_SWABS,
    COL_ACTIVE_POSITIVE,
    COL_DEATHS,
    COL_RECOVERED,
    COL_NEW_POSITIVE,
    COL_HOME_ISOLATION,
    COL_HOSPITALIZED_MILD,
    COL_INTENSIVE_CARE,
];

/// A parsed CSV document: a header row plus untyped rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawTable {
    feed: FeedKind,
    headers: StringRecord,
    rows: Vec<StringRecord>,
}

impl RawTable {
    pub fn feed(&self) -> FeedKind {
        self.feed
    }

    pub fn headers(&self) -> impl Iterator<Item = &str> {
        self.headers.iter()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.headers.iter().any(|h| h == name)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Drops the named columns. Names that are not present are ignored, so
    /// pruning an already pruned table returns it unchanged.
    pub fn without_columns(self, names: &[&str]) -> RawTable {
        let keep: Vec<usize> = self
            .headers
            .iter()
            .enumerate()
            .filter(|(_, h)| !names.contains(h))
            .map(|(i, _)| i)
            .collect();

        if keep.len() == self.headers.len() {
            return self;
        }

        let project = |record: &StringRecord| -> StringRecord {
            let mut out: StringRecord = keep.iter().filter_map(|&i| record.get(i)).collect();
            out.set_position(record.position().cloned());
            out
        };

        RawTable {
            feed: self.feed,
            headers: project(&self.headers),
            rows: self.rows.iter().map(project).collect(),
        }
    }

    /// Checks that every listed column is present.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Schema`] naming the first missing column.
    pub fn require(&self, names: &[&str]) -> Result<(), PipelineError> {
        match names.iter().find(|n| !self.has_column(n)) {
            Some(missing) => Err(PipelineError::Schema {
                feed: self.feed,
                column: (*missing).to_string(),
            }),
            None => Ok(()),
        }
    }

    /// Coerces every row into a [`ParsedRow`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Parse`] on the first cell that does not follow
    /// its column's coercion rule.
    pub fn parse_rows(&self) -> Result<Vec<ParsedRow>, PipelineError> {
        self.rows
            .iter()
            .map(|record| {
                record
                    .deserialize::<ParsedRow>(Some(&self.headers))
                    .map_err(|e| PipelineError::from_csv(self.feed, e))
            })
            .collect()
    }
}

/// Reads a comma-separated document with a header row.
///
/// # Errors
///
/// Returns [`PipelineError::Parse`] if the document is not well-formed CSV
/// (bad UTF-8, ragged rows).
pub fn parse_csv(feed: FeedKind, bytes: &[u8]) -> Result<RawTable, PipelineError> {
    let mut reader = ReaderBuilder::new().has_headers(true).from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| PipelineError::from_csv(feed, e))?
        .iter()
        .map(str::trim)
        .collect::<StringRecord>();

    let rows = reader
        .records()
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| PipelineError::from_csv(feed, e))?;

    debug!(%feed, columns = headers.len(), rows = rows.len(), "Feed parsed");

    Ok(RawTable {
        feed,
        headers,
        rows,
    })
}

/// One feed row after column coercion, before any derived column exists.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ParsedRow {
    #[serde(rename = "data", deserialize_with = "timestamp")]
    pub date: NaiveDateTime,
    #[serde(rename = "denominazione_regione", default, deserialize_with = "region_name")]
    pub region: Option<String>,
    #[serde(rename = "totale_casi", deserialize_with = "count")]
    pub total_cases: i64,
    #[serde(rename = "tamponi", deserialize_with = "count")]
    pub swabs: i64,
    #[serde(rename = "totale_positivi", deserialize_with = "count")]
    pub active_positive: i64,
    #[serde(
        rename = "variazione_totale_positivi",
        default,
        deserialize_with = "optional_count"
    )]
    pub active_positive_change: Option<i64>,
    #[serde(rename = "deceduti", deserialize_with = "count")]
    pub deaths: i64,
    #[serde(rename = "dimessi_guariti", deserialize_with = "count")]
    pub recovered: i64,
    #[serde(rename = "nuovi_positivi", deserialize_with = "signed_count")]
    pub new_positive: i64,
    #[serde(rename = "isolamento_domiciliare", deserialize_with = "count")]
    pub home_isolation: i64,
    #[serde(rename = "ricoverati_con_sintomi", deserialize_with = "count")]
    pub hospitalized_mild: i64,
    #[serde(rename = "terapia_intensiva", deserialize_with = "count")]
    pub intensive_care: i64,
    #[serde(rename = "lat", default, deserialize_with = "optional_float")]
    pub lat: Option<f64>,
    #[serde(rename = "long", default, deserialize_with = "optional_float")]
    pub long: Option<f64>,
}

/// Parses the feed's ISO-8601 local timestamps.
pub fn parse_timestamp(raw: &str) -> Option<NaiveDateTime> {
    let raw = raw.trim();
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S"))
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(raw, "%Y-%m-%d")
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
}

fn parse_count(raw: &str) -> Result<Option<i64>, String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(Some(n));
    }
    // Some exports write integral counts as floats ("123.0").
    match raw.parse::<f64>() {
        Ok(f) if f.is_finite() && f.fract() == 0.0 => {
            // i64::MAX as f64 rounds up to 2^63, which is already out of range.
            if f >= i64::MIN as f64 && f < i64::MAX as f64 {
                Ok(Some(f as i64))
            } else {
                Err(format!("count `{raw}` is out of range"))
            }
        }
        _ => Err(format!("expected an integer count, found `{raw}`")),
    }
}

fn parse_non_negative(raw: &str) -> Result<Option<i64>, String> {
    match parse_count(raw)? {
        Some(n) if n < 0 => Err(format!("count `{}` must not be negative", raw.trim())),
        n => Ok(n),
    }
}

fn timestamp<'de, D: Deserializer<'de>>(d: D) -> Result<NaiveDateTime, D::Error> {
    let raw = String::deserialize(d)?;
    parse_timestamp(&raw)
        .ok_or_else(|| de::Error::custom(format!("invalid timestamp `{}`", raw.trim())))
}

fn count<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let raw = String::deserialize(d)?;
    parse_non_negative(&raw)
        .map(|n| n.unwrap_or(0))
        .map_err(de::Error::custom)
}

fn signed_count<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
    let raw = String::deserialize(d)?;
    parse_count(&raw)
        .map(|n| n.unwrap_or(0))
        .map_err(de::Error::custom)
}

fn optional_count<'de, D: Deserializer<'de>>(d: D) -> Result<Option<i64>, D::Error> {
    let raw = String::deserialize(d)?;
    parse_count(&raw).map_err(de::Error::custom)
}

fn optional_float<'de, D: Deserializer<'de>>(d: D) -> Result<Option<f64>, D::Error> {
    let raw = String::deserialize(d)?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| de::Error::custom(format!("expected a coordinate, found `{raw}`")))
}

fn region_name<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    let raw = String::deserialize(d)?;
    Ok(Some(raw.trim().to_string()))
}
