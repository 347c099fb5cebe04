//! Presentation of the prepared datasets.
//!
//! Supports plain-text panels, JSON printing, and CSV export (optionally
//! gzip-compressed) of every derived table.

use std::fmt::Write as _;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::NaiveDateTime;
use csv::WriterBuilder;
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use tracing::{debug, info};

use crate::model::{DailyRecord, RegionRanking, RegionalRecord, Summary, TOTAL_CASES_LABEL};
use crate::pipeline::Dataset;

/// Prints a value as pretty JSON on stdout.
pub fn print_json(value: &impl Serialize) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// The overview panel of a scope.
pub fn render_summary(summary: &Summary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Overview {}", summary.scope);
    let _ = writeln!(out, "Ultimo aggiornamento: {}", summary.last_updated);
    let _ = writeln!(out);
    let _ = writeln!(out, "Casi totali:      {}", summary.total_cases);
    let _ = writeln!(out, "Tamponi:          {}", summary.swabs);
    let _ = writeln!(
        out,
        "Totale positivi:  {} ({:+})",
        summary.active_positive, summary.active_positive_change
    );
    let _ = writeln!(out, "Deceduti:         {}", summary.deaths);
    let _ = writeln!(out, "Guariti:          {}", summary.recovered);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "Oggi {} nuovi casi ({:+.2}%)",
        summary.new_positive, summary.growth_pct
    );
    let _ = writeln!(out);
    let _ = writeln!(out, "Isolamento domiciliare: {}", summary.home_isolation);
    let _ = writeln!(out, "Ricoverati generici:    {}", summary.hospitalized_mild);
    let _ = writeln!(out, "Terapia intensiva:      {}", summary.intensive_care);
    out
}

/// The leaderboard, optionally cut to the first `limit` rows.
pub fn render_ranking(ranking: &RegionRanking, limit: Option<usize>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{:>3}  {:<24}{:>12}", "#", "Regione", TOTAL_CASES_LABEL);
    for entry in ranking.entries().iter().take(limit.unwrap_or(usize::MAX)) {
        let _ = writeln!(
            out,
            "{:>3}  {:<24}{:>12}",
            entry.rank, entry.region, entry.total_cases
        );
    }
    out
}

/// One line per day with the figures the charts plot.
pub fn render_series(records: &[&DailyRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<12}{:>12}{:>12}{:>10}{:>10}{:>12}{:>10}{:>12}",
        "data", "casi", "tamponi", "nuovi", "crescita", "positivi", "deceduti", "guariti"
    );
    for (i, r) in records.iter().enumerate() {
        // The first day has no growth ratio to show.
        let growth = if i == 0 {
            "-".to_string()
        } else {
            format!("{:.3}", r.growth_ratio)
        };
        let _ = writeln!(
            out,
            "{:<12}{:>12}{:>12}{:>10}{:>10}{:>12}{:>10}{:>12}",
            r.date.format("%d/%m/%Y"),
            r.total_cases,
            r.swabs,
            r.new_positive,
            growth,
            r.active_positive,
            r.deaths,
            r.recovered
        );
    }
    out
}

/// Flat CSV row for a regional record.
#[derive(Serialize)]
struct RegionalRow<'a> {
    region: &'a str,
    lat: Option<f64>,
    long: Option<f64>,
    date: NaiveDateTime,
    total_cases: i64,
    swabs: i64,
    active_positive: i64,
    active_positive_change: Option<i64>,
    deaths: i64,
    recovered: i64,
    new_positive: i64,
    home_isolation: i64,
    hospitalized_mild: i64,
    intensive_care: i64,
    growth_ratio: f64,
    cases_per_swab: Option<f64>,
}

impl<'a> From<&'a RegionalRecord> for RegionalRow<'a> {
    fn from(r: &'a RegionalRecord) -> Self {
        let d = &r.daily;
        Self {
            region: &r.region,
            lat: r.lat,
            long: r.long,
            date: d.date,
            total_cases: d.total_cases,
            swabs: d.swabs,
            active_positive: d.active_positive,
            active_positive_change: d.active_positive_change,
            deaths: d.deaths,
            recovered: d.recovered,
            new_positive: d.new_positive,
            home_isolation: d.home_isolation,
            hospitalized_mild: d.hospitalized_mild,
            intensive_care: d.intensive_care,
            growth_ratio: d.growth_ratio,
            cases_per_swab: d.cases_per_swab,
        }
    }
}

/// An export file, optionally gzip compressed.
enum Output<W: Write> {
    Plain(W),
    Gzip(GzEncoder<W>),
}

impl<W: Write> Output<W> {
    fn new(inner: W, gzip: bool) -> Self {
        if gzip {
            Output::Gzip(GzEncoder::new(inner, Compression::default()))
        } else {
            Output::Plain(inner)
        }
    }

    /// Flushes everything, including the gzip trailer, and returns the inner writer.
    fn finish(self) -> io::Result<W> {
        match self {
            Output::Plain(mut inner) => {
                inner.flush()?;
                Ok(inner)
            }
            Output::Gzip(encoder) => {
                let mut inner = encoder.finish()?;
                inner.flush()?;
                Ok(inner)
            }
        }
    }
}

impl<W: Write> Write for Output<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Output::Plain(inner) => inner.write(buf),
            Output::Gzip(encoder) => encoder.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Output::Plain(inner) => inner.flush(),
            Output::Gzip(encoder) => encoder.flush(),
        }
    }
}

/// Opens `path` for writing, adding `.gz` and a gzip encoder when asked.
fn create_output(path: &Path, gzip: bool) -> Result<(PathBuf, Output<File>)> {
    let path = if gzip {
        let mut name = path.as_os_str().to_owned();
        name.push(".gz");
        PathBuf::from(name)
    } else {
        path.to_path_buf()
    };
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    Ok((path, Output::new(file, gzip)))
}

fn finish(sink: Output<File>, path: &Path) -> Result<()> {
    sink.finish()
        .and_then(|file| file.sync_all())
        .with_context(|| format!("finishing {}", path.display()))
}

/// Writes `rows` as a CSV file with a header row.
///
/// Returns the path actually written (with `.gz` appended when compressed).
pub fn write_csv<T: Serialize>(
    path: &Path,
    rows: impl IntoIterator<Item = T>,
    gzip: bool,
) -> Result<PathBuf> {
    let (path, sink) = create_output(path, gzip)?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(sink);

    let mut count = 0usize;
    for row in rows {
        writer.serialize(row)?;
        count += 1;
    }
    let sink = writer
        .into_inner()
        .map_err(|e| anyhow::anyhow!("flushing {}: {}", path.display(), e.error()))?;
    finish(sink, &path)?;

    debug!(path = %path.display(), rows = count, "CSV written");
    Ok(path)
}

/// Writes `value` as pretty JSON.
pub fn write_json(path: &Path, value: &impl Serialize, gzip: bool) -> Result<PathBuf> {
    let (path, mut sink) = create_output(path, gzip)?;
    serde_json::to_writer_pretty(&mut sink, value)?;
    finish(sink, &path)?;
    Ok(path)
}


#[derive(Serialize)]
struct Overview<'a> {
    last_updated: &'a str,
    national: &'a Summary,
}

/// Exports every derived table of `dataset` into `dir`.
///
/// Files: `national.csv`, `regions.csv`, `ranking.csv`, `summary.json`.
pub fn export_dataset(dataset: &Dataset, dir: &Path, gzip: bool) -> Result<Vec<PathBuf>> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let summary = dataset.summary(&crate::model::Scope::National)?;
    let written = vec![
        write_csv(&dir.join("national.csv"), dataset.national().records(), gzip)?,
        write_csv(
            &dir.join("regions.csv"),
            dataset.regional().records().iter().map(RegionalRow::from),
            gzip,
        )?,
        write_csv(&dir.join("ranking.csv"), dataset.ranking().entries(), gzip)?,
        write_json(
            &dir.join("summary.json"),
            &Overview {
                last_updated: &summary.last_updated,
                national: &summary,
            },
            gzip,
        )?,
    ];

    info!(dir = %dir.display(), files = written.len(), gzip, "Datasets exported");
    Ok(written)
}
