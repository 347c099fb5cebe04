//! Error type shared by the feed loader and the data preparation pipeline.

use std::fmt;

use thiserror::Error;

/// Which of the two upstream feeds a failure refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedKind {
    National,
    Regional,
}

impl fmt::Display for FeedKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FeedKind::National => f.write_str("national"),
            FeedKind::Regional => f.write_str("regional"),
        }
    }
}

/// Every way loading or preparing the datasets can fail.
///
/// None of these are recovered from inside the crate: they propagate to the
/// caller, which decides how to tell the user the data is unavailable.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The network request failed, timed out, returned a non-success status,
    /// or a local source could not be read.
    #[error("failed to fetch {source_ref}: {reason}")]
    Fetch { source_ref: String, reason: String },

    /// The document is not well-formed CSV or a cell could not be coerced.
    #[error("malformed {feed} feed{}: {reason}", line_suffix(.row))]
    Parse {
        feed: FeedKind,
        row: Option<u64>,
        reason: String,
    },

    /// A column needed by a later step is absent.
    #[error("{feed} feed is missing required column `{column}`")]
    Schema { feed: FeedKind, column: String },

    /// A requested slice (latest record, selected region) has no rows.
    #[error("no rows available for {scope}")]
    EmptyDataset { scope: String },
}

fn line_suffix(row: &Option<u64>) -> String {
    row.map(|r| format!(" at line {r}")).unwrap_or_default()
}

impl PipelineError {
    pub(crate) fn fetch(source_ref: &str, reason: impl fmt::Display) -> Self {
        PipelineError::Fetch {
            source_ref: source_ref.to_string(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn parse(feed: FeedKind, row: Option<u64>, reason: impl fmt::Display) -> Self {
        PipelineError::Parse {
            feed,
            row,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn from_csv(feed: FeedKind, err: csv::Error) -> Self {
        let row = err.position().map(|p| p.line());
        PipelineError::parse(feed, row, err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_message_includes_line_when_known() {
        let err = PipelineError::parse(FeedKind::Regional, Some(7), "bad integer");
        assert_eq!(err.to_string(), "malformed regional feed at line 7: bad integer");

        let err = PipelineError::parse(FeedKind::National, None, "unterminated quote");
        assert_eq!(err.to_string(), "malformed national feed: unterminated quote");
    }

    #[test]
    fn test_schema_message_names_column() {
        let err = PipelineError::Schema {
            feed: FeedKind::National,
            column: "totale_casi".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "national feed is missing required column `totale_casi`"
        );
    }
}
