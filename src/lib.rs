pub mod config;
pub mod error;
pub mod fetch;
pub mod model;
pub mod output;
pub mod parser;
pub mod pipeline;
pub mod regions;

pub use error::{FeedKind, PipelineError};
pub use pipeline::{Dataset, Pipeline, PipelineOptions};
