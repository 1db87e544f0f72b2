//! Load a tabular dataset, narrow it with a required time window plus
//! optional per-column filters, and export the subset as CSV or Parquet.

pub mod data;
pub mod state;
