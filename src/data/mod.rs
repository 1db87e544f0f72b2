/// Data layer: core types, loading, inference, filtering and export.
///
/// Architecture:
/// ```text
///  .parquet / .csv / .json / .jsonl
///        │
///        ▼
///   ┌──────────┐
///   │  loader   │  parse file → Dataset
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  infer    │  classify columns → Profiles (coerces datetime text)
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  filter   │  FilterSpec + Profiles → Predicate
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  engine   │  apply Predicate → FilteredSet
///   └──────────┘
///        │
///        ▼
///   ┌──────────┐
///   │  export   │  CSV / Parquet, zipped parts above the row threshold
///   └──────────┘
/// ```

pub mod engine;
pub mod error;
pub mod export;
pub mod filter;
pub mod infer;
pub mod loader;
pub mod model;

pub use error::{ExplorerError, ExplorerResult};
