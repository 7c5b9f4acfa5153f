//! Valuation core: rate caching, conversion, asset projection and capital

pub mod assets;
pub mod cache;
pub mod capital;
pub mod config;
pub mod converter;
pub mod currency;
pub mod entries;
pub mod error;
pub mod history;
pub mod log;
pub mod model;
pub mod rates;
pub mod snapshots;

// Re-export main types for cleaner imports
pub use assets::{AssetValuationStore, SlotChange};
pub use cache::RateCache;
pub use capital::{CapitalGrowth, CapitalReport, CapitalSnapshotService, SkippedAsset};
pub use converter::UsdPivotConverter;
pub use currency::CurrencyConverter;
pub use error::ValuationError;
pub use rates::{RateKind, RateSource, RateTable};
