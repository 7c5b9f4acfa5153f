pub mod assets;
pub mod capital;
pub mod convert;
pub mod setup;
pub mod snapshot;
pub mod ui;
