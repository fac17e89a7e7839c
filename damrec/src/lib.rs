//! Memory-access monitoring records (`damrec`)

// Modules
pub mod aggregate;
pub mod filter;
pub mod formats;
pub mod heatmap;
pub mod record;

// Exports
pub use self::{
	aggregate::WindowSpec,
	filter::AccessPattern,
	formats::FileFormat,
	heatmap::HeatGrid,
	record::{Intervals, Record, Region, Snapshot},
};
