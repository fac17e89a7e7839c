//! Arguments

// Imports
use {
	damrec::{
		formats::FileFormat,
		record::{AddrRange, Intervals},
	},
	damrec_util::units,
	std::path::PathBuf,
};

/// Arguments
#[derive(Debug)]
#[derive(clap::Parser)]
pub struct Args {
	/// Log file
	///
	/// Specifies a file to perform verbose logging to.
	/// You can use `RUST_LOG_FILE` to set filtering options
	#[clap(long = "log-file")]
	pub log_file: Option<PathBuf>,

	/// Whether to append to the log file
	#[clap(long = "log-file-append")]
	pub log_file_append: bool,

	/// Records file
	pub input_file: PathBuf,

	/// Input file format, sniffed when omitted
	#[clap(long = "format")]
	pub format: Option<FileFormat>,

	/// Monitoring intervals, as `<sample>,<aggr>,<update>` times.
	///
	/// Overrides the recorded intervals, for files that carry none
	#[clap(long = "intervals", value_parser = parse_intervals)]
	pub intervals: Option<Intervals>,

	/// Only keep regions within this address range (repeatable)
	#[clap(long = "address")]
	pub address: Vec<AddrRange>,

	/// Only keep regions of a size within these bounds
	#[clap(long = "sz-region", num_args = 2, value_names = ["MIN", "MAX"])]
	pub sz_region: Option<Vec<String>>,

	/// Only keep regions with an access rate within these bounds
	#[clap(long = "access-rate", num_args = 2, value_names = ["MIN", "MAX"])]
	pub access_rate: Option<Vec<String>>,

	/// Only keep regions with an age within these bounds
	#[clap(long = "age", num_args = 2, value_names = ["MIN", "MAX"])]
	pub age: Option<Vec<String>>,

	/// Aggregate snapshots over windows of this long
	#[clap(
		long = "aggregate-interval",
		value_parser = units::parse_time_ns,
		conflicts_with = "aggregate_count"
	)]
	pub aggregate_interval: Option<u64>,

	/// Aggregate snapshots over windows of this many
	#[clap(long = "aggregate-count")]
	pub aggregate_count: Option<usize>,

	/// Output file
	#[clap(long = "output")]
	pub output_file: Option<PathBuf>,

	/// Output file format
	#[clap(long = "output-format", requires = "output_file")]
	pub output_format: Option<FileFormat>,

	/// Binary format version to write
	#[clap(long = "format-version", default_value_t = 2)]
	pub format_version: i32,

	/// Print each region in the summary
	#[clap(long = "regions", conflicts_with = "output_file")]
	pub regions: bool,
}

/// Parses `--intervals` from `<sample>,<aggr>,<update>` times
fn parse_intervals(s: &str) -> Result<Intervals, units::ParseValueError> {
	let mut parts = s.splitn(3, ',');
	let mut next_time = move || units::parse_time_us(parts.next().unwrap_or(""));
	Ok(Intervals {
		sample_us: next_time()?,
		aggr_us:   next_time()?,
		update_us: next_time()?,
	})
}
