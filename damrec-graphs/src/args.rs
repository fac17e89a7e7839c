//! Arguments

// Imports
use {
	damrec::{formats::FileFormat, record::AddrRange},
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

	/// Sub-command
	#[command(subcommand)]
	pub sub_cmd: SubCmd,
}

/// Sub-command
#[derive(Debug, clap::Subcommand)]
pub enum SubCmd {
	#[clap(name = "heatmap")]
	Heatmap(Heatmap),

	#[clap(name = "wss")]
	Wss(Wss),
}

/// Renders an access heatmap
#[derive(Debug, clap::Args)]
pub struct Heatmap {
	/// Input
	pub input_file: PathBuf,

	/// Input file format, sniffed when omitted
	#[clap(long = "format")]
	pub format: Option<FileFormat>,

	/// Time range to render, defaulted from the data
	#[clap(long = "time-range", num_args = 2, value_names = ["START", "END"])]
	pub time_range: Option<Vec<String>>,

	/// Address range to render, defaulted from the data
	#[clap(long = "addr-range")]
	pub addr_range: Option<AddrRange>,

	/// Grid resolution, as time and space cell counts
	#[clap(long = "resol", num_args = 2, value_names = ["TIME", "SPACE"], default_values_t = [40, 80])]
	pub resol: Vec<usize>,

	/// Color set for terminal and image output
	#[clap(long = "colorset", value_enum, default_value = "gray")]
	pub colorset: Colorset,

	/// Print the raw cell triples instead of rendering
	#[clap(long = "raw")]
	pub raw: bool,

	/// Output
	#[clap(flatten)]
	pub output: Output,
}

/// Reports the working-set size distribution
#[derive(Debug, clap::Args)]
pub struct Wss {
	/// Input
	pub input_file: PathBuf,

	/// Input file format, sniffed when omitted
	#[clap(long = "format")]
	pub format: Option<FileFormat>,

	/// Minimum access samples for a region to count as part of the set
	#[clap(long = "access-thres", default_value_t = 1)]
	pub access_thres: u64,

	/// Output
	#[clap(flatten)]
	pub output: Output,
}

/// Heatmap color sets
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[derive(clap::ValueEnum)]
pub enum Colorset {
	Gray,
	Flame,
	Emotion,
}

/// Output
#[derive(Debug, clap::Args)]
pub struct Output {
	/// Interactive mode
	#[clap(long = "interactive")]
	pub interactive: bool,

	/// Output file
	#[clap(short = 'o', long = "output", group = "output-file")]
	pub file: Option<PathBuf>,

	/// Output file width
	#[clap(long = "output-width", requires = "output-file", default_value_t = 640)]
	pub width: u32,

	/// Output file height
	#[clap(long = "output-height", requires = "output-file", default_value_t = 480)]
	pub height: u32,
}
