//! Monitoring record inspection and conversion (`damrec`)

// Modules
mod args;

// Imports
use {
	self::args::Args,
	anyhow::Context,
	clap::Parser,
	damrec::{
		filter::{self, AccessPattern},
		formats::{self, record_file, FileFormat},
		record::{AddrRange, Age, NrAccesses, Record, Snapshot},
		WindowSpec,
	},
	damrec_util::{logger, units},
	std::{fmt, fs},
};

fn main() -> Result<(), anyhow::Error> {
	// Get arguments
	let args = Args::parse();
	logger::pre_init::debug(format!("Args: {args:?}"));

	// Initialize logging
	logger::init(args.log_file.as_deref(), args.log_file_append);

	// Read the records
	let mut records = formats::decode_file(&args.input_file, args.format).context("Unable to read records file")?;
	tracing::debug!(records = records.len(), "Decoded records");

	// Apply the intervals override
	if let Some(intervals) = args.intervals {
		for record in &mut records {
			record.intervals = Some(intervals);
		}
	}

	// Filter by address, then by access pattern
	if !args.address.is_empty() {
		let ranges = self::sorted_disjoint_ranges(&args.address)?;
		filter::filter_records_by_address(&mut records, &ranges);
	}
	if let Some(pattern) = self::access_pattern(&args)? {
		for record in &mut records {
			filter::filter_by_pattern(record, &pattern);
		}
	}

	// Aggregate snapshots
	let window = match (args.aggregate_interval, args.aggregate_count) {
		(Some(window_ns), _) => Some(WindowSpec::Time(window_ns)),
		(None, Some(count)) => Some(WindowSpec::Count(count)),
		(None, None) => None,
	};
	if let Some(window) = window {
		for record in &mut records {
			record.aggregate_snapshots(window);
		}
	}

	// Write the records back out, or summarize them
	match &args.output_file {
		Some(output_file) => {
			let format = args.output_format.unwrap_or(FileFormat::Json);
			match format {
				// The binary format is the only versioned one
				FileFormat::RecordBinary if args.format_version != 2 => {
					let bytes = record_file::encode_with_version(&records, args.format_version)
						.context("Unable to encode records")?;
					fs::write(output_file, bytes).context("Unable to write output file")?;
				},
				_ => formats::encode_to_file(&records, format, output_file).context("Unable to write output file")?,
			}
			tracing::info!(?output_file, %format, "Wrote records");
		},
		None => self::print_summary(&records, args.regions),
	}

	Ok(())
}

/// Sorts `ranges` and checks they are disjoint
fn sorted_disjoint_ranges(ranges: &[AddrRange]) -> Result<Vec<AddrRange>, anyhow::Error> {
	let mut ranges = ranges.to_vec();
	ranges.sort_by_key(|range| range.start);
	for pair in ranges.windows(2) {
		anyhow::ensure!(
			pair[0].end <= pair[1].start,
			"Address ranges {:#x}-{:#x} and {:#x}-{:#x} overlap",
			pair[0].start,
			pair[0].end,
			pair[1].start,
			pair[1].end,
		);
	}
	Ok(ranges)
}

/// Builds the access pattern from the filter arguments, if any are given
fn access_pattern(args: &Args) -> Result<Option<AccessPattern>, anyhow::Error> {
	if args.sz_region.is_none() && args.access_rate.is_none() && args.age.is_none() {
		return Ok(None);
	}

	let mut pattern = AccessPattern::default();
	if let Some(bounds) = &args.sz_region {
		pattern.sz_bytes = self::parse_bounds(bounds, units::parse_sz_bytes).context("Unable to parse `--sz-region`")?;
	}
	if let Some(bounds) = &args.access_rate {
		let (min, max) = self::parse_bounds(bounds, units::parse_percent).context("Unable to parse `--access-rate`")?;
		pattern.nr_accesses = (NrAccesses::from_percent(min), NrAccesses::from_percent(max));
	}
	if let Some(bounds) = &args.age {
		let (min, max) = self::parse_bounds(bounds, units::parse_time_us).context("Unable to parse `--age`")?;
		pattern.age = (Age::from_usec(min), Age::from_usec(max));
	}

	Ok(Some(pattern))
}

/// Parses a `MIN MAX` bound pair
fn parse_bounds<T>(
	values: &[String],
	parse: fn(&str) -> Result<T, units::ParseValueError>,
) -> Result<(T, T), anyhow::Error> {
	match values {
		[min, max] => Ok((parse(min)?, parse(max)?)),
		_ => anyhow::bail!("Expected 2 values, found {}", values.len()),
	}
}

/// Prints a per-record summary, with per-region lines if `with_regions`
fn print_summary(records: &[Record], with_regions: bool) {
	for (record_idx, record) in records.iter().enumerate() {
		println!(
			"record {record_idx}: target {}, kdamond {}, context {}, scheme {}",
			self::opt(record.target_id),
			self::opt(record.kdamond_idx),
			self::opt(record.context_idx),
			self::opt(record.scheme_idx),
		);

		if let Some(intervals) = record.intervals {
			println!(
				"  intervals: sample {}, aggr {}, update {}",
				units::format_time_ns(intervals.sample_us.saturating_mul(units::NSECS_PER_USEC)),
				units::format_time_ns(intervals.aggr_us.saturating_mul(units::NSECS_PER_USEC)),
				units::format_time_ns(intervals.update_us.saturating_mul(units::NSECS_PER_USEC)),
			);
		}

		let span = match (record.snapshots.first(), record.snapshots.last()) {
			(Some(first), Some(last)) => u64::try_from(last.end_time - first.start_time).unwrap_or(0),
			_ => 0,
		};
		let avg_bytes = match record.snapshots.is_empty() {
			true => 0,
			false => record.snapshots.iter().map(Snapshot::total_sz_bytes).sum::<u64>() / record.snapshots.len() as u64,
		};
		println!(
			"  snapshots: {}, spanning {}, averaging {}",
			record.snapshots.len(),
			units::format_time_ns(span),
			units::format_sz(avg_bytes),
		);

		if with_regions {
			for (snapshot_idx, snapshot) in record.snapshots.iter().enumerate() {
				println!(
					"  snapshot {snapshot_idx}: {} regions, {} total, {} long",
					snapshot.regions.len(),
					units::format_sz(snapshot.total_sz_bytes()),
					units::format_time_ns(u64::try_from(snapshot.end_time - snapshot.start_time).unwrap_or(0)),
				);
				for region in &snapshot.regions {
					println!(
						"    {:#x}-{:#x} ({}): {}, age {}",
						region.start,
						region.end,
						units::format_sz(region.size()),
						self::fmt_nr_accesses(region.nr_accesses),
						self::fmt_age(region.age),
					);
				}
			}
		}
	}
}

/// Formats an optional value, `-` when unset
fn opt<T: fmt::Display>(value: Option<T>) -> String {
	value.map_or_else(|| "-".to_owned(), |value| value.to_string())
}

/// Formats a dual-unit access rate
fn fmt_nr_accesses(nr_accesses: NrAccesses) -> String {
	match (nr_accesses.samples, nr_accesses.percent) {
		(Some(samples), Some(percent)) => format!("{samples} samples ({})", units::format_percent(percent)),
		(Some(samples), None) => format!("{samples} samples"),
		(None, Some(percent)) => units::format_percent(percent),
		(None, None) => "-".to_owned(),
	}
}

/// Formats a dual-unit age
fn fmt_age(age: Age) -> String {
	match (age.usec, age.aggr_intervals) {
		(Some(usec), _) => units::format_time_ns(usec.saturating_mul(units::NSECS_PER_USEC)),
		(None, Some(aggr_intervals)) => format!("{aggr_intervals} aggr intervals"),
		(None, None) => "-".to_owned(),
	}
}
