//! Creates graphs and reports from monitoring records

// Modules
mod args;

// Imports
use {
	anyhow::Context,
	args::Args,
	clap::Parser,
	damrec::{
		formats,
		heatmap::{self, HeatGrid},
		record::Region,
	},
	damrec_util::{logger, units},
	gnuplot::{AxesCommon, Figure, PaletteType, PlotOption},
	palette::{LinSrgb, Mix, Srgb},
};

fn main() -> Result<(), anyhow::Error> {
	// Get arguments
	let args = Args::parse();
	logger::pre_init::debug(format!("Args: {args:?}"));

	// Initialize logging
	logger::init(args.log_file.as_deref(), args.log_file_append);

	// Then check the sub-command
	match args.sub_cmd {
		args::SubCmd::Heatmap(cmd) => self::heatmap(cmd),
		args::SubCmd::Wss(cmd) => self::wss(cmd),
	}
}

/// Renders the `heatmap` sub-command
fn heatmap(cmd: args::Heatmap) -> Result<(), anyhow::Error> {
	// Read the records and pool every snapshot; the grid does not
	// distinguish targets
	let records = formats::decode_file(&cmd.input_file, cmd.format).context("Unable to read records file")?;
	let snapshots = records
		.iter()
		.flat_map(|record| &record.snapshots)
		.cloned()
		.collect::<Vec<_>>();

	// Default the ranges from the data
	let guide = heatmap::guide(&snapshots);
	let time_range = match &cmd.time_range {
		Some(bounds) => self::parse_time_range(bounds)?,
		None => {
			let guide = guide.as_ref().context("No regions to default the time range from")?;
			guide.time_range
		},
	};
	let addr_range = match cmd.addr_range {
		Some(range) => (range.start, range.end),
		None => {
			let extent = guide
				.as_ref()
				.and_then(|guide| guide.addr_extents.first())
				.context("No regions to default the address range from")?;
			(extent.start, extent.end)
		},
	};

	let grid = HeatGrid::from_snapshots(&snapshots, time_range, addr_range, (cmd.resol[0], cmd.resol[1]))
		.context("Unable to render the heat grid")?;
	tracing::debug!(
		time_range = ?grid.time_range(),
		addr_range = ?grid.addr_range(),
		max_heat = grid.max_heat(),
		"Rendered heat grid"
	);

	if cmd.raw {
		for (time, addr, heat) in grid.points() {
			println!("{time} {addr} {heat}");
		}
	} else if cmd.output.interactive || cmd.output.file.is_some() {
		self::plot_heatmap(&grid, cmd.colorset, &cmd.output)?;
	} else {
		self::print_terminal_heatmap(&grid, cmd.colorset);
	}

	Ok(())
}

/// Renders the `wss` sub-command
fn wss(cmd: args::Wss) -> Result<(), anyhow::Error> {
	let records = formats::decode_file(&cmd.input_file, cmd.format).context("Unable to read records file")?;

	// Working-set size of each snapshot
	let mut sizes = records
		.iter()
		.flat_map(|record| &record.snapshots)
		.map(|snapshot| {
			snapshot
				.regions
				.iter()
				.filter(|region| region.nr_accesses.samples.unwrap_or(0) >= cmd.access_thres)
				.map(Region::size)
				.sum::<u64>()
		})
		.collect::<Vec<_>>();
	anyhow::ensure!(!sizes.is_empty(), "No snapshots in the input");
	sizes.sort_unstable();

	let stats = sizes.iter().map(|&size| size as f64).collect::<average::Variance>();
	println!(
		"wss: {} snapshots, mean {} (error {})",
		sizes.len(),
		units::format_sz(stats.mean() as u64),
		units::format_sz(stats.error() as u64),
	);

	if cmd.output.interactive || cmd.output.file.is_some() {
		let mut figure = Figure::new();
		figure
			.axes2d()
			.set_x_label("Percentile", &[])
			.set_y_label("Working set size (MiB)", &[])
			.lines(
				(0..sizes.len()).map(|idx| 100.0 * idx as f64 / (sizes.len() - 1).max(1) as f64),
				sizes.iter().map(|&size| size as f64 / f64::from(1 << 20)),
				&[PlotOption::Caption("wss")],
			);
		self::render(figure, &cmd.output)?;
	} else {
		for pct in [0_usize, 25, 50, 75, 100] {
			let idx = pct * (sizes.len() - 1) / 100;
			println!("{pct:3} % {}", units::format_sz(sizes[idx]));
		}
	}

	Ok(())
}

/// Prints `grid` as colored cells on an ANSI terminal
fn print_terminal_heatmap(grid: &HeatGrid, colorset: args::Colorset) {
	const NR_LEVELS: usize = 9;

	let colors = self::color_ramp(colorset, NR_LEVELS);
	let levels = grid.quantized_levels(NR_LEVELS);
	let (time_cells, space_cells) = grid.resol();

	for row in 0..time_cells {
		for cell in 0..space_cells {
			let level = levels[row * space_cells + cell];
			let (red, green, blue) = Srgb::<u8>::from_linear(colors[level]).into_components();
			print!("\x1b[48;2;{red};{green};{blue}m{level}");
		}
		println!("\x1b[0m");
	}

	let (addr_min, addr_max) = grid.addr_range();
	println!(
		"address {addr_min:#x}..{addr_max:#x}, {} per column, {} per row, hottest {:.2}",
		units::format_sz(grid.space_unit()),
		units::format_time_ns(grid.time_unit()),
		grid.max_heat(),
	);
}

/// Plots `grid` through gnuplot
fn plot_heatmap(grid: &HeatGrid, colorset: args::Colorset, output: &args::Output) -> Result<(), anyhow::Error> {
	let (time_cells, space_cells) = grid.resol();
	let (time_min, time_max) = grid.time_range();
	let (addr_min, addr_max) = grid.addr_range();

	let palette = match colorset {
		args::Colorset::Gray => PaletteType::Gray(1.0),
		args::Colorset::Flame => PaletteType::Formula(7, 5, 15),
		args::Colorset::Emotion => PaletteType::Formula(33, 13, 10),
	};

	let mut figure = Figure::new();
	figure
		.axes2d()
		.set_x_label("Address", &[])
		.set_y_label("Time (s)", &[])
		.set_palette(palette)
		.image(
			grid.pixels().map(|pixel| pixel.heat),
			time_cells,
			space_cells,
			Some((
				addr_min as f64,
				time_min as f64 / 1e9,
				addr_max as f64,
				time_max as f64 / 1e9,
			)),
			&[],
		);

	self::render(figure, output)
}

/// Renders `figure` to the output file, or interactively
fn render(mut figure: Figure, output: &args::Output) -> Result<(), anyhow::Error> {
	match &output.file {
		Some(file) => figure
			.save_to_png(file, output.width, output.height)
			.map_err(|err| anyhow::anyhow!("Unable to save output file: {err:?}"))?,
		None => {
			figure
				.show()
				.map_err(|err| anyhow::anyhow!("Unable to show figure: {err:?}"))?;
		},
	}

	Ok(())
}

/// Returns `nr_levels` colors interpolated across `colorset`'s stops
fn color_ramp(colorset: args::Colorset, nr_levels: usize) -> Vec<LinSrgb> {
	let stops: &[LinSrgb] = match colorset {
		args::Colorset::Gray => &[LinSrgb::new(0.0, 0.0, 0.0), LinSrgb::new(1.0, 1.0, 1.0)],
		args::Colorset::Flame => &[
			LinSrgb::new(0.0, 0.0, 0.0),
			LinSrgb::new(1.0, 0.0, 0.0),
			LinSrgb::new(1.0, 1.0, 0.0),
			LinSrgb::new(1.0, 1.0, 1.0),
		],
		args::Colorset::Emotion => &[
			LinSrgb::new(0.0, 0.0, 1.0),
			LinSrgb::new(0.5, 0.0, 0.5),
			LinSrgb::new(1.0, 0.0, 0.0),
			LinSrgb::new(1.0, 1.0, 0.0),
		],
	};

	(0..nr_levels)
		.map(|level| {
			let pos = level as f32 / (nr_levels - 1).max(1) as f32 * (stops.len() - 1) as f32;
			let idx = (pos.floor() as usize).min(stops.len() - 2);
			stops[idx].mix(stops[idx + 1], pos - idx as f32)
		})
		.collect()
}

/// Parses a `START END` time range pair
fn parse_time_range(bounds: &[String]) -> Result<(i64, i64), anyhow::Error> {
	let parse = |text: &str| {
		let ns = units::parse_time_ns(text)?;
		i64::try_from(ns).context("Time is out of range")
	};
	match bounds {
		[start, end] => Ok((parse(start)?, parse(end)?)),
		_ => anyhow::bail!("Expected 2 values, found {}", bounds.len()),
	}
}
