//! Access heatmaps
//!
//! Projects snapshots onto a time x address grid of access heats. Each
//! cell's heat is the size-weighted average of all region accesses that
//! overlap it, with the overlap area (nano-seconds times bytes) as the
//! weight, so a briefly-visible small region cannot dominate a cell.

// Imports
use {
	crate::record::{AddrRange, Snapshot},
	itertools::Itertools,
	std::cmp,
};

/// Extent gaps up to `span / GUIDE_GAP_DIVISOR` are bridged by [`guide`]
const GUIDE_GAP_DIVISOR: u64 = 100;

/// Heat grid over a time range and an address range
#[derive(Clone, PartialEq, Debug)]
pub struct HeatGrid {
	/// Rendered time range, compensated to a whole number of time units
	time_range: (i64, i64),

	/// Rendered address range, compensated to a whole number of space units
	addr_range: (u64, u64),

	/// Nano-seconds per grid row
	time_unit: u64,

	/// Bytes per grid column
	space_unit: u64,

	/// Grid resolution, as (time cells, space cells)
	resol: (usize, usize),

	/// Cell heats, row-major by time
	heats: Vec<f64>,
}

/// One cell of a [`HeatGrid`]
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct HeatPixel {
	/// Start time of the cell, in nano-seconds
	pub time: i64,

	/// Start address of the cell
	pub addr: u64,

	/// Averaged access heat of the cell
	pub heat: f64,
}

impl HeatGrid {
	/// Renders `snapshots` onto a `resol` grid over the given ranges.
	///
	/// The ranges are compensated down to whole multiples of the integer
	/// cell units and exposed via [`time_range`](Self::time_range) and
	/// [`addr_range`](Self::addr_range). Access counts are read in the
	/// samples unit; regions without it contribute a heat of 0.
	pub fn from_snapshots(
		snapshots: &[Snapshot],
		time_range: (i64, i64),
		addr_range: (u64, u64),
		resol: (usize, usize),
	) -> Result<Self, HeatmapError> {
		if snapshots.is_empty() {
			return Err(HeatmapError::NoSnapshots);
		}
		if time_range.0 >= time_range.1 {
			return Err(HeatmapError::InvalidRange { axis: "time" });
		}
		if addr_range.0 >= addr_range.1 {
			return Err(HeatmapError::InvalidRange { axis: "address" });
		}

		let (time_cells, space_cells) = resol;
		let time_unit = self::cell_unit(time_range.1.abs_diff(time_range.0), time_cells)?;
		let space_unit = self::cell_unit(addr_range.1 - addr_range.0, space_cells)?;

		// Compensate the ranges down to whole cells
		let time_range = (
			time_range.0,
			time_range.0 + (time_unit * time_cells as u64) as i64,
		);
		let addr_range = (addr_range.0, addr_range.0 + space_unit * space_cells as u64);

		let mut heats = vec![0.0; time_cells * space_cells];
		let mut weights = vec![0.0; time_cells * space_cells];
		for snapshot in snapshots {
			// Clip the snapshot to the rendered time range
			let snap_start = snapshot.start_time.max(time_range.0);
			let snap_end = snapshot.end_time.min(time_range.1);
			if snap_start >= snap_end {
				continue;
			}

			let start_off = snap_start.abs_diff(time_range.0);
			let end_off = snap_end.abs_diff(time_range.0);
			for row in (start_off / time_unit) as usize..=((end_off - 1) / time_unit) as usize {
				let row_start = row as u64 * time_unit;
				let row_end = row_start + time_unit;
				let overlap_ns = end_off.min(row_end) - start_off.max(row_start);

				for region in &snapshot.regions {
					// Clip the region to the rendered address range
					let reg_start = region.start.max(addr_range.0);
					let reg_end = region.end.min(addr_range.1);
					if reg_start >= reg_end {
						continue;
					}

					let samples = region.nr_accesses.samples.unwrap_or(0);
					let reg_start_off = reg_start - addr_range.0;
					let reg_end_off = reg_end - addr_range.0;
					for cell in (reg_start_off / space_unit) as usize..=((reg_end_off - 1) / space_unit) as usize {
						let cell_start = cell as u64 * space_unit;
						let cell_end = cell_start + space_unit;
						let overlap_bytes = reg_end_off.min(cell_end) - reg_start_off.max(cell_start);

						let weight = overlap_ns as f64 * overlap_bytes as f64;
						let idx = row * space_cells + cell;
						heats[idx] += samples as f64 * weight;
						weights[idx] += weight;
					}
				}
			}
		}

		// Settle each cell at its weighted average
		for (heat, weight) in heats.iter_mut().zip(&weights) {
			if *weight > 0.0 {
				*heat /= weight;
			}
		}

		Ok(Self {
			time_range,
			addr_range,
			time_unit,
			space_unit,
			resol,
			heats,
		})
	}

	/// Returns the compensated time range
	pub fn time_range(&self) -> (i64, i64) {
		self.time_range
	}

	/// Returns the compensated address range
	pub fn addr_range(&self) -> (u64, u64) {
		self.addr_range
	}

	/// Returns the nano-seconds covered by one grid row
	pub fn time_unit(&self) -> u64 {
		self.time_unit
	}

	/// Returns the bytes covered by one grid column
	pub fn space_unit(&self) -> u64 {
		self.space_unit
	}

	/// Returns the grid resolution, as (time cells, space cells)
	pub fn resol(&self) -> (usize, usize) {
		self.resol
	}

	/// Returns all cells in row-major order, rows by time
	pub fn pixels(&self) -> impl Iterator<Item = HeatPixel> + '_ {
		let (_, space_cells) = self.resol;
		self.heats.iter().enumerate().map(move |(idx, &heat)| HeatPixel {
			time: self.time_range.0 + ((idx / space_cells) as u64 * self.time_unit) as i64,
			addr: self.addr_range.0 + (idx % space_cells) as u64 * self.space_unit,
			heat,
		})
	}

	/// Returns all cells as flat (time, addr, heat) triples
	pub fn points(&self) -> Vec<(i64, u64, f64)> {
		self.pixels().map(|pixel| (pixel.time, pixel.addr, pixel.heat)).collect()
	}

	/// Returns the hottest cell's heat, or 0 for an all-cold grid
	pub fn max_heat(&self) -> f64 {
		self.heats.iter().copied().fold(0.0, f64::max)
	}

	/// Returns each cell's heat quantized onto `nr_levels` discrete levels,
	/// in row-major order.
	///
	/// The hottest cell maps to `nr_levels - 1`; an all-cold grid maps to
	/// all zeros.
	pub fn quantized_levels(&self, nr_levels: usize) -> Vec<usize> {
		let max_heat = self.max_heat();
		self.heats
			.iter()
			.map(|&heat| match max_heat > 0.0 && nr_levels > 1 {
				true => ((heat / max_heat) * (nr_levels - 1) as f64).round() as usize,
				false => 0,
			})
			.collect()
	}
}

/// Defaults for the rendered ranges, derived from the data itself
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct HeatmapGuide {
	/// Observed time range
	pub time_range: (i64, i64),

	/// Contiguous address extents, largest first
	pub addr_extents: Vec<AddrRange>,
}

/// Summarizes where `snapshots` have data, for defaulting the ranges.
///
/// Address extents merge regions across gaps of up to 1% of the full
/// observed address span, then sort largest first. Returns `None` when
/// there are no snapshots or no regions at all.
pub fn guide(snapshots: &[Snapshot]) -> Option<HeatmapGuide> {
	let time_range = snapshots
		.iter()
		.flat_map(|snapshot| [snapshot.start_time, snapshot.end_time])
		.minmax()
		.into_option()?;

	let mut ranges = snapshots
		.iter()
		.flat_map(|snapshot| &snapshot.regions)
		.map(|region| (region.start, region.end))
		.collect::<Vec<_>>();
	ranges.sort_unstable();

	let lowest = ranges.first().map(|(start, _)| *start)?;
	let highest = ranges.iter().map(|(_, end)| *end).max()?;
	let max_gap = (highest - lowest) / GUIDE_GAP_DIVISOR;

	let mut addr_extents: Vec<AddrRange> = vec![];
	for (start, end) in ranges.iter().copied() {
		match addr_extents.last_mut() {
			Some(last) if start.saturating_sub(last.end) <= max_gap => last.end = last.end.max(end),
			_ => addr_extents.push(AddrRange { start, end }),
		}
	}
	addr_extents.sort_by_key(|extent| cmp::Reverse(extent.size()));

	Some(HeatmapGuide { time_range, addr_extents })
}

/// Returns the integer span of one cell
fn cell_unit(span: u64, cells: usize) -> Result<u64, HeatmapError> {
	let unit = match cells {
		0 => 0,
		cells => span / cells as u64,
	};
	match unit {
		0 => Err(HeatmapError::ResolutionTooFine { cells, span }),
		unit => Ok(unit),
	}
}

/// Error for rendering a [`HeatGrid`]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[derive(thiserror::Error)]
pub enum HeatmapError {
	/// No snapshots to render
	#[error("no snapshots to render")]
	NoSnapshots,

	/// An inverted or empty render range
	#[error("invalid {axis} range")]
	InvalidRange { axis: &'static str },

	/// More cells than the rendered span covers
	#[error("{cells} cells are too fine for a span of {span}")]
	ResolutionTooFine { cells: usize, span: u64 },
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::record::{Age, NrAccesses, Region},
	};

	/// Builds a sample-unit region
	fn region(start: u64, end: u64, samples: u64) -> Region {
		Region::new(start, end, NrAccesses::from_samples(samples), Age::unset()).expect("Valid range")
	}

	/// Builds a snapshot spanning `start_time..end_time`
	fn snapshot(start_time: i64, end_time: i64, regions: Vec<Region>) -> Snapshot {
		Snapshot {
			start_time,
			end_time,
			regions,
			total_bytes: None,
		}
	}

	#[test]
	fn units_are_integer_quotients_and_ranges_compensate() {
		let snapshots = [snapshot(0, 100, vec![region(0, 512, 1)])];
		let grid = HeatGrid::from_snapshots(&snapshots, (0, 105), (0, 1055), (10, 10)).expect("Unable to render");

		assert_eq!(grid.time_unit(), 10);
		assert_eq!(grid.space_unit(), 105);
		assert_eq!(grid.time_range(), (0, 100));
		assert_eq!(grid.addr_range(), (0, 1050));
		assert_eq!(grid.resol(), (10, 10));
	}

	#[test]
	fn constant_region_renders_its_own_heat() {
		let snapshots = [snapshot(0, 100, vec![region(0, 512, 4)])];
		let grid = HeatGrid::from_snapshots(&snapshots, (0, 100), (0, 512), (1, 1)).expect("Unable to render");

		assert_eq!(grid.points(), vec![(0, 0, 4.0)]);
		assert_eq!(grid.max_heat(), 4.0);
	}

	#[test]
	fn cells_average_by_overlap_area() {
		// Two half-cell regions of equal size weigh equally
		let snapshots = [snapshot(0, 100, vec![region(0, 50, 2), region(50, 100, 6)])];
		let grid = HeatGrid::from_snapshots(&snapshots, (0, 100), (0, 100), (1, 1)).expect("Unable to render");
		assert_eq!(grid.points(), vec![(0, 0, 4.0)]);

		// A quarter-cell region weighs half as much as a half-cell one
		let snapshots = [snapshot(0, 100, vec![region(0, 50, 3), region(50, 75, 9)])];
		let grid = HeatGrid::from_snapshots(&snapshots, (0, 100), (0, 100), (1, 1)).expect("Unable to render");
		assert_eq!(grid.points(), vec![(0, 0, 5.0)]);
	}

	#[test]
	fn rows_split_snapshots_by_time() {
		let snapshots = [
			snapshot(0, 100, vec![region(0, 100, 2)]),
			snapshot(50, 100, vec![region(0, 100, 6)]),
		];
		let grid = HeatGrid::from_snapshots(&snapshots, (0, 100), (0, 100), (2, 1)).expect("Unable to render");

		// Row 0 sees only the first snapshot; row 1 averages both equally
		assert_eq!(grid.points(), vec![(0, 0, 2.0), (50, 0, 4.0)]);
	}

	#[test]
	fn data_outside_the_ranges_is_clipped() {
		let snapshots = [
			snapshot(-100, -50, vec![region(0, 100, 9)]),
			snapshot(0, 100, vec![region(1 << 30, 1 << 31, 9)]),
		];
		let grid = HeatGrid::from_snapshots(&snapshots, (0, 100), (0, 100), (2, 2)).expect("Unable to render");

		assert_eq!(grid.max_heat(), 0.0);
		assert_eq!(grid.quantized_levels(9), vec![0; 4]);
	}

	#[test]
	fn render_rejects_bad_arguments() {
		let snapshots = [snapshot(0, 100, vec![region(0, 100, 1)])];

		assert_eq!(
			HeatGrid::from_snapshots(&[], (0, 100), (0, 100), (2, 2)),
			Err(HeatmapError::NoSnapshots)
		);
		assert_eq!(
			HeatGrid::from_snapshots(&snapshots, (100, 0), (0, 100), (2, 2)),
			Err(HeatmapError::InvalidRange { axis: "time" })
		);
		assert_eq!(
			HeatGrid::from_snapshots(&snapshots, (0, 100), (100, 100), (2, 2)),
			Err(HeatmapError::InvalidRange { axis: "address" })
		);
		assert_eq!(
			HeatGrid::from_snapshots(&snapshots, (0, 100), (0, 100), (0, 2)),
			Err(HeatmapError::ResolutionTooFine { cells: 0, span: 100 })
		);
		assert_eq!(
			HeatGrid::from_snapshots(&snapshots, (0, 100), (0, 5), (2, 10)),
			Err(HeatmapError::ResolutionTooFine { cells: 10, span: 5 })
		);
	}

	#[test]
	fn quantized_levels_scale_to_the_hottest_cell() {
		let snapshots = [snapshot(
			0,
			30,
			vec![region(0, 10, 0), region(10, 20, 4), region(20, 30, 8)],
		)];
		let grid = HeatGrid::from_snapshots(&snapshots, (0, 30), (0, 30), (1, 3)).expect("Unable to render");

		assert_eq!(grid.max_heat(), 8.0);
		assert_eq!(grid.quantized_levels(9), vec![0, 4, 8]);
	}

	#[test]
	fn pixel_coordinates_walk_the_grid() {
		let snapshots = [snapshot(1_000, 1_400, vec![region(4096, 8192, 1)])];
		let grid =
			HeatGrid::from_snapshots(&snapshots, (1_000, 1_400), (4096, 8192), (2, 2)).expect("Unable to render");

		let pixels = grid.pixels().collect::<Vec<_>>();
		assert_eq!(pixels.len(), 4);
		assert_eq!((pixels[0].time, pixels[0].addr), (1_000, 4096));
		assert_eq!((pixels[1].time, pixels[1].addr), (1_000, 6144));
		assert_eq!((pixels[2].time, pixels[2].addr), (1_200, 4096));
		assert_eq!((pixels[3].time, pixels[3].addr), (1_200, 6144));
	}

	#[test]
	fn guide_summarizes_the_data() {
		let snapshots = [
			snapshot(10, 20, vec![region(0, 100, 1), region(10_000, 10_050, 1)]),
			snapshot(20, 30, vec![region(100, 200, 1)]),
		];

		let guide = guide(&snapshots).expect("Data is present");
		assert_eq!(guide.time_range, (10, 30));

		// [0, 100) and [100, 200) touch and merge; the far extent stays
		// separate and sorts after the larger one
		assert_eq!(guide.addr_extents, vec![
			AddrRange { start: 0, end: 200 },
			AddrRange { start: 10_000, end: 10_050 },
		]);
	}

	#[test]
	fn guide_requires_data() {
		assert_eq!(guide(&[]), None);
		assert_eq!(guide(&[snapshot(0, 10, vec![])]), None);
	}
}
