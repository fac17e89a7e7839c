//! Region filtering
//!
//! Narrows records down to the regions of interest, either by their
//! access pattern (size, access rate, age) or by address ranges.

// Imports
use crate::record::{AddrRange, Age, AgeUnit, Intervals, NrAccesses, NrAccessesUnit, Record, Region};

/// Access pattern bounds, all inclusive.
///
/// The rate and age bounds are dual-unit like the region quantities they
/// are compared against; a bound is expressed in whichever unit is set.
#[derive(Clone, Copy, PartialEq, Debug)]
pub struct AccessPattern {
	/// Region size bounds, in bytes
	pub sz_bytes: (u64, u64),

	/// Access rate bounds
	pub nr_accesses: (NrAccesses, NrAccesses),

	/// Age bounds
	pub age: (Age, Age),
}

impl AccessPattern {
	/// Returns this pattern with all bounds rebased to the given units
	#[must_use]
	pub fn converted_for_units(&self, nr_unit: NrAccessesUnit, age_unit: AgeUnit, intervals: &Intervals) -> Self {
		Self {
			sz_bytes:    self.sz_bytes,
			nr_accesses: (
				self.nr_accesses.0.converted(nr_unit, intervals),
				self.nr_accesses.1.converted(nr_unit, intervals),
			),
			age:         (
				self.age.0.converted(age_unit, intervals),
				self.age.1.converted(age_unit, intervals),
			),
		}
	}
}

impl Default for AccessPattern {
	/// The full-range pattern, which excludes nothing
	fn default() -> Self {
		Self {
			sz_bytes:    (0, u64::MAX),
			nr_accesses: (NrAccesses::from_percent(0.0), NrAccesses::from_percent(100.0)),
			age:         (Age::from_usec(0), Age::from_usec(u64::MAX)),
		}
	}
}

/// Drops all of `record`'s regions that fall outside `pattern`.
///
/// The size bounds always apply. The rate and age bounds need the
/// record's intervals to bring both sides to a common unit; without
/// intervals those checks are skipped with a warning.
pub fn filter_by_pattern(record: &mut Record, pattern: &AccessPattern) {
	let (sz_min, sz_max) = pattern.sz_bytes;

	let pattern = match record.intervals {
		Some(intervals) => {
			record.add_unset_units().expect("Intervals were just checked");
			Some(pattern.converted_for_units(NrAccessesUnit::Samples, AgeUnit::AggrIntervals, &intervals))
		},
		None => {
			tracing::warn!(
				target_id = record.target_id,
				"Record carries no intervals, filtering by size only"
			);
			None
		},
	};

	for snapshot in &mut record.snapshots {
		snapshot.regions.retain(|region| {
			if !(sz_min..=sz_max).contains(&region.size()) {
				return false;
			}

			match &pattern {
				Some(pattern) => {
					let samples = region.nr_accesses.samples.unwrap_or(0);
					let age = region.age.aggr_intervals.unwrap_or(0);

					let (nr_min, nr_max) = pattern.nr_accesses;
					let (age_min, age_max) = pattern.age;
					(nr_min.samples.unwrap_or(0)..=nr_max.samples.unwrap_or(u64::MAX)).contains(&samples) &&
						(age_min.aggr_intervals.unwrap_or(0)..=age_max.aggr_intervals.unwrap_or(u64::MAX))
							.contains(&age)
				},
				None => true,
			}
		});
	}
}

/// Clips `region` to each of `ranges`, returning the surviving pieces.
///
/// All other fields are copied into each piece unchanged. `ranges` must
/// be disjoint or the pieces will overlap.
pub fn filter_by_address(region: &Region, ranges: &[AddrRange]) -> Vec<Region> {
	ranges
		.iter()
		.filter_map(|range| {
			let start = region.start.max(range.start);
			let end = region.end.min(range.end);
			(start < end).then(|| Region {
				start,
				end,
				nr_accesses: region.nr_accesses,
				age: region.age,
			})
		})
		.collect()
}

/// Clips every region of every record to `ranges`
pub fn filter_records_by_address(records: &mut [Record], ranges: &[AddrRange]) {
	for record in records {
		for snapshot in &mut record.snapshots {
			snapshot.regions = snapshot
				.regions
				.iter()
				.flat_map(|region| self::filter_by_address(region, ranges))
				.collect();
		}
	}
}
