//! Monitoring records
//!
//! The core model of a monitoring result: [`Record`]s of [`Snapshot`]s of
//! [`Region`]s, along with the dual-unit access quantities and the
//! monitoring [`Intervals`] that relate them.

// Imports
use {damrec_util::units, std::str};

/// Contiguous address region with its observed access pattern
#[derive(Clone, PartialEq, Debug)]
pub struct Region {
	/// Start address, inclusive
	pub start: u64,

	/// End address, exclusive
	pub end: u64,

	/// How often the region was accessed
	pub nr_accesses: NrAccesses,

	/// For how long the current access pattern has held
	pub age: Age,
}

impl Region {
	/// Creates a new region.
	///
	/// # Errors
	/// Returns an error if `start >= end`.
	pub fn new(start: u64, end: u64, nr_accesses: NrAccesses, age: Age) -> Result<Self, InvalidRangeError> {
		match start < end {
			true => Ok(Self {
				start,
				end,
				nr_accesses,
				age,
			}),
			false => Err(InvalidRangeError { start, end }),
		}
	}

	/// Returns the size of this region, in bytes
	pub fn size(&self) -> u64 {
		self.end - self.start
	}
}

/// Access frequency of a region.
///
/// Dual-unit: sampling hits per aggregation interval (`samples`) and/or
/// the percentage of the maximum possible hits (`percent`). Sources set
/// whichever unit they measure in; the other side can be derived later
/// via [`add_unset_unit`](Self::add_unset_unit).
#[derive(Clone, Copy, PartialEq, Debug)]
#[derive(Default)]
pub struct NrAccesses {
	/// Sampling hits within one aggregation interval
	pub samples: Option<u64>,

	/// Percentage of the maximum possible hits
	pub percent: Option<f64>,
}

impl NrAccesses {
	/// Creates a value measured in samples
	#[must_use]
	pub const fn from_samples(samples: u64) -> Self {
		Self {
			samples: Some(samples),
			percent: None,
		}
	}

	/// Creates a value measured as a percentage
	#[must_use]
	pub const fn from_percent(percent: f64) -> Self {
		Self {
			samples: None,
			percent: Some(percent),
		}
	}

	/// Creates a value with neither unit set
	#[must_use]
	pub const fn unset() -> Self {
		Self {
			samples: None,
			percent: None,
		}
	}

	/// Fills in the missing unit from `intervals`.
	///
	/// No-op if both units are already set, or neither is.
	pub fn add_unset_unit(&mut self, intervals: &Intervals) {
		let max_nr_accesses = intervals.max_nr_accesses();
		match (self.samples, self.percent) {
			(Some(samples), None) => self.percent = Some(samples as f64 * 100.0 / max_nr_accesses),
			(None, Some(percent)) => self.samples = Some((percent * max_nr_accesses / 100.0) as u64),
			_ => (),
		}
	}

	/// Returns this value rebased to `unit`
	#[must_use]
	pub fn converted(mut self, unit: NrAccessesUnit, intervals: &Intervals) -> Self {
		self.add_unset_unit(intervals);
		match unit {
			NrAccessesUnit::Samples => Self {
				samples: self.samples,
				percent: None,
			},
			NrAccessesUnit::Percent => Self {
				samples: None,
				percent: self.percent,
			},
		}
	}
}

/// Age of a region's access pattern.
///
/// Dual-unit: aggregation intervals and/or micro-seconds.
#[derive(Clone, Copy, PartialEq, Debug)]
#[derive(Default)]
pub struct Age {
	/// Aggregation intervals the pattern has held for
	pub aggr_intervals: Option<u64>,

	/// Micro-seconds the pattern has held for
	pub usec: Option<u64>,
}

impl Age {
	/// Creates an age measured in aggregation intervals
	#[must_use]
	pub const fn from_aggr_intervals(aggr_intervals: u64) -> Self {
		Self {
			aggr_intervals: Some(aggr_intervals),
			usec:           None,
		}
	}

	/// Creates an age measured in micro-seconds
	#[must_use]
	pub const fn from_usec(usec: u64) -> Self {
		Self {
			aggr_intervals: None,
			usec:           Some(usec),
		}
	}

	/// Creates an age with neither unit set
	#[must_use]
	pub const fn unset() -> Self {
		Self {
			aggr_intervals: None,
			usec:           None,
		}
	}

	/// Fills in the missing unit from `intervals`.
	///
	/// No-op if both units are already set, or neither is.
	pub fn add_unset_unit(&mut self, intervals: &Intervals) {
		match (self.aggr_intervals, self.usec) {
			(Some(aggr_intervals), None) => self.usec = Some(aggr_intervals.saturating_mul(intervals.aggr_us)),
			(None, Some(usec)) => self.aggr_intervals = Some(match intervals.aggr_us {
				0 => 0,
				aggr_us => usec / aggr_us,
			}),
			_ => (),
		}
	}

	/// Returns this value rebased to `unit`
	#[must_use]
	pub fn converted(mut self, unit: AgeUnit, intervals: &Intervals) -> Self {
		self.add_unset_unit(intervals);
		match unit {
			AgeUnit::AggrIntervals => Self {
				aggr_intervals: self.aggr_intervals,
				usec:           None,
			},
			AgeUnit::Usec => Self {
				aggr_intervals: None,
				usec:           self.usec,
			},
		}
	}
}

/// Unit selector for [`NrAccesses`]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum NrAccessesUnit {
	Samples,
	Percent,
}

/// Unit selector for [`Age`]
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AgeUnit {
	AggrIntervals,
	Usec,
}

/// Monitoring intervals, in micro-seconds
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct Intervals {
	/// Sampling interval
	pub sample_us: u64,

	/// Aggregation interval
	pub aggr_us: u64,

	/// Regions update interval
	pub update_us: u64,
}

impl Intervals {
	/// Returns the maximum number of sampling hits per aggregation interval
	pub fn max_nr_accesses(&self) -> f64 {
		self.aggr_us as f64 / self.sample_us as f64
	}
}

impl Default for Intervals {
	fn default() -> Self {
		Self {
			sample_us: 5_000,
			aggr_us:   100_000,
			update_us: 1_000_000,
		}
	}
}

/// Point-in-time monitoring snapshot
#[derive(Clone, PartialEq, Debug)]
pub struct Snapshot {
	/// Start of the aggregation period, in nano-seconds
	pub start_time: i64,

	/// End of the aggregation period, in nano-seconds
	pub end_time: i64,

	/// All observed regions
	pub regions: Vec<Region>,

	/// Total monitored bytes, if recorded
	pub total_bytes: Option<u64>,
}

impl Snapshot {
	/// Returns the total monitored size, in bytes.
	///
	/// Uses the recorded total when present, else the sum of all region sizes.
	pub fn total_sz_bytes(&self) -> u64 {
		match self.total_bytes {
			Some(total_bytes) => total_bytes,
			None => self.regions.iter().map(Region::size).sum(),
		}
	}
}

/// Monitoring record of a single target
#[derive(Clone, PartialEq, Debug)]
#[derive(Default)]
pub struct Record {
	/// Index of the kdamond that produced this record
	pub kdamond_idx: Option<u32>,

	/// Index of the monitoring context within the kdamond
	pub context_idx: Option<u32>,

	/// Monitoring intervals in effect
	pub intervals: Option<Intervals>,

	/// Index of the scheme this record was collected for
	pub scheme_idx: Option<u32>,

	/// Monitoring target id
	pub target_id: Option<u64>,

	/// All snapshots, oldest first
	pub snapshots: Vec<Snapshot>,
}

impl Record {
	/// Fills in the missing unit of every region quantity.
	///
	/// # Errors
	/// Returns an error if some quantity needs filling and `intervals`
	/// is unset. Does not error when there is nothing to fill.
	pub fn add_unset_units(&mut self) -> Result<(), MissingIntervalsError> {
		let needs_fill = self
			.snapshots
			.iter()
			.flat_map(|snapshot| snapshot.regions.iter())
			.any(|region| {
				region.nr_accesses.samples.is_some() != region.nr_accesses.percent.is_some() ||
					region.age.aggr_intervals.is_some() != region.age.usec.is_some()
			});
		if !needs_fill {
			return Ok(());
		}

		let intervals = self.intervals.ok_or(MissingIntervalsError)?;
		for snapshot in &mut self.snapshots {
			for region in &mut snapshot.regions {
				region.nr_accesses.add_unset_unit(&intervals);
				region.age.add_unset_unit(&intervals);
			}
		}

		Ok(())
	}

	/// Back-fills the first snapshot's start time.
	///
	/// The recording formats only carry end times, so the first snapshot's
	/// start is estimated from the average end-to-end spacing:
	/// `start[0] = end[0] - (end[last] - end[0]) / (n - 1)`.
	///
	/// No-op with fewer than 2 snapshots.
	pub fn set_first_snapshot_start_time(&mut self) {
		let n = self.snapshots.len() as i64;
		if n < 2 {
			return;
		}

		let first_end = self.snapshots[0].end_time;
		let last_end = self.snapshots[self.snapshots.len() - 1].end_time;
		self.snapshots[0].start_time = first_end - (last_end - first_end) / (n - 1);
	}
}

/// Address range, for filtering and rendering
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct AddrRange {
	/// Start address, inclusive
	pub start: u64,

	/// End address, exclusive
	pub end: u64,
}

impl AddrRange {
	/// Creates a new address range.
	///
	/// # Errors
	/// Returns an error if `start >= end`.
	pub fn new(start: u64, end: u64) -> Result<Self, InvalidRangeError> {
		match start < end {
			true => Ok(Self { start, end }),
			false => Err(InvalidRangeError { start, end }),
		}
	}

	/// Returns the size of this range, in bytes
	pub fn size(&self) -> u64 {
		self.end - self.start
	}
}

impl str::FromStr for AddrRange {
	type Err = ParseAddrRangeError;

	/// Parses a range from `<start>-<end>`, where both sides take size units
	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (start, end) = s.split_once('-').ok_or_else(|| ParseAddrRangeError::MissingSeparator {
			text: s.to_owned(),
		})?;
		let start = units::parse_sz_bytes(start)?;
		let end = units::parse_sz_bytes(end)?;
		Self::new(start, end).map_err(Into::into)
	}
}

/// Error for an inverted or empty address range
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[derive(thiserror::Error)]
#[error("invalid address range {start:#x}..{end:#x}")]
pub struct InvalidRangeError {
	/// Start address
	pub start: u64,

	/// End address
	pub end: u64,
}

/// Error for unit conversions that need unrecorded intervals
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
#[derive(thiserror::Error)]
#[error("monitoring intervals are not recorded")]
pub struct MissingIntervalsError;

/// Error for parsing an [`AddrRange`]
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(thiserror::Error)]
pub enum ParseAddrRangeError {
	/// Missing the `-` separator
	#[error("missing `-` separator in {text:?}")]
	MissingSeparator { text: String },

	/// Invalid address value
	#[error("invalid address value")]
	Value(#[from] units::ParseValueError),

	/// Inverted range
	#[error(transparent)]
	Range(#[from] InvalidRangeError),
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Intervals with `max_nr_accesses` of exactly 20
	fn test_intervals() -> Intervals {
		Intervals {
			sample_us: 5_000,
			aggr_us:   100_000,
			update_us: 1_000_000,
		}
	}

	#[test]
	fn region_rejects_inverted_range() {
		assert!(Region::new(4096, 8192, NrAccesses::unset(), Age::unset()).is_ok());
		assert_eq!(
			Region::new(8192, 4096, NrAccesses::unset(), Age::unset()),
			Err(InvalidRangeError { start: 8192, end: 4096 })
		);
		assert!(Region::new(4096, 4096, NrAccesses::unset(), Age::unset()).is_err());
	}

	#[test]
	fn nr_accesses_fills_missing_unit() {
		let intervals = test_intervals();

		let mut nr_accesses = NrAccesses::from_samples(5);
		nr_accesses.add_unset_unit(&intervals);
		assert_eq!(nr_accesses.percent, Some(25.0));

		let mut nr_accesses = NrAccesses::from_percent(25.0);
		nr_accesses.add_unset_unit(&intervals);
		assert_eq!(nr_accesses.samples, Some(5));
	}

	#[test]
	fn nr_accesses_fill_is_idempotent() {
		let intervals = test_intervals();

		let mut nr_accesses = NrAccesses::from_samples(7);
		nr_accesses.add_unset_unit(&intervals);
		let filled = nr_accesses;
		nr_accesses.add_unset_unit(&intervals);
		assert_eq!(nr_accesses, filled);

		let mut unset = NrAccesses::unset();
		unset.add_unset_unit(&intervals);
		assert_eq!(unset, NrAccesses::unset());
	}

	#[test]
	fn nr_accesses_conversion_round_trips() {
		let intervals = test_intervals();

		// Samples -> percent -> samples, exact for whole sample counts
		for samples in [0, 1, 5, 19, 20] {
			let percent = NrAccesses::from_samples(samples).converted(NrAccessesUnit::Percent, &intervals);
			let back = percent.converted(NrAccessesUnit::Samples, &intervals);
			assert_eq!(back.samples, Some(samples));
		}
	}

	#[test]
	fn age_fills_missing_unit() {
		let intervals = test_intervals();

		let mut age = Age::from_aggr_intervals(3);
		age.add_unset_unit(&intervals);
		assert_eq!(age.usec, Some(300_000));

		let mut age = Age::from_usec(300_000);
		age.add_unset_unit(&intervals);
		assert_eq!(age.aggr_intervals, Some(3));
	}

	#[test]
	fn age_conversion_round_trips() {
		let intervals = test_intervals();

		for aggr_intervals in [0, 1, 42, u64::from(u32::MAX)] {
			let usec = Age::from_aggr_intervals(aggr_intervals).converted(AgeUnit::Usec, &intervals);
			let back = usec.converted(AgeUnit::AggrIntervals, &intervals);
			assert_eq!(back.aggr_intervals, Some(aggr_intervals));
		}
	}

	#[test]
	fn back_fill_estimates_first_start() {
		let snapshot = |end_time| Snapshot {
			start_time: end_time,
			end_time,
			regions: vec![],
			total_bytes: None,
		};

		let mut record = Record {
			snapshots: vec![snapshot(10), snapshot(20), snapshot(30)],
			..Record::default()
		};
		record.set_first_snapshot_start_time();

		// start[0] = 10 - (30 - 10) / 2
		assert_eq!(record.snapshots[0].start_time, 0);
		assert_eq!(record.snapshots[1].start_time, 20);
	}

	#[test]
	fn back_fill_ignores_single_snapshot() {
		let mut record = Record {
			snapshots: vec![Snapshot {
				start_time:  100,
				end_time:    100,
				regions:     vec![],
				total_bytes: None,
			}],
			..Record::default()
		};
		record.set_first_snapshot_start_time();
		assert_eq!(record.snapshots[0].start_time, 100);
	}

	#[test]
	fn add_unset_units_requires_intervals_only_when_needed() {
		let region = Region::new(0, 4096, NrAccesses::from_samples(2), Age::unset()).expect("Valid range");
		let snapshot = Snapshot {
			start_time:  0,
			end_time:    1,
			regions:     vec![region],
			total_bytes: None,
		};

		// A fill is needed, but there are no intervals
		let mut record = Record {
			snapshots: vec![snapshot.clone()],
			..Record::default()
		};
		assert_eq!(record.add_unset_units(), Err(MissingIntervalsError));

		// Same record with intervals
		let mut record = Record {
			intervals: Some(test_intervals()),
			snapshots: vec![snapshot],
			..Record::default()
		};
		assert_eq!(record.add_unset_units(), Ok(()));
		assert_eq!(record.snapshots[0].regions[0].nr_accesses.percent, Some(10.0));

		// Nothing to fill at all
		let mut record = Record::default();
		assert_eq!(record.add_unset_units(), Ok(()));
	}

	#[test]
	fn snapshot_total_size() {
		let region = |start, end| Region::new(start, end, NrAccesses::unset(), Age::unset()).expect("Valid range");
		let mut snapshot = Snapshot {
			start_time:  0,
			end_time:    1,
			regions:     vec![region(0, 4096), region(8192, 12288)],
			total_bytes: None,
		};
		assert_eq!(snapshot.total_sz_bytes(), 8192);

		snapshot.total_bytes = Some(1 << 30);
		assert_eq!(snapshot.total_sz_bytes(), 1 << 30);
	}

	#[test]
	fn addr_range_parsing() {
		assert_eq!("4096-8192".parse(), Ok(AddrRange { start: 4096, end: 8192 }));
		assert_eq!("4K-8K".parse(), Ok(AddrRange { start: 4096, end: 8192 }));
		assert_eq!("min-max".parse(), Ok(AddrRange { start: 0, end: u64::MAX }));
		assert!(matches!(
			"4096".parse::<AddrRange>(),
			Err(ParseAddrRangeError::MissingSeparator { .. })
		));
		assert!(matches!("8K-4K".parse::<AddrRange>(), Err(ParseAddrRangeError::Range(_))));
	}
}
