//! Snapshot aggregation
//!
//! Folds runs of snapshots into one snapshot per window, merging their
//! regions into a non-overlapping set. Where regions of different
//! snapshots cover the same addresses, the merged access count is the
//! maximum of the contributions, never their sum: the same hot page
//! showing up in consecutive snapshots is still one hot page.

// Imports
use crate::record::{NrAccesses, Record, Region, Snapshot};

/// How snapshots are grouped into windows
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum WindowSpec {
	/// Windows spanning at least this many nano-seconds
	Time(u64),

	/// Windows of this many snapshots
	Count(usize),
}

/// Aggregates `snapshots` into one merged snapshot per window.
///
/// A trailing window is flushed even when still short. `Time(0)`,
/// `Count(0)` and an empty input yield no snapshots.
pub fn aggregate(snapshots: &[Snapshot], window: WindowSpec) -> Vec<Snapshot> {
	match window {
		WindowSpec::Time(0) | WindowSpec::Count(0) => vec![],
		WindowSpec::Count(count) => snapshots.chunks(count).map(self::merge_snapshots).collect(),
		WindowSpec::Time(window_ns) => {
			let mut merged = vec![];
			let mut group_start = 0;
			for idx in 0..snapshots.len() {
				let span = snapshots[idx].end_time.saturating_sub(snapshots[group_start].start_time);
				if u64::try_from(span).is_ok_and(|span| span >= window_ns) {
					merged.push(self::merge_snapshots(&snapshots[group_start..=idx]));
					group_start = idx + 1;
				}
			}
			if group_start < snapshots.len() {
				merged.push(self::merge_snapshots(&snapshots[group_start..]));
			}

			merged
		},
	}
}

impl Record {
	/// Replaces this record's snapshots with their aggregation into `window`s
	pub fn aggregate_snapshots(&mut self, window: WindowSpec) {
		self.snapshots = self::aggregate(&self.snapshots, window);
	}
}

/// Merges all regions of `window` into a single snapshot.
///
/// Regions accumulate into a non-overlapping set with a parallel list of
/// pending access counts. Each source region is cut against the
/// accumulated set via a work list; overlapped parts raise the overlapped
/// region's pending count to the source's count, overhanging parts go
/// back on the list until they land on free address space. At the end
/// each region settles at `max(own, pending)`.
///
/// The scan is quadratic in the region count, which stays small in
/// practice (the monitor bounds regions per snapshot).
fn merge_snapshots(window: &[Snapshot]) -> Snapshot {
	let mut merged: Vec<Region> = vec![];
	let mut pending: Vec<u64> = vec![];

	for snapshot in window {
		for region in &snapshot.regions {
			let samples = region.nr_accesses.samples.unwrap_or(0);

			let mut fragments = vec![(region.start, region.end)];
			while let Some((start, end)) = fragments.pop() {
				match merged.iter().position(|existing| existing.start < end && start < existing.end) {
					Some(idx) => {
						pending[idx] = pending[idx].max(samples);
						if start < merged[idx].start {
							fragments.push((start, merged[idx].start));
						}
						if merged[idx].end < end {
							fragments.push((merged[idx].end, end));
						}
					},
					None => {
						merged.push(Region {
							start,
							end,
							nr_accesses: region.nr_accesses,
							age: region.age,
						});
						pending.push(0);
					},
				}
			}
		}
	}

	for (region, pending) in merged.iter_mut().zip(pending) {
		let samples = region.nr_accesses.samples.unwrap_or(0).max(pending);
		region.nr_accesses = NrAccesses::from_samples(samples);
	}
	merged.sort_by_key(|region| region.start);

	let first = window.first().expect("Windows are never empty");
	let last = window.last().expect("Windows are never empty");
	Snapshot {
		start_time:  first.start_time,
		end_time:    last.end_time,
		regions:     merged,
		total_bytes: None,
	}
}

#[cfg(test)]
mod tests {
	use {
		super::*,
		crate::record::Age,
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
	fn count_windows_chunk_snapshots() {
		let snapshots = vec![
			snapshot(0, 10, vec![region(0, 100, 1)]),
			snapshot(10, 20, vec![region(0, 100, 2)]),
			snapshot(20, 30, vec![region(0, 100, 3)]),
			snapshot(30, 40, vec![region(0, 100, 4)]),
			snapshot(40, 50, vec![region(0, 100, 5)]),
		];

		let merged = aggregate(&snapshots, WindowSpec::Count(2));
		assert_eq!(merged.len(), 3);
		assert_eq!((merged[0].start_time, merged[0].end_time), (0, 20));
		assert_eq!((merged[1].start_time, merged[1].end_time), (20, 40));
		assert_eq!((merged[2].start_time, merged[2].end_time), (40, 50));
		assert_eq!(merged[0].regions, vec![region(0, 100, 2)]);
		assert_eq!(merged[2].regions, vec![region(0, 100, 5)]);
	}

	#[test]
	fn time_windows_span_at_least_the_window() {
		let snapshots = vec![
			snapshot(0, 10, vec![region(0, 100, 1)]),
			snapshot(10, 20, vec![region(0, 100, 2)]),
			snapshot(20, 30, vec![region(0, 100, 3)]),
			snapshot(30, 40, vec![region(0, 100, 4)]),
		];

		// Each window closes once it covers >= 20ns; the trailing partial
		// window is still flushed
		let merged = aggregate(&snapshots, WindowSpec::Time(20));
		assert_eq!(merged.len(), 2);
		assert_eq!((merged[0].start_time, merged[0].end_time), (0, 20));
		assert_eq!((merged[1].start_time, merged[1].end_time), (20, 40));

		let merged = aggregate(&snapshots, WindowSpec::Time(1_000));
		assert_eq!(merged.len(), 1);
		assert_eq!((merged[0].start_time, merged[0].end_time), (0, 40));
	}

	#[test]
	fn zero_windows_are_empty() {
		let snapshots = vec![snapshot(0, 10, vec![region(0, 100, 1)])];
		assert_eq!(aggregate(&snapshots, WindowSpec::Count(0)), vec![]);
		assert_eq!(aggregate(&snapshots, WindowSpec::Time(0)), vec![]);
		assert_eq!(aggregate(&[], WindowSpec::Count(4)), vec![]);
		assert_eq!(aggregate(&[], WindowSpec::Time(4)), vec![]);
	}

	#[test]
	fn merge_takes_the_maximum_over_overlaps() {
		// A whole region in one snapshot, split across two in the next
		let snapshots = vec![
			snapshot(0, 10, vec![region(1, 10, 5)]),
			snapshot(10, 20, vec![region(1, 5, 2), region(5, 10, 4)]),
		];

		let merged = aggregate(&snapshots, WindowSpec::Count(2));
		assert_eq!(merged.len(), 1);
		for piece in &merged[0].regions {
			assert_eq!(piece.nr_accesses.samples, Some(5));
		}

		// Coverage is exact regardless of insertion order
		let covered = merged[0].regions.iter().map(Region::size).sum::<u64>();
		assert_eq!(covered, 9);

		let reversed = vec![
			snapshot(0, 10, vec![region(1, 5, 2), region(5, 10, 4)]),
			snapshot(10, 20, vec![region(1, 10, 5)]),
		];
		let merged = aggregate(&reversed, WindowSpec::Count(2));
		for piece in &merged[0].regions {
			assert_eq!(piece.nr_accesses.samples, Some(5));
		}
		assert_eq!(merged[0].regions.iter().map(Region::size).sum::<u64>(), 9);
	}

	#[test]
	fn merge_splits_partial_overlaps() {
		let snapshots = vec![
			snapshot(0, 10, vec![region(0, 100, 1)]),
			snapshot(10, 20, vec![region(50, 150, 3)]),
		];

		let merged = aggregate(&snapshots, WindowSpec::Count(2));
		let regions = &merged[0].regions;

		// [0, 100) keeps max(1, 3); the overhang [100, 150) lands on its own
		assert_eq!(regions.len(), 2);
		assert_eq!((regions[0].start, regions[0].end), (0, 100));
		assert_eq!(regions[0].nr_accesses.samples, Some(3));
		assert_eq!((regions[1].start, regions[1].end), (100, 150));
		assert_eq!(regions[1].nr_accesses.samples, Some(3));
	}

	#[test]
	fn merge_sorts_regions_by_start() {
		let snapshots = vec![snapshot(0, 10, vec![
			region(200, 300, 1),
			region(0, 100, 2),
		])];

		let merged = aggregate(&snapshots, WindowSpec::Count(1));
		let starts = merged[0].regions.iter().map(|region| region.start).collect::<Vec<_>>();
		assert_eq!(starts, vec![0, 200]);
	}

	#[test]
	fn merge_counts_unset_samples_as_zero() {
		let snapshots = vec![
			snapshot(0, 10, vec![
				Region::new(0, 100, NrAccesses::unset(), Age::unset()).expect("Valid range"),
			]),
			snapshot(10, 20, vec![region(0, 100, 2)]),
		];

		let merged = aggregate(&snapshots, WindowSpec::Count(2));
		assert_eq!(merged[0].regions, vec![region(0, 100, 2)]);
	}

	#[test]
	fn record_aggregation_replaces_snapshots() {
		let mut record = Record {
			snapshots: vec![
				snapshot(0, 10, vec![region(0, 100, 1)]),
				snapshot(10, 20, vec![region(0, 100, 2)]),
			],
			..Record::default()
		};

		record.aggregate_snapshots(WindowSpec::Count(2));
		assert_eq!(record.snapshots, vec![snapshot(0, 20, vec![region(0, 100, 2)])]);
	}
}
