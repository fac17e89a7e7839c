//! Trace-tool text record files
//!
//! Parses the text output of `perf script` over the monitor's tracepoints.
//! Each line is whitespace-split; field 4 names the tracepoint and decides
//! the layout of the rest. Lines of foreign events are skipped. Regions
//! accumulate into the per-target open snapshot until its declared region
//! count is reached; a trailing partially-filled snapshot is kept.
//!
//! The writer appends a synthetic "0-0: -1 -1" snapshot to single-snapshot
//! records so the reader's start-time back-fill can reconstruct the real
//! start; the reader strips it again after back-filling.

// Imports
use {
	super::{DecodeError, EncodeError},
	crate::record::{Age, NrAccesses, Record, Region, Snapshot},
	damrec_util::units,
	std::{io::Write, str},
};

/// Marker of aggregated-snapshot lines
pub const AGGREGATED_MARKER: &str = "damon:damon_aggregated:";

/// Marker of scheme-application lines
pub const BEFORE_APPLY_MARKER: &str = "damon:damos_before_apply:";

/// Decodes all records from trace text
pub fn decode(bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
	let text = str::from_utf8(bytes)?;

	let mut decoder = Decoder::default();
	for (line_idx, line) in text.lines().enumerate() {
		let line_nr = line_idx + 1;
		let fields = line.split_whitespace().collect::<Vec<_>>();
		if fields.len() < 5 {
			continue;
		}

		match fields[4] {
			AGGREGATED_MARKER => decoder.parse_aggregated(line_nr, &fields)?,
			BEFORE_APPLY_MARKER => decoder.parse_before_apply(line_nr, &fields)?,
			_ => continue,
		}
	}

	Ok(decoder.finish())
}

/// Encodes `records` as aggregated-snapshot trace text.
///
/// Scheme and context indices are not representable in aggregated lines
/// and are dropped; timestamps are written with micro-second precision.
pub fn encode(records: &[Record]) -> Result<Vec<u8>, EncodeError> {
	let mut bytes = Vec::new();
	for record in records {
		let target_id = record.target_id.ok_or(EncodeError::MissingField { field: "target_id" })?;
		let kdamond_idx = record.kdamond_idx.unwrap_or(0);

		for snapshot in &record.snapshots {
			self::write_snapshot(&mut bytes, kdamond_idx, target_id, snapshot)?;
		}

		// Single-snapshot records get the synthetic follow-up snapshot, with
		// its timestamp mirrored past the end so the back-fill will undo it.
		if let [snapshot] = &*record.snapshots {
			let span = snapshot.end_time.saturating_sub(snapshot.start_time);
			let (sec, usec) = self::timestamp_parts(snapshot.end_time.saturating_add(span));
			writeln!(
				bytes,
				"kdamond.{kdamond_idx} 0 [000] {sec}.{usec:06}: {AGGREGATED_MARKER} target_id={target_id} \
				 nr_regions=1 0-0: -1 -1"
			)?;
		}
	}

	Ok(bytes)
}

/// Decoder state: records under construction, in first-appearance order
#[derive(Default, Debug)]
struct Decoder {
	/// Finished and in-progress records
	records: Vec<Record>,

	/// Grouping key of each record
	keys: Vec<RecordKey>,

	/// Regions still missing from each record's open snapshot
	remaining: Vec<u64>,

	/// Whether each record ends with the synthetic snapshot
	has_fake: Vec<bool>,
}

/// Grouping key of a record's lines
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum RecordKey {
	/// Plain monitoring of a target
	Target { target_id: u64 },

	/// Scheme-application monitoring of a target
	Scheme {
		ctx_idx:    u32,
		scheme_idx: u32,
		target_idx: u64,
	},
}

impl Decoder {
	/// Parses an aggregated-snapshot line
	fn parse_aggregated(&mut self, line_nr: usize, fields: &[&str]) -> Result<(), DecodeError> {
		if !matches!(fields.len(), 9 | 10) {
			return Err(DecodeError::FieldCountMismatch {
				line:     line_nr,
				marker:   AGGREGATED_MARKER,
				expected: "9 or 10",
				found:    fields.len(),
			});
		}

		let end_time = self::parse_timestamp_ns(fields[3])?;
		let target_id = self::parse_field::<u64>("target_id", self::split_key_value(fields[5], "target_id")?)?;
		let nr_regions = self::parse_field::<u64>("nr_regions", self::split_key_value(fields[6], "nr_regions")?)?;
		let (start, end) = self::split_addr_pair(fields[7])?;
		let samples = self::parse_field::<i64>("nr_accesses", fields[8])?;
		let age = match fields.len() {
			10 => Some(self::parse_field::<i64>("age", fields[9])?),
			_ => None,
		};

		let key = RecordKey::Target { target_id };
		let idx = self.record_idx(key, self::comm_kdamond_idx(fields[0]));

		// The synthetic snapshot carries no region of its own
		if start == 0 && end == 0 && samples < 0 {
			let record = &mut self.records[idx];
			let start_time = record.snapshots.last().map_or(end_time, |prev| prev.end_time);
			record.snapshots.push(Snapshot {
				start_time,
				end_time,
				regions: vec![],
				total_bytes: None,
			});
			self.remaining[idx] = 0;
			self.has_fake[idx] = true;
			return Ok(());
		}

		let samples = u64::try_from(samples).map_err(|_| DecodeError::Value {
			field: "nr_accesses",
			text:  fields[8].to_owned(),
		})?;
		let age = match age {
			Some(age) => Age::from_aggr_intervals(u64::try_from(age).map_err(|_| DecodeError::Value {
				field: "age",
				text:  fields[9].to_owned(),
			})?),
			None => Age::unset(),
		};

		let region = Region::new(start, end, NrAccesses::from_samples(samples), age)?;
		self.push_region(idx, end_time, nr_regions, region);
		Ok(())
	}

	/// Parses a scheme-application line
	fn parse_before_apply(&mut self, line_nr: usize, fields: &[&str]) -> Result<(), DecodeError> {
		if fields.len() != 12 {
			return Err(DecodeError::FieldCountMismatch {
				line:     line_nr,
				marker:   BEFORE_APPLY_MARKER,
				expected: "12",
				found:    fields.len(),
			});
		}

		let end_time = self::parse_timestamp_ns(fields[3])?;
		let ctx_idx = self::parse_field::<u32>("ctx_idx", self::split_key_value(fields[5], "ctx_idx")?)?;
		let scheme_idx = self::parse_field::<u32>("scheme_idx", self::split_key_value(fields[6], "scheme_idx")?)?;
		let target_idx = self::parse_field::<u64>("target_idx", self::split_key_value(fields[7], "target_idx")?)?;
		let nr_regions = self::parse_field::<u64>("nr_regions", self::split_key_value(fields[8], "nr_regions")?)?;
		let (start, end) = self::split_addr_pair(fields[9])?;
		let samples = self::parse_field::<u64>("nr_accesses", fields[10])?;
		let age = self::parse_field::<u64>("age", fields[11])?;

		let key = RecordKey::Scheme {
			ctx_idx,
			scheme_idx,
			target_idx,
		};
		let idx = self.record_idx(key, self::comm_kdamond_idx(fields[0]));

		let region = Region::new(
			start,
			end,
			NrAccesses::from_samples(samples),
			Age::from_aggr_intervals(age),
		)?;
		self.push_region(idx, end_time, nr_regions, region);
		Ok(())
	}

	/// Returns the record index for `key`, creating its record if new
	fn record_idx(&mut self, key: RecordKey, kdamond_idx: Option<u32>) -> usize {
		match self.keys.iter().position(|&existing| existing == key) {
			Some(idx) => idx,
			None => {
				let record = match key {
					RecordKey::Target { target_id } => Record {
						kdamond_idx,
						target_id: Some(target_id),
						..Record::default()
					},
					RecordKey::Scheme {
						ctx_idx,
						scheme_idx,
						target_idx,
					} => Record {
						kdamond_idx,
						context_idx: Some(ctx_idx),
						scheme_idx: Some(scheme_idx),
						target_id: Some(target_idx),
						..Record::default()
					},
				};

				self.records.push(record);
				self.keys.push(key);
				self.remaining.push(0);
				self.has_fake.push(false);
				self.records.len() - 1
			},
		}
	}

	/// Pushes `region` into record `idx`'s open snapshot, opening one at
	/// `end_time` declaring `nr_regions` when the previous is complete
	fn push_region(&mut self, idx: usize, end_time: i64, nr_regions: u64, region: Region) {
		let record = &mut self.records[idx];
		if self.remaining[idx] == 0 {
			let start_time = record.snapshots.last().map_or(end_time, |prev| prev.end_time);
			record.snapshots.push(Snapshot {
				start_time,
				end_time,
				regions: vec![],
				total_bytes: None,
			});
			self.remaining[idx] = nr_regions.max(1);
		}

		let snapshot = record.snapshots.last_mut().expect("Just opened");
		snapshot.regions.push(region);
		self.remaining[idx] -= 1;
	}

	/// Finishes decoding: back-fills start times, then strips the
	/// synthetic snapshots
	fn finish(mut self) -> Vec<Record> {
		for (record, has_fake) in self.records.iter_mut().zip(self.has_fake) {
			record.set_first_snapshot_start_time();
			if has_fake {
				record.snapshots.pop();
			}
		}
		self.records
	}
}

/// Writes every region of `snapshot` as one aggregated line
fn write_snapshot(bytes: &mut Vec<u8>, kdamond_idx: u32, target_id: u64, snapshot: &Snapshot) -> Result<(), EncodeError> {
	let (sec, usec) = self::timestamp_parts(snapshot.end_time);
	let nr_regions = snapshot.regions.len();

	for region in &snapshot.regions {
		let samples = region.nr_accesses.samples.ok_or(EncodeError::MissingField {
			field: "nr_accesses.samples",
		})?;

		write!(
			bytes,
			"kdamond.{kdamond_idx} 0 [000] {sec}.{usec:06}: {AGGREGATED_MARKER} target_id={target_id} \
			 nr_regions={nr_regions} {start}-{end}: {samples}",
			start = region.start,
			end = region.end,
		)?;
		if let Some(age) = region.age.aggr_intervals {
			write!(bytes, " {age}")?;
		}
		writeln!(bytes)?;
	}

	Ok(())
}

/// Splits a nano-second timestamp into whole seconds and micro-seconds
fn timestamp_parts(time: i64) -> (i64, i64) {
	let sec = time.div_euclid(units::NSECS_PER_SEC as i64);
	let usec = time.rem_euclid(units::NSECS_PER_SEC as i64) / units::NSECS_PER_USEC as i64;
	(sec, usec)
}

/// Parses a `<sec>.<frac>:` timestamp into nano-seconds.
///
/// Decimal-exact: the fraction is taken digit-wise, so written
/// micro-second timestamps survive a round-trip unchanged.
fn parse_timestamp_ns(token: &str) -> Result<i64, DecodeError> {
	let value = || DecodeError::Value {
		field: "timestamp",
		text:  token.to_owned(),
	};

	let timestamp = token.strip_suffix(':').ok_or_else(value)?;
	let (sec, frac) = match timestamp.split_once('.') {
		Some((sec, frac)) => (sec, frac),
		None => (timestamp, ""),
	};
	if !frac.chars().all(|ch| ch.is_ascii_digit()) {
		return Err(value());
	}

	let sec = sec.parse::<i64>().map_err(|_| value())?;
	let mut nsec = 0_i64;
	let mut scale = units::NSECS_PER_SEC as i64;
	for digit in frac.chars().take(9) {
		let digit = digit.to_digit(10).expect("Just validated");
		scale /= 10;
		nsec += i64::from(digit) * scale;
	}

	sec.checked_mul(units::NSECS_PER_SEC as i64)
		.and_then(|ns| ns.checked_add(nsec))
		.ok_or(DecodeError::TimestampOutOfRange { sec, nsec })
}

/// Returns the kdamond index from a `kdamond.<idx>` comm, if it is one
fn comm_kdamond_idx(comm: &str) -> Option<u32> {
	comm.strip_prefix("kdamond.").and_then(|idx| idx.parse().ok())
}

/// Returns the value of a `<key>=<value>` token
fn split_key_value<'a>(token: &'a str, key: &'static str) -> Result<&'a str, DecodeError> {
	token
		.strip_prefix(key)
		.and_then(|token| token.strip_prefix('='))
		.ok_or_else(|| DecodeError::Value {
			field: key,
			text:  token.to_owned(),
		})
}

/// Splits a `<start>-<end>:` address pair token
fn split_addr_pair(token: &str) -> Result<(u64, u64), DecodeError> {
	let value = || DecodeError::Value {
		field: "address range",
		text:  token.to_owned(),
	};

	let pair = token.strip_suffix(':').ok_or_else(value)?;
	let (start, end) = pair.split_once('-').ok_or_else(value)?;
	Ok((start.parse().map_err(|_| value())?, end.parse().map_err(|_| value())?))
}

/// Parses an integer field token
fn parse_field<T: str::FromStr>(field: &'static str, token: &str) -> Result<T, DecodeError> {
	token.parse().map_err(|_| DecodeError::Value {
		field,
		text: token.to_owned(),
	})
}

#[cfg(test)]
mod tests {
	use super::*;

	/// Builds a region with sample-unit accesses and an age
	fn region(start: u64, end: u64, samples: u64, age: u64) -> Region {
		Region::new(
			start,
			end,
			NrAccesses::from_samples(samples),
			Age::from_aggr_intervals(age),
		)
		.expect("Valid range")
	}

	/// Builds a record the way the decoder chains snapshot times
	fn record(target_id: u64, snapshots: &[(i64, Vec<Region>)]) -> Record {
		let mut record = Record {
			kdamond_idx: Some(0),
			target_id: Some(target_id),
			snapshots: snapshots
				.iter()
				.enumerate()
				.map(|(idx, (end_time, regions))| Snapshot {
					start_time:  match idx {
						0 => *end_time,
						_ => snapshots[idx - 1].0,
					},
					end_time:    *end_time,
					regions:     regions.clone(),
					total_bytes: None,
				})
				.collect(),
			..Record::default()
		};
		record.set_first_snapshot_start_time();
		record
	}

	#[test]
	fn decode_aggregated_lines() {
		let text = "\
			# some perf header\n\
			kdamond.0  4452 [000] 10.000000: damon:damon_aggregated: target_id=1 nr_regions=2 4096-8192: 3 5\n\
			kdamond.0  4452 [000] 10.000010: damon:damon_aggregated: target_id=1 nr_regions=2 8192-16384: 0 1\n\
			kdamond.0  4452 [000] 10.000020: damon:damon_aggregated: target_id=2 nr_regions=1 0-4096: 7 2\n\
			swapper 0 [001] 10.5: sched:sched_switch: some other event\n\
			kdamond.0  4452 [000] 20.000000: damon:damon_aggregated: target_id=1 nr_regions=1 4096-8192: 4 6\n\
			kdamond.0  4452 [000] 20.000020: damon:damon_aggregated: target_id=2 nr_regions=1 0-4096: 8 3\n";

		let records = decode(text.as_bytes()).expect("Unable to decode");
		assert_eq!(records.len(), 2);

		// Target 1: two snapshots; the first takes its timestamp from its
		// first line
		let first = &records[0];
		assert_eq!(first.target_id, Some(1));
		assert_eq!(first.kdamond_idx, Some(0));
		assert_eq!(first.snapshots.len(), 2);
		assert_eq!(first.snapshots[0].end_time, 10_000_000_000);
		assert_eq!(first.snapshots[0].regions, vec![
			region(4096, 8192, 3, 5),
			region(8192, 16384, 0, 1),
		]);
		assert_eq!(first.snapshots[1].end_time, 20_000_000_000);
		assert_eq!(first.snapshots[1].start_time, 10_000_000_000);

		// Back-fill: start[0] = 10s - (20s - 10s) / 1
		assert_eq!(first.snapshots[0].start_time, 0);

		let second = &records[1];
		assert_eq!(second.target_id, Some(2));
		assert_eq!(second.snapshots.len(), 2);
		assert_eq!(second.snapshots[0].end_time, 10_000_020_000);
	}

	#[test]
	fn decode_without_age() {
		let text = "kdamond.0 1 [000] 10.000000: damon:damon_aggregated: target_id=1 nr_regions=1 4096-8192: 3\n";
		let records = decode(text.as_bytes()).expect("Unable to decode");
		assert_eq!(records[0].snapshots[0].regions[0].age, Age::unset());
	}

	#[test]
	fn decode_before_apply_lines() {
		let text = "\
			kdamond.0 47293 [000] 80801.983651: damon:damos_before_apply: ctx_idx=0 scheme_idx=2 target_idx=1 \
			 nr_regions=1 121932607488-135128711168: 0 136\n";

		let records = decode(text.as_bytes()).expect("Unable to decode");
		let record = &records[0];
		assert_eq!(record.context_idx, Some(0));
		assert_eq!(record.scheme_idx, Some(2));
		assert_eq!(record.target_id, Some(1));
		assert_eq!(record.snapshots[0].end_time, 80_801_983_651_000);
		assert_eq!(record.snapshots[0].regions, vec![region(
			121_932_607_488,
			135_128_711_168,
			0,
			136
		)]);
	}

	#[test]
	fn decode_rejects_field_count() {
		let text = "\
			kdamond.0 1 [000] 10.000000: damon:damon_aggregated: target_id=1 nr_regions=1 4096-8192: 3 5\n\
			kdamond.0 1 [000] 10.000000: damon:damon_aggregated: target_id=1 nr_regions=1 4096-8192: 3 5 9\n";

		assert!(matches!(
			decode(text.as_bytes()),
			Err(DecodeError::FieldCountMismatch { line: 2, found: 11, .. })
		));
	}

	#[test]
	fn decode_keeps_trailing_partial_snapshot() {
		let text = "\
			kdamond.0 1 [000] 10.000000: damon:damon_aggregated: target_id=1 nr_regions=3 0-4096: 1 1\n\
			kdamond.0 1 [000] 10.000000: damon:damon_aggregated: target_id=1 nr_regions=3 4096-8192: 2 1\n";

		let records = decode(text.as_bytes()).expect("Unable to decode");
		assert_eq!(records[0].snapshots.len(), 1);
		assert_eq!(records[0].snapshots[0].regions.len(), 2);
	}

	#[test]
	fn round_trip() {
		let records = vec![
			record(1, &[
				(10_000_000_000, vec![region(4096, 8192, 3, 5), region(8192, 16384, 0, 1)]),
				(20_000_000_000, vec![region(4096, 8192, 4, 6)]),
			]),
			record(2, &[
				(10_000_020_000, vec![region(0, 4096, 7, 2)]),
				(20_000_020_000, vec![region(0, 4096, 8, 3)]),
			]),
		];

		let bytes = encode(&records).expect("Unable to encode");
		let decoded = decode(&bytes).expect("Unable to decode");
		assert_eq!(decoded, records);
	}

	#[test]
	fn fake_snapshot_round_trips_single_snapshots() {
		// One real snapshot from 4s to 5s
		let mut single = record(1, &[(5_000_000_000, vec![region(4096, 8192, 3, 0)])]);
		single.snapshots[0].start_time = 4_000_000_000;

		let bytes = encode(&[single.clone()]).expect("Unable to encode");
		let text = str::from_utf8(&bytes).expect("Encoded utf-8");

		// The synthetic snapshot is on the wire, mirrored past the end
		assert!(text.contains("nr_regions=1 0-0: -1 -1"));
		assert!(text.contains("6.000000:"));

		// And decoding strips it, recovering the original start time
		let decoded = decode(&bytes).expect("Unable to decode");
		assert_eq!(decoded, vec![single]);
	}

	#[test]
	fn timestamps_parse_decimal_exact() {
		assert_eq!(parse_timestamp_ns("82877.315633:").ok(), Some(82_877_315_633_000));
		assert_eq!(parse_timestamp_ns("10:").ok(), Some(10_000_000_000));
		assert_eq!(parse_timestamp_ns("0.000000001:").ok(), Some(1));
		assert!(parse_timestamp_ns("10.5").is_err());
		assert!(parse_timestamp_ns("ten:").is_err());
	}

	#[test]
	fn decode_ignores_unknown_lines() {
		let text = "\n# comment\nnot a trace line\nswapper 0 [000] 1.0: cpu_idle: state=4294967295\n";
		assert_eq!(decode(text.as_bytes()).expect("Unable to decode"), vec![]);
	}
}
