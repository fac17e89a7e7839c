//! Legacy binary record files
//!
//! The oldest recording format: an optional 16-byte magic plus an `i32`
//! version, followed by "ticks". Each tick is an `i64` seconds / `i64`
//! nano-seconds timestamp and a `u32` target count, then per target an id
//! (`i32` in version 1, `u64` otherwise), a `u32` region count and the
//! regions as `u64` start / `u64` end / `u32` access samples. Everything
//! is little-endian. Streams without the magic are version 0.

// Imports
use {
	super::{DecodeError, EncodeError},
	crate::record::{Age, NrAccesses, Record, Region, Snapshot},
	byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt},
	damrec_util::{units, ReadByteArray},
	std::io,
};

/// Magic
pub const MAGIC: [u8; 16] = *b"damon_recfmt_ver";

/// Decodes all records from a binary stream.
///
/// Each tick contributes one snapshot to every target's record; records
/// come out in first-appearance order of their target.
pub fn decode(bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
	let mut reader = io::Cursor::new(bytes);

	// Version, from the header if the magic is present
	let version = match reader.read_byte_array::<16>() {
		Ok(magic) if magic == MAGIC => reader
			.read_i32::<LittleEndian>()
			.map_err(|_| DecodeError::MalformedHeader)?,
		_ => {
			reader.set_position(0);
			0
		},
	};
	if version < 0 {
		return Err(DecodeError::MalformedHeader);
	}
	tracing::trace!(version, "Decoding binary record file");

	let mut records = Vec::<Record>::new();
	loop {
		// Each tick starts with its timestamp; a clean end of stream is
		// only valid right before one.
		let offset = reader.position() as usize;
		if offset == bytes.len() {
			break;
		}

		let sec = reader
			.read_i64::<LittleEndian>()
			.map_err(|_| self::truncated("tick", offset))?;
		let nsec = reader
			.read_i64::<LittleEndian>()
			.map_err(|_| self::truncated("tick", offset))?;
		let end_time = sec
			.checked_mul(units::NSECS_PER_SEC as i64)
			.and_then(|ns| ns.checked_add(nsec))
			.ok_or(DecodeError::TimestampOutOfRange { sec, nsec })?;
		let nr_targets = reader
			.read_u32::<LittleEndian>()
			.map_err(|_| self::truncated("tick", offset))?;

		let mut tick_targets = Vec::new();
		for _ in 0..nr_targets {
			let offset = reader.position() as usize;
			let target_id = match version {
				1 => {
					let target_id = reader
						.read_i32::<LittleEndian>()
						.map_err(|_| self::truncated("target", offset))?;
					u64::try_from(target_id).map_err(|_| DecodeError::NegativeTargetId { target_id })?
				},
				_ => reader
					.read_u64::<LittleEndian>()
					.map_err(|_| self::truncated("target", offset))?,
			};
			if tick_targets.contains(&target_id) {
				return Err(DecodeError::InconsistentTarget { target_id });
			}
			tick_targets.push(target_id);

			let nr_regions = reader
				.read_u32::<LittleEndian>()
				.map_err(|_| self::truncated("target", offset))?;
			let mut regions = Vec::new();
			for _ in 0..nr_regions {
				let offset = reader.position() as usize;
				let start = reader
					.read_u64::<LittleEndian>()
					.map_err(|_| self::truncated("region", offset))?;
				let end = reader
					.read_u64::<LittleEndian>()
					.map_err(|_| self::truncated("region", offset))?;
				let samples = reader
					.read_u32::<LittleEndian>()
					.map_err(|_| self::truncated("region", offset))?;

				let region = Region::new(start, end, NrAccesses::from_samples(u64::from(samples)), Age::unset())?;
				regions.push(region);
			}

			// Append this tick's snapshot to the target's record
			let record = match records.iter_mut().find(|record| record.target_id == Some(target_id)) {
				Some(record) => record,
				None => {
					records.push(Record {
						target_id: Some(target_id),
						..Record::default()
					});
					records.last_mut().expect("Just pushed")
				},
			};
			let start_time = match record.snapshots.last() {
				Some(prev) => prev.end_time,
				None => end_time,
			};
			record.snapshots.push(Snapshot {
				start_time,
				end_time,
				regions,
				total_bytes: None,
			});
		}
	}

	// Finally back-fill the first start times
	for record in &mut records {
		record.set_first_snapshot_start_time();
	}

	Ok(records)
}

/// Encodes `records` with the current format version (2)
pub fn encode(records: &[Record]) -> Result<Vec<u8>, EncodeError> {
	self::encode_with_version(records, 2)
}

/// Encodes `records` as binary `version` (1 or 2).
///
/// The layout interleaves all records per tick, so every record must
/// carry a target id and the same number of snapshots; tick timestamps
/// come from the first record.
pub fn encode_with_version(records: &[Record], version: i32) -> Result<Vec<u8>, EncodeError> {
	if !matches!(version, 1 | 2) {
		return Err(EncodeError::UnsupportedVersion { version });
	}

	let nr_snapshots = records.first().map_or(0, |record| record.snapshots.len());
	for record in records {
		if record.snapshots.len() != nr_snapshots {
			return Err(EncodeError::SnapshotCountMismatch {
				first: nr_snapshots,
				other: record.snapshots.len(),
			});
		}
	}
	let nr_targets = u32::try_from(records.len()).map_err(|_| EncodeError::Unrepresentable {
		field: "nr_targets",
		value: records.len() as u64,
	})?;

	let mut bytes = Vec::new();
	bytes.extend_from_slice(&MAGIC);
	bytes.write_i32::<LittleEndian>(version)?;

	for snapshot_idx in 0..nr_snapshots {
		let end_time = records[0].snapshots[snapshot_idx].end_time;
		bytes.write_i64::<LittleEndian>(end_time.div_euclid(units::NSECS_PER_SEC as i64))?;
		bytes.write_i64::<LittleEndian>(end_time.rem_euclid(units::NSECS_PER_SEC as i64))?;
		bytes.write_u32::<LittleEndian>(nr_targets)?;

		for record in records {
			let target_id = record.target_id.ok_or(EncodeError::MissingField { field: "target_id" })?;
			match version {
				1 => {
					let target_id = i32::try_from(target_id).map_err(|_| EncodeError::Unrepresentable {
						field: "target_id",
						value: target_id,
					})?;
					bytes.write_i32::<LittleEndian>(target_id)?;
				},
				_ => bytes.write_u64::<LittleEndian>(target_id)?,
			}

			let snapshot = &record.snapshots[snapshot_idx];
			let nr_regions = u32::try_from(snapshot.regions.len()).map_err(|_| EncodeError::Unrepresentable {
				field: "nr_regions",
				value: snapshot.regions.len() as u64,
			})?;
			bytes.write_u32::<LittleEndian>(nr_regions)?;

			for region in &snapshot.regions {
				let samples = region
					.nr_accesses
					.samples
					.ok_or(EncodeError::MissingField { field: "nr_accesses.samples" })?;
				let samples = u32::try_from(samples).map_err(|_| EncodeError::Unrepresentable {
					field: "nr_accesses.samples",
					value: samples,
				})?;

				bytes.write_u64::<LittleEndian>(region.start)?;
				bytes.write_u64::<LittleEndian>(region.end)?;
				bytes.write_u32::<LittleEndian>(samples)?;
			}
		}
	}

	Ok(bytes)
}

/// Returns a truncation error for `element` at `offset`
fn truncated(element: &'static str, offset: usize) -> DecodeError {
	DecodeError::TruncatedStream { element, offset }
}
