//! Structured json record files
//!
//! The richest format: a `{"records": [...]}` document carrying every
//! model field. Numeric leaves are lenient on read and accept either a
//! raw number or a unit-suffixed text value ("5ms", "2 MiB", "40%",
//! "min" / "max"); raw numbers always win over text parsing. Output
//! always writes raw numbers, with unset values as `null`.
//!
//! The compressed variant wraps the same document in gzip.

// Imports
use {
	super::{DecodeError, EncodeError},
	crate::record::{Age, Intervals, NrAccesses, Record, Region, Snapshot},
	damrec_util::{units, ParseValueError},
	gzp::{deflate::Gzip, ZBuilder},
	std::{
		io::{Read, Write},
		mem, str,
		sync::{Arc, Mutex},
	},
};

/// Decodes all records from a json document
pub fn decode(bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
	let text = str::from_utf8(bytes)?;

	// Accept a bare top-level array too
	let reprs = match text.trim_start().starts_with('[') {
		true => serde_json::from_str::<Vec<RecordRepr>>(text)?,
		false => serde_json::from_str::<FileRepr>(text)?.records,
	};

	reprs.into_iter().map(RecordRepr::into_record).collect()
}

/// Decodes all records from a gzip-compressed json document
pub fn decode_compressed(bytes: &[u8]) -> Result<Vec<Record>, DecodeError> {
	// Note: The compressor emits one gzip member per block, so a
	//       multi-member decoder is required.
	let mut decoder = flate2::read::MultiGzDecoder::new(bytes);
	let mut decompressed = Vec::new();
	decoder.read_to_end(&mut decompressed)?;

	self::decode(&decompressed)
}

/// Encodes `records` as a json document
pub fn encode(records: &[Record]) -> Result<Vec<u8>, EncodeError> {
	let repr = FileRepr {
		records: records.iter().map(RecordRepr::from).collect(),
	};
	let bytes = serde_json::to_vec(&repr)?;
	Ok(bytes)
}

/// Encodes `records` as a gzip-compressed json document
pub fn encode_compressed(records: &[Record]) -> Result<Vec<u8>, EncodeError> {
	let bytes = self::encode(records)?;

	// Note: The compressor writes from worker threads, so the output
	//       buffer must be shared with it.
	let buffer = SharedBuf::default();
	let mut writer = ZBuilder::<Gzip, _>::new().from_writer(buffer.clone());
	writer.write_all(&bytes)?;
	writer.finish()?;

	Ok(buffer.take())
}

/// Shared output buffer for the compressor's worker threads
#[derive(Clone, Default, Debug)]
struct SharedBuf(Arc<Mutex<Vec<u8>>>);

impl SharedBuf {
	/// Takes the accumulated bytes
	fn take(&self) -> Vec<u8> {
		mem::take(&mut *self.0.lock().expect("Poisoned"))
	}
}

impl Write for SharedBuf {
	fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
		self.0.lock().expect("Poisoned").extend_from_slice(buf);
		Ok(buf.len())
	}

	fn flush(&mut self) -> std::io::Result<()> {
		Ok(())
	}
}

/// Whole-document representation
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
struct FileRepr {
	records: Vec<RecordRepr>,
}

/// Record wire representation.
///
/// Field declaration order fixes the key order of encoded output.
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
struct RecordRepr {
	#[serde(default)]
	kdamond_idx: Option<NumOrText<u32>>,
	#[serde(default)]
	context_idx: Option<NumOrText<u32>>,
	#[serde(default)]
	intervals:   Option<IntervalsRepr>,
	#[serde(default)]
	scheme_idx:  Option<NumOrText<u32>>,
	#[serde(default)]
	target_id:   Option<NumOrText<u64>>,
	snapshots:   Vec<SnapshotRepr>,
}

/// Intervals wire representation
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
struct IntervalsRepr {
	sample_us: NumOrText<u64>,
	aggr_us:   NumOrText<u64>,
	update_us: NumOrText<u64>,
}

/// Snapshot wire representation
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
struct SnapshotRepr {
	start_time:  NumOrText<i64>,
	end_time:    NumOrText<i64>,
	regions:     Vec<RegionRepr>,
	#[serde(default)]
	total_bytes: Option<NumOrText<u64>>,
}

/// Region wire representation
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
struct RegionRepr {
	start:       NumOrText<u64>,
	end:         NumOrText<u64>,
	#[serde(default)]
	nr_accesses: NrAccessesRepr,
	#[serde(default)]
	age:         AgeRepr,
}

/// Access frequency wire representation
#[derive(Debug, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
struct NrAccessesRepr {
	#[serde(default)]
	samples: Option<NumOrText<u64>>,
	#[serde(default)]
	percent: Option<NumOrText<f64>>,
}

/// Age wire representation
#[derive(Debug, Default)]
#[derive(serde::Serialize, serde::Deserialize)]
struct AgeRepr {
	#[serde(default)]
	usec:           Option<NumOrText<u64>>,
	#[serde(default)]
	aggr_intervals: Option<NumOrText<u64>>,
}

/// A raw number or a unit-suffixed text value.
///
/// Note: The number variant is declared first so raw numbers never
///       deserialize as text.
#[derive(Debug)]
#[derive(serde::Serialize, serde::Deserialize)]
#[serde(untagged)]
enum NumOrText<N> {
	Num(N),
	Text(String),
}

impl NumOrText<u64> {
	/// Resolves this value, parsing text with `parse`
	fn resolve(self, field: &'static str, parse: fn(&str) -> Result<u64, ParseValueError>) -> Result<u64, DecodeError> {
		match self {
			Self::Num(value) => Ok(value),
			Self::Text(text) => parse(&text).map_err(|_| DecodeError::Value { field, text }),
		}
	}
}

impl NumOrText<u32> {
	/// Resolves this value as a plain index
	fn resolve_idx(self, field: &'static str) -> Result<u32, DecodeError> {
		match self {
			Self::Num(value) => Ok(value),
			Self::Text(text) => units::parse_count(&text)
				.ok()
				.and_then(|value| u32::try_from(value).ok())
				.ok_or(DecodeError::Value { field, text }),
		}
	}
}

impl NumOrText<i64> {
	/// Resolves this value as a nano-second timestamp
	fn resolve_time_ns(self, field: &'static str) -> Result<i64, DecodeError> {
		match self {
			Self::Num(value) => Ok(value),
			Self::Text(text) => units::parse_time_ns(&text)
				.ok()
				.and_then(|ns| i64::try_from(ns).ok())
				.ok_or(DecodeError::Value { field, text }),
		}
	}
}

impl NumOrText<f64> {
	/// Resolves this value as a percentage
	fn resolve_percent(self, field: &'static str) -> Result<f64, DecodeError> {
		match self {
			Self::Num(value) => Ok(value),
			Self::Text(text) => units::parse_percent(&text).map_err(|_| DecodeError::Value { field, text }),
		}
	}
}

impl RecordRepr {
	/// Converts this representation into its record
	fn into_record(self) -> Result<Record, DecodeError> {
		Ok(Record {
			kdamond_idx: self
				.kdamond_idx
				.map(|value| value.resolve_idx("kdamond_idx"))
				.transpose()?,
			context_idx: self
				.context_idx
				.map(|value| value.resolve_idx("context_idx"))
				.transpose()?,
			intervals:   self.intervals.map(IntervalsRepr::into_intervals).transpose()?,
			scheme_idx:  self
				.scheme_idx
				.map(|value| value.resolve_idx("scheme_idx"))
				.transpose()?,
			target_id:   self
				.target_id
				.map(|value| value.resolve("target_id", units::parse_count))
				.transpose()?,
			snapshots:   self
				.snapshots
				.into_iter()
				.map(SnapshotRepr::into_snapshot)
				.collect::<Result<_, _>>()?,
		})
	}
}

impl From<&Record> for RecordRepr {
	fn from(record: &Record) -> Self {
		Self {
			kdamond_idx: record.kdamond_idx.map(NumOrText::Num),
			context_idx: record.context_idx.map(NumOrText::Num),
			intervals:   record.intervals.as_ref().map(IntervalsRepr::from),
			scheme_idx:  record.scheme_idx.map(NumOrText::Num),
			target_id:   record.target_id.map(NumOrText::Num),
			snapshots:   record.snapshots.iter().map(SnapshotRepr::from).collect(),
		}
	}
}

impl IntervalsRepr {
	/// Converts this representation into its intervals
	fn into_intervals(self) -> Result<Intervals, DecodeError> {
		Ok(Intervals {
			sample_us: self.sample_us.resolve("sample_us", units::parse_time_us)?,
			aggr_us:   self.aggr_us.resolve("aggr_us", units::parse_time_us)?,
			update_us: self.update_us.resolve("update_us", units::parse_time_us)?,
		})
	}
}

impl From<&Intervals> for IntervalsRepr {
	fn from(intervals: &Intervals) -> Self {
		Self {
			sample_us: NumOrText::Num(intervals.sample_us),
			aggr_us:   NumOrText::Num(intervals.aggr_us),
			update_us: NumOrText::Num(intervals.update_us),
		}
	}
}

impl SnapshotRepr {
	/// Converts this representation into its snapshot
	fn into_snapshot(self) -> Result<Snapshot, DecodeError> {
		Ok(Snapshot {
			start_time:  self.start_time.resolve_time_ns("start_time")?,
			end_time:    self.end_time.resolve_time_ns("end_time")?,
			regions:     self
				.regions
				.into_iter()
				.map(RegionRepr::into_region)
				.collect::<Result<_, _>>()?,
			total_bytes: self
				.total_bytes
				.map(|value| value.resolve("total_bytes", units::parse_sz_bytes))
				.transpose()?,
		})
	}
}

impl From<&Snapshot> for SnapshotRepr {
	fn from(snapshot: &Snapshot) -> Self {
		Self {
			start_time:  NumOrText::Num(snapshot.start_time),
			end_time:    NumOrText::Num(snapshot.end_time),
			regions:     snapshot.regions.iter().map(RegionRepr::from).collect(),
			total_bytes: snapshot.total_bytes.map(NumOrText::Num),
		}
	}
}

impl RegionRepr {
	/// Converts this representation into its region
	fn into_region(self) -> Result<Region, DecodeError> {
		let start = self.start.resolve("start", units::parse_sz_bytes)?;
		let end = self.end.resolve("end", units::parse_sz_bytes)?;

		let nr_accesses = NrAccesses {
			samples: self
				.nr_accesses
				.samples
				.map(|value| value.resolve("nr_accesses.samples", units::parse_count))
				.transpose()?,
			percent: self
				.nr_accesses
				.percent
				.map(|value| value.resolve_percent("nr_accesses.percent"))
				.transpose()?,
		};
		let age = Age {
			usec:           self
				.age
				.usec
				.map(|value| value.resolve("age.usec", units::parse_time_us))
				.transpose()?,
			aggr_intervals: self
				.age
				.aggr_intervals
				.map(|value| value.resolve("age.aggr_intervals", units::parse_count))
				.transpose()?,
		};

		Region::new(start, end, nr_accesses, age).map_err(Into::into)
	}
}

impl From<&Region> for RegionRepr {
	fn from(region: &Region) -> Self {
		Self {
			start:       NumOrText::Num(region.start),
			end:         NumOrText::Num(region.end),
			nr_accesses: NrAccessesRepr {
				samples: region.nr_accesses.samples.map(NumOrText::Num),
				percent: region.nr_accesses.percent.map(NumOrText::Num),
			},
			age:         AgeRepr {
				usec:           region.age.usec.map(NumOrText::Num),
				aggr_intervals: region.age.aggr_intervals.map(NumOrText::Num),
			},
		}
	}
}
