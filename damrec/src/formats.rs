//! Record file formats
//!
//! A monitoring result can live on disk in several formats: the legacy
//! binary layout, structured json (plain or gzip-compressed) and the text
//! output of trace tooling. This module sniffs the format of a file and
//! dispatches de/encoding to the per-format submodules.

// Modules
pub mod json;
pub mod perf_script;
pub mod record_file;

// Imports
use {
	crate::record::{InvalidRangeError, Record},
	std::{fmt, fs, io, path::Path, str},
};

/// On-disk format of a record file
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum FileFormat {
	/// Legacy binary format
	RecordBinary,

	/// Structured json
	Json,

	/// Gzip-compressed structured json
	JsonCompressed,

	/// `perf script` trace output
	PerfScript,
}

impl FileFormat {
	/// All formats
	pub const ALL: &'static [Self] = &[Self::RecordBinary, Self::Json, Self::JsonCompressed, Self::PerfScript];

	/// Returns this format's name
	#[must_use]
	pub const fn name(self) -> &'static str {
		match self {
			Self::RecordBinary => "record",
			Self::Json => "json",
			Self::JsonCompressed => "json_compressed",
			Self::PerfScript => "perf_script",
		}
	}
}

impl fmt::Display for FileFormat {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.name())
	}
}

impl str::FromStr for FileFormat {
	type Err = ParseFileFormatError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::ALL
			.iter()
			.copied()
			.find(|format| format.name() == s)
			.ok_or_else(|| ParseFileFormatError { name: s.to_owned() })
	}
}

/// Error type for parsing a [`FileFormat`] name
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(thiserror::Error)]
#[error("unknown file format {name:?}")]
pub struct ParseFileFormatError {
	/// The unknown name
	pub name: String,
}

/// Gzip stream magic
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Sniffs the format of `bytes` from its content.
///
/// # Errors
/// Returns [`DecodeError::AmbiguousFormat`] if the content matches no
/// known format, including for empty input.
pub fn sniff(bytes: &[u8]) -> Result<FileFormat, DecodeError> {
	if bytes.is_empty() {
		return Err(DecodeError::AmbiguousFormat);
	}
	if bytes.starts_with(&record_file::MAGIC) {
		return Ok(FileFormat::RecordBinary);
	}
	if bytes.starts_with(&GZIP_MAGIC) {
		return Ok(FileFormat::JsonCompressed);
	}

	// Text content is either json or trace output
	if let Ok(text) = str::from_utf8(bytes) {
		if !text.contains('\0') {
			let trimmed = text.trim_start();
			if trimmed.starts_with('{') || trimmed.starts_with('[') {
				return Ok(FileFormat::Json);
			}
			if text.contains(perf_script::AGGREGATED_MARKER) || text.contains(perf_script::BEFORE_APPLY_MARKER) {
				return Ok(FileFormat::PerfScript);
			}
			return Err(DecodeError::AmbiguousFormat);
		}
	}

	// Anything else is the historical headerless binary layout
	Ok(FileFormat::RecordBinary)
}

/// Decodes all records from `bytes`.
///
/// Uses `format` when given, else sniffs it from the content.
pub fn decode_bytes(bytes: &[u8], format: Option<FileFormat>) -> Result<Vec<Record>, DecodeError> {
	let format = match format {
		Some(format) => format,
		None => self::sniff(bytes)?,
	};
	tracing::debug!(%format, len = bytes.len(), "Decoding records");

	match format {
		FileFormat::RecordBinary => record_file::decode(bytes),
		FileFormat::Json => json::decode(bytes),
		FileFormat::JsonCompressed => json::decode_compressed(bytes),
		FileFormat::PerfScript => perf_script::decode(bytes),
	}
}

/// Decodes all records from the file at `path`
pub fn decode_file(path: &Path, format: Option<FileFormat>) -> Result<Vec<Record>, DecodeError> {
	let bytes = fs::read(path)?;
	self::decode_bytes(&bytes, format)
}

/// Encodes `records` into `format`
pub fn encode(records: &[Record], format: FileFormat) -> Result<Vec<u8>, EncodeError> {
	match format {
		FileFormat::RecordBinary => record_file::encode(records),
		FileFormat::Json => json::encode(records),
		FileFormat::JsonCompressed => json::encode_compressed(records),
		FileFormat::PerfScript => perf_script::encode(records),
	}
}

/// Encodes `records` into the file at `path`
pub fn encode_to_file(records: &[Record], format: FileFormat, path: &Path) -> Result<(), EncodeError> {
	let bytes = self::encode(records, format)?;
	fs::write(path, bytes)?;
	Ok(())
}

/// Error type for decoding record files.
///
/// Any error aborts the whole decode; there are no partial results.
#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum DecodeError {
	/// Magic without a readable version, or a negative version
	#[error("malformed record file header")]
	MalformedHeader,

	/// Input ended inside a tick, target or region
	#[error("record stream ended mid-{element} at offset {offset:#x}")]
	TruncatedStream { element: &'static str, offset: usize },

	/// Content matches no known format
	#[error("unable to determine the file format")]
	AmbiguousFormat,

	/// Trace line with the wrong number of fields for its marker
	#[error("line {line}: expected {expected} fields for {marker:?}, found {found}")]
	FieldCountMismatch {
		line:     usize,
		marker:   &'static str,
		expected: &'static str,
		found:    usize,
	},

	/// Region with an inverted or empty address range
	#[error(transparent)]
	InvalidRange(#[from] InvalidRangeError),

	/// Same target appeared twice within one tick
	#[error("target {target_id} appeared twice within one tick")]
	InconsistentTarget { target_id: u64 },

	/// Negative target id in a version 1 stream
	#[error("negative target id {target_id}")]
	NegativeTargetId { target_id: i32 },

	/// Timestamp that does not fit a nano-second `i64`
	#[error("timestamp {sec}s {nsec}ns does not fit the model")]
	TimestampOutOfRange { sec: i64, nsec: i64 },

	/// Invalid field value
	#[error("invalid value {text:?} for {field}")]
	Value { field: &'static str, text: String },

	/// Non-utf-8 content where text is required
	#[error("text format contains invalid utf-8")]
	Text(#[from] str::Utf8Error),

	/// Io error
	#[error("unable to read records")]
	Io(#[from] io::Error),

	/// Json error
	#[error("unable to parse json records")]
	Json(#[from] serde_json::Error),
}

/// Error type for encoding record files
#[derive(Debug)]
#[derive(thiserror::Error)]
pub enum EncodeError {
	/// Version without a defined layout
	#[error("unsupported record format version {version}")]
	UnsupportedVersion { version: i32 },

	/// Value that does not fit its field width
	#[error("{field} value {value} does not fit the format")]
	Unrepresentable { field: &'static str, value: u64 },

	/// Records with differing snapshot counts
	#[error("records have differing snapshot counts ({first} vs {other})")]
	SnapshotCountMismatch { first: usize, other: usize },

	/// Record without a field the format requires
	#[error("record is missing {field}, which the format requires")]
	MissingField { field: &'static str },

	/// Io error
	#[error("unable to write records")]
	Io(#[from] io::Error),

	/// Json error
	#[error("unable to serialize json records")]
	Json(#[from] serde_json::Error),

	/// Compression error
	#[error("unable to compress records")]
	Compress(#[from] gzp::GzpError),
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn sniff_by_magic() {
		let mut binary = record_file::MAGIC.to_vec();
		binary.extend_from_slice(&2_i32.to_le_bytes());
		assert_eq!(sniff(&binary).ok(), Some(FileFormat::RecordBinary));

		assert_eq!(sniff(&[0x1f, 0x8b, 0x08, 0x00]).ok(), Some(FileFormat::JsonCompressed));
	}

	#[test]
	fn sniff_text_formats() {
		assert_eq!(sniff(b"{\"records\": []}").ok(), Some(FileFormat::Json));
		assert_eq!(sniff(b"  [\n]").ok(), Some(FileFormat::Json));

		let line = b"kdamond.0 1 [000] 10.5: damon:damon_aggregated: target_id=1 nr_regions=1 0-4096: 0 1\n";
		assert_eq!(sniff(line).ok(), Some(FileFormat::PerfScript));
	}

	#[test]
	fn sniff_headerless_binary() {
		// A version-0 stream starts with a raw little-endian timestamp
		let mut bytes = vec![];
		bytes.extend_from_slice(&10_i64.to_le_bytes());
		bytes.extend_from_slice(&0_i64.to_le_bytes());
		bytes.extend_from_slice(&0_u32.to_le_bytes());
		assert_eq!(sniff(&bytes).ok(), Some(FileFormat::RecordBinary));
	}

	#[test]
	fn sniff_rejects_unknown() {
		assert!(matches!(sniff(b""), Err(DecodeError::AmbiguousFormat)));
		assert!(matches!(sniff(b"hello world\n"), Err(DecodeError::AmbiguousFormat)));
	}

	#[test]
	fn format_names_round_trip() {
		for &format in FileFormat::ALL {
			assert_eq!(format.name().parse::<FileFormat>().ok(), Some(format));
		}
		assert!("elf".parse::<FileFormat>().is_err());
	}
}
