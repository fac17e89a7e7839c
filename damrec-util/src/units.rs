//! Value units
//!
//! Parsing and formatting for the human-readable units used by record
//! files and arguments: time durations ("5ms"), byte sizes ("4 KiB"),
//! percentages ("12.5%") and plain counts, along with the "min" / "max"
//! range sentinels.

/// Nano-seconds per micro-second
pub const NSECS_PER_USEC: u64 = 1_000;
/// Nano-seconds per milli-second
pub const NSECS_PER_MSEC: u64 = 1_000_000;
/// Nano-seconds per second
pub const NSECS_PER_SEC: u64 = 1_000_000_000;
/// Nano-seconds per minute
pub const NSECS_PER_MIN: u64 = 60 * NSECS_PER_SEC;
/// Nano-seconds per hour
pub const NSECS_PER_HOUR: u64 = 60 * NSECS_PER_MIN;
/// Nano-seconds per day
pub const NSECS_PER_DAY: u64 = 24 * NSECS_PER_HOUR;

/// Time units, in nano-seconds
const TIME_UNITS: &[(&str, u64)] = &[
	("ns", 1),
	("µs", NSECS_PER_USEC),
	("us", NSECS_PER_USEC),
	("ms", NSECS_PER_MSEC),
	("s", NSECS_PER_SEC),
	("m", NSECS_PER_MIN),
	("h", NSECS_PER_HOUR),
	("d", NSECS_PER_DAY),
];

/// Size units, in bytes
const SZ_UNITS: &[(&str, u64)] = &[
	("B", 1),
	("K", 1 << 10),
	("KiB", 1 << 10),
	("M", 1 << 20),
	("MiB", 1 << 20),
	("G", 1 << 30),
	("GiB", 1 << 30),
	("T", 1 << 40),
	("TiB", 1 << 40),
	("P", 1 << 50),
	("PiB", 1 << 50),
	("E", 1 << 60),
	("EiB", 1 << 60),
];

/// Error type for parsing unit values
#[derive(Clone, PartialEq, Eq, Debug)]
#[derive(thiserror::Error)]
pub enum ParseValueError {
	/// Empty value
	#[error("empty value")]
	Empty,

	/// Unknown unit
	#[error("unknown unit {unit:?}")]
	UnknownUnit { unit: String },

	/// Invalid number
	#[error("invalid number {text:?}")]
	InvalidNumber { text: String },

	/// Out of range
	#[error("value {text:?} is out of range")]
	OutOfRange { text: String },
}

/// Parses a time duration into nano-seconds.
///
/// Accepts a plain number (taken as nano-seconds), a unit-suffixed value
/// ("5ms", "1.5 s", "2m") and the sentinels "min" / "max".
pub fn parse_time_ns(text: &str) -> Result<u64, ParseValueError> {
	parse_value(text, TIME_UNITS, 1)
}

/// Parses a time duration into micro-seconds.
///
/// Same as [`parse_time_ns`], except plain numbers are taken as
/// micro-seconds. Values finer than a micro-second are truncated.
pub fn parse_time_us(text: &str) -> Result<u64, ParseValueError> {
	let ns = parse_value(text, TIME_UNITS, NSECS_PER_USEC)?;
	Ok(match ns {
		u64::MAX => u64::MAX,
		ns => ns / NSECS_PER_USEC,
	})
}

/// Parses a byte size.
///
/// Accepts a plain number (taken as bytes), a unit-suffixed value
/// ("4K", "4 KiB", "2.5G") and the sentinels "min" / "max".
pub fn parse_sz_bytes(text: &str) -> Result<u64, ParseValueError> {
	parse_value(text, SZ_UNITS, 1)
}

/// Parses a plain count.
///
/// Accepts a number and the sentinels "min" / "max".
pub fn parse_count(text: &str) -> Result<u64, ParseValueError> {
	parse_value(text, &[], 1)
}

/// Parses a percentage.
///
/// Accepts a plain number, a "%"-suffixed value and the sentinels
/// "min" (0) / "max" (100).
pub fn parse_percent(text: &str) -> Result<f64, ParseValueError> {
	let text = text.trim();
	match text {
		"" => return Err(ParseValueError::Empty),
		"min" => return Ok(0.0),
		"max" => return Ok(100.0),
		_ => (),
	}

	let number = text.strip_suffix('%').unwrap_or(text).trim_end();
	let value = number
		.replace(',', "")
		.parse::<f64>()
		.map_err(|_| ParseValueError::InvalidNumber { text: text.to_owned() })?;
	match value.is_finite() && value >= 0.0 {
		true => Ok(value),
		false => Err(ParseValueError::InvalidNumber { text: text.to_owned() }),
	}
}

/// Parses a value with one of `units` as an optional suffix.
///
/// Bare numbers are scaled by `bare_unit`; "min" is 0 and "max" is `u64::MAX`.
fn parse_value(text: &str, units: &[(&str, u64)], bare_unit: u64) -> Result<u64, ParseValueError> {
	let text = text.trim();
	match text {
		"" => return Err(ParseValueError::Empty),
		"min" => return Ok(0),
		"max" => return Ok(u64::MAX),
		_ => (),
	}

	// Split the number from the unit suffix
	let unit_start = text
		.char_indices()
		.find(|&(_, ch)| !matches!(ch, '0'..='9' | '.' | ','))
		.map_or(text.len(), |(idx, _)| idx);
	let (number, unit) = text.split_at(unit_start);
	let number = number.replace(',', "");
	let unit = unit.trim_start();

	let mult = match unit {
		"" => bare_unit,
		_ => units
			.iter()
			.find(|&&(name, _)| name == unit)
			.map(|&(_, mult)| mult)
			.ok_or_else(|| ParseValueError::UnknownUnit { unit: unit.to_owned() })?,
	};

	// Note: Integer parsing takes priority so large exact values
	//       don't get rounded through a float.
	if let Ok(value) = number.parse::<u64>() {
		return value
			.checked_mul(mult)
			.ok_or_else(|| ParseValueError::OutOfRange { text: text.to_owned() });
	}

	let value = number
		.parse::<f64>()
		.map_err(|_| ParseValueError::InvalidNumber { text: text.to_owned() })?;
	if !value.is_finite() || value < 0.0 {
		return Err(ParseValueError::InvalidNumber { text: text.to_owned() });
	}
	let value = value * mult as f64;
	match value <= u64::MAX as f64 {
		true => Ok(value as u64),
		false => Err(ParseValueError::OutOfRange { text: text.to_owned() }),
	}
}

/// Formats a time duration from nano-seconds.
///
/// Uses the largest unit that represents the duration exactly, so the
/// output always parses back to the same value.
pub fn format_time_ns(ns: u64) -> String {
	if ns == u64::MAX {
		return "max".to_owned();
	}

	let &(unit, mult) = TIME_UNITS
		.iter()
		.rev()
		.find(|&&(_, mult)| ns != 0 && ns % mult == 0)
		.unwrap_or(&("ns", 1));
	format!("{}{unit}", ns / mult)
}

/// Formats a byte size.
///
/// Sizes below a KiB are exact ("123 B"), larger sizes use 3 decimal
/// places of the largest unit below them ("4.000 KiB").
pub fn format_sz(bytes: u64) -> String {
	if bytes == u64::MAX {
		return "max".to_owned();
	}
	if bytes < 1 << 10 {
		return format!("{bytes} B");
	}

	let (unit, shift) = match bytes {
		_ if bytes < 1 << 20 => ("KiB", 10),
		_ if bytes < 1 << 30 => ("MiB", 20),
		_ if bytes < 1 << 40 => ("GiB", 30),
		_ if bytes < 1 << 50 => ("TiB", 40),
		_ if bytes < 1 << 60 => ("PiB", 50),
		_ => ("EiB", 60),
	};
	format!("{:.3} {unit}", bytes as f64 / (1_u64 << shift) as f64)
}

/// Formats a percentage
pub fn format_percent(percent: f64) -> String {
	match percent.fract() == 0.0 {
		true => format!("{percent:.0} %"),
		false => format!("{percent:.2} %"),
	}
}
