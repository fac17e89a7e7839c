//! Logger

// Imports
use {
	std::{
		fs,
		io::{self, IsTerminal},
		path::Path,
		sync::Mutex,
	},
	tracing::metadata::LevelFilter,
	tracing_subscriber::{prelude::*, EnvFilter},
};

/// Messages emitted before the logger is initialized
pub mod pre_init {
	// Imports
	use std::sync::Mutex;

	/// All messages registered so far
	pub(super) static MESSAGES: Mutex<Vec<String>> = Mutex::new(Vec::new());

	/// Registers a debug message to be emitted once the logger is initialized
	pub fn debug(msg: String) {
		let mut messages = MESSAGES.lock().expect("Poisoned");
		messages.push(msg);
	}
}

/// Initializes the logger.
///
/// The stderr layer is controlled by the `RUST_LOG` env variable, while the
/// file layer, if any, is controlled by `RUST_LOG_FILE`.
pub fn init(log_file: Option<&Path>, log_file_append: bool) {
	// Stderr layer
	let stderr_layer = tracing_subscriber::fmt::layer()
		.with_writer(io::stderr)
		.with_ansi(io::stderr().is_terminal())
		.with_filter(env_filter("RUST_LOG"));

	// File layer, if requested
	let file_layer = log_file.and_then(|path| {
		let file = fs::OpenOptions::new()
			.create(true)
			.write(true)
			.append(log_file_append)
			.truncate(!log_file_append)
			.open(path);
		match file {
			Ok(file) => Some(
				tracing_subscriber::fmt::layer()
					.with_writer(Mutex::new(file))
					.with_ansi(false)
					.with_filter(env_filter("RUST_LOG_FILE")),
			),
			Err(err) => {
				pre_init::debug(format!("Unable to create log file {path:?}: {err}"));
				None
			},
		}
	});

	tracing_subscriber::registry()
		.with(stderr_layer)
		.with(file_layer)
		.init();

	// Finally emit all pre-init messages
	let messages = pre_init::MESSAGES.lock().expect("Poisoned");
	for msg in &*messages {
		tracing::debug!("{msg}");
	}
}

/// Returns the filter for the env variable `env`
fn env_filter(env: &str) -> EnvFilter {
	EnvFilter::builder()
		.with_default_directive(LevelFilter::INFO.into())
		.with_env_var(env)
		.from_env_lossy()
}
