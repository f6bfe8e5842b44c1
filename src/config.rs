use thiserror::Error;

/// Construction parameters for a [`crate::buffer::Buffer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferConfig {
	/// Maximum number of resident pages. Fixed for the lifetime of the buffer.
	pub capacity: usize,
	/// Percentage of `capacity` at which background eviction stops draining.
	pub low_water_percentage: u8,
	/// Percentage of `capacity` at which background eviction starts draining.
	pub high_water_percentage: u8,
}

impl Default for BufferConfig {
	fn default() -> Self {
		Self {
			capacity: 1024,
			low_water_percentage: 50,
			high_water_percentage: 90,
		}
	}
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
	#[error("capacity must be nonzero")]
	ZeroCapacity,

	#[error("watermark percentages must be in 0..=100, got low={low} high={high}")]
	OutOfRange { low: u8, high: u8 },

	#[error("low_water_percentage ({low}) must be <= high_water_percentage ({high})")]
	LowAboveHigh { low: u8, high: u8 },
}

/// A percentage of 0 or 100 means "only when the buffer is entirely
/// empty/full" - the arithmetic (`capacity * pct / 100`) already gives that
/// exactly, so it needs no special case.
fn watermark(capacity: usize, percentage: u8) -> usize {
	if percentage == 100 {
		return capacity;
	}
	((capacity as f64) * (f64::from(percentage) / 100.0)).floor() as usize
}

impl BufferConfig {
	pub(crate) fn validate(&self) -> Result<(), ConfigError> {
		if self.capacity == 0 {
			return Err(ConfigError::ZeroCapacity);
		}
		if self.low_water_percentage > 100 || self.high_water_percentage > 100 {
			return Err(ConfigError::OutOfRange {
				low: self.low_water_percentage,
				high: self.high_water_percentage,
			});
		}
		if self.low_water_percentage > self.high_water_percentage {
			return Err(ConfigError::LowAboveHigh {
				low: self.low_water_percentage,
				high: self.high_water_percentage,
			});
		}
		Ok(())
	}

	pub(crate) fn low_water(&self) -> usize {
		watermark(self.capacity, self.low_water_percentage)
	}

	pub(crate) fn high_water(&self) -> usize {
		watermark(self.capacity, self.high_water_percentage)
	}
}

/// Tuning for the worker pools driving fill/evict traffic (ambient - not
/// named by the core Buffer contract, but required to run it).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerConfig {
	pub fill_threads: usize,
	pub evict_threads: usize,
	pub evict_write_retries: usize,
}

impl Default for WorkerConfig {
	fn default() -> Self {
		Self {
			fill_threads: 2,
			evict_threads: 2,
			evict_write_retries: 3,
		}
	}
}
