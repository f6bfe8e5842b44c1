use std::ops::RangeInclusive;

use thiserror::Error;

use crate::units::*;

pub const DEFAULT_PAGE_SIZE: usize = 4 * KiB;
pub const PAGE_SIZE_RANGE: RangeInclusive<usize> = (512 * B)..=(64 * KiB);

#[derive(Debug, Error)]
#[error(
	"page size {0} is invalid; must be a power of two between {} and {}",
	display_size(*PAGE_SIZE_RANGE.start()),
	display_size(*PAGE_SIZE_RANGE.end())
)]
pub struct PageSizeBoundsError(pub usize);

#[inline]
pub fn validate_page_size(size: usize) -> Result<(), PageSizeBoundsError> {
	if !size.is_power_of_two() || !PAGE_SIZE_RANGE.contains(&size) {
		return Err(PageSizeBoundsError(size));
	}
	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn rejects_non_power_of_two() {
		assert!(validate_page_size(4097).is_err());
	}

	#[test]
	fn accepts_default_size() {
		assert!(validate_page_size(DEFAULT_PAGE_SIZE).is_ok());
	}
}
