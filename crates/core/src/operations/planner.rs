//! Part-size planning
//!
//! Picks a part size that a destination backend accepts for an object of a
//! given size, honouring its minimum/maximum part size and maximum part count.

use crate::error::{Error, Result};
use crate::traits::{ByteRange, MultipartLimits};

/// Starting candidate for the part size: 128 MiB
pub const DEFAULT_PART_SIZE: u64 = 128 * 1024 * 1024;

/// A part size chosen for one object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartPlan {
    pub total_size: u64,
    pub part_size: u64,
}

impl PartPlan {
    /// Number of parts; an empty object is one empty part
    pub fn count(&self) -> u64 {
        if self.total_size == 0 || self.part_size == 0 {
            1
        } else {
            self.total_size.div_ceil(self.part_size)
        }
    }

    /// Byte range of every part, the last one truncated to what is left
    pub fn ranges(&self) -> impl Iterator<Item = (u32, ByteRange)> + '_ {
        (0..self.count()).map(move |index| {
            let offset = index * self.part_size;
            let size = self.part_size.min(self.total_size - offset);
            (index as u32, ByteRange::new(offset, size))
        })
    }
}

fn check_limits(limits: &MultipartLimits) -> Result<()> {
    if limits.max_part_size == Some(0) || limits.max_part_count == Some(0) {
        return Err(Error::SizePolicy(
            "backend declares a zero multipart limit".into(),
        ));
    }
    if let (Some(min), Some(max)) = (limits.min_part_size, limits.max_part_size) {
        if min > max {
            return Err(Error::SizePolicy(format!(
                "backend minimum part size {min} exceeds maximum {max}"
            )));
        }
    }
    Ok(())
}

fn check_total(limits: &MultipartLimits, total_size: u64) -> Result<()> {
    if let (Some(max), Some(count)) = (limits.max_part_size, limits.max_part_count) {
        if total_size > max.saturating_mul(count) {
            return Err(Error::SizePolicy(format!(
                "object of {total_size} bytes is too large for backend multipart limits ({count} parts of at most {max} bytes)"
            )));
        }
    }
    Ok(())
}

/// Compute a legal part size for an object of `total_size` bytes
///
/// The candidate starts at [`DEFAULT_PART_SIZE`], halves until it fits the
/// maximum part size, doubles until the part count fits, and doubles again
/// while it is under the minimum. A candidate that grew past the maximum is
/// replaced by `total / max_count + 1`. A candidate at least as large as the
/// object means the object goes up as one part.
pub fn plan_part_size(limits: &MultipartLimits, total_size: u64) -> Result<u64> {
    check_limits(limits)?;
    check_total(limits, total_size)?;

    if total_size == 0 {
        return Ok(0);
    }

    let mut part_size = DEFAULT_PART_SIZE;

    if let Some(max) = limits.max_part_size {
        while part_size > max {
            part_size /= 2;
        }
    }

    if let Some(count) = limits.max_part_count {
        while total_size / part_size >= count {
            part_size = part_size.saturating_mul(2);
        }
    }

    if let Some(min) = limits.min_part_size {
        while part_size < min && part_size < total_size {
            part_size = part_size.saturating_mul(2);
        }
    }

    if let Some(max) = limits.max_part_size {
        if part_size > max {
            let floor = limits
                .max_part_count
                .map_or(max, |count| total_size / count + 1);
            part_size = floor.max(limits.min_part_size.unwrap_or(0)).min(max);
        }
    }

    Ok(part_size.min(total_size))
}

/// Plan the parts for an object of `total_size` bytes
pub fn plan_parts(limits: &MultipartLimits, total_size: u64) -> Result<PartPlan> {
    let part_size = plan_part_size(limits, total_size)?;
    Ok(PartPlan {
        total_size,
        part_size,
    })
}

/// Check a caller-chosen part size against the backend's limits
pub fn validate_part_size(limits: &MultipartLimits, total_size: u64, part_size: u64) -> Result<()> {
    check_limits(limits)?;
    if part_size == 0 {
        return Err(Error::SizePolicy("part size must be positive".into()));
    }
    if let Some(min) = limits.min_part_size {
        // a single final part may be smaller than the minimum
        if part_size < min && part_size < total_size {
            return Err(Error::SizePolicy(format!(
                "part size {part_size} is below the backend minimum {min}"
            )));
        }
    }
    if let Some(max) = limits.max_part_size {
        if part_size > max {
            return Err(Error::SizePolicy(format!(
                "part size {part_size} is above the backend maximum {max}"
            )));
        }
    }
    if let Some(count) = limits.max_part_count {
        let parts = total_size.div_ceil(part_size);
        if parts > count {
            return Err(Error::SizePolicy(format!(
                "part size {part_size} needs {parts} parts, backend allows {count}"
            )));
        }
    }
    Ok(())
}
