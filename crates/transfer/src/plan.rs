use crate::TransferError;

/// Byte range of one part within a known-size source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartSpec {
    /// 1-based part number.
    pub number: u32,
    pub offset: u64,
    pub size: u64,
}

/// Splits `total` bytes into `ceil(total / part_size)` parts.
///
/// Every part is `part_size` long except the last, which holds the remainder.
pub fn plan_parts(total: u64, part_size: u64) -> Result<Vec<PartSpec>, TransferError> {
    if total == 0 {
        return Err(TransferError::EmptySource);
    }
    if part_size == 0 {
        return Err(TransferError::ZeroPartSize);
    }

    let count = total.div_ceil(part_size);
    let parts = (0..count)
        .map(|i| {
            let offset = i * part_size;
            PartSpec {
                number: (i + 1) as u32,
                offset,
                size: part_size.min(total - offset),
            }
        })
        .collect();
    Ok(parts)
}

/// Lays out parts with caller-chosen sizes.
///
/// The sizes must be non-zero and add up to exactly `total`.
pub fn plan_custom_parts(total: u64, sizes: &[u64]) -> Result<Vec<PartSpec>, TransferError> {
    if total == 0 {
        return Err(TransferError::EmptySource);
    }
    if sizes.contains(&0) {
        return Err(TransferError::ZeroPartSize);
    }
    let actual: u64 = sizes.iter().sum();
    if actual != total {
        return Err(TransferError::PartLayout {
            expected: total,
            actual,
        });
    }

    let mut offset = 0;
    let parts = sizes
        .iter()
        .enumerate()
        .map(|(i, &size)| {
            let spec = PartSpec {
                number: (i + 1) as u32,
                offset,
                size,
            };
            offset += size;
            spec
        })
        .collect();
    Ok(parts)
}
