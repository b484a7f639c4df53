/// Extract the numeric device index from an opaque GPU id.
///
/// Ids follow vendor conventions like `"GPU-3"` or `"GPU-a1b2-3"`; the
/// index is whatever follows the last `-`. Ids without a trailing integer
/// fall back to device 0.
///
/// # Examples
///
/// ```
/// use gpuhub::utils::gpu_device_index;
///
/// assert_eq!(gpu_device_index("GPU-0"), 0);
/// assert_eq!(gpu_device_index("GPU-3"), 3);
/// assert_eq!(gpu_device_index("nvidia-smi-12"), 12);
/// assert_eq!(gpu_device_index("GPU-deadbeef"), 0);
/// ```
pub fn gpu_device_index(gpu_id: &str) -> u32 {
    gpu_id
        .rsplit('-')
        .next()
        .and_then(|tail| tail.trim().parse().ok())
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_uuid_falls_back_to_zero() {
        assert_eq!(gpu_device_index("a81c3f62e1fd"), 0);
        assert_eq!(gpu_device_index(""), 0);
    }

    #[test]
    fn test_trailing_index_wins() {
        assert_eq!(gpu_device_index("GPU-7"), 7);
        assert_eq!(gpu_device_index("GPU-00"), 0);
    }
}
