//! Queue family discovery.

use super::traits::QueueFamily;
use crate::memory::flags::QueueFlags;

/// Pick the queue family for `required` work.
///
/// Candidates have at least one queue and share a capability bit with
/// `required`. Among those, the family with the fewest extra capabilities
/// wins (numerically smallest flag set), so a dedicated transfer family is
/// preferred over a general-purpose one. Ties go to the lower index.
pub fn select_queue_family(families: &[QueueFamily], required: QueueFlags) -> Option<u32> {
    families
        .iter()
        .enumerate()
        .filter(|(_, family)| family.queue_count > 0 && family.flags.intersects(required))
        .min_by_key(|(i, family)| (family.flags.bits, *i))
        .map(|(i, _)| i as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: QueueFlags, queue_count: u32) -> QueueFamily {
        QueueFamily { flags, queue_count }
    }

    #[test]
    fn test_prefers_dedicated_family() {
        let families = [
            family(QueueFlags::GRAPHICS | QueueFlags::COMPUTE | QueueFlags::TRANSFER, 16),
            family(QueueFlags::COMPUTE | QueueFlags::TRANSFER, 8),
            family(QueueFlags::TRANSFER, 2),
        ];
        assert_eq!(select_queue_family(&families, QueueFlags::COMPUTE), Some(1));
        assert_eq!(select_queue_family(&families, QueueFlags::TRANSFER), Some(2));
    }

    #[test]
    fn test_skips_empty_families() {
        let families = [
            family(QueueFlags::TRANSFER, 0),
            family(QueueFlags::COMPUTE | QueueFlags::TRANSFER, 1),
        ];
        assert_eq!(select_queue_family(&families, QueueFlags::TRANSFER), Some(1));
    }

    #[test]
    fn test_none_when_unsupported() {
        let families = [family(QueueFlags::GRAPHICS, 1)];
        assert_eq!(select_queue_family(&families, QueueFlags::COMPUTE), None);
        assert_eq!(select_queue_family(&[], QueueFlags::COMPUTE), None);
    }

    #[test]
    fn test_tie_goes_to_lower_index() {
        let families = [family(QueueFlags::COMPUTE, 1), family(QueueFlags::COMPUTE, 4)];
        assert_eq!(select_queue_family(&families, QueueFlags::COMPUTE), Some(0));
    }
}
