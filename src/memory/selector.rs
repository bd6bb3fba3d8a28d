//! Memory type selection.
//!
//! Matches a buffer's eligible memory types against desired property flags.
//! This is a first-fit over ascending indices, not a best-fit, so the same
//! table and request always produce the same index. Free space is never
//! considered; exhaustion shows up later as an allocation failure.

use super::flags::MemoryProperty;

/// Select the lowest-indexed memory type that is eligible under
/// `type_bits` and whose flags are a superset of `desired`.
///
/// Returns `None` if no index qualifies.
pub fn select_memory_type(
    memory_types: &[MemoryProperty],
    type_bits: u32,
    desired: MemoryProperty,
) -> Option<u32> {
    memory_types
        .iter()
        .take(32)
        .enumerate()
        .find(|(i, flags)| type_bits & (1u32 << i) != 0 && flags.contains(desired))
        .map(|(i, _)| i as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const DL: MemoryProperty = MemoryProperty::DEVICE_LOCAL;
    const HV: MemoryProperty = MemoryProperty::HOST_VISIBLE;
    const HC: MemoryProperty = MemoryProperty::HOST_COHERENT;
    const CACHED: MemoryProperty = MemoryProperty::HOST_CACHED;

    fn discrete_table() -> Vec<MemoryProperty> {
        vec![DL, HV | HC, HV | HC | CACHED, DL | HV | HC]
    }

    #[test]
    fn test_first_fit_not_best_fit() {
        let table = discrete_table();
        // Index 1 and 2 both qualify; index 1 wins even though 2 matches "more".
        assert_eq!(select_memory_type(&table, 0b1111, HV), Some(1));
        assert_eq!(select_memory_type(&table, 0b1111, HV | CACHED), Some(2));
        assert_eq!(select_memory_type(&table, 0b1111, DL), Some(0));
    }

    #[test]
    fn test_requirement_bits_exclude_types() {
        let table = discrete_table();
        assert_eq!(select_memory_type(&table, 0b1000, DL), Some(3));
        assert_eq!(select_memory_type(&table, 0b0001, HV), None);
    }

    #[test]
    fn test_empty_request_takes_first_eligible() {
        let table = discrete_table();
        assert_eq!(select_memory_type(&table, 0b0110, MemoryProperty::empty()), Some(1));
    }

    #[test]
    fn test_no_match() {
        let table = vec![DL, HV | HC];
        assert_eq!(select_memory_type(&table, 0b11, DL | HV), None);
        assert_eq!(select_memory_type(&[], u32::MAX, MemoryProperty::empty()), None);
    }

    fn arb_table() -> impl Strategy<Value = Vec<MemoryProperty>> {
        prop::collection::vec((0u32..32).prop_map(MemoryProperty::from_bits), 0..12)
    }

    proptest! {
        #[test]
        fn selects_lowest_qualifying_index(
            table in arb_table(),
            type_bits in any::<u32>(),
            desired in (0u32..32).prop_map(MemoryProperty::from_bits),
        ) {
            let expected = (0..table.len())
                .find(|&i| type_bits & (1 << i) != 0 && table[i].contains(desired))
                .map(|i| i as u32);
            prop_assert_eq!(select_memory_type(&table, type_bits, desired), expected);

            if let Some(index) = expected {
                prop_assert!(table[index as usize].contains(desired));
            }
        }
    }
}
