use std::collections::BTreeSet;

use crate::config::PortRange;

/// Lowest `start` such that `start..start + block_size` lies inside `range`
/// and contains no port from `used`.
///
/// First-fit, lowest address first: the result depends only on the inputs,
/// so repeated calls with the same used set always pick the same block.
pub fn find_contiguous_block(range: PortRange, used: &BTreeSet<u16>, block_size: u16) -> Option<u16> {
    let size = u32::from(block_size);
    if size == 0 || size > range.len() {
        return None;
    }

    let last_start = u32::from(range.end()) + 1 - size;
    let mut candidate = u32::from(range.start());

    while candidate <= last_start {
        // candidate + size - 1 <= range.end(), so both bounds fit in u16.
        let low = candidate as u16;
        let high = (candidate + size - 1) as u16;

        match used.range(low..=high).next_back() {
            // Every start up to the blocking port would overlap it too.
            Some(&blocked) => candidate = u32::from(blocked) + 1,
            None => return Some(low),
        }
    }

    None
}

/// Length of the longest run of ports in `range` absent from `used`.
pub fn largest_free_block(range: PortRange, used: &BTreeSet<u16>) -> u32 {
    let mut largest = 0;
    let mut current = 0;

    for port in range.start()..=range.end() {
        if used.contains(&port) {
            largest = largest.max(current);
            current = 0;
        } else {
            current += 1;
        }
    }

    largest.max(current)
}

/// Ports of `used` that fall inside `range`.
pub fn used_in_range(range: PortRange, used: &BTreeSet<u16>) -> u32 {
    used.range(range.start()..=range.end()).count() as u32
}
