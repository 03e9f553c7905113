//! Property tests for the strict-priority queue: whatever sequence of
//! pushes arrives, pops must drain strictly highest-band-first and FIFO
//! within a band, and the queue's `size()`/`is_empty()` bookkeeping must
//! stay consistent with the number of pushes and pops performed.

use proptest::prelude::*;
use rlncd_core::pqueue::PriorityQueue;

const BANDS: usize = 4;

proptest! {
    #[test]
    fn pops_never_increase_in_band(
        pushes in prop::collection::vec((0..BANDS, any::<u16>()), 0..200)
    ) {
        let mut q: PriorityQueue<(usize, u16)> = PriorityQueue::new(BANDS, (0, 0));
        for &(band, val) in &pushes {
            q.push(band, (band, val));
        }

        let mut max_band_seen = usize::MAX;
        let mut count = 0;
        while !q.is_empty() {
            let (band, _) = q.pop();
            prop_assert!(band <= max_band_seen);
            max_band_seen = band;
            count += 1;
        }
        prop_assert_eq!(count, pushes.len());
    }

    #[test]
    fn fifo_order_preserved_within_each_band(
        pushes in prop::collection::vec((0..BANDS, any::<u16>()), 0..200)
    ) {
        let mut q: PriorityQueue<(usize, u16)> = PriorityQueue::new(BANDS, (0, 0));
        for &(band, val) in &pushes {
            q.push(band, (band, val));
        }

        let mut expected_per_band: Vec<Vec<u16>> = vec![Vec::new(); BANDS];
        for &(band, val) in &pushes {
            expected_per_band[band].push(val);
        }

        let mut seen_per_band: Vec<Vec<u16>> = vec![Vec::new(); BANDS];
        while !q.is_empty() {
            let (band, val) = q.pop();
            seen_per_band[band].push(val);
        }

        prop_assert_eq!(seen_per_band, expected_per_band);
    }

    #[test]
    fn size_tracks_push_pop_exactly(
        pushes in prop::collection::vec((0..BANDS, any::<u16>()), 0..100)
    ) {
        let mut q: PriorityQueue<(usize, u16)> = PriorityQueue::new(BANDS, (0, 0));
        for (i, &(band, val)) in pushes.iter().enumerate() {
            q.push(band, (band, val));
            prop_assert_eq!(q.size(), i + 1);
        }
        let total = pushes.len();
        for i in 0..total {
            prop_assert!(!q.is_empty());
            q.pop();
            prop_assert_eq!(q.size(), total - i - 1);
        }
        prop_assert!(q.is_empty());
    }
}
