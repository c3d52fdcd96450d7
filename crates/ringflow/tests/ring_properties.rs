//! Property-based coverage for the ring's conservation invariant
//! (`data_size + free_size == capacity`, always) across arbitrary
//! write/read-amount sequences.

use proptest::prelude::*;
use ringflow::Ring;

proptest! {
    #[test]
    fn conservation_holds_across_random_write_read_sequences(
        capacity in 1usize..256,
        ops in prop::collection::vec(any::<(bool, u8)>(), 0..200),
    ) {
        let mut ring = Ring::new(capacity).unwrap();

        for (do_write, amount) in ops {
            let amount = amount as usize;
            if do_write {
                if let Ok(mut window) = ring.write_window() {
                    let n = amount.min(window.len());
                    window.commit(n).unwrap();
                }
            } else if let Ok(window) = ring.read_window() {
                let n = amount.min(window.len());
                window.commit(n).unwrap();
            }
            prop_assert_eq!(ring.data_size() + ring.free_size(), ring.capacity());
        }
    }

    #[test]
    fn every_byte_written_is_eventually_readable_in_order(
        capacity in 1usize..64,
        chunks in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..20), 0..30),
    ) {
        let mut ring = Ring::new(capacity).unwrap();
        let mut expected = Vec::new();
        let mut observed = Vec::new();

        for chunk in chunks {
            let mut offset = 0;
            while offset < chunk.len() {
                let Ok(mut window) = ring.write_window() else { break };
                if window.is_empty() {
                    drop(window);
                    if let Ok(read_window) = ring.read_window() {
                        observed.extend_from_slice(read_window.as_slice());
                        let n = read_window.len();
                        read_window.commit(n).unwrap();
                    }
                    continue;
                }
                let n = (chunk.len() - offset).min(window.len());
                window.as_mut_slice()[..n].copy_from_slice(&chunk[offset..offset + n]);
                window.commit(n).unwrap();
                offset += n;
            }
            expected.extend_from_slice(&chunk);
        }

        if let Ok(read_window) = ring.read_window() {
            observed.extend_from_slice(read_window.as_slice());
            let n = read_window.len();
            read_window.commit(n).unwrap();
        }

        prop_assert_eq!(observed, expected);
    }
}
