/// Which channels are worth buffering speculatively, given where the user is.
///
/// Pure index arithmetic; the caller maps indices back onto its channel
/// list.  Neighbours come out nearest-first (`+1, -1, +2, -2, …`) so the
/// scheduler connects the most likely zap targets before the outer ring.
/// Wrap-around mirrors channel up/down navigation; on short lists the two
/// directions can overlap, so results are de-duplicated and never include
/// the current index itself.
pub fn adjacent_indices(len: usize, current: usize, span: usize) -> Vec<usize> {
    if len <= 1 || current >= len {
        return Vec::new();
    }

    let mut out = Vec::with_capacity(span * 2);
    for step in 1..=span {
        let up = (current + step) % len;
        if up != current && !out.contains(&up) {
            out.push(up);
        }
        let down = (current + len - (step % len)) % len;
        if down != current && !out.contains(&down) {
            out.push(down);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_and_single() {
        assert!(adjacent_indices(0, 0, 2).is_empty());
        assert!(adjacent_indices(1, 0, 2).is_empty());
    }

    #[test]
    fn test_out_of_range_current() {
        assert!(adjacent_indices(5, 7, 2).is_empty());
    }

    #[test]
    fn test_nearest_first_no_wrap() {
        assert_eq!(adjacent_indices(10, 5, 2), vec![6, 4, 7, 3]);
    }

    #[test]
    fn test_wrap_around() {
        // At the top of the list, "down" wraps to the end
        assert_eq!(adjacent_indices(10, 0, 2), vec![1, 9, 2, 8]);
        // And at the bottom, "up" wraps to the start
        assert_eq!(adjacent_indices(10, 9, 2), vec![0, 8, 1, 7]);
    }

    #[test]
    fn test_small_list_dedup() {
        // N=4: the two directions overlap at distance 2; every other channel
        // appears exactly once and the current one never does.
        let adj = adjacent_indices(4, 0, 2);
        assert_eq!(adj.len(), 3);
        assert!(!adj.contains(&0));
        for idx in [1usize, 2, 3] {
            assert!(adj.contains(&idx));
        }
    }

    #[test]
    fn test_size_invariant() {
        // |adjacency| == min(2*span, N-1) for every position
        for len in 2..=9 {
            for current in 0..len {
                let adj = adjacent_indices(len, current, 2);
                assert_eq!(adj.len(), (2 * 2).min(len - 1), "len={} current={}", len, current);
                assert!(!adj.contains(&current));
            }
        }
    }

    #[test]
    fn test_span_larger_than_list() {
        let adj = adjacent_indices(3, 1, 10);
        assert_eq!(adj.len(), 2);
        assert!(adj.contains(&0));
        assert!(adj.contains(&2));
    }
}
