//! Ranking helpers shared by the store implementations.
//!
//! Rankings order by bytes exchanged descending, then by key ascending so that
//! ties come out the same way every time.

use std::cmp::Ordering;

use crate::types::{DomainTotal, RankWindow};

/// Entries shown around a domain by [`neighbor_window`].
pub const WINDOW_SIZE: usize = 3;

/// Ranking order for `(key, bytes)` pairs.
#[inline]
pub fn rank_order(a_key: &str, a_bytes: u64, b_key: &str, b_bytes: u64) -> Ordering {
    b_bytes.cmp(&a_bytes).then_with(|| a_key.cmp(b_key))
}

/// Index of the first entry of the window around `position` in a ranking of
/// `len` entries. The target sits in the middle where possible; at either end
/// the window slides inward so it stays full.
pub fn window_start(position: usize, len: usize) -> usize {
    let start = position.saturating_sub(1);
    if start + WINDOW_SIZE > len {
        len.saturating_sub(WINDOW_SIZE)
    } else {
        start
    }
}

/// Window around `domain` in an already ranked list.
pub fn neighbor_window(ranked: &[DomainTotal], domain: &str) -> RankWindow {
    let position = match ranked.iter().position(|entry| entry.domain == domain) {
        Some(position) => position,
        None => return RankWindow::empty(),
    };

    let start = window_start(position, ranked.len());
    let end = (start + WINDOW_SIZE).min(ranked.len());
    RankWindow {
        start_rank: start + 1,
        entries: ranked[start..end].to_vec(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ranked(entries: &[(&str, u64)]) -> Vec<DomainTotal> {
        entries
            .iter()
            .map(|(domain, bytes)| DomainTotal {
                domain: domain.to_string(),
                bytes_exchanged: *bytes,
            })
            .collect()
    }

    fn domains(window: &RankWindow) -> Vec<&str> {
        window.entries.iter().map(|e| e.domain.as_str()).collect()
    }

    #[test]
    fn test_window_start() {
        assert_eq!(window_start(0, 5), 0);
        assert_eq!(window_start(2, 5), 1);
        assert_eq!(window_start(4, 5), 2);
        assert_eq!(window_start(1, 2), 0);
        assert_eq!(window_start(0, 1), 0);
    }

    #[test]
    fn test_neighbor_window_top() {
        let list = ranked(&[("a.com", 50), ("b.com", 40), ("c.com", 30), ("d.com", 20)]);
        let window = neighbor_window(&list, "a.com");
        assert_eq!(window.start_rank, 1);
        assert_eq!(domains(&window), vec!["a.com", "b.com", "c.com"]);
    }

    #[test]
    fn test_neighbor_window_middle() {
        let list = ranked(&[("a.com", 50), ("b.com", 40), ("c.com", 30), ("d.com", 20)]);
        let window = neighbor_window(&list, "c.com");
        assert_eq!(window.start_rank, 2);
        assert_eq!(domains(&window), vec!["b.com", "c.com", "d.com"]);
    }

    #[test]
    fn test_neighbor_window_bottom_shifts_up() {
        let list = ranked(&[("a.com", 50), ("b.com", 40), ("c.com", 30), ("d.com", 20)]);
        let window = neighbor_window(&list, "d.com");
        assert_eq!(window.start_rank, 2);
        assert_eq!(domains(&window), vec!["b.com", "c.com", "d.com"]);
    }

    #[test]
    fn test_neighbor_window_small_and_missing() {
        let list = ranked(&[("a.com", 50), ("b.com", 40)]);
        let window = neighbor_window(&list, "b.com");
        assert_eq!(window.start_rank, 1);
        assert_eq!(domains(&window), vec!["a.com", "b.com"]);

        assert_eq!(neighbor_window(&list, "z.com"), RankWindow::empty());
    }

    #[test]
    fn test_rank_order_ties_by_key() {
        assert_eq!(rank_order("a", 10, "b", 10), Ordering::Less);
        assert_eq!(rank_order("b", 10, "a", 20), Ordering::Greater);
    }
}
