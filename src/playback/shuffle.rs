use rand::seq::SliceRandom;
use rand::Rng;

/// Randomized traversal of `[0, N)` with a carry-over anti-repeat window:
/// the head of a fresh permutation avoids the tail of the previous one, so
/// a rebuild does not immediately replay what the listener just heard.
///
/// This is anti-repeat, not uniform shuffling across rebuild boundaries;
/// the first-non-tail swap biases the head of the new deck.
#[derive(Debug)]
pub struct ShuffleDeck {
    n: usize,
    carry_over: usize,
    deck: Vec<usize>,
    pos: usize,
    last_tail: Vec<usize>,
}

impl ShuffleDeck {
    pub fn new(n: usize, carry_over: usize) -> Self {
        let n = n.max(1);
        let mut deck = Self {
            n,
            carry_over: carry_over.min(n / 2),
            deck: Vec::new(),
            pos: 0,
            last_tail: Vec::new(),
        };
        deck.build(&mut rand::thread_rng());
        deck
    }

    fn build<R: Rng>(&mut self, rng: &mut R) {
        let mut deck: Vec<usize> = (0..self.n).collect();
        deck.shuffle(rng);

        if !self.last_tail.is_empty() {
            if let Some(i) = deck.iter().position(|idx| !self.last_tail.contains(idx)) {
                deck.swap(0, i);
            }
        }

        self.last_tail = if self.carry_over > 0 {
            deck[deck.len() - self.carry_over..].to_vec()
        } else {
            Vec::new()
        };
        self.deck = deck;
        self.pos = 0;
    }

    pub fn current(&self) -> usize {
        self.deck[self.pos]
    }

    /// Step forward; exhausting the permutation rebuilds the deck.
    pub fn advance(&mut self) {
        self.pos += 1;
        if self.pos >= self.n {
            self.build(&mut rand::thread_rng());
        }
    }

    /// Step back, clamped at the start of the current permutation.
    pub fn rewind(&mut self) {
        self.pos = self.pos.saturating_sub(1);
    }

    /// Resize to `n` entries, clearing the anti-repeat history.
    pub fn reset(&mut self, n: usize) {
        self.n = n.max(1);
        self.carry_over = self.carry_over.min(self.n / 2);
        self.last_tail.clear();
        self.build(&mut rand::thread_rng());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn seeded_deck(n: usize, carry_over: usize, seed: u64) -> ShuffleDeck {
        let n = n.max(1);
        let mut deck = ShuffleDeck {
            n,
            carry_over: carry_over.min(n / 2),
            deck: Vec::new(),
            pos: 0,
            last_tail: Vec::new(),
        };
        deck.build(&mut StdRng::seed_from_u64(seed));
        deck
    }

    #[test]
    fn permutation_covers_every_index_exactly_once() {
        let mut deck = ShuffleDeck::new(8, 3);
        let mut seen: Vec<usize> = Vec::new();
        for _ in 0..8 {
            seen.push(deck.current());
            deck.advance();
        }
        seen.sort_unstable();
        assert_eq!(seen, (0..8).collect::<Vec<_>>());
        // advance() past the end rebuilt; the cursor is at the new head.
        assert!(deck.current() < 8);
    }

    #[test]
    fn rebuild_head_avoids_previous_tail() {
        for seed in 0..64 {
            let mut deck = seeded_deck(8, 3, seed);
            let tail = deck.last_tail.clone();
            assert_eq!(tail.len(), 3);
            deck.build(&mut StdRng::seed_from_u64(seed.wrapping_add(1000)));
            assert!(
                !tail.contains(&deck.deck[0]),
                "seed {seed}: head {} in old tail {tail:?}",
                deck.deck[0]
            );
        }
    }

    #[test]
    fn carry_over_two_of_four() {
        for seed in 0..32 {
            let mut deck = seeded_deck(4, 2, seed);
            let tail = deck.last_tail.clone();
            deck.build(&mut StdRng::seed_from_u64(seed.wrapping_add(77)));
            assert!(!tail.contains(&deck.deck[0]));
        }
    }

    #[test]
    fn rewind_clamps_at_permutation_start() {
        let mut deck = ShuffleDeck::new(5, 0);
        deck.rewind();
        assert_eq!(deck.pos, 0);
        deck.advance();
        deck.advance();
        deck.rewind();
        assert_eq!(deck.pos, 1);
    }

    #[test]
    fn single_entry_deck() {
        let mut deck = ShuffleDeck::new(1, 3);
        assert_eq!(deck.current(), 0);
        assert!(deck.last_tail.is_empty());
        deck.advance();
        assert_eq!(deck.current(), 0);
    }

    #[test]
    fn zero_carry_over_keeps_no_tail() {
        let deck = ShuffleDeck::new(6, 0);
        assert!(deck.last_tail.is_empty());
    }

    #[test]
    fn reset_resizes_and_clears_history() {
        let mut deck = ShuffleDeck::new(4, 2);
        deck.reset(9);
        assert_eq!(deck.deck.len(), 9);
        assert_eq!(deck.pos, 0);
        let mut sorted = deck.deck.clone();
        sorted.sort_unstable();
        assert_eq!(sorted, (0..9).collect::<Vec<_>>());
    }

    #[test]
    fn first_build_has_no_swap_constraint() {
        // With an empty tail every permutation is admissible, including one
        // that starts at any index.
        let deck = seeded_deck(4, 2, 3);
        assert_eq!(deck.pos, 0);
        assert_eq!(deck.deck.len(), 4);
    }
}
