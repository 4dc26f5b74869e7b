//! Sortable task identifiers.
//!
//! An id is 20 characters: 8 characters of millisecond timestamp followed
//! by 12 characters of randomness, both drawn from a 64-symbol alphabet
//! whose ASCII order matches its digit order, so ids sort by creation time.
//!
//! [`IdGenerator`] keeps the last timestamp and random tail. Within one
//! millisecond the tail is incremented instead of re-rolled, which keeps ids
//! from the same generator strictly increasing. The generator is not
//! `Sync`-shared state: use one instance per thread or wrap it in a mutex.
//! Ids are not suitable as secrets.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

const ID_ALPHABET: &[u8; 64] = b"-0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZ_abcdefghijklmnopqrstuvwxyz";
const TIME_LEN: usize = 8;
const TAIL_LEN: usize = 12;
const MAX_DIGIT: u8 = 63;

/// Total id length
pub const ID_LEN: usize = TIME_LEN + TAIL_LEN;

#[derive(Debug)]
pub struct IdGenerator {
    last_millis: u64,
    tail: [u8; TAIL_LEN],
    rng: StdRng,
}

impl IdGenerator {
    pub fn new() -> Self {
        Self::with_rng(StdRng::from_entropy())
    }

    /// Deterministic generator for tests and replays
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(StdRng::seed_from_u64(seed))
    }

    fn with_rng(rng: StdRng) -> Self {
        Self {
            last_millis: 0,
            tail: [0; TAIL_LEN],
            rng,
        }
    }

    /// Next id stamped with the current wall clock
    pub fn next_id(&mut self) -> String {
        let millis = Utc::now().timestamp_millis().max(0) as u64;
        self.next_id_at(millis)
    }

    /// Next id for an explicit millisecond timestamp
    ///
    /// A timestamp older than the previous call is clamped to the previous
    /// one so a clock step backwards cannot produce a smaller id.
    pub fn next_id_at(&mut self, millis: u64) -> String {
        let millis = millis.max(self.last_millis);
        if millis == self.last_millis && self.last_millis != 0 {
            self.increment_tail();
        } else {
            for digit in self.tail.iter_mut() {
                *digit = self.rng.gen_range(0..=MAX_DIGIT);
            }
        }
        self.last_millis = millis;

        let mut id = String::with_capacity(ID_LEN);
        id.push_str(&encode_time(millis));
        for digit in self.tail {
            id.push(ID_ALPHABET[digit as usize] as char);
        }
        id
    }

    fn increment_tail(&mut self) {
        for digit in self.tail.iter_mut().rev() {
            if *digit == MAX_DIGIT {
                *digit = 0;
            } else {
                *digit += 1;
                return;
            }
        }
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

fn encode_time(mut millis: u64) -> String {
    let mut chars = [b'-'; TIME_LEN];
    for slot in chars.iter_mut().rev() {
        *slot = ID_ALPHABET[(millis % 64) as usize];
        millis /= 64;
    }
    chars.iter().map(|&c| c as char).collect()
}

/// Decode the timestamp prefix of an id (None for malformed ids)
pub fn timestamp_millis(id: &str) -> Option<u64> {
    if id.len() != ID_LEN {
        return None;
    }
    id.bytes().take(TIME_LEN).try_fold(0u64, |acc, byte| {
        let digit = ID_ALPHABET.iter().position(|&c| c == byte)? as u64;
        Some(acc * 64 + digit)
    })
}
