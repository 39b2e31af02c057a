//! Hash/key oracle
//!
//! Reproduces the victim's 30-bit string hash and its key-ordering rules, so
//! ground truth positions and probe material can be generated offline.
//! Everything here is pure: no I/O, no clocks.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Mask keeping the low 30 bits of the avalanche hash
pub const HASH_MASK: u32 = 0x3fff_ffff;

/// Minimum number of characters in a generated key
pub const MIN_KEY_LEN: usize = 4;

/// A 30-bit hash value as computed by the victim runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct HashValue(u32);

impl HashValue {
    /// Wrap a raw value, masking it to 30 bits
    pub fn new(raw: u32) -> Self {
        HashValue(raw & HASH_MASK)
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for HashValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:x}", self.0)
    }
}

/// Seeded avalanche hash (additive mix plus three shift/XOR finalization rounds)
///
/// Operates on UTF-16 code units so non-ASCII keys hash the same way the
/// victim's string representation does. The seed must match the victim's
/// runtime seed, otherwise every derived position is meaningless.
pub fn hash(seed: u32, key: &str) -> HashValue {
    let mut h = seed;

    for unit in key.encode_utf16() {
        h = h.wrapping_add(u32::from(unit));
        h = h.wrapping_add(h << 10);
        h ^= h >> 6;
    }

    h = h.wrapping_add(h << 3);
    h ^= h >> 11;
    h = h.wrapping_add(h << 15);

    HashValue::new(h)
}

/// Character sets used by the dense key bijection
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyAlphabet {
    first: &'static [u8],
    rest: &'static [u8],
}

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyz";
const ALNUM: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
const HTTP_TOKEN: &[u8] = b"!#$%&'*+-.^_`|~abcdefghijklmnopqrstuvwxyz";

impl KeyAlphabet {
    /// Identifier-safe keys: a letter followed by lowercase alphanumerics
    pub const IDENTIFIER: KeyAlphabet = KeyAlphabet {
        first: LETTERS,
        rest: ALNUM,
    };

    /// HTTP header token characters, no first-character restriction
    pub const HTTP_TOKEN: KeyAlphabet = KeyAlphabet {
        first: HTTP_TOKEN,
        rest: HTTP_TOKEN,
    };

    pub fn from_kind(kind: AlphabetKind) -> Self {
        match kind {
            AlphabetKind::Identifier => Self::IDENTIFIER,
            AlphabetKind::HttpToken => Self::HTTP_TOKEN,
        }
    }

    /// Number of distinct keys of exactly [`MIN_KEY_LEN`] characters
    pub fn short_key_space(&self) -> u64 {
        let rest = self.rest.len() as u64;
        self.first.len() as u64 * rest.pow(MIN_KEY_LEN as u32 - 1)
    }

    /// Map a dense index to its key
    ///
    /// Digits are emitted least significant first: one from the first-character
    /// alphabet, then at least three from the rest alphabet, continuing while
    /// the quotient is non-zero. Indices below [`Self::short_key_space`] give
    /// four-character keys; larger ones grow instead of wrapping, so the
    /// mapping is injective over the whole `u64` range.
    pub fn key_at(&self, index: u64) -> String {
        let first = self.first.len() as u64;
        let rest = self.rest.len() as u64;

        let mut out = String::with_capacity(MIN_KEY_LEN + 2);
        out.push(self.first[(index % first) as usize] as char);
        let mut t = index / first;

        while out.len() < MIN_KEY_LEN || t > 0 {
            out.push(self.rest[(t % rest) as usize] as char);
            t /= rest;
        }
        out
    }
}

impl Default for KeyAlphabet {
    fn default() -> Self {
        Self::IDENTIFIER
    }
}

/// Configuration-facing name of a key alphabet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlphabetKind {
    #[default]
    Identifier,
    HttpToken,
}

/// Map a dense index to an identifier key
pub fn key_at(index: u64) -> String {
    KeyAlphabet::IDENTIFIER.key_at(index)
}

/// Insertion index of `hash` among ascending `sorted_hashes`
///
/// Counts the hashes `<= hash`, so a tie sorts the probe after the target.
/// The result is always in `0..=sorted_hashes.len()`.
pub fn position(sorted_hashes: &[HashValue], hash: HashValue) -> usize {
    sorted_hashes.partition_point(|&h| h <= hash)
}

/// Keys with their hashes, ordered ascending by hash
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeySet {
    keys: Vec<String>,
    hashes: Vec<HashValue>,
}

impl KeySet {
    /// Hash every key with `seed` and sort ascending by hash
    pub fn new(seed: u32, keys: Vec<String>) -> Self {
        let mut pairs: Vec<(HashValue, String)> =
            keys.into_iter().map(|k| (hash(seed, &k), k)).collect();
        pairs.sort_by_key(|(h, _)| *h);

        let (hashes, keys) = pairs.into_iter().unzip();
        Self { keys, hashes }
    }

    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Sorted hash values
    pub fn hashes(&self) -> &[HashValue] {
        &self.hashes
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Position of an arbitrary hash relative to this set
    pub fn position_of(&self, hash: HashValue) -> usize {
        position(&self.hashes, hash)
    }

    /// Colon-joined key list, the format used in progress lines
    pub fn joined(&self) -> String {
        self.keys.join(":")
    }
}

/// Keys `find_before`/`find_after` draw before giving up
pub const MAX_DRAWS: u64 = 1 << 22;

/// Sequential key source over the dense bijection
#[derive(Debug, Clone)]
pub struct KeyGenerator {
    alphabet: KeyAlphabet,
    next: u64,
}

impl KeyGenerator {
    pub fn new(alphabet: KeyAlphabet, start: u64) -> Self {
        Self {
            alphabet,
            next: start,
        }
    }

    /// Start at a random offset in `reserved..short_key_space`
    ///
    /// Indices below `reserved` belong to the target set and are never drawn.
    pub fn random<R: rand::Rng>(alphabet: KeyAlphabet, reserved: u64, rng: &mut R) -> Self {
        let space = alphabet.short_key_space();
        let start = if reserved < space {
            rng.gen_range(reserved..space)
        } else {
            reserved
        };
        Self::new(alphabet, start)
    }

    /// Index the next key will be generated from
    pub fn offset(&self) -> u64 {
        self.next
    }

    pub fn next_key(&mut self) -> String {
        let key = self.alphabet.key_at(self.next);
        self.next = self.next.wrapping_add(1);
        key
    }

    pub fn take_keys(&mut self, count: usize) -> Vec<String> {
        (0..count).map(|_| self.next_key()).collect()
    }

    /// Draw keys until one hashes strictly below every target hash
    ///
    /// Gives up after [`MAX_DRAWS`] keys. Returns `None` when the targets are
    /// empty or no drawn key sorts before them.
    pub fn find_before(&mut self, seed: u32, targets: &KeySet) -> Option<String> {
        self.find_before_within(seed, targets, MAX_DRAWS)
    }

    /// Draw keys until one hashes strictly above every target hash
    pub fn find_after(&mut self, seed: u32, targets: &KeySet) -> Option<String> {
        self.find_after_within(seed, targets, MAX_DRAWS)
    }

    pub fn find_before_within(
        &mut self,
        seed: u32,
        targets: &KeySet,
        max_draws: u64,
    ) -> Option<String> {
        let lowest = *targets.hashes().first()?;
        if lowest.get() == 0 {
            return None;
        }
        self.draw_until(|h| h < lowest, seed, max_draws)
    }

    pub fn find_after_within(
        &mut self,
        seed: u32,
        targets: &KeySet,
        max_draws: u64,
    ) -> Option<String> {
        let highest = *targets.hashes().last()?;
        if highest.get() == HASH_MASK {
            return None;
        }
        self.draw_until(|h| h > highest, seed, max_draws)
    }

    fn draw_until(
        &mut self,
        accept: impl Fn(HashValue) -> bool,
        seed: u32,
        max_draws: u64,
    ) -> Option<String> {
        (0..max_draws)
            .map(|_| self.next_key())
            .find(|key| accept(hash(seed, key)))
    }
}
