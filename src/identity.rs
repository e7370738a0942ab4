//! Deterministic identifiers for the normalized entity graph.
//!
//! Every id is a pure function of its natural key, so re-ingesting the same
//! feed payload always lands on the same rows. Nothing here does I/O.

/// Snapshot ids reserve this many sequence slots per batch millisecond.
pub const SNAPSHOTS_PER_MILLI: i64 = 1000;

/// Normalize a natural key into an id fragment:
/// lowercase, trim, whitespace runs -> `-`, drop anything outside `[a-z0-9-:_]`.
pub fn slugify(input: &str) -> String {
    input
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join("-")
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | ':' | '_'))
        .collect()
}

/// 32-bit rolling hash (`h = h * 31 + code unit`) of the sport key.
///
/// Not collision resistant. Fine for the few dozen sport keys the feed
/// exposes; a wider hash or a mapping table is needed past a few hundred.
pub fn make_sport_id(sport_key: &str) -> u32 {
    let mut h: i32 = 0;
    for unit in sport_key.encode_utf16() {
        h = h.wrapping_mul(31).wrapping_add(unit as i32);
    }
    h.unsigned_abs()
}

pub fn make_team_id(sport_id: u32, team_name: &str) -> String {
    format!("team:{}:{}", sport_id, slugify(team_name))
}

pub fn make_event_id(external_event_id: &str) -> String {
    format!("evt:{}", slugify(external_event_id))
}

pub fn make_book_id(book_key: &str) -> String {
    format!("book:{}", slugify(book_key))
}

pub fn make_market_id(event_id: &str, book_id: &str, market_key: &str) -> String {
    format!("mkt:{}:{}:{}", event_id, book_id, slugify(market_key))
}

/// Selection id; the line suffix is only present when the feed sent a number.
pub fn make_selection_id(market_id: &str, outcome_name: &str, line: Option<f64>) -> String {
    match line.filter(|l| l.is_finite()) {
        Some(line) => format!("sel:{}:{}:{}", market_id, slugify(outcome_name), format_line(line)),
        None => format!("sel:{}:{}", market_id, slugify(outcome_name)),
    }
}

/// Team abbreviation: first three letters uppercased, `UNK` when there are none.
pub fn team_abbreviation(team_name: &str) -> String {
    let letters: String = team_name
        .chars()
        .filter(|c| c.is_alphabetic())
        .take(3)
        .collect();
    if letters.is_empty() {
        "UNK".to_string()
    } else {
        letters.to_uppercase()
    }
}

fn format_line(line: f64) -> String {
    // -0.0 would otherwise render as "-0"
    if line == 0.0 {
        "0".to_string()
    } else {
        line.to_string()
    }
}

/// Hands out `batch_ms * 1000 + seq` snapshot ids.
///
/// A batch that would exceed 1000 snapshots moves on to the next millisecond,
/// and a new batch always starts past the last millisecond already handed
/// out, so ids stay unique for the life of the allocator.
#[derive(Debug, Default)]
pub struct SnapshotIdAllocator {
    batch_ms: i64,
    seq: i64,
    last_used_ms: i64,
}

impl SnapshotIdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a new batch stamped at `now_ms` (epoch millis).
    pub fn begin_batch(&mut self, now_ms: i64) {
        self.batch_ms = now_ms.max(self.last_used_ms + 1);
        self.seq = 0;
        self.last_used_ms = self.batch_ms;
    }

    pub fn next_id(&mut self) -> i64 {
        if self.seq >= SNAPSHOTS_PER_MILLI {
            self.batch_ms += 1;
            self.seq = 0;
            self.last_used_ms = self.batch_ms;
        }
        let id = self.batch_ms * SNAPSHOTS_PER_MILLI + self.seq;
        self.seq += 1;
        id
    }
}
