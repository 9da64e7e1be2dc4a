//! Canonical integer ids, pre-resolved upstream.
//!
//! The engine never performs name matching: teams, pitchers, and games arrive
//! as exact canonical ids. Pitcher id 0 is reserved for an unknown starter.

/// Canonical team id from the identity tables
pub type TeamId = u32;

/// Canonical pitcher id; 0 = unknown/unlisted starter
pub type PitcherId = u32;

/// Canonical game id
pub type GameId = u64;

/// Conference id from the identity tables
pub type ConferenceId = u32;

/// Season year (e.g. 2026)
pub type Season = u16;

/// Reserved pitcher id meaning "starter not known"
pub const UNKNOWN_PITCHER: PitcherId = 0;
