//! Client-side identifier generation.
//!
//! Player ids only need to be unique within one session; room codes are
//! short, human-typable and drawn from an alphabet without lookalike
//! characters, since they get read out loud or retyped from a screen.

use rand::Rng;

/// Uppercase alphabet minus 0/O/1/I/L lookalikes.
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKMNPQRSTUVWXYZ23456789";

const CODE_LEN: usize = 6;

/// A fresh room code, e.g. `K7PM2X`. Uniqueness is enforced by the
/// server at create time, not here.
pub fn generate_room_code() -> String {
    let mut rng = rand::rng();
    (0..CODE_LEN)
        .map(|_| CODE_ALPHABET[rng.random_range(0..CODE_ALPHABET.len())] as char)
        .collect()
}

/// A fresh player id carrying a coarse timestamp for debuggability.
pub fn generate_player_id(now_ms: u64) -> String {
    let mut rng = rand::rng();
    let suffix: String = (0..8)
        .map(|_| {
            let chars = b"abcdefghijklmnopqrstuvwxyz0123456789";
            chars[rng.random_range(0..chars.len())] as char
        })
        .collect();
    format!("player-{now_ms}-{suffix}")
}
