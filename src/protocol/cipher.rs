//! Lock/Key handshake transform
//!
//! NMDC hubs open every session with `$Lock <lock> Pk=<pk>`. The client must
//! answer with `$Key <key>` where the key is derived from the lock by a fixed
//! XOR + nibble-swap substitution. The transform is an obfuscation step, not
//! cryptography; it only has to be byte-exact.

// =============================================================================
// Constants
// =============================================================================

/// Shortest lock a hub may send
pub const MIN_LOCK_LEN: usize = 3;

/// Longest lock we are willing to transform
pub const MAX_LOCK_LEN: usize = 512;

/// Lock prefix announcing that the hub understands `$Supports`
pub const EXTENDED_PREFIX: &[u8] = b"EXTENDEDPROTOCOL";

/// Lock we present when acting as the connecting side of a peer link
pub const CLIENT_LOCK: &str = "EXTENDEDPROTOCOLABCABCABCABCABCABC";

/// Bytes that may not appear raw inside a key
const RESERVED: [u8; 6] = [0, 5, 36, 96, 124, 126];

/// Length of one `/%DCNnnn%/` escape
const ESCAPE_LEN: usize = 10;

// =============================================================================
// Key derivation
// =============================================================================

/// Derive the `$Key` response for a hub lock.
///
/// Returns an empty vector when the lock length is outside
/// [`MIN_LOCK_LEN`]..=[`MAX_LOCK_LEN`].
pub fn make_key(lock: &[u8]) -> Vec<u8> {
    let len = lock.len();
    if !(MIN_LOCK_LEN..=MAX_LOCK_LEN).contains(&len) {
        return Vec::new();
    }

    let mut raw = Vec::with_capacity(len);
    raw.push(swap_nibbles(lock[0] ^ 5));
    for pair in lock.windows(2) {
        raw.push(swap_nibbles(pair[1] ^ pair[0]));
    }
    raw[0] ^= raw[len - 1];

    let extra = raw.iter().filter(|b| is_reserved(**b)).count();
    let mut key = Vec::with_capacity(len + extra * (ESCAPE_LEN - 1));
    for b in raw {
        if is_reserved(b) {
            push_escape(&mut key, b);
        } else {
            key.push(b);
        }
    }
    key
}

/// Whether the lock string announces an extended-protocol hub.
pub fn is_extended(lock: &[u8]) -> bool {
    lock.starts_with(EXTENDED_PREFIX)
}

/// Split the `$Lock` parameter into the lock proper, dropping ` Pk=...`.
pub fn split_lock(param: &[u8]) -> &[u8] {
    match param.iter().position(|b| *b == b' ') {
        Some(pos) => &param[..pos],
        None => param,
    }
}

fn swap_nibbles(v: u8) -> u8 {
    v.rotate_left(4)
}

fn is_reserved(b: u8) -> bool {
    RESERVED.contains(&b)
}

fn push_escape(out: &mut Vec<u8>, b: u8) {
    out.extend_from_slice(b"/%DCN");
    out.push(b'0' + b / 100);
    out.push(b'0' + (b / 10) % 10);
    out.push(b'0' + b % 10);
    out.extend_from_slice(b"%/");
}
