//! CSPRNG helpers — all randomness in the workspace comes through here
//! (or through `OsRng` handed directly to a keygen routine).

use rand::rngs::OsRng;
use rand::RngCore;

/// Fill a fixed-size array with CSPRNG output.
pub fn random_array<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// `n` CSPRNG bytes on the heap.
pub fn random_bytes(n: usize) -> Vec<u8> {
    let mut out = vec![0u8; n];
    OsRng.fill_bytes(&mut out);
    out
}

/// 32-byte handshake nonce.
pub fn handshake_nonce() -> [u8; 32] {
    random_array::<32>()
}

/// 96-bit AES-GCM IV.
pub fn gcm_iv() -> [u8; 12] {
    random_array::<12>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn arrays_are_not_repeated() {
        // Statistically impossible to collide; catches a dead RNG.
        assert_ne!(random_array::<32>(), random_array::<32>());
        assert_ne!(gcm_iv(), gcm_iv());
    }

    #[test]
    fn requested_length_is_honoured() {
        assert_eq!(random_bytes(0).len(), 0);
        assert_eq!(random_bytes(65).len(), 65);
    }
}
