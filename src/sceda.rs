//! The SCEDA symmetric cipher.
//!
//! A two-pass, block-chained construction built on [`digest`]: the
//! plaintext is framed with a 7-byte big-endian length prefix and a
//! pseudo-random tail, encrypted once with an IV hidden inside that tail,
//! reversed byte-wise, and encrypted again with the caller's IV. The
//! ciphertext is always `((len + 31) / 16) * 16` bytes.
//!
//! Peers on a chat only interoperate if every step here matches
//! byte-for-byte, including the deliberately odd ones (the keystream
//! counter aliasing the plaintext slot, the tail doubling as the inner
//! IV). None of this is a standard primitive and none of it should be
//! treated as cryptographically sound.

use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::digest::digest;
use crate::errors::ScError;

/// Key length in bytes.
pub const KEY_LEN: usize = 16;
/// Initialization-vector length in bytes.
pub const IV_LEN: usize = 8;

const BLOCK: usize = 16;
/// Offset of the plaintext slot inside the block key; also the byte the
/// per-block counter lives in.
const PLAIN_SLOT: usize = 32;
const CIPHER_SLOT: usize = 16;

/// Deployed peers pad and key with the C library's `rand`, reseeded with
/// `time + rand` before every use. That generator is part of the
/// wire-visible behavior, so it is reproduced here (portable ANSI-C
/// constants) instead of being replaced with a CSPRNG.
struct WeakRng {
    state: u32,
}

impl WeakRng {
    fn next(&mut self) -> u32 {
        self.state = self.state.wrapping_mul(1_103_515_245).wrapping_add(12_345);
        (self.state >> 16) & 0x7FFF
    }

    fn next_byte(&mut self) -> u8 {
        self.next() as u8
    }

    fn reseed(&mut self) {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as u32)
            .unwrap_or(0);
        let prev = self.next();
        self.state = now.wrapping_add(prev);
    }
}

static RNG: Mutex<WeakRng> = Mutex::new(WeakRng { state: 1 });

/// Ciphertext length for a plaintext of `len` bytes.
pub fn encrypted_length(len: usize) -> usize {
    ((len + 31) / 16) * 16
}

/// Generates a fresh 16-byte key.
pub fn generate_key() -> [u8; KEY_LEN] {
    let mut rng = RNG.lock().expect("rng lock");
    rng.reseed();
    let mut key = [0u8; KEY_LEN];
    for byte in key.iter_mut() {
        *byte = rng.next_byte();
    }
    key
}

/// Generates a fresh 8-byte initialization vector.
pub fn generate_iv() -> [u8; IV_LEN] {
    let mut rng = RNG.lock().expect("rng lock");
    rng.reseed();
    let mut iv = [0u8; IV_LEN];
    for byte in iv.iter_mut() {
        *byte = rng.next_byte();
    }
    iv
}

/// One chaining pass over `blocks` 16-byte blocks of `buf`, reading at
/// `in_off` and writing at `out_off` (the regions may overlap with
/// `out_off <= in_off`; blocks are processed front to back, so every input
/// byte is consumed before the pass writes over it).
///
/// The evolving 49-byte block key starts as `key || iv*4 || 0`. For each
/// block the keystream is the digest of the block key; afterwards the
/// ciphertext block is stored at bytes 16..32, the plaintext block at
/// 32..48, and byte 32 is incremented — the counter intentionally aliases
/// the first plaintext-slot byte.
fn chain(
    buf: &mut [u8],
    in_off: usize,
    out_off: usize,
    blocks: usize,
    key: &[u8; KEY_LEN],
    iv: &[u8; IV_LEN],
    decrypting: bool,
) {
    let mut block_key = [0u8; 49];
    block_key[..KEY_LEN].copy_from_slice(key);
    for slot in 0..4 {
        block_key[KEY_LEN + IV_LEN * slot..KEY_LEN + IV_LEN * (slot + 1)].copy_from_slice(iv);
    }

    for i in 0..blocks {
        let keystream = digest(&block_key);

        let mut input = [0u8; BLOCK];
        input.copy_from_slice(&buf[in_off + BLOCK * i..in_off + BLOCK * (i + 1)]);
        if decrypting {
            block_key[CIPHER_SLOT..CIPHER_SLOT + BLOCK].copy_from_slice(&input);
        } else {
            block_key[PLAIN_SLOT..PLAIN_SLOT + BLOCK].copy_from_slice(&input);
        }

        let mut output = [0u8; BLOCK];
        for j in 0..BLOCK {
            output[j] = input[j] ^ keystream[j];
        }
        buf[out_off + BLOCK * i..out_off + BLOCK * (i + 1)].copy_from_slice(&output);

        if decrypting {
            block_key[PLAIN_SLOT..PLAIN_SLOT + BLOCK].copy_from_slice(&output);
        } else {
            block_key[CIPHER_SLOT..CIPHER_SLOT + BLOCK].copy_from_slice(&output);
        }
        block_key[PLAIN_SLOT] = block_key[PLAIN_SLOT].wrapping_add(1);
    }
}

/// Encrypts `plain` under `key` and `iv`.
///
/// Layout before the first pass: 7-byte big-endian length, the plaintext,
/// then pseudo-random fill up to `encrypted_length(plain.len())` bytes.
/// The 8 fill bytes right after the padded plaintext region serve as the
/// IV of the first pass; the second pass covers the whole reversed buffer
/// with the caller's IV.
pub fn encrypt(plain: &[u8], key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Vec<u8> {
    let padded = ((plain.len() + 15) / 16) * 16;
    let total = padded + 16;
    let mut out = vec![0u8; total];

    let mut len = plain.len();
    for i in (0..7).rev() {
        out[i] = (len % 256) as u8;
        len /= 256;
    }
    out[7..7 + plain.len()].copy_from_slice(plain);
    {
        let mut rng = RNG.lock().expect("rng lock");
        rng.reseed();
        for byte in out[7 + plain.len()..].iter_mut() {
            *byte = rng.next_byte();
        }
    }

    let mut inner_iv = [0u8; IV_LEN];
    inner_iv.copy_from_slice(&out[7 + padded..7 + padded + IV_LEN]);
    chain(&mut out, 7, 7, padded / 16, key, &inner_iv, false);

    out.reverse();
    chain(&mut out, 0, 0, total / 16, key, iv, false);
    out
}

/// Decrypts a SCEDA ciphertext. Fails with [`ScError::DecryptFailed`] if
/// the length is not a positive multiple of 16 or the embedded length
/// field is out of range — the observable symptom of a wrong key or IV.
pub fn decrypt(cipher: &[u8], key: &[u8; KEY_LEN], iv: &[u8; IV_LEN]) -> Result<Vec<u8>, ScError> {
    if cipher.is_empty() || cipher.len() % 16 != 0 {
        return Err(ScError::DecryptFailed);
    }
    let mut buf = cipher.to_vec();
    let block_count = buf.len() / 16;
    chain(&mut buf, 0, 0, block_count, key, iv, true);
    buf.reverse();

    let mut plain_len = 0usize;
    for &byte in &buf[..7] {
        plain_len = plain_len * 256 + byte as usize;
    }
    if plain_len > cipher.len() - 16 {
        return Err(ScError::DecryptFailed);
    }

    let padded = ((plain_len + 15) / 16) * 16;
    let mut inner_iv = [0u8; IV_LEN];
    inner_iv.copy_from_slice(&buf[padded + 7..padded + 7 + IV_LEN]);
    chain(&mut buf, 7, 0, padded / 16, key, &inner_iv, true);

    buf.truncate(plain_len);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};

    const KEY: [u8; KEY_LEN] = [7u8; KEY_LEN];
    const IV: [u8; IV_LEN] = [3u8; IV_LEN];

    #[test]
    fn length_law() {
        for len in 0..200 {
            let plain = vec![0x5Au8; len];
            let cipher = encrypt(&plain, &KEY, &IV);
            assert_eq!(cipher.len(), encrypted_length(len));
            assert_eq!(cipher.len(), ((len + 31) / 16) * 16);
        }
    }

    #[test]
    fn round_trip_small_lengths() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(42);
        for len in 0..200 {
            let plain: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let cipher = encrypt(&plain, &KEY, &IV);
            let back = decrypt(&cipher, &KEY, &IV).expect("round trip");
            assert_eq!(back, plain, "length {}", len);
        }
    }

    #[test]
    fn round_trip_large() {
        let mut rng = rand::rngs::StdRng::seed_from_u64(1);
        for len in [1000usize, 3800, 4000] {
            let plain: Vec<u8> = (0..len).map(|_| rng.gen()).collect();
            let key: [u8; KEY_LEN] = rng.gen();
            let iv: [u8; IV_LEN] = rng.gen();
            let cipher = encrypt(&plain, &key, &iv);
            assert_eq!(decrypt(&cipher, &key, &iv).expect("round trip"), plain);
        }
    }

    #[test]
    fn ciphertext_differs_from_plaintext() {
        let plain = b"attack at dawn".to_vec();
        let cipher = encrypt(&plain, &KEY, &IV);
        assert!(!cipher.windows(plain.len()).any(|w| w == &plain[..]));
    }

    #[test]
    fn fresh_padding_randomizes_ciphertext() {
        // Same plaintext, key and IV twice: the pseudo-random tail should
        // make the ciphertexts differ while both still decrypt.
        let plain = b"hello".to_vec();
        let samples: Vec<Vec<u8>> = (0..4).map(|_| encrypt(&plain, &KEY, &IV)).collect();
        for cipher in &samples {
            assert_eq!(decrypt(cipher, &KEY, &IV).unwrap(), plain);
        }
        assert!(samples.windows(2).any(|w| w[0] != w[1]));
    }

    #[test]
    fn wrong_key_never_recovers_plaintext() {
        let plain = b"the quick brown fox".to_vec();
        let cipher = encrypt(&plain, &KEY, &IV);
        let mut wrong_key = KEY;
        wrong_key[0] ^= 1;
        match decrypt(&cipher, &wrong_key, &IV) {
            Err(_) => {}
            Ok(other) => assert_ne!(other, plain),
        }
    }

    #[test]
    fn wrong_iv_never_recovers_plaintext() {
        let plain = b"the quick brown fox".to_vec();
        let cipher = encrypt(&plain, &KEY, &IV);
        let mut wrong_iv = IV;
        wrong_iv[7] ^= 0x80;
        match decrypt(&cipher, &KEY, &wrong_iv) {
            Err(_) => {}
            Ok(other) => assert_ne!(other, plain),
        }
    }

    #[test]
    fn rejects_bad_lengths() {
        assert!(decrypt(&[], &KEY, &IV).is_err());
        assert!(decrypt(&[0u8; 15], &KEY, &IV).is_err());
        assert!(decrypt(&[0u8; 17], &KEY, &IV).is_err());
    }

    #[test]
    fn generated_keys_and_ivs_vary() {
        let keys: Vec<_> = (0..4).map(|_| generate_key()).collect();
        assert!(keys.windows(2).any(|w| w[0] != w[1]));
        let ivs: Vec<_> = (0..4).map(|_| generate_iv()).collect();
        assert!(ivs.windows(2).any(|w| w[0] != w[1]));
    }
}
