//! The block digest underneath the SCEDA cipher.
//!
//! A 16-byte block transform is iterated over a length-padded buffer and
//! folded into a single 16-byte result. Both the transform's rotated
//! write-back and the fold order are fixed by the wire: the same bytes in
//! must produce the same bytes out on every implementation, so nothing
//! here may be "simplified".

use byteorder::{BigEndian, ByteOrder};

const MIX_OFFSET: u32 = 8191;

/// Inverts the high 16 bits of a word, keeps the low 16.
fn t1(x: u32) -> u32 {
    ((!(x >> 16)) << 16) | (x & 0xFFFF)
}

fn t2(x: u32) -> u32 {
    !t1(x)
}

/// Nonlinear mixer, all arithmetic modulo 2^32.
fn m(x: u32, y: u32) -> u32 {
    x.wrapping_mul(y)
        ^ x.wrapping_add(MIX_OFFSET)
            .wrapping_mul(y.wrapping_add(MIX_OFFSET))
}

/// Applies the block transform in place: four rounds over the big-endian
/// words `(a, b, c, d)`, each round writing the fresh words back rotated
/// one byte left in `a, c, b, d` order (the last byte of `d` wraps around
/// to index 0).
pub fn transform(block: &mut [u8; 16]) {
    for _ in 0..4 {
        let a = BigEndian::read_u32(&block[0..4]);
        let b = BigEndian::read_u32(&block[4..8]);
        let c = BigEndian::read_u32(&block[8..12]);
        let d = BigEndian::read_u32(&block[12..16]);

        let mut k = b ^ c ^ d;
        let old_a = a;
        let new_a = m(t1(a), t2(b)) ^ k;
        k = a ^ new_a;
        let new_b = m(t1(b), t2(c)) ^ k;
        k = b ^ new_b;
        let new_c = m(t1(c), t2(d)) ^ k;
        k = c ^ new_c;
        let new_d = m(t1(d), t2(old_a)) ^ k;

        BigEndian::write_u32(&mut block[1..5], new_a);
        BigEndian::write_u32(&mut block[5..9], new_c);
        BigEndian::write_u32(&mut block[9..13], new_b);
        let d_bytes = new_d.to_be_bytes();
        block[13] = d_bytes[0];
        block[14] = d_bytes[1];
        block[15] = d_bytes[2];
        block[0] = d_bytes[3];
    }
}

/// Digests an arbitrary-length input into 16 bytes.
///
/// The input is padded with a 16-bit big-endian length tail and `0xAA`
/// fill to a whole number of blocks (always at least one block and two
/// bytes of padding), every block is transformed in place, and blocks
/// past the first are folded into the result by splitting result and
/// block into half-and-half temporaries, transforming each, and XOR-ing.
///
/// The length tail limits inputs to less than 65536 bytes; everything
/// digested by this crate is at most one datagram long.
pub fn digest(data: &[u8]) -> [u8; 16] {
    debug_assert!(data.len() < 65536);

    let block_count = (data.len() + 17) / 16;
    let mut buffer = vec![0xAAu8; block_count * 16];
    buffer[..data.len()].copy_from_slice(data);
    buffer[data.len()] = (data.len() / 256) as u8;
    buffer[data.len() + 1] = (data.len() % 256) as u8;

    for block in buffer.chunks_exact_mut(16) {
        transform(block.try_into().expect("chunks of 16"));
    }

    let mut result = [0u8; 16];
    result.copy_from_slice(&buffer[..16]);
    for block in buffer.chunks_exact(16).skip(1) {
        let mut left = [0u8; 16];
        left[..8].copy_from_slice(&result[..8]);
        left[8..].copy_from_slice(&block[..8]);
        let mut right = [0u8; 16];
        right[..8].copy_from_slice(&block[8..]);
        right[8..].copy_from_slice(&result[8..]);
        transform(&mut left);
        transform(&mut right);
        for j in 0..16 {
            result[j] = left[j] ^ right[j];
        }
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transform_changes_the_block() {
        let mut zero = [0u8; 16];
        transform(&mut zero);
        assert_ne!(zero, [0u8; 16]);

        let mut ones = [0xFFu8; 16];
        transform(&mut ones);
        assert_ne!(ones, [0xFFu8; 16]);
    }

    #[test]
    fn transform_is_deterministic() {
        let input = *b"0123456789abcdef";
        let mut x = input;
        let mut y = input;
        transform(&mut x);
        transform(&mut y);
        assert_eq!(x, y);
        assert_ne!(x, input);
    }

    #[test]
    fn digest_is_deterministic() {
        for data in [&b""[..], b"a", b"hello world", &[0xAA; 100]] {
            assert_eq!(digest(data), digest(data));
        }
    }

    #[test]
    fn digest_of_empty_is_stable_and_nonzero() {
        let d = digest(b"");
        assert_eq!(d, digest(b""));
        assert_ne!(d, [0u8; 16]);
    }

    #[test]
    fn digest_depends_on_length() {
        assert_ne!(digest(b""), digest(b"\x00"));
        assert_ne!(digest(b"\x00"), digest(b"\x00\x00"));
    }

    #[test]
    fn single_bit_avalanche() {
        // Flip every bit of inputs spanning one, two and three blocks and
        // make sure the digest moves each time.
        for len in [1usize, 15, 16, 17, 31, 40] {
            let base: Vec<u8> = (0..len).map(|i| i as u8).collect();
            let reference = digest(&base);
            for byte in 0..len {
                for bit in 0..8 {
                    let mut flipped = base.clone();
                    flipped[byte] ^= 1 << bit;
                    assert_ne!(
                        digest(&flipped),
                        reference,
                        "flipping byte {} bit {} of a {}-byte input went unnoticed",
                        byte,
                        bit,
                        len
                    );
                }
            }
        }
    }
}
