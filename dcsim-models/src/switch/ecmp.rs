// Copyright (c) 2023 Graphcore Ltd. All rights reserved.

//! Next-hop selection.
//!
//! The hash is 32-bit Murmur3 over a 12-byte key built from the addresses and
//! ports. Every packet of a flow hashes to the same value so a flow always
//! takes the same path.

use std::net::Ipv4Addr;

const C1: u32 = 0xcc9e_2d51;
const C2: u32 = 0x1b87_3593;

fn scramble(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

/// Murmur3 (32-bit) of `key` with the given seed.
#[must_use]
pub fn ecmp_hash(key: &[u8], seed: u32) -> u32 {
    let mut h = seed;

    let mut blocks = key.chunks_exact(4);
    for block in &mut blocks {
        let k = u32::from_le_bytes([block[0], block[1], block[2], block[3]]);
        h ^= scramble(k);
        h = h.rotate_left(13);
        h = h.wrapping_mul(5).wrapping_add(0xe654_6b64);
    }

    let tail = blocks.remainder();
    if !tail.is_empty() {
        let k = tail
            .iter()
            .rev()
            .fold(0u32, |k, byte| (k << 8) | u32::from(*byte));
        h ^= scramble(k);
    }

    // Only the low 32 bits of the length take part
    h ^= key.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85eb_ca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2_ae35);
    h ^= h >> 16;
    h
}

/// The hash key: `src ‖ dst ‖ (sport | dport << 16)`, each little-endian.
#[must_use]
pub fn ecmp_key(src: Ipv4Addr, dst: Ipv4Addr, sport: u16, dport: u16) -> [u8; 12] {
    let mut key = [0u8; 12];
    key[0..4].copy_from_slice(&u32::from(src).to_le_bytes());
    key[4..8].copy_from_slice(&u32::from(dst).to_le_bytes());
    key[8..10].copy_from_slice(&sport.to_le_bytes());
    key[10..12].copy_from_slice(&dport.to_le_bytes());
    key
}
