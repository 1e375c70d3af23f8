//! AFA v3 index decryption.
//!
//! The v3 file table is encrypted three times over: an outer bit-level
//! obfuscation, a substitution dictionary read first from the bitstream,
//! and a per-string run keyed by a lagged-register PRNG seeded with the
//! string length. The PRNG state lives on the decoder's stack; nothing
//! here is process-global.

use super::Backing;
use super::afa::AfaEntry;
use crate::string::SjisString;
use crate::{Error, Result, zlib};

/// 521-word lagged register with a fixed shuffle schedule.
struct Rng {
    state: [u32; 521],
    current: usize,
}

impl Rng {
    fn new(seed: u32) -> Self {
        let mut state = [0u32; 521];
        let mut seed = seed;
        let mut val = 0u32;
        for word in state.iter_mut().take(17) {
            for _ in 0..32 {
                seed = seed.wrapping_mul(1_566_083_941).wrapping_add(1);
                val = (seed & 0x8000_0000) | (val >> 1);
            }
            *word = val;
        }
        state[16] = state[15] ^ (state[0] >> 9) ^ (state[16] << 23);
        for i in 17..521 {
            state[i] = state[i - 1] ^ (state[i - 16] >> 9) ^ (state[i - 17] << 23);
        }
        let mut rng = Rng { state, current: 0 };
        for _ in 0..4 {
            rng.shuffle();
        }
        rng.current = usize::MAX; // first next() wraps to 0 after a shuffle check
        rng
    }

    fn shuffle(&mut self) {
        for i in (0..32).step_by(4) {
            self.state[i] ^= self.state[i + 489];
            self.state[i + 1] ^= self.state[i + 490];
            self.state[i + 2] ^= self.state[i + 491];
            self.state[i + 3] ^= self.state[i + 492];
        }
        for i in (32..521).step_by(3) {
            self.state[i] ^= self.state[i - 32];
            self.state[i + 1] ^= self.state[i - 31];
            self.state[i + 2] ^= self.state[i - 30];
        }
    }

    fn next(&mut self) -> u32 {
        self.current = self.current.wrapping_add(1);
        if self.current >= 521 {
            self.shuffle();
            self.current = 0;
        }
        self.state[self.current]
    }
}

/// MSB-first bit reader over a byte buffer, caching partial bytes.
struct BitReader<'a> {
    data: &'a [u8],
    pos: usize,
    cache: u32,
    nr_cached: u32,
}

impl<'a> BitReader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            pos: 0,
            cache: 0,
            nr_cached: 0,
        }
    }

    fn bits(&mut self, count: u32) -> Result<u32> {
        while self.nr_cached < count {
            let b = *self
                .data
                .get(self.pos)
                .ok_or(Error::OutOfBounds(self.pos))?;
            self.pos += 1;
            self.cache = (self.cache << 8) | u32::from(b);
            self.nr_cached += 8;
        }
        let mask = (1u32 << count) - 1;
        self.nr_cached -= count;
        Ok((self.cache >> self.nr_cached) & mask)
    }

    fn u32(&mut self) -> Result<u32> {
        let b0 = self.bits(8)?;
        let b1 = self.bits(8)?;
        let b2 = self.bits(8)?;
        let b3 = self.bits(8)?;
        Ok((b3 << 24) | (b2 << 16) | (b1 << 8) | b0)
    }
}

/// Read the string dictionary. Encrypted via a PRNG seeded by its size.
fn read_dict(bs: &mut BitReader<'_>) -> Result<Vec<u8>> {
    let size = bs.u32()? as usize;
    let mut dict = Vec::with_capacity(size);
    let mut rng = Rng::new(size as u32);
    for _ in 0..size {
        let count = rng.next() & 3;
        bs.bits(count + 1)?;
        rng.next();
        dict.push(bs.bits(8)? as u8);
    }
    Ok(dict)
}

/// Decrypt the first layer of a string: PRNG-keyed dictionary indices.
fn read_encrypted_chars(bs: &mut BitReader<'_>) -> Result<Vec<u16>> {
    let size = bs.u32()? as usize;
    let mut chars = Vec::with_capacity(size);
    let mut rng = Rng::new(size as u32);
    for _ in 0..size {
        let count = rng.next() & 3;
        bs.bits(count + 1)?;
        rng.next();
        let lo = bs.bits(8)?;
        let hi = bs.bits(8)?;
        chars.push((lo | (hi << 8)) as u16);
    }
    Ok(chars)
}

/// Second layer: dictionary substitution plus a fixed XOR.
fn decrypt_string(chars: &[u16], dict: &[u8]) -> Result<Vec<u8>> {
    chars
        .iter()
        .map(|&c| {
            dict.get(c as usize)
                .map(|&b| b ^ 0xa4)
                .ok_or_else(|| Error::invalid("AFAv3 string index outside dictionary"))
        })
        .collect()
}

fn read_entry(bs: &mut BitReader<'_>, dict: &[u8], no: usize) -> Result<AfaEntry> {
    let chars = read_encrypted_chars(bs)?;
    let name = decrypt_string(&chars, dict)?;
    Ok(AfaEntry {
        no,
        name: SjisString::from_vec(name),
        unknown0: bs.u32()?,
        unknown1: bs.u32()?,
        off: u64::from(bs.u32()?),
        size: bs.u32()? as usize,
    })
}

/// Decrypt and parse the v3 index. Returns the entries and the offset of
/// the payload region.
pub(super) fn read_index(backing: &Backing, index_size: u32) -> Result<(Vec<AfaEntry>, u64)> {
    let raw = backing.read_at(12, (index_size as usize).min(backing.len() as usize - 12))?;
    let mut bs = BitReader::new(&raw);
    bs.bits(1)?; // obfuscation bit
    let dict = read_dict(&mut bs)?;
    let packed_size = bs.u32()? as usize;
    let unpacked_size = bs.u32()? as usize;

    let mut packed = Vec::with_capacity(packed_size);
    for _ in 0..packed_size {
        packed.push(bs.bits(8)? as u8);
    }
    let unpacked = zlib::inflate_exact(&packed, unpacked_size)?;

    let mut bs = BitReader::new(&unpacked);
    bs.bits(1)?; // obfuscation bit
    let nr_files = bs.u32()? as usize;
    let mut files = Vec::with_capacity(nr_files);
    for i in 0..nr_files {
        if bs.bits(2).is_err() {
            break;
        }
        files.push(read_entry(&mut bs, &dict, i)?);
    }

    Ok((files, u64::from(index_size) + 8))
}
