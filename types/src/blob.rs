//! The deterministic blob format and content hashing.
//!
//! Every entity that crosses the wire or lands in the database is
//! encoded with the same fixed-int little-endian configuration, so a
//! stored blob re-parses to a value that re-encodes byte-identically.

//---------------------------------------------------------------------------------------------------- Import
use crate::Hash;

//---------------------------------------------------------------------------------------------------- Config
/// The one true encoding configuration.
const CONFIG: bincode::config::Configuration<
    bincode::config::LittleEndian,
    bincode::config::Fixint,
> = bincode::config::standard().with_fixed_int_encoding();

//---------------------------------------------------------------------------------------------------- Error
/// A blob failed to (de)serialize.
#[derive(Debug, thiserror::Error)]
pub enum BlobError {
    #[error("failed to encode value: {0}")]
    Encode(#[from] bincode::error::EncodeError),
    #[error("failed to decode blob: {0}")]
    Decode(#[from] bincode::error::DecodeError),
    #[error("blob has {0} trailing bytes")]
    TrailingBytes(usize),
}

//---------------------------------------------------------------------------------------------------- Public API
/// Serialize a value into its blob form.
pub fn to_blob<T: bincode::Encode>(value: &T) -> Result<Vec<u8>, BlobError> {
    Ok(bincode::encode_to_vec(value, CONFIG)?)
}

/// Parse a blob, requiring every byte to be consumed.
pub fn from_blob<T: bincode::Decode<()>>(blob: &[u8]) -> Result<T, BlobError> {
    let (value, read) = bincode::decode_from_slice(blob, CONFIG)?;
    if read != blob.len() {
        return Err(BlobError::TrailingBytes(blob.len() - read));
    }
    Ok(value)
}

/// Content hash of raw bytes.
pub fn hash_bytes(bytes: &[u8]) -> Hash {
    Hash(*blake3::hash(bytes).as_bytes())
}

/// Hash of the concatenation of two hashes.
fn hash_pair(a: &Hash, b: &Hash) -> Hash {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&a.0);
    hasher.update(&b.0);
    Hash(*hasher.finalize().as_bytes())
}

/// Merkle root over a list of hashes.
///
/// Single element is its own root; two elements hash directly; longer
/// lists fold the tail down to the largest power of two below the
/// length first, then reduce level by level.
///
/// # Panics
/// Panics on an empty slice; every block has at least its coinbase.
pub fn tree_hash(hashes: &[Hash]) -> Hash {
    match hashes.len() {
        0 => panic!("tree_hash called with no hashes"),
        1 => hashes[0],
        2 => hash_pair(&hashes[0], &hashes[1]),
        len => {
            let mut cnt = len.next_power_of_two() / 2;

            let mut ints = hashes[..2 * cnt - len].to_vec();
            for pair in hashes[2 * cnt - len..].chunks_exact(2) {
                ints.push(hash_pair(&pair[0], &pair[1]));
            }
            debug_assert_eq!(ints.len(), cnt);

            while cnt > 2 {
                cnt /= 2;
                for i in 0..cnt {
                    ints[i] = hash_pair(&ints[2 * i], &ints[2 * i + 1]);
                }
                ints.truncate(cnt);
            }

            hash_pair(&ints[0], &ints[1])
        }
    }
}

/// Append a LEB128 varint.
pub(crate) fn write_varint(buf: &mut Vec<u8>, mut value: u64) {
    while value >= 0x80 {
        buf.push((value as u8 & 0x7f) | 0x80);
        value >>= 7;
    }
    buf.push(value as u8);
}
