//! FNV-1a hashing for topology fingerprints and shard selection.

const FNV_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1a.
#[must_use]
pub fn fnv1a_32(bytes: &[u8]) -> u32 {
    bytes.iter().fold(FNV_OFFSET_BASIS, |hash, byte| (hash ^ u32::from(*byte)).wrapping_mul(FNV_PRIME))
}

/// Fingerprint of a dynamic node set: FNV-1a over the sorted, concatenated
/// identifiers. The empty set maps to `0`.
#[must_use]
pub fn topology_fingerprint<I, S>(nodes: I) -> u32
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut sorted: Vec<S> = nodes.into_iter().collect();
    if sorted.is_empty() {
        return 0;
    }
    sorted.sort_by(|a, b| a.as_ref().cmp(b.as_ref()));
    let joined: String = sorted.iter().map(AsRef::as_ref).collect();
    fnv1a_32(joined.as_bytes())
}
