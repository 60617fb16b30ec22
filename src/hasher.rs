use sha2::{Digest, Sha256};

/// SHA-256 applied twice, as raw bytes.
pub fn sha256d_digest(data: impl AsRef<[u8]>) -> [u8; 32] {
    let first = Sha256::digest(data.as_ref());
    let second = Sha256::digest(first);

    let mut digest = [0; 32];
    digest.copy_from_slice(&second);
    digest
}

/// SHA-256 applied twice, rendered as lowercase hex.
pub fn sha256d(data: impl AsRef<[u8]>) -> String {
    hex::encode(sha256d_digest(data))
}

/// Number of leading zero bits of a digest read as a big-endian integer.
pub fn leading_zero_bits(digest: &[u8; 32]) -> u32 {
    let mut zeros = 0;

    for byte in digest {
        if *byte != 0 {
            return zeros + byte.leading_zeros();
        }

        zeros += 8;
    }

    zeros
}
