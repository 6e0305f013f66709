//! Server-side CENC/ClearKey segment decryption (§4.6).
//!
//! `original_source`'s `utils/drm_decrypter.py` wasn't present in the
//! retrieved pack, so this is built from first principles against the
//! CENC/ISOBMFF standard rather than translated from a reference routine.

mod cenc;
mod init_cache;
mod mp4;

pub use cenc::{decrypt_segment, parse_hex16};
pub use init_cache::InitSegmentCache;
