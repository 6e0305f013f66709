//! CENC ClearKey decryption (§4.6): parses `moof/traf/{tfhd,trun,senc}`,
//! AES-128-CTR decrypts each sample's encrypted subsample ranges in place
//! over the media segment's `mdat` bytes, and fuses the untouched init
//! segment with the decrypted media segment into one fragmented-MP4 blob.

use super::mp4::{find_box, parse_tenc, read_box_header};
use crate::error::{ProxyError, Result};
use aes::Aes128;
use cipher::generic_array::GenericArray;
use cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;

type Aes128Ctr = Ctr128BE<Aes128>;

struct SampleCrypto {
    offset: usize,
    size: usize,
    iv: Vec<u8>,
    subsamples: Vec<(u16, u32)>,
}

fn u32_flags(box_bytes: &[u8]) -> u32 {
    u32::from_be_bytes([0, box_bytes[1], box_bytes[2], box_bytes[3]])
}

/// `tfhd`: track id, base data offset, default sample size, default-base-is-moof.
fn parse_tfhd(tfhd: &[u8]) -> (Option<u64>, Option<u32>, bool) {
    if tfhd.len() < 8 {
        return (None, None, false);
    }
    let flags = u32_flags(tfhd);
    let mut off = 8;
    let mut base_data_offset = None;
    if flags & 0x000001 != 0 {
        if tfhd.len() >= off + 8 {
            base_data_offset = Some(u64::from_be_bytes(tfhd[off..off + 8].try_into().unwrap_or_default()));
        }
        off += 8;
    }
    if flags & 0x000002 != 0 {
        off += 4;
    }
    if flags & 0x000008 != 0 {
        off += 4;
    }
    let mut default_sample_size = None;
    if flags & 0x000010 != 0 {
        if tfhd.len() >= off + 4 {
            default_sample_size = Some(u32::from_be_bytes(tfhd[off..off + 4].try_into().unwrap_or_default()));
        }
        off += 4;
    }
    let default_base_is_moof = flags & 0x020000 != 0;
    (base_data_offset, default_sample_size, default_base_is_moof)
}

/// `trun`: explicit data offset and a `None`-padded per-sample size list
/// (`None` entries fall back to `tfhd`'s default sample size).
fn parse_trun(trun: &[u8]) -> (Option<i32>, Vec<Option<u32>>) {
    if trun.len() < 8 {
        return (None, vec![]);
    }
    let flags = u32_flags(trun);
    let sample_count = u32::from_be_bytes(trun[4..8].try_into().unwrap_or_default());
    let mut off = 8;

    let mut data_offset = None;
    if flags & 0x000001 != 0 {
        if trun.len() >= off + 4 {
            data_offset = Some(i32::from_be_bytes(trun[off..off + 4].try_into().unwrap_or_default()));
        }
        off += 4;
    }
    if flags & 0x000004 != 0 {
        off += 4;
    }

    let mut sizes = Vec::with_capacity(sample_count as usize);
    for _ in 0..sample_count {
        if flags & 0x000100 != 0 {
            off += 4;
        }
        if flags & 0x000200 != 0 {
            let size = trun.get(off..off + 4).map(|b| u32::from_be_bytes(b.try_into().unwrap_or_default()));
            sizes.push(size);
            off += 4;
        } else {
            sizes.push(None);
        }
        if flags & 0x000400 != 0 {
            off += 4;
        }
        if flags & 0x000800 != 0 {
            off += 4;
        }
    }
    (data_offset, sizes)
}

/// `senc`: per-sample IV plus, when subsample encryption is flagged, each
/// sample's clear/encrypted byte-range pairs.
fn parse_senc(senc: &[u8], iv_size: usize) -> Vec<(Vec<u8>, Vec<(u16, u32)>)> {
    if senc.len() < 8 || iv_size == 0 {
        return vec![];
    }
    let flags = u32_flags(senc);
    let sample_count = u32::from_be_bytes(senc[4..8].try_into().unwrap_or_default());
    let has_subsamples = flags & 0x000002 != 0;
    let mut off = 8;
    let mut out = Vec::with_capacity(sample_count as usize);

    for _ in 0..sample_count {
        if senc.len() < off + iv_size {
            break;
        }
        let iv = senc[off..off + iv_size].to_vec();
        off += iv_size;

        let mut subsamples = Vec::new();
        if has_subsamples {
            if senc.len() < off + 2 {
                break;
            }
            let sub_count = u16::from_be_bytes(senc[off..off + 2].try_into().unwrap());
            off += 2;
            for _ in 0..sub_count {
                if senc.len() < off + 6 {
                    break;
                }
                let clear = u16::from_be_bytes(senc[off..off + 2].try_into().unwrap());
                let encrypted = u32::from_be_bytes(senc[off + 2..off + 6].try_into().unwrap());
                subsamples.push((clear, encrypted));
                off += 6;
            }
        }
        out.push((iv, subsamples));
    }
    out
}

/// CENC pads an 8-byte truncated IV with 8 zero counter bytes; a 16-byte IV
/// is used as the full initial counter block verbatim.
fn build_iv(sample_iv: &[u8]) -> [u8; 16] {
    let mut iv = [0u8; 16];
    match sample_iv.len() {
        16 => iv.copy_from_slice(sample_iv),
        8 => iv[..8].copy_from_slice(sample_iv),
        n => iv[..n.min(16)].copy_from_slice(&sample_iv[..n.min(16)]),
    }
    iv
}

/// Decrypt one sample's encrypted byte ranges in place within `mdat_region`.
/// Clear subsample bytes are skipped without consuming keystream; the CTR
/// counter runs continuously across a sample's subsamples and resets only
/// at the next sample (fresh cipher instance, fresh IV).
fn decrypt_sample(buf: &mut [u8], key: &[u8; 16], sample: &SampleCrypto) {
    let iv = build_iv(&sample.iv);
    let mut cipher = Aes128Ctr::new(GenericArray::from_slice(key), GenericArray::from_slice(&iv));

    if sample.offset >= buf.len() {
        return;
    }
    let sample_end = (sample.offset + sample.size).min(buf.len());

    if sample.subsamples.is_empty() {
        cipher.apply_keystream(&mut buf[sample.offset..sample_end]);
        return;
    }

    let mut cursor = sample.offset;
    for &(clear, encrypted) in &sample.subsamples {
        cursor = (cursor + clear as usize).min(sample_end);
        let enc_end = (cursor + encrypted as usize).min(sample_end);
        if cursor < enc_end {
            cipher.apply_keystream(&mut buf[cursor..enc_end]);
        }
        cursor = enc_end;
    }
}

/// Decrypt every `moof`-delimited fragment in `media` and fuse the result
/// behind the (unmodified) `init` segment bytes.
pub fn decrypt_segment(init: &[u8], media: &[u8], key: &[u8; 16]) -> Result<Vec<u8>> {
    let iv_size = parse_tenc(init)
        .map(|t| if t.default_iv_size == 0 { 16 } else { t.default_iv_size as usize })
        .unwrap_or(8);

    let mut output = media.to_vec();
    let mut offset = 0usize;

    while let Some(hdr) = read_box_header(media, offset) {
        if &hdr.box_type == b"moof" {
            let moof_start = offset;
            let moof_content = &media[offset + hdr.header_len..offset + hdr.total_len];

            if let Some(traf) = find_box(moof_content, b"traf") {
                let tfhd = find_box(traf, b"tfhd");
                let trun = find_box(traf, b"trun");
                let senc = find_box(traf, b"senc");

                if let (Some(tfhd), Some(trun), Some(senc)) = (tfhd, trun, senc) {
                    let (base_data_offset, default_sample_size, default_base_is_moof) = parse_tfhd(tfhd);
                    let (data_offset, sizes) = parse_trun(trun);
                    let samples = parse_senc(senc, iv_size);

                    let base = if default_base_is_moof || base_data_offset.is_none() {
                        moof_start
                    } else {
                        base_data_offset.unwrap() as usize
                    };
                    let mut cursor = (base as i64 + data_offset.unwrap_or(0) as i64).max(0) as usize;

                    for (i, (iv, subsamples)) in samples.into_iter().enumerate() {
                        let size = sizes.get(i).copied().flatten().or(default_sample_size).unwrap_or(0) as usize;
                        let sample = SampleCrypto { offset: cursor, size, iv, subsamples };
                        decrypt_sample(&mut output, key, &sample);
                        cursor += size;
                    }
                }
            }
        }
        offset += hdr.total_len;
    }

    let mut fused = Vec::with_capacity(init.len() + output.len());
    fused.extend_from_slice(init);
    fused.extend_from_slice(&output);
    Ok(fused)
}

/// Parse a hex string into a fixed 16-byte key/KID, as used by both the
/// decrypt endpoint and the license endpoint's ClearKey JWK synthesis.
pub fn parse_hex16(hex: &str) -> Result<[u8; 16]> {
    if hex.len() != 32 {
        return Err(ProxyError::BadRequest(format!("expected 32 hex chars, got {}", hex.len())));
    }
    let mut out = [0u8; 16];
    for i in 0..16 {
        out[i] = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
            .map_err(|_| ProxyError::BadRequest(format!("invalid hex in key/kid: {hex}")))?;
    }
    Ok(out)
}
