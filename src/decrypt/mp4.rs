//! Minimal ISOBMFF box walker (§4.6).
//!
//! Parses only enough of the box tree to locate the handful of boxes CENC
//! decryption needs (`stsd`/`sinf`/`schi`/`tenc` in the init segment,
//! `tfhd`/`trun`/`senc` in each media segment's `moof`). No `mp4`/ISOBMFF
//! crate is in the dependency set, so this walks raw bytes directly —
//! CENC's box layout is fixed binary, not a place an XML/DOM crate helps.

#[derive(Debug, Clone, Copy)]
pub struct BoxHeader {
    pub box_type: [u8; 4],
    pub header_len: usize,
    pub total_len: usize,
}

/// Read one box header at `offset`. Handles the 64-bit `largesize` extension
/// (`size == 1`) and the to-end-of-buffer sentinel (`size == 0`).
pub fn read_box_header(data: &[u8], offset: usize) -> Option<BoxHeader> {
    if data.len() < offset + 8 {
        return None;
    }
    let size32 = u32::from_be_bytes(data[offset..offset + 4].try_into().ok()?);
    let box_type: [u8; 4] = data[offset + 4..offset + 8].try_into().ok()?;

    let (header_len, total_len) = match size32 {
        0 => (8, data.len() - offset),
        1 => {
            if data.len() < offset + 16 {
                return None;
            }
            let size64 = u64::from_be_bytes(data[offset + 8..offset + 16].try_into().ok()?);
            (16, size64 as usize)
        }
        n => (8, n as usize),
    };

    if total_len < header_len || offset + total_len > data.len() {
        return None;
    }

    Some(BoxHeader { box_type, header_len, total_len })
}

/// Find the first direct child box of `fourcc`, returning its content
/// (everything after the header, up to the end of the box).
pub fn find_box<'a>(data: &'a [u8], fourcc: &[u8; 4]) -> Option<&'a [u8]> {
    let mut offset = 0;
    while offset + 8 <= data.len() {
        let hdr = read_box_header(data, offset)?;
        if &hdr.box_type == fourcc {
            return Some(&data[offset + hdr.header_len..offset + hdr.total_len]);
        }
        offset += hdr.total_len;
    }
    None
}

/// Walk a chain of single-child lookups, e.g. `moov/trak/mdia/minf/stbl`.
pub fn find_box_path<'a>(data: &'a [u8], path: &[&[u8; 4]]) -> Option<&'a [u8]> {
    let mut cur = data;
    for fourcc in path {
        cur = find_box(cur, fourcc)?;
    }
    Some(cur)
}

/// Per-track protection info carried in the init segment's `sinf/schi/tenc`.
#[derive(Debug, Clone, Copy)]
pub struct TencInfo {
    pub default_iv_size: u8,
    pub default_kid: [u8; 16],
}

fn sample_entry_header_len(box_type: &[u8; 4]) -> usize {
    // Audio sample entries have a 28-byte fixed header before any child
    // boxes; video (and everything else) uses the 78-byte video layout.
    match box_type {
        b"enca" | b"mp4a" | b"ac-3" | b"ec-3" | b"alac" => 28,
        _ => 78,
    }
}

fn parse_tenc_box(tenc: &[u8]) -> Option<TencInfo> {
    if tenc.len() < 4 {
        return None;
    }
    // FullBox header(4) + reserved(1) + (reserved, or crypt/skip-block-pair
    // for version > 0)(1) — either way the next field starts at byte 6.
    let off = 6;
    if tenc.len() < off + 18 {
        return None;
    }
    let default_iv_size = tenc[off + 1];
    let mut default_kid = [0u8; 16];
    default_kid.copy_from_slice(&tenc[off + 2..off + 18]);
    Some(TencInfo { default_iv_size, default_kid })
}

/// Locate and parse the init segment's protection scheme info.
pub fn parse_tenc(init_bytes: &[u8]) -> Option<TencInfo> {
    let stbl = find_box_path(init_bytes, &[b"moov", b"trak", b"mdia", b"minf", b"stbl"])?;
    let stsd = find_box(stbl, b"stsd")?;
    if stsd.len() < 8 {
        return None;
    }
    // FullBox header (4) + entry_count (4), then the first sample entry.
    let entries = &stsd[8..];
    let entry_hdr = read_box_header(entries, 0)?;
    let entry_body = &entries[entry_hdr.header_len..entry_hdr.total_len];
    let skip = sample_entry_header_len(&entry_hdr.box_type).min(entry_body.len());
    let children = &entry_body[skip..];

    let sinf = find_box(children, b"sinf")?;
    let schi = find_box(sinf, b"schi")?;
    let tenc = find_box(schi, b"tenc")?;
    parse_tenc_box(tenc)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_box(fourcc: &[u8; 4], content: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&((8 + content.len()) as u32).to_be_bytes());
        out.extend_from_slice(fourcc);
        out.extend_from_slice(content);
        out
    }

    #[test]
    fn reads_simple_box_header() {
        let data = make_box(b"free", b"hello");
        let hdr = read_box_header(&data, 0).unwrap();
        assert_eq!(&hdr.box_type, b"free");
        assert_eq!(hdr.header_len, 8);
        assert_eq!(hdr.total_len, 13);
    }

    #[test]
    fn find_box_locates_nested_child() {
        let inner = make_box(b"inr1", b"x");
        let outer = make_box(b"outr", &inner);
        let found = find_box(&outer, b"inr1").unwrap();
        assert_eq!(found, b"x");
    }

    #[test]
    fn find_box_path_walks_chain() {
        let leaf = make_box(b"leaf", b"data");
        let mid = make_box(b"mid1", &leaf);
        let root = make_box(b"root", &mid);
        let found = find_box_path(&root, &[b"mid1", b"leaf"]).unwrap();
        assert_eq!(found, b"data");
    }

    #[test]
    fn parse_tenc_locates_kid_and_iv_size() {
        let mut tenc_content = vec![0u8; 6]; // version/flags(4) + reserved(2)
        tenc_content.push(0); // default_isProtected
        tenc_content.push(8); // default_Per_Sample_IV_Size
        tenc_content.extend_from_slice(&[0xAA; 16]); // default_KID
        let tenc = make_box(b"tenc", &tenc_content);
        let schi = make_box(b"schi", &tenc);
        let sinf = make_box(b"sinf", &schi);
        // 78-byte video sample-entry fixed header before children.
        let mut entry_body = vec![0u8; 78];
        entry_body.extend_from_slice(&sinf);
        let entry = make_box(b"encv", &entry_body);
        let mut stsd_content = vec![0u8; 8]; // version/flags + entry_count
        stsd_content.extend_from_slice(&entry);
        let stsd = make_box(b"stsd", &stsd_content);
        let stbl = make_box(b"stbl", &stsd);
        let minf = make_box(b"minf", &stbl);
        let mdia = make_box(b"mdia", &minf);
        let trak = make_box(b"trak", &mdia);
        let moov = make_box(b"moov", &trak);

        let info = parse_tenc(&moov).unwrap();
        assert_eq!(info.default_iv_size, 8);
        assert_eq!(info.default_kid, [0xAA; 16]);
    }
}
