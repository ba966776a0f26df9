//! RFC 6381 codec strings from MP4 sample descriptions.

use super::atoms::{find_child, read_u16, read_u32};
use crate::Result;

/// Visual sample entry fields preceding child boxes.
const VISUAL_ENTRY_LEN: usize = 78;
/// Audio sample entry fields (version 0) preceding child boxes.
const AUDIO_ENTRY_LEN: usize = 28;

/// Derive the codec string for the first entry of an `stsd` body.
///
/// Returns `Ok(None)` when the description holds no entries.
pub fn codec_string(stsd: &[u8]) -> Result<Option<String>> {
    let entry_count = read_u32(stsd, 4)?;
    if entry_count == 0 || stsd.len() < 16 {
        return Ok(None);
    }

    let entry_size = read_u32(stsd, 8)? as usize;
    let fourcc = [stsd[12], stsd[13], stsd[14], stsd[15]];
    let end = entry_size.clamp(8, stsd.len() - 8) + 8;
    let entry = &stsd[16..end];

    let codec = match &fourcc {
        b"avc1" | b"avc3" => visual_children(entry)
            .and_then(|c| find_child(c, super::AtomType(*b"avcC")))
            .and_then(|avcc| avc_string(&fourcc, avcc)),
        b"hvc1" | b"hev1" => visual_children(entry)
            .and_then(|c| find_child(c, super::AtomType(*b"hvcC")))
            .and_then(|hvcc| hevc_string(&fourcc, hvcc)),
        b"mp4a" => Some(
            audio_children(entry)
                .and_then(|c| find_child(c, super::AtomType(*b"esds")))
                .and_then(mp4a_string)
                .unwrap_or_else(|| "mp4a.40.2".to_string()),
        ),
        b"Opus" => Some("opus".to_string()),
        b"fLaC" => Some("flac".to_string()),
        _ => None,
    };

    Ok(Some(codec.unwrap_or_else(|| fourcc_string(&fourcc))))
}

fn fourcc_string(fourcc: &[u8; 4]) -> String {
    String::from_utf8_lossy(fourcc).trim_end().to_string()
}

fn visual_children(entry: &[u8]) -> Option<&[u8]> {
    entry.get(VISUAL_ENTRY_LEN..)
}

fn audio_children(entry: &[u8]) -> Option<&[u8]> {
    // QuickTime sound description versions 1 and 2 append extra fields.
    let extra = match read_u16(entry, 8).ok()? {
        1 => 16,
        2 => 36,
        _ => 0,
    };
    entry.get(AUDIO_ENTRY_LEN + extra..)
}

/// `avc1.PPCCLL` from an `avcC` body.
fn avc_string(fourcc: &[u8; 4], avcc: &[u8]) -> Option<String> {
    let profile = avcc.get(1)?;
    let compat = avcc.get(2)?;
    let level = avcc.get(3)?;
    Some(format!(
        "{}.{:02x}{:02x}{:02x}",
        fourcc_string(fourcc),
        profile,
        compat,
        level
    ))
}

/// `hvc1.[A-C]P.C.TL.B0...` from an `hvcC` body.
fn hevc_string(fourcc: &[u8; 4], hvcc: &[u8]) -> Option<String> {
    if hvcc.len() < 13 {
        return None;
    }

    let profile_space = match hvcc[1] >> 6 {
        1 => "A",
        2 => "B",
        3 => "C",
        _ => "",
    };
    let tier = if hvcc[1] & 0x20 != 0 { 'H' } else { 'L' };
    let profile_idc = hvcc[1] & 0x1F;
    let compat = u32::from_be_bytes([hvcc[2], hvcc[3], hvcc[4], hvcc[5]]).reverse_bits();
    let level = hvcc[12];

    let mut codec = format!(
        "{}.{}{}.{:X}.{}{}",
        fourcc_string(fourcc),
        profile_space,
        profile_idc,
        compat,
        tier,
        level
    );

    let constraints = &hvcc[6..12];
    let used = constraints
        .iter()
        .rposition(|b| *b != 0)
        .map_or(0, |i| i + 1);
    for byte in &constraints[..used] {
        codec.push_str(&format!(".{byte:X}"));
    }

    Some(codec)
}

/// Split an MPEG-4 descriptor into its tag, body and the bytes after it.
fn descriptor(data: &[u8]) -> Option<(u8, &[u8], &[u8])> {
    let tag = *data.first()?;
    let mut len = 0usize;
    let mut pos = 1;
    for _ in 0..4 {
        let b = *data.get(pos)?;
        pos += 1;
        len = (len << 7) | (b & 0x7F) as usize;
        if b & 0x80 == 0 {
            break;
        }
    }
    let body = data.get(pos..pos + len)?;
    Some((tag, body, &data[pos + len..]))
}

/// `mp4a.OO.A` from an `esds` body.
fn mp4a_string(esds: &[u8]) -> Option<String> {
    // Skip version/flags.
    let (tag, es, _) = descriptor(esds.get(4..)?)?;
    if tag != 0x03 {
        return None;
    }

    let flags = *es.get(2)?;
    let mut pos = 3;
    if flags & 0x80 != 0 {
        pos += 2;
    }
    if flags & 0x40 != 0 {
        pos += 1 + *es.get(pos)? as usize;
    }
    if flags & 0x20 != 0 {
        pos += 2;
    }

    let (tag, config, _) = descriptor(es.get(pos..)?)?;
    if tag != 0x04 {
        return None;
    }
    let object_type = *config.first()?;
    if object_type != 0x40 {
        return Some(format!("mp4a.{object_type:02x}"));
    }

    let audio_object_type = config
        .get(13..)
        .and_then(descriptor)
        .filter(|(tag, _, _)| *tag == 0x05)
        .and_then(|(_, dsi, _)| {
            let b0 = *dsi.first()?;
            let aot = b0 >> 3;
            if aot == 31 {
                let b1 = *dsi.get(1)?;
                Some(32 + (((b0 & 0x07) << 3) | (b1 >> 5)))
            } else {
                Some(aot)
            }
        })
        .unwrap_or(2);

    Some(format!("mp4a.40.{audio_object_type}"))
}
