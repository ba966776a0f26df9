//! fMP4 writer for building test media.
//!
//! Produces movies with any number of tracks and interleaved fragments, so
//! demuxing can be exercised without media files on disk.

use super::boxes::{
    fullbox_header, write_box, write_container_box, write_mdat_header, write_trex,
};
use bytes::BufMut;

/// Identity transform in 16.16 / 2.30 fixed point.
const UNITY_MATRIX: [u32; 9] = [0x0001_0000, 0, 0, 0, 0x0001_0000, 0, 0, 0, 0x4000_0000];

/// AVC decoder configuration (High profile, level 3.1).
pub const AVCC_HIGH_31: &[u8] = &[
    0x01, // configurationVersion
    0x64, // AVCProfileIndication (High)
    0x00, // profile_compatibility
    0x1F, // AVCLevelIndication (3.1)
    0xFC | 3, // lengthSizeMinusOne=3 (4-byte NALUs)
    0xE0 | 1, // numOfSequenceParameterSets=1
    0x00, 0x04, // SPS length
    0x67, 0x64, 0x00, 0x1F, // SPS data
    0x01, // numOfPictureParameterSets
    0x00, 0x02, // PPS length
    0x68, 0xEE, // PPS data
];

/// AAC-LC elementary stream descriptor (44.1 kHz stereo).
pub const ESDS_AAC_LC: &[u8] = &[
    0x00, 0x00, 0x00, 0x00, // version + flags
    0x03, 0x19, // ES_Descriptor tag + length
    0x00, 0x01, // ES_ID
    0x00, // streamDependenceFlag, etc.
    0x04, 0x11, // DecoderConfigDescriptor tag + length
    0x40, // objectTypeIndication (AAC)
    0x15, // streamType (audio)
    0x00, 0x00, 0x00, // bufferSizeDB
    0x00, 0x01, 0xF4, 0x00, // maxBitrate
    0x00, 0x01, 0xF4, 0x00, // avgBitrate
    0x05, 0x02, // AudioSpecificConfig tag + length
    0x12, 0x10, // AAC-LC, 44100Hz, stereo
    0x06, 0x01, 0x02, // SLConfigDescriptor
];

/// Sample description of a test track.
#[derive(Debug, Clone)]
pub enum TrackCodec {
    /// H.264 video.
    Avc { width: u32, height: u32 },
    /// AAC audio.
    Aac { sample_rate: u32, channels: u16 },
    /// WebVTT subtitles.
    Text,
}

/// Configuration for one track of a test movie.
#[derive(Debug, Clone)]
pub struct TrackConfig {
    /// Track ID (1-based).
    pub track_id: u32,
    /// Media timescale (ticks per second).
    pub timescale: u32,
    /// Sample description.
    pub codec: TrackCodec,
}

impl TrackConfig {
    /// A 1280x720 H.264 track.
    pub fn avc(track_id: u32, timescale: u32) -> Self {
        Self {
            track_id,
            timescale,
            codec: TrackCodec::Avc {
                width: 1280,
                height: 720,
            },
        }
    }

    /// A stereo AAC-LC track.
    pub fn aac(track_id: u32, timescale: u32) -> Self {
        Self {
            track_id,
            timescale,
            codec: TrackCodec::Aac {
                sample_rate: timescale,
                channels: 2,
            },
        }
    }

    /// A WebVTT subtitle track.
    pub fn text(track_id: u32, timescale: u32) -> Self {
        Self {
            track_id,
            timescale,
            codec: TrackCodec::Text,
        }
    }
}

/// Information about a single sample in a fragment.
#[derive(Debug, Clone)]
pub struct SampleInfo {
    /// Raw sample data.
    pub data: Vec<u8>,
    /// Sample duration in timescale units.
    pub duration: u32,
    /// Whether this sample is a keyframe (sync sample).
    pub is_keyframe: bool,
    /// Composition time offset (signed, for B-frames).
    pub composition_offset: i32,
}

/// The samples one track contributes to a fragment.
#[derive(Debug, Clone)]
pub struct TrackRun {
    /// Track ID.
    pub track_id: u32,
    /// Base media decode time in timescale units.
    pub decode_time: u64,
    /// Samples in decode order.
    pub samples: Vec<SampleInfo>,
}

/// Generate `ftyp` + `moov` (with `mvex`) declaring every track.
pub fn write_init_segment(tracks: &[TrackConfig], timescale: u32, duration: u64) -> Vec<u8> {
    let ftyp = write_box(b"ftyp", b"iso5\0\0\x02\0iso5iso6mp41");

    let mvhd = write_mvhd(timescale, duration);
    let traks: Vec<Vec<u8>> = tracks.iter().map(write_trak).collect();
    let trexes: Vec<Vec<u8>> = tracks.iter().map(|t| write_trex(t.track_id)).collect();

    let mut mehd = fullbox_header(1, 0).to_vec();
    mehd.put_u64(duration);
    let mehd = write_box(b"mehd", &mehd);
    let mut mvex_children: Vec<&[u8]> = vec![mehd.as_slice()];
    mvex_children.extend(trexes.iter().map(|t| t.as_slice()));
    let mvex = write_container_box(b"mvex", &mvex_children);

    let mut moov_children: Vec<&[u8]> = vec![mvhd.as_slice()];
    moov_children.extend(traks.iter().map(|t| t.as_slice()));
    moov_children.push(&mvex);
    let moov = write_container_box(b"moov", &moov_children);

    [ftyp, moov].concat()
}

/// Generate one `moof` + `mdat` holding a traf per run.
///
/// Sample data is laid out run after run in a single `mdat`; every `trun`
/// addresses it relative to the `moof`.
pub fn write_fragment(sequence_number: u32, runs: &[TrackRun]) -> Vec<u8> {
    let mut mfhd = fullbox_header(0, 0).to_vec();
    mfhd.put_u32(sequence_number);
    let mfhd = write_box(b"mfhd", &mfhd);

    // Every traf has a fixed layout except for the per-sample entries, so
    // the moof size is known before data offsets are written.
    let traf_sizes: Vec<usize> = runs
        .iter()
        .map(|run| 8 + 16 + 20 + (8 + 12 + run.samples.len() * 16))
        .collect();
    let moof_size = 8 + mfhd.len() + traf_sizes.iter().sum::<usize>();

    let total_data: u64 = runs
        .iter()
        .flat_map(|r| r.samples.iter())
        .map(|s| s.data.len() as u64)
        .sum();
    let mdat_hdr = write_mdat_header(total_data);

    let mut data_offset = (moof_size + mdat_hdr.len()) as i32;
    let mut trafs = Vec::with_capacity(runs.len());
    for run in runs {
        // default-base-is-moof
        let mut tfhd = fullbox_header(0, 0x02_0000).to_vec();
        tfhd.put_u32(run.track_id);
        let mut tfdt = fullbox_header(1, 0).to_vec();
        tfdt.put_u64(run.decode_time);
        let (tfhd, tfdt) = (write_box(b"tfhd", &tfhd), write_box(b"tfdt", &tfdt));
        let trun = write_trun(&run.samples, data_offset);
        data_offset += run.samples.iter().map(|s| s.data.len() as i32).sum::<i32>();
        trafs.push(write_container_box(b"traf", &[&tfhd, &tfdt, &trun]));
    }

    let mut moof_children: Vec<&[u8]> = vec![mfhd.as_slice()];
    moof_children.extend(trafs.iter().map(|t| t.as_slice()));
    let moof = write_container_box(b"moof", &moof_children);

    let mut out = [moof, mdat_hdr].concat();
    for sample in runs.iter().flat_map(|r| &r.samples) {
        out.put_slice(&sample.data);
    }
    out
}

/// A 720p H.264 (90 kHz) + AAC (48 kHz) movie of `fragments` one-second
/// interleaved fragments, with a `sidx` after the `moov` indexing all of
/// them. Sample bytes encode the fragment number.
pub fn write_sample_movie(fragments: usize) -> Vec<u8> {
    let sample = |byte: u8, len: usize, duration: u32| SampleInfo {
        data: vec![byte; len],
        duration,
        is_keyframe: true,
        composition_offset: 0,
    };

    let init = write_init_segment(
        &[TrackConfig::avc(1, 90000), TrackConfig::aac(2, 48000)],
        1000,
        fragments as u64 * 1000,
    );
    let bodies: Vec<Vec<u8>> = (0..fragments)
        .map(|i| {
            write_fragment(
                i as u32 + 1,
                &[
                    TrackRun {
                        track_id: 1,
                        decode_time: i as u64 * 90000,
                        samples: vec![sample(i as u8, 96, 45000), sample(i as u8, 48, 45000)],
                    },
                    TrackRun {
                        track_id: 2,
                        decode_time: i as u64 * 48000,
                        samples: vec![sample(0x80 | i as u8, 24, 48000)],
                    },
                ],
            )
        })
        .collect();

    let references: Vec<(u32, u32)> = bodies.iter().map(|b| (b.len() as u32, 1000)).collect();
    let sidx = write_sidx(1, 1000, 0, &references);

    let mut movie = init;
    movie.extend_from_slice(&sidx);
    for body in bodies {
        movie.extend_from_slice(&body);
    }
    movie
}

/// Generate a version 0 `sidx` box.
///
/// `references` lists `(referenced_size, subsegment_duration)` pairs, all
/// pointing at media. The first reference starts right after the box.
pub fn write_sidx(
    reference_id: u32,
    timescale: u32,
    earliest_presentation_time: u32,
    references: &[(u32, u32)],
) -> Vec<u8> {
    let mut content = fullbox_header(0, 0).to_vec();
    content.put_u32(reference_id);
    content.put_u32(timescale);
    content.put_u32(earliest_presentation_time);
    // first_offset, reserved
    content.put_bytes(0, 6);
    content.put_u16(references.len() as u16);
    for &(size, duration) in references {
        content.put_u32(size & 0x7fff_ffff);
        content.put_u32(duration);
        // starts_with_SAP, SAP type 1
        content.put_u32(0x9000_0000);
    }
    write_box(b"sidx", &content)
}

/// Version 1 `mvhd`.
pub fn write_mvhd(timescale: u32, duration: u64) -> Vec<u8> {
    let mut content = fullbox_header(1, 0).to_vec();
    // creation and modification times
    content.put_bytes(0, 16);
    content.put_u32(timescale);
    content.put_u64(duration);
    // rate 1.0, volume 1.0
    content.put_u32(0x0001_0000);
    content.put_u16(0x0100);
    content.put_bytes(0, 10);
    put_matrix(&mut content);
    content.put_bytes(0, 24);
    // next_track_ID
    content.put_u32(u32::MAX);
    write_box(b"mvhd", &content)
}

fn put_matrix(content: &mut Vec<u8>) {
    UNITY_MATRIX.iter().for_each(|&v| content.put_u32(v));
}

fn write_trak(track: &TrackConfig) -> Vec<u8> {
    let (width, height) = match track.codec {
        TrackCodec::Avc { width, height } => (width, height),
        _ => (0, 0),
    };

    // enabled | in_movie | in_preview
    let mut tkhd = fullbox_header(1, 7).to_vec();
    tkhd.put_bytes(0, 16);
    tkhd.put_u32(track.track_id);
    // reserved, duration, reserved, layer, alternate_group
    tkhd.put_bytes(0, 4 + 8 + 8 + 2 + 2);
    tkhd.put_u16(match track.codec {
        TrackCodec::Aac { .. } => 0x0100,
        _ => 0,
    });
    tkhd.put_u16(0);
    put_matrix(&mut tkhd);
    tkhd.put_u32(width << 16);
    tkhd.put_u32(height << 16);
    let tkhd = write_box(b"tkhd", &tkhd);

    let mut mdhd = fullbox_header(1, 0).to_vec();
    mdhd.put_bytes(0, 16);
    mdhd.put_u32(track.timescale);
    mdhd.put_u64(0);
    // language "und"
    mdhd.put_u16(0x55c4);
    mdhd.put_u16(0);
    let mdhd = write_box(b"mdhd", &mdhd);

    let (handler, media_header, entry) = match &track.codec {
        TrackCodec::Avc { width, height } => (
            b"vide",
            write_box(b"vmhd", &[0, 0, 0, 1, 0, 0, 0, 0, 0, 0, 0, 0]),
            write_avc1(*width, *height),
        ),
        TrackCodec::Aac {
            sample_rate,
            channels,
        } => (
            b"soun",
            write_box(b"smhd", &[0u8; 8]),
            write_mp4a(*sample_rate, *channels),
        ),
        TrackCodec::Text => (
            b"text",
            write_box(b"nmhd", &[0u8; 4]),
            write_box(b"wvtt", &[0, 0, 0, 0, 0, 0, 0, 1]),
        ),
    };

    let mut hdlr = fullbox_header(0, 0).to_vec();
    hdlr.put_u32(0);
    hdlr.put_slice(handler);
    hdlr.put_bytes(0, 12);
    hdlr.put_slice(b"oculux\0");
    let hdlr = write_box(b"hdlr", &hdlr);

    let mut dref = fullbox_header(0, 0).to_vec();
    dref.put_u32(1);
    dref.put_slice(&write_box(b"url ", &fullbox_header(0, 1)));
    let dinf = write_container_box(b"dinf", &[&write_box(b"dref", &dref)]);

    let mut stsd = fullbox_header(0, 0).to_vec();
    stsd.put_u32(1);
    stsd.put_slice(&entry);
    let stsd = write_box(b"stsd", &stsd);
    let empty = [0u8; 8];
    let stbl = write_container_box(
        b"stbl",
        &[
            &stsd,
            &write_box(b"stts", &empty),
            &write_box(b"stsc", &empty),
            &write_box(b"stsz", &[0u8; 12]),
            &write_box(b"stco", &empty),
        ],
    );
    let minf = write_container_box(b"minf", &[&media_header, &dinf, &stbl]);
    let mdia = write_container_box(b"mdia", &[&mdhd, &hdlr, &minf]);
    write_container_box(b"trak", &[&tkhd, &mdia])
}

/// Visual or audio sample entry header: reserved bytes and data reference 1.
fn sample_entry() -> Vec<u8> {
    let mut entry = vec![0u8; 6];
    entry.put_u16(1);
    entry
}

fn write_avc1(width: u32, height: u32) -> Vec<u8> {
    let mut entry = sample_entry();
    entry.put_bytes(0, 16);
    entry.put_u16(width as u16);
    entry.put_u16(height as u16);
    // 72 dpi both ways
    entry.put_u32(0x0048_0000);
    entry.put_u32(0x0048_0000);
    entry.put_u32(0);
    // frame_count, compressorname
    entry.put_u16(1);
    entry.put_bytes(0, 32);
    entry.put_u16(0x0018);
    entry.put_i16(-1);
    entry.put_slice(&write_box(b"avcC", AVCC_HIGH_31));
    write_box(b"avc1", &entry)
}

fn write_mp4a(sample_rate: u32, channels: u16) -> Vec<u8> {
    let mut entry = sample_entry();
    entry.put_bytes(0, 8);
    entry.put_u16(channels);
    entry.put_u16(16);
    entry.put_bytes(0, 4);
    entry.put_u32(sample_rate << 16);
    entry.put_slice(&write_box(b"esds", ESDS_AAC_LC));
    write_box(b"mp4a", &entry)
}

/// `trun` carrying duration, size, flags and composition offset per sample.
fn write_trun(samples: &[SampleInfo], data_offset: i32) -> Vec<u8> {
    const FLAGS: u32 = 0x0001 | 0x0100 | 0x0200 | 0x0400 | 0x0800;
    // Version 1 for signed composition offsets.
    let mut content = fullbox_header(1, FLAGS).to_vec();
    content.put_u32(samples.len() as u32);
    content.put_i32(data_offset);
    for sample in samples {
        content.put_u32(sample.duration);
        content.put_u32(sample.data.len() as u32);
        content.put_u32(if sample.is_keyframe { 0x0200_0000 } else { 0x0101_0000 });
        content.put_i32(sample.composition_offset);
    }
    write_box(b"trun", &content)
}
