//! PES (Packetized Elementary Stream) header construction. PTS/DTS are
//! strictly increasing with DTS <= PTS, both always stamped from the
//! output grid (never a decoder's input PTS), so this module only formats
//! values its caller already computed; it does no timing math.

const PES_START_CODE_PREFIX: [u8; 3] = [0x00, 0x00, 0x01];

/// Stream IDs per ISO/IEC 13818-1 Table 2-18.
pub const STREAM_ID_VIDEO: u8 = 0xE0;
pub const STREAM_ID_AUDIO: u8 = 0xC0;

/// Builds a PES packet: start code + stream id + header + `payload`.
/// `dts_90k` is `None` for audio (PTS-only PES, per spec since audio has
/// no B-frame reordering in this pipeline) or when `dts_90k == pts_90k`.
pub fn build_pes(stream_id: u8, pts_90k: i64, dts_90k: Option<i64>, payload: &[u8]) -> Vec<u8> {
    let mut pes = Vec::with_capacity(payload.len() + 19);
    pes.extend_from_slice(&PES_START_CODE_PREFIX);
    pes.push(stream_id);

    let has_dts = dts_90k.is_some_and(|d| d != pts_90k);
    let header_data_len: u8 = if has_dts { 10 } else { 5 };
    let flags = if has_dts { 0xC0 } else { 0x80 }; // PTS_DTS_flags

    // PES_packet_length: 0 is legal for video elementary streams of
    // unbounded/variable size; this muxer always sets an explicit length
    // since every access unit here is fully buffered before muxing.
    let pes_packet_length = (3 + header_data_len as usize + payload.len()).min(0xFFFF) as u16;
    pes.extend_from_slice(&pes_packet_length.to_be_bytes());

    pes.push(0x80); // '10' marker bits, no scrambling/priority/alignment/copyright flags
    pes.push(flags);
    pes.push(header_data_len);

    push_timestamp(&mut pes, if has_dts { 0b0011 } else { 0b0010 }, pts_90k);
    if let Some(dts) = dts_90k {
        if has_dts {
            push_timestamp(&mut pes, 0b0001, dts);
        }
    }

    pes.extend_from_slice(payload);
    pes
}

/// Encodes one 33-bit timestamp in the 5-byte PES format, with `marker`
/// (`0011` for PTS-with-DTS, `0010` for PTS-only, `0001` for DTS) in the
/// top nibble of the first byte.
fn push_timestamp(out: &mut Vec<u8>, marker: u8, ts_90k: i64) {
    let ts = (ts_90k as u64) & 0x1_FFFF_FFFF;
    let b0 = (marker << 4) | (((ts >> 30) as u8 & 0x07) << 1) | 0x01;
    let b1 = (ts >> 22) as u8;
    let b2 = ((((ts >> 15) as u8) & 0x7F) << 1) | 0x01;
    let b3 = (ts >> 7) as u8;
    let b4 = (((ts & 0x7F) as u8) << 1) | 0x01;
    out.extend_from_slice(&[b0, b1, b2, b3, b4]);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pes_starts_with_start_code_and_stream_id() {
        let pes = build_pes(STREAM_ID_VIDEO, 0, None, &[1, 2, 3]);
        assert_eq!(&pes[0..3], &PES_START_CODE_PREFIX);
        assert_eq!(pes[3], STREAM_ID_VIDEO);
    }

    #[test]
    fn pts_only_pes_omits_dts() {
        let pes = build_pes(STREAM_ID_AUDIO, 90_000, None, &[0xAA]);
        // PTS_DTS_flags in byte 7 (0-indexed) should be 0b10xxxxxx.
        assert_eq!(pes[7] & 0xC0, 0x80);
        assert_eq!(pes[8], 5); // header_data_length for PTS-only
    }

    #[test]
    fn dts_present_when_distinct_from_pts() {
        let pes = build_pes(STREAM_ID_VIDEO, 180_000, Some(90_000), &[0xAA]);
        assert_eq!(pes[7] & 0xC0, 0xC0);
        assert_eq!(pes[8], 10);
    }

    #[test]
    fn dts_equal_to_pts_collapses_to_pts_only() {
        let pes = build_pes(STREAM_ID_VIDEO, 90_000, Some(90_000), &[0xAA]);
        assert_eq!(pes[7] & 0xC0, 0x80);
    }

    #[test]
    fn payload_is_appended_verbatim_after_header() {
        let pes = build_pes(STREAM_ID_AUDIO, 0, None, &[0xDE, 0xAD, 0xBE, 0xEF]);
        assert_eq!(&pes[pes.len() - 4..], &[0xDE, 0xAD, 0xBE, 0xEF]);
    }
}
