//! PAT/PMT program-specific-information tables. Fixed PIDs across the
//! whole session: PAT is always PID 0x0000, the single program's PMT is
//! always [`PMT_PID`], video is always [`VIDEO_PID`], audio is always
//! [`AUDIO_PID`]. Re-emitted on a cadence — never gated on media
//! availability, so a late-joining decoder can always tune in.

use super::crc::mpeg2_crc32;

pub const PAT_PID: u16 = 0x0000;
pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x0100;
pub const AUDIO_PID: u16 = 0x0101;
pub const PROGRAM_NUMBER: u16 = 1;

/// Stream type per ISO/IEC 13818-1 Table 2-34.
pub const STREAM_TYPE_H264: u8 = 0x1B;
pub const STREAM_TYPE_AAC_ADTS: u8 = 0x0F;

/// Builds a complete PAT section: one program mapping `PROGRAM_NUMBER` to
/// [`PMT_PID`].
pub fn build_pat_section() -> Vec<u8> {
    let mut section = Vec::new();
    section.push(0x00); // table_id: program_association_section
    // section_length placeholder, patched below
    section.extend_from_slice(&[0x00, 0x00]);
    section.extend_from_slice(&[0x00, 0x01]); // transport_stream_id
    section.push(0xC1); // reserved(2)=11, version(5)=0, current_next=1
    section.push(0x00); // section_number
    section.push(0x00); // last_section_number
    section.extend_from_slice(&PROGRAM_NUMBER.to_be_bytes());
    section.extend_from_slice(&(0xE000 | PMT_PID).to_be_bytes());

    finish_section(section)
}

/// Builds a complete PMT section for one video (H.264) and one audio
/// (AAC-ADTS) elementary stream, both carried on their fixed PIDs.
pub fn build_pmt_section() -> Vec<u8> {
    let mut section = Vec::new();
    section.push(0x02); // table_id: TS_program_map_section
    section.extend_from_slice(&[0x00, 0x00]); // section_length placeholder
    section.extend_from_slice(&PROGRAM_NUMBER.to_be_bytes());
    section.push(0xC1);
    section.push(0x00);
    section.push(0x00);
    section.extend_from_slice(&(0xE000 | VIDEO_PID).to_be_bytes()); // PCR_PID == video PID
    section.extend_from_slice(&[0xF0, 0x00]); // program_info_length = 0

    // Video stream entry.
    section.push(STREAM_TYPE_H264);
    section.extend_from_slice(&(0xE000 | VIDEO_PID).to_be_bytes());
    section.extend_from_slice(&[0xF0, 0x00]); // ES_info_length = 0

    // Audio stream entry.
    section.push(STREAM_TYPE_AAC_ADTS);
    section.extend_from_slice(&(0xE000 | AUDIO_PID).to_be_bytes());
    section.extend_from_slice(&[0xF0, 0x00]);

    finish_section(section)
}

/// Patches `section_length` (bits after that field, including the trailing
/// CRC) and appends the MPEG-2 CRC-32 over everything from `table_id`
/// onward.
fn finish_section(mut section: Vec<u8>) -> Vec<u8> {
    let length = (section.len() - 3 + 4) as u16; // +4 for the CRC we're about to append
    let length_bytes = (0xB000 | length).to_be_bytes();
    section[1] = length_bytes[0];
    section[2] = length_bytes[1];

    let crc = mpeg2_crc32(&section);
    section.extend_from_slice(&crc.to_be_bytes());
    section
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pat_section_ends_with_a_valid_crc() {
        let pat = build_pat_section();
        let (body, crc_bytes) = pat.split_at(pat.len() - 4);
        let crc = u32::from_be_bytes(crc_bytes.try_into().unwrap());
        assert_eq!(mpeg2_crc32(body), crc);
    }

    #[test]
    fn pmt_section_references_fixed_pids() {
        let pmt = build_pmt_section();
        // PCR_PID occupies bytes 8..10 (after table_id+length+program_number+flags+section numbers).
        let pcr_pid = u16::from_be_bytes([pmt[8], pmt[9]]) & 0x1FFF;
        assert_eq!(pcr_pid, VIDEO_PID);
    }

    #[test]
    fn pat_and_pmt_are_deterministic_across_reemission() {
        assert_eq!(build_pat_section(), build_pat_section());
        assert_eq!(build_pmt_section(), build_pmt_section());
    }
}
