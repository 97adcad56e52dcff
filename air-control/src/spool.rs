//! Durable evidence spool: append-only JSONL, one line per
//! [`EvidenceFromAir`], replayed for `sequence > since` on reconnect.
//! `event_uuid` makes replay idempotent on the consumer side; this
//! module only appends and reads back, it does not dedupe.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use air_core::EvidenceFromAir;

use crate::error::ControlError;

pub struct EvidenceSpool {
    path: PathBuf,
    file: File,
}

impl EvidenceSpool {
    pub fn open(directory: &Path, channel_id: &str) -> Result<Self, ControlError> {
        std::fs::create_dir_all(directory)?;
        let path = directory.join(format!("{channel_id}.evidence.jsonl"));
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file })
    }

    /// Appends one event as a single JSON line and flushes durably --
    /// a crash immediately after this call must not lose the event.
    pub fn append(&mut self, event: &EvidenceFromAir) -> Result<(), ControlError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        self.file.write_all(&line)?;
        self.file.sync_data()?;
        Ok(())
    }

    /// Replays every spooled event with `sequence > since`, in file order.
    pub fn replay_since(&self, since: u64) -> Result<Vec<EvidenceFromAir>, ControlError> {
        let file = File::open(&self.path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            let event: EvidenceFromAir = serde_json::from_str(&line)?;
            if event.sequence.0 > since {
                out.push(event);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use air_core::{ChannelId, EvidencePayload};

    #[test]
    fn append_then_replay_since_returns_only_newer_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = EvidenceSpool::open(dir.path(), "ch1").unwrap();

        let mut emitter = air_core::EvidenceEmitter::new(ChannelId::from("ch1"));
        for _ in 0..5 {
            let event = emitter.emit(0, EvidencePayload::ChannelTerminated { reason: "t".into() });
            spool.append(&event).unwrap();
        }

        let replayed = spool.replay_since(3).unwrap();
        assert_eq!(replayed.len(), 2);
        assert_eq!(replayed[0].sequence.0, 4);
        assert_eq!(replayed[1].sequence.0, 5);
    }

    #[test]
    fn replay_since_zero_returns_everything() {
        let dir = tempfile::tempdir().unwrap();
        let mut spool = EvidenceSpool::open(dir.path(), "ch1").unwrap();
        let mut emitter = air_core::EvidenceEmitter::new(ChannelId::from("ch1"));
        let event = emitter.emit(0, EvidencePayload::ChannelTerminated { reason: "t".into() });
        spool.append(&event).unwrap();

        assert_eq!(spool.replay_since(0).unwrap().len(), 1);
    }
}
