use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::mot::mot_errors::CheckpointError;
use crate::mot::{DetectionParameters, EventIdGenerator, EventSnapshot, VisualEvent, VisualEventSet};

pub const CHECKPOINT_VERSION: u32 = 1;

/// Resumable state of an event set. Appearance models are not saved,
/// they are rebuilt the next time an event needs one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSetCheckpoint {
    pub version: u32,
    pub run_id: Uuid,
    pub saved_at: DateTime<Utc>,
    pub parameters: DetectionParameters,
    pub frame_window: Option<(u32, u32)>,
    pub next_event_id: u32,
    pub events: Vec<EventSnapshot>,
}

impl VisualEventSet {
    pub fn checkpoint(&self) -> EventSetCheckpoint {
        EventSetCheckpoint {
            version: CHECKPOINT_VERSION,
            run_id: self.get_run_id(),
            saved_at: Utc::now(),
            parameters: self.get_params().as_ref().clone(),
            frame_window: self.get_frame_window(),
            next_event_id: self.get_id_generator().peek(),
            events: self.get_events().map(|e| e.snapshot()).collect(),
        }
    }
    /// Writes the checkpoint as JSON
    pub fn save_checkpoint<W: Write>(&self, writer: W) -> Result<(), CheckpointError> {
        let checkpoint = self.checkpoint();
        serde_json::to_writer(writer, &checkpoint)?;
        info!(
            "Saved checkpoint of run {} with {} events",
            checkpoint.run_id,
            checkpoint.events.len()
        );
        Ok(())
    }
    /// Reads a JSON checkpoint and rebuilds the event set with the default collaborators
    pub fn load_checkpoint<R: Read>(reader: R) -> Result<Self, CheckpointError> {
        let checkpoint: EventSetCheckpoint = serde_json::from_reader(reader)?;
        Self::from_checkpoint(checkpoint)
    }
    pub fn from_checkpoint(checkpoint: EventSetCheckpoint) -> Result<Self, CheckpointError> {
        if checkpoint.version != CHECKPOINT_VERSION {
            return Err(CheckpointError::UnknownVersion(checkpoint.version));
        }
        let params = Arc::new(checkpoint.parameters);
        let events = checkpoint
            .events
            .into_iter()
            .map(|snapshot| {
                let id = snapshot.id;
                VisualEvent::from_snapshot(snapshot, params.clone())
                    .ok_or(CheckpointError::EmptyEvent(id))
            })
            .collect::<Result<Vec<_>, _>>()?;
        info!(
            "Loaded checkpoint of run {} saved at {} with {} events",
            checkpoint.run_id,
            checkpoint.saved_at,
            events.len()
        );
        Ok(VisualEventSet::restore(
            params,
            checkpoint.run_id,
            EventIdGenerator::starting_at(checkpoint.next_event_id),
            checkpoint.frame_window,
            events,
        ))
    }
}
