use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::domain::{hash::ContentHash, identity::Identity};

pub type ProjectId = u64;
pub type TrackId = u64;

/// A music project: the unit of collaboration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub id: ProjectId,
    pub title: String,
    pub description: String,
    pub owner: Identity,
    pub contributors: BTreeSet<Identity>,
    pub tracks: Vec<Track>,
    /// project-scoped track counter, survives track removal
    pub next_track_id: TrackId,
}

/// Audio uploaded into a project. Only addressable through its project.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub name: String,
    pub content_hash: ContentHash,
    pub uploaded_by: Identity,
    pub timestamp: u64,
}

/// Fields of a track supplied by the uploader.
#[derive(Debug, Clone)]
pub struct NewTrack {
    pub name: String,
    pub content_hash: ContentHash,
    pub uploaded_by: Identity,
    pub timestamp: u64,
}

impl Project {
    pub fn new(id: ProjectId, title: String, description: String, owner: Identity) -> Self {
        Self {
            id,
            title,
            description,
            owner,
            contributors: BTreeSet::new(),
            tracks: Vec::new(),
            next_track_id: 0,
        }
    }

    /// Appends a track and returns its id.
    ///
    /// Returns `None` when the project's track counter is exhausted.
    pub fn push_track(&mut self, track: NewTrack) -> Option<TrackId> {
        let id = self.next_track_id;
        self.next_track_id = id.checked_add(1)?;
        self.tracks.push(Track {
            id,
            name: track.name,
            content_hash: track.content_hash,
            uploaded_by: track.uploaded_by,
            timestamp: track.timestamp,
        });
        Some(id)
    }

    /// Removes a track by id. The id is not handed out again.
    pub fn remove_track(&mut self, id: TrackId) -> bool {
        let before = self.tracks.len();
        self.tracks.retain(|track| track.id != id);
        self.tracks.len() != before
    }

    pub fn is_contributor(&self, who: &Identity) -> bool {
        self.contributors.contains(who)
    }
}
