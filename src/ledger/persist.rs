//! Snapshot encoding of the whole ledger, with schema versioning.
//!
//! A snapshot is a JSON envelope `{ "schema_version": N, "state": {...} }`.
//! Restoring an older version runs every migration step from N up to
//! [`SCHEMA_VERSION`] in order. Versions we do not know are refused.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use thiserror::Error;

use crate::ledger::{LedgerState, error::LedgerError};

/// Version written by [`snapshot`].
pub const SCHEMA_VERSION: u32 = 2;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error(transparent)]
    Schema(#[from] LedgerError),

    #[error("snapshot encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    #[error("migration to schema v{to} failed: {reason}")]
    Migration { to: u32, reason: String },
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    schema_version: u32,
    state: &'a LedgerState,
}

#[derive(Deserialize)]
struct Envelope {
    schema_version: u32,
    state: Value,
}

type Migration = fn(Value) -> Result<Value, String>;

/// `MIGRATIONS[i]` lifts a state from version `i + 1` to `i + 2`.
const MIGRATIONS: &[Migration] = &[v1_to_v2];

pub fn snapshot(state: &LedgerState) -> Result<Vec<u8>, PersistError> {
    Ok(serde_json::to_vec(&EnvelopeRef {
        schema_version: SCHEMA_VERSION,
        state,
    })?)
}

pub fn restore(bytes: &[u8]) -> Result<LedgerState, PersistError> {
    let envelope: Envelope = serde_json::from_slice(bytes)?;
    let found = envelope.schema_version;
    if found == 0 || found > SCHEMA_VERSION {
        return Err(LedgerError::SchemaMismatch {
            found,
            supported: SCHEMA_VERSION,
        }
        .into());
    }

    let mut state = envelope.state;
    for version in found..SCHEMA_VERSION {
        let step = MIGRATIONS[(version - 1) as usize];
        state = step(state).map_err(|reason| PersistError::Migration {
            to: version + 1,
            reason,
        })?;
        log::info!("migrated snapshot from schema v{version} to v{}", version + 1);
    }

    Ok(serde_json::from_value(state)?)
}

fn take_object(value: Value, what: &str) -> Result<Map<String, Value>, String> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(format!("{what} is not an object: {other}")),
    }
}

fn rename(obj: &mut Map<String, Value>, from: &str, to: &str) {
    if let Some(v) = obj.remove(from) {
        obj.insert(to.to_string(), v);
    }
}

fn parse_keys(map: &Map<String, Value>, what: &str) -> Result<BTreeSet<u64>, String> {
    map.keys()
        .map(|key| key.parse().map_err(|_| format!("{what} key {key} is not an id")))
        .collect()
}

fn counter(obj: &Map<String, Value>, key: &str) -> u64 {
    obj.get(key).and_then(Value::as_u64).unwrap_or(0)
}

/// v1 is the first backend's layout: separate project and nft counters,
/// ipfs-flavoured field names, and no reconciliation queue.
fn v1_to_v2(state: Value) -> Result<Value, String> {
    let mut state = take_object(state, "v1 state")?;

    let ids = counter(&state, "next_project_id").max(counter(&state, "next_nft_id"));

    let mut projects = take_object(state.remove("projects").unwrap_or(json!({})), "projects")?;
    for (key, project) in projects.iter_mut() {
        let project = project
            .as_object_mut()
            .ok_or_else(|| format!("project {key} is not an object"))?;
        let mut next_track_id = 0u64;
        if let Some(Value::Array(tracks)) = project.get_mut("tracks") {
            for track in tracks.iter_mut() {
                let track = track
                    .as_object_mut()
                    .ok_or_else(|| format!("track in project {key} is not an object"))?;
                rename(track, "ipfs_hash", "content_hash");
                let id = counter(track, "id");
                next_track_id = next_track_id.max(id.saturating_add(1));
            }
        }
        project.insert("next_track_id".into(), json!(next_track_id));
    }

    let mut nfts = take_object(state.remove("nfts").unwrap_or(json!({})), "nfts")?;
    for (key, nft) in nfts.iter_mut() {
        let nft = nft
            .as_object_mut()
            .ok_or_else(|| format!("nft {key} is not an object"))?;
        rename(nft, "image_url", "image_ref");
        rename(nft, "current_owner", "owner");
        rename(nft, "is_for_sale", "for_sale");
        nft.remove("view_count");
        if let Some(Value::Array(history)) = nft.get_mut("sale_history") {
            for record in history.iter_mut() {
                let record = record
                    .as_object_mut()
                    .ok_or_else(|| format!("sale record of nft {key} is not an object"))?;
                rename(record, "transaction_type", "kind");
                // minted records came "from" a placeholder account
                if record.get("from").and_then(Value::as_str) == Some("system") {
                    record.insert("from".into(), Value::Null);
                }
            }
        }
    }

    // v1 counted projects and nfts separately, so an nft may share a project's id
    let project_ids = parse_keys(&projects, "project")?;
    let nft_ids = parse_keys(&nfts, "nft")?;
    let mut next = [project_ids.last(), nft_ids.last()]
        .into_iter()
        .flatten()
        .fold(ids, |next, id| next.max(id.saturating_add(1)));
    let mut renumbered = BTreeMap::new();
    let mut migrated_nfts = Map::new();
    for (key, mut nft) in nfts {
        let old: u64 = key
            .parse()
            .map_err(|_| format!("nft key {key} is not an id"))?;
        let id = if project_ids.contains(&old) {
            let fresh = next;
            next = next
                .checked_add(1)
                .ok_or_else(|| "identifier space exhausted while renumbering nfts".to_string())?;
            log::warn!("nft {old} shares its id with a project, renumbered to {fresh}");
            renumbered.insert(old, fresh);
            fresh
        } else {
            old
        };
        if let Some(nft) = nft.as_object_mut() {
            nft.insert("id".into(), json!(id));
        }
        migrated_nfts.insert(id.to_string(), nft);
    }

    let mut payments = match state.remove("royalty_payments") {
        Some(Value::Array(payments)) => payments,
        _ => Vec::new(),
    };
    for payment in payments.iter_mut() {
        if let Some(payment) = payment.as_object_mut() {
            rename(payment, "transaction_id", "settlement_id");
            let old = counter(payment, "nft_id");
            if let Some(fresh) = renumbered.get(&old) {
                payment.insert("nft_id".into(), json!(fresh));
            }
        }
    }

    Ok(json!({
        "ids": next,
        "store": {
            "projects": projects,
            "nfts": migrated_nfts,
            "royalty_payments": payments,
            "pending": {},
        }
    }))
}
