use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;

use crate::error::ReconcileError;
use crate::events::{Delta, StateUpdate, parse_timestamp, payload_timestamp};
use crate::state::{ServerInfo, ServerState, ServerStatus, WarPair};

/// Part of the state touched by one apply, so consumers can redraw only that layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Unchanged,
    Players,
    Countries,
    Wars,
    Status,
    Everything,
}

/// Validate a full document before it replaces the current state.
pub fn apply_snapshot(snapshot: ServerState) -> Result<ServerState, ReconcileError> {
    validate(&snapshot)?;
    Ok(snapshot)
}

pub fn validate(state: &ServerState) -> Result<(), ReconcileError> {
    if let Some(name) = state.duplicate_country() {
        return Err(ReconcileError::malformed(
            "snapshot",
            format!("duplicate country `{name}`"),
        ));
    }
    if let Some(name) = state.duplicate_player() {
        return Err(ReconcileError::malformed(
            "snapshot",
            format!("duplicate player `{name}`"),
        ));
    }
    for war in state.wars.iter() {
        check_war(state, war).map_err(|e| ReconcileError::malformed("snapshot", e))?;
    }
    Ok(())
}

/// Pure delta application: `state` is left as is and the next version is returned.
///
/// Only the collection the delta touches is copied; the others stay shared.
pub fn apply_delta(state: &ServerState, delta: &Delta) -> Result<ServerState, ReconcileError> {
    let mut next = state.clone();
    apply_in_place(&mut next, delta)?;
    Ok(next)
}

fn check_war(state: &ServerState, war: &WarPair) -> Result<(), ReconcileError> {
    if war.country1 == war.country2 {
        return Err(ReconcileError::SelfWar(war.country1.clone()));
    }
    for name in [&war.country1, &war.country2] {
        if state.country(name).is_none() {
            return Err(ReconcileError::UnknownCountry(name.clone()));
        }
    }
    Ok(())
}

// All checks run before the first `Arc::make_mut`, so an error never leaves a
// half-applied state behind.
fn apply_in_place(state: &mut ServerState, delta: &Delta) -> Result<Applied, ReconcileError> {
    match delta {
        Delta::PlayerMove { player, location } => {
            let Some(idx) = state.players.iter().position(|p| p.name == *player) else {
                return Ok(Applied::Unchanged);
            };
            Arc::make_mut(&mut state.players)[idx].location = Some(*location);
            Ok(Applied::Players)
        }
        Delta::PlayerJoin { player } => {
            let mut joined = player.clone();
            joined.online = true;
            let players = Arc::make_mut(&mut state.players);
            match players.iter().position(|p| p.name == joined.name) {
                Some(idx) => players[idx] = joined,
                None => players.push(joined),
            }
            Ok(Applied::Players)
        }
        Delta::PlayerLeave { player } => {
            let Some(idx) = state.players.iter().position(|p| p.name == *player) else {
                return Ok(Applied::Unchanged);
            };
            Arc::make_mut(&mut state.players)[idx].online = false;
            Ok(Applied::Players)
        }
        Delta::CountryCreated { country } => {
            if state.country(&country.name).is_some() {
                return Err(ReconcileError::DuplicateCountry(country.name.clone()));
            }
            Arc::make_mut(&mut state.countries).push(country.clone());
            Ok(Applied::Countries)
        }
        Delta::CountryUpdated { country } => {
            let Some(idx) = state.countries.iter().position(|c| c.name == country.name) else {
                return Ok(Applied::Unchanged);
            };
            Arc::make_mut(&mut state.countries)[idx] = country.clone();
            Ok(Applied::Countries)
        }
        Delta::WarStarted { war } => {
            check_war(state, war)?;
            if state.has_war(&war.country1, &war.country2) {
                return Ok(Applied::Unchanged);
            }
            Arc::make_mut(&mut state.wars).push(war.clone());
            Ok(Applied::Wars)
        }
        Delta::WarEnded { country1, country2 } => {
            if !state.has_war(country1, country2) {
                return Ok(Applied::Unchanged);
            }
            Arc::make_mut(&mut state.wars).retain(|war| !war.is_between(country1, country2));
            Ok(Applied::Wars)
        }
    }
}

/// Single owner of the authoritative state for one server view.
///
/// Every method either installs a new `Arc<ServerState>` or leaves the
/// previous one in place; readers holding an older `Arc` are never affected.
#[derive(Debug, Clone)]
pub struct Reconciler {
    server_id: String,
    state: Option<Arc<ServerState>>,
    last_update: Option<DateTime<Utc>>,
}

impl Reconciler {
    pub fn new(server_id: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            state: None,
            last_update: None,
        }
    }

    pub fn state(&self) -> Option<&Arc<ServerState>> {
        self.state.as_ref()
    }

    pub fn status(&self) -> Option<ServerStatus> {
        self.state.as_ref().map(|s| s.server_info.status)
    }

    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        self.last_update
    }

    /// Replace everything with a fetched document.
    pub fn apply_snapshot(&mut self, snapshot: ServerState) -> Result<Applied, ReconcileError> {
        let snapshot = apply_snapshot(snapshot)?;
        self.state = Some(Arc::new(snapshot));
        self.last_update = Some(Utc::now());
        Ok(Applied::Everything)
    }

    /// Apply a `data-update` payload. Server info is carried over and marked online.
    pub fn apply_live_state(&mut self, payload: &Value) -> Result<Applied, ReconcileError> {
        let update = StateUpdate::deserialize(payload)
            .map_err(|e| ReconcileError::malformed("data-update", e))?;

        let server_info = match &self.state {
            Some(current) => ServerInfo {
                status: ServerStatus::Online,
                ..current.server_info.clone()
            },
            None => ServerInfo::placeholder(&self.server_id),
        };
        let snapshot = apply_snapshot(ServerState {
            server_info,
            countries: Arc::new(update.countries),
            players: Arc::new(update.players),
            wars: Arc::new(update.wars),
        })?;

        self.state = Some(Arc::new(snapshot));
        self.last_update = Some(parse_timestamp(&update.timestamp).unwrap_or_else(Utc::now));
        Ok(Applied::Everything)
    }

    /// Decode and apply one `real-time-update` payload.
    pub fn apply_update(&mut self, payload: &Value) -> Result<Applied, ReconcileError> {
        let delta = Delta::decode(payload)?;
        let applied = self.apply_delta(&delta)?;
        self.last_update = Some(payload_timestamp(payload).unwrap_or_else(Utc::now));
        Ok(applied)
    }

    pub fn apply_delta(&mut self, delta: &Delta) -> Result<Applied, ReconcileError> {
        let Some(current) = self.state.as_ref() else {
            return Err(ReconcileError::NotSeeded);
        };
        let mut next = ServerState::clone(current);
        let applied = apply_in_place(&mut next, delta)?;
        if applied != Applied::Unchanged {
            self.state = Some(Arc::new(next));
        }
        Ok(applied)
    }

    pub fn set_status(&mut self, status: ServerStatus) -> Applied {
        let Some(current) = self.state.as_ref() else {
            return Applied::Unchanged;
        };
        if current.server_info.status == status {
            return Applied::Unchanged;
        }
        let mut next = ServerState::clone(current);
        next.server_info.status = status;
        self.state = Some(Arc::new(next));
        Applied::Status
    }

    /// Drop the state; used when the owning view goes away.
    pub fn discard(&mut self) {
        self.state = None;
        self.last_update = None;
    }
}
