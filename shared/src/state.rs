use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Complete state document for one server, as served by the fetch endpoint.
///
/// Collections sit behind `Arc` so a delta only clones the collection it touches.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerState {
    pub server_info: ServerInfo,
    #[serde(default)]
    pub countries: Arc<Vec<Country>>,
    #[serde(default)]
    pub players: Arc<Vec<Player>>,
    #[serde(default)]
    pub wars: Arc<Vec<WarPair>>,
}

impl ServerState {
    pub fn new(server_info: ServerInfo) -> Self {
        Self {
            server_info,
            countries: Arc::default(),
            players: Arc::default(),
            wars: Arc::default(),
        }
    }

    pub fn country(&self, name: &str) -> Option<&Country> {
        self.countries.iter().find(|c| c.name == name)
    }

    pub fn player(&self, name: &str) -> Option<&Player> {
        self.players.iter().find(|p| p.name == name)
    }

    pub fn has_war(&self, a: &str, b: &str) -> bool {
        self.wars.iter().any(|war| war.is_between(a, b))
    }

    pub fn online_players(&self) -> impl Iterator<Item = &Player> {
        self.players.iter().filter(|p| p.online)
    }

    /// First name that appears twice in `countries`, if any.
    pub fn duplicate_country(&self) -> Option<&str> {
        first_duplicate(self.countries.iter().map(|c| c.name.as_str()))
    }

    /// First name that appears twice in `players`, if any.
    pub fn duplicate_player(&self) -> Option<&str> {
        first_duplicate(self.players.iter().map(|p| p.name.as_str()))
    }
}

fn first_duplicate<'a>(names: impl Iterator<Item = &'a str>) -> Option<&'a str> {
    let mut seen = BTreeSet::new();
    names.into_iter().find(|name| !seen.insert(*name))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    #[serde(alias = "id")]
    pub server_id: String,
    #[serde(alias = "name")]
    pub server_name: String,
    pub status: ServerStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub world_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_count: Option<u32>,
}

impl ServerInfo {
    /// Placeholder info used when live data arrives before the first fetch.
    pub fn placeholder(server_id: &str) -> Self {
        Self {
            server_id: server_id.to_string(),
            server_name: server_id.to_string(),
            status: ServerStatus::Online,
            world_name: None,
            player_count: None,
            country_count: None,
        }
    }
}

/// Reported server status. Anything other than `"online"` reads as offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum ServerStatus {
    Online,
    Offline,
}

impl ServerStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Online => "online",
            Self::Offline => "offline",
        }
    }

    pub const fn is_online(self) -> bool {
        matches!(self, Self::Online)
    }
}

impl From<String> for ServerStatus {
    fn from(value: String) -> Self {
        if value.trim().eq_ignore_ascii_case("online") {
            Self::Online
        } else {
            Self::Offline
        }
    }
}

impl From<ServerStatus> for String {
    fn from(value: ServerStatus) -> Self {
        value.as_str().to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Country {
    pub name: String,
    #[serde(default)]
    pub president: String,
    #[serde(default)]
    pub members: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub territory: Option<Territory>,
    #[serde(default)]
    pub at_war: BTreeSet<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color: Option<String>,
}

/// Axis-aligned claim rectangle in world coordinates (X east, Z south).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Territory {
    pub min_x: i32,
    pub min_z: i32,
    pub max_x: i32,
    pub max_z: i32,
}

impl Territory {
    pub fn contains(&self, x: f64, z: f64) -> bool {
        x >= f64::from(self.min_x)
            && x <= f64::from(self.max_x)
            && z >= f64::from(self.min_z)
            && z <= f64::from(self.max_z)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Player {
    pub name: String,
    #[serde(default)]
    pub online: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<Location>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
    #[serde(default)]
    pub is_president: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub x: f64,
    pub z: f64,
}

/// Two countries in conflict. Order carries no meaning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WarPair {
    pub country1: String,
    pub country2: String,
}

impl WarPair {
    pub fn new(country1: impl Into<String>, country2: impl Into<String>) -> Self {
        Self {
            country1: country1.into(),
            country2: country2.into(),
        }
    }

    pub fn is_between(&self, a: &str, b: &str) -> bool {
        (self.country1 == a && self.country2 == b) || (self.country1 == b && self.country2 == a)
    }

    pub fn same_pair(&self, other: &WarPair) -> bool {
        self.is_between(&other.country1, &other.country2)
    }

    pub fn involves(&self, country: &str) -> bool {
        self.country1 == country || self.country2 == country
    }
}
