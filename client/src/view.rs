use std::sync::Arc;

use chrono::{DateTime, Utc};
use countrymap_shared::colors::{country_color, hex_css, rgba_css};
use countrymap_shared::{Applied, Country, Player, ServerState, Territory, WarPair};

use crate::prefs::Layers;
use crate::viewport::{Viewport, WorldBounds};

pub const BORDER_ALPHA: f64 = 0.8;
pub const FILL_ALPHA: f64 = 0.3;
/// Margin kept around each online player when fitting the map.
pub const PLAYER_MARGIN: f64 = 100.0;
pub const FIT_PADDING_PX: f64 = 50.0;
const AVATAR_URL_BASE: &str = "https://mc-heads.net/avatar";
const AVATAR_SIZE_PX: u32 = 32;

#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub server_name: String,
    pub online: bool,
    pub online_players: usize,
    pub countries: usize,
    pub last_update: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TerritoryShape {
    pub country: String,
    pub area: Territory,
    pub color: (u8, u8, u8),
    pub stroke: String,
    pub fill: String,
    pub at_war: bool,
    pub popup: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerMarker {
    pub name: String,
    pub x: f64,
    pub z: f64,
    pub avatar_url: String,
    pub popup: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WarFront {
    pub country1: String,
    pub country2: String,
    pub label: String,
}

/// Render-ready projection of a `ServerState`. Layers that are hidden stay empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapView {
    pub summary: Option<Summary>,
    pub territories: Vec<TerritoryShape>,
    pub markers: Vec<PlayerMarker>,
    pub wars: Vec<WarFront>,
    pub bounds: Option<WorldBounds>,
    layers: Layers,
    drawn: Option<Drawn>,
}

/// Collections the current layers were built from.
#[derive(Debug, Clone, PartialEq)]
struct Drawn {
    countries: Arc<Vec<Country>>,
    players: Arc<Vec<Player>>,
    wars: Arc<Vec<WarPair>>,
}

impl Drawn {
    fn of(state: &ServerState) -> Self {
        Self {
            countries: Arc::clone(&state.countries),
            players: Arc::clone(&state.players),
            wars: Arc::clone(&state.wars),
        }
    }
}

impl MapView {
    pub fn build(
        state: Option<&ServerState>,
        last_update: Option<DateTime<Utc>>,
        layers: Layers,
    ) -> Self {
        let mut view = Self {
            layers,
            ..Self::default()
        };
        view.refresh(state, last_update, layers, Applied::Everything);
        view
    }

    pub fn layers(&self) -> Layers {
        self.layers
    }

    /// Bring the layers up to date with `state`.
    ///
    /// A layer is rebuilt when `applied` names it or when the collection it
    /// was drawn from has been replaced since the last refresh, so views that
    /// skipped intermediate publishes still catch up. A visibility change
    /// rebuilds everything. Returns true when a layer was rebuilt.
    pub fn refresh(
        &mut self,
        state: Option<&ServerState>,
        last_update: Option<DateTime<Utc>>,
        layers: Layers,
        applied: Applied,
    ) -> bool {
        let applied = if layers != self.layers {
            self.layers = layers;
            Applied::Everything
        } else {
            applied
        };

        self.summary = state.map(|s| summary(s, last_update));
        let Some(state) = state else {
            let had_layers = !self.territories.is_empty()
                || !self.markers.is_empty()
                || !self.wars.is_empty();
            self.territories.clear();
            self.markers.clear();
            self.wars.clear();
            self.bounds = None;
            self.drawn = None;
            return had_layers;
        };

        let (mut territories, mut markers, mut wars) = match applied {
            Applied::Unchanged | Applied::Status => (false, false, false),
            Applied::Players => (false, true, false),
            Applied::Countries => (true, false, false),
            // War flags are drawn on the territories.
            Applied::Wars => (true, false, true),
            Applied::Everything => (true, true, true),
        };
        match &self.drawn {
            Some(drawn) => {
                let wars_moved = !Arc::ptr_eq(&drawn.wars, &state.wars);
                territories |= wars_moved || !Arc::ptr_eq(&drawn.countries, &state.countries);
                markers |= !Arc::ptr_eq(&drawn.players, &state.players);
                wars |= wars_moved;
            }
            None => (territories, markers, wars) = (true, true, true),
        }
        self.drawn = Some(Drawn::of(state));

        if territories {
            self.territories = if layers.territories {
                territory_shapes(state, layers.wars)
            } else {
                Vec::new()
            };
        }
        if markers {
            self.markers = if layers.players {
                player_markers(state)
            } else {
                Vec::new()
            };
        }
        if wars {
            self.wars = if layers.wars {
                state.wars.iter().map(war_front).collect()
            } else {
                Vec::new()
            };
        }
        if territories || markers {
            self.bounds = fit_bounds(state);
        }
        territories || markers || wars
    }

    /// Viewport framing everything known, or `None` with nothing to frame.
    pub fn viewport(&self, canvas_w: f64, canvas_h: f64) -> Option<Viewport> {
        Viewport::framing(self.bounds.as_ref()?, canvas_w, canvas_h, FIT_PADDING_PX)
    }
}

fn summary(state: &ServerState, last_update: Option<DateTime<Utc>>) -> Summary {
    Summary {
        server_name: state.server_info.server_name.clone(),
        online: state.server_info.status.is_online(),
        online_players: state.online_players().count(),
        countries: state.countries.len(),
        last_update,
    }
}

fn territory_shapes(state: &ServerState, flag_wars: bool) -> Vec<TerritoryShape> {
    state
        .countries
        .iter()
        .filter_map(|country| {
            let area = country.territory?;
            let (r, g, b) = country_color(country.color.as_deref());
            Some(TerritoryShape {
                country: country.name.clone(),
                area,
                color: (r, g, b),
                stroke: rgba_css(r, g, b, BORDER_ALPHA),
                fill: rgba_css(r, g, b, FILL_ALPHA),
                at_war: flag_wars && state.wars.iter().any(|w| w.involves(&country.name)),
                popup: country_popup(country),
            })
        })
        .collect()
}

fn country_popup(country: &Country) -> String {
    let mut lines = vec![
        country.name.clone(),
        format!("President: {}", country.president),
        format!("Members: {}", country.members.len()),
    ];
    if !country.at_war.is_empty() {
        let enemies: Vec<&str> = country.at_war.iter().map(String::as_str).collect();
        lines.push(format!("At war with: {}", enemies.join(", ")));
    }
    lines.join("\n")
}

fn player_markers(state: &ServerState) -> Vec<PlayerMarker> {
    state
        .online_players()
        .filter_map(|player| {
            let location = player.location?;
            Some(PlayerMarker {
                name: player.name.clone(),
                x: location.x,
                z: location.z,
                avatar_url: avatar_url(&player.name),
                popup: player_popup(player, location.x, location.z),
            })
        })
        .collect()
}

pub fn avatar_url(player: &str) -> String {
    format!("{AVATAR_URL_BASE}/{player}/{AVATAR_SIZE_PX}")
}

fn player_popup(player: &Player, x: f64, z: f64) -> String {
    let mut lines = vec![player.name.clone()];
    if let Some(country) = &player.country {
        lines.push(format!("Country: {country}"));
    }
    if player.is_president {
        lines.push("President".to_string());
    }
    lines.push(format!("X: {}, Z: {}", x.round() as i64, z.round() as i64));
    lines.join("\n")
}

fn war_front(war: &WarPair) -> WarFront {
    WarFront {
        country1: war.country1.clone(),
        country2: war.country2.clone(),
        label: format!("{} vs {}", war.country1, war.country2),
    }
}

fn fit_bounds(state: &ServerState) -> Option<WorldBounds> {
    let mut bounds = WorldBounds::origin();
    let mut has_data = false;

    for area in state.countries.iter().filter_map(|c| c.territory) {
        bounds.include(
            f64::from(area.min_x),
            f64::from(area.min_z),
            f64::from(area.max_x),
            f64::from(area.max_z),
        );
        has_data = true;
    }
    for location in state.online_players().filter_map(|p| p.location) {
        bounds.include(
            location.x - PLAYER_MARGIN,
            location.z - PLAYER_MARGIN,
            location.x + PLAYER_MARGIN,
            location.z + PLAYER_MARGIN,
        );
        has_data = true;
    }

    has_data.then_some(bounds)
}

/// `#RRGGBB` for a shape, for legends and plain-text output.
pub fn shape_hex(shape: &TerritoryShape) -> String {
    let (r, g, b) = shape.color;
    hex_css(r, g, b)
}
