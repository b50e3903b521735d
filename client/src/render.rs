use std::fmt::Write;

use crate::session::{CounterSnapshot, Phase, ViewState};
use crate::view::{MapView, shape_hex};

/// Character grid used for the overview map.
pub const GRID_COLS: usize = 64;
pub const GRID_ROWS: usize = 24;
const CELL_W_PX: f64 = 10.0;
const CELL_H_PX: f64 = 20.0;

/// Plain-text frame for one published view.
pub fn render(view: &ViewState, map: &MapView) -> String {
    let mut out = String::new();
    match view.phase {
        Phase::Loading => {
            let _ = writeln!(out, "Loading server {}...", view.server_id);
        }
        Phase::NotFound => {
            let _ = writeln!(out, "Server {} not found", view.server_id);
        }
        Phase::Closed => {
            let _ = writeln!(out, "Session for {} closed", view.server_id);
        }
        Phase::Unavailable | Phase::Ready => write_summary(&mut out, view, map),
    }
    if let Some(banner) = &view.banner {
        let _ = writeln!(out, "! {banner}");
    }
    if view.phase == Phase::Ready {
        write_layers(&mut out, map);
        if let Some(grid) = overview(map) {
            out.push_str(&grid);
        }
    }
    if view.preferences.admin_mode {
        write_counters(&mut out, &view.counters);
    }
    out
}

fn write_summary(out: &mut String, view: &ViewState, map: &MapView) {
    let Some(summary) = &map.summary else {
        let _ = writeln!(out, "{}: no data", view.server_id);
        return;
    };
    let status = if summary.online { "online" } else { "offline" };
    let _ = writeln!(out, "{} [{status}]", summary.server_name);
    let _ = writeln!(
        out,
        "players online: {}  countries: {}",
        summary.online_players, summary.countries
    );
    if let Some(at) = summary.last_update {
        let _ = writeln!(out, "updated: {}", at.format("%H:%M:%S"));
    }
}

fn write_layers(out: &mut String, map: &MapView) {
    for shape in &map.territories {
        let war = if shape.at_war { " (at war)" } else { "" };
        let _ = writeln!(
            out,
            "  territory {} {} x {}..{} z {}..{}{war}",
            shape.country,
            shape_hex(shape),
            shape.area.min_x,
            shape.area.max_x,
            shape.area.min_z,
            shape.area.max_z,
        );
    }
    for marker in &map.markers {
        let _ = writeln!(
            out,
            "  player {} at {}, {}",
            marker.name,
            marker.x.round() as i64,
            marker.z.round() as i64
        );
    }
    for war in &map.wars {
        let _ = writeln!(out, "  war {}", war.label);
    }
}

/// Coarse character map: territory initials, `@` for players.
pub fn overview(map: &MapView) -> Option<String> {
    let viewport = map.viewport(GRID_COLS as f64 * CELL_W_PX, GRID_ROWS as f64 * CELL_H_PX)?;
    let mut grid = vec![vec!['.'; GRID_COLS]; GRID_ROWS];

    for (row, line) in grid.iter_mut().enumerate() {
        for (col, cell) in line.iter_mut().enumerate() {
            let sx = (col as f64 + 0.5) * CELL_W_PX;
            let sy = (row as f64 + 0.5) * CELL_H_PX;
            let (wx, wz) = viewport.screen_to_world(sx, sy);
            if let Some(shape) = map.territories.iter().find(|t| t.area.contains(wx, wz)) {
                *cell = shape.country.chars().next().unwrap_or('#');
            }
        }
    }
    for marker in &map.markers {
        let (sx, sy) = viewport.world_to_screen(marker.x, marker.z);
        let col = (sx / CELL_W_PX).floor();
        let row = (sy / CELL_H_PX).floor();
        if (0.0..GRID_COLS as f64).contains(&col) && (0.0..GRID_ROWS as f64).contains(&row) {
            grid[row as usize][col as usize] = '@';
        }
    }

    let (left, top) = viewport.block_at(0.0, 0.0);
    let (right, bottom) = viewport.block_at(
        GRID_COLS as f64 * CELL_W_PX,
        GRID_ROWS as f64 * CELL_H_PX,
    );
    let mut out = String::with_capacity((GRID_COLS + 1) * (GRID_ROWS + 1));
    let _ = writeln!(out, "  X {left}..{right}  Z {top}..{bottom}");
    for line in grid {
        out.push_str("  ");
        out.extend(line);
        out.push('\n');
    }
    Some(out)
}

fn write_counters(out: &mut String, counters: &CounterSnapshot) {
    let _ = writeln!(
        out,
        "[admin] snapshots={} deltas={} rejected={} unknown={} fetch_failures={} reconnects={}",
        counters.snapshots_applied_total,
        counters.deltas_applied_total,
        counters.deltas_rejected_total,
        counters.unknown_deltas_total,
        counters.fetch_failures_total,
        counters.reconnects_total,
    );
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::Arc;

    use countrymap_shared::{Applied, Country, Location, Player, ServerInfo, ServerState, Territory};

    use super::*;
    use crate::prefs::{Layers, Preferences};

    fn state() -> Arc<ServerState> {
        let mut state = ServerState::new(ServerInfo::placeholder("srv"));
        state.countries = Arc::new(vec![Country {
            name: "Avalon".into(),
            president: "Alice".into(),
            members: BTreeSet::from(["Alice".to_string()]),
            territory: Some(Territory {
                min_x: 0,
                min_z: 0,
                max_x: 200,
                max_z: 100,
            }),
            at_war: BTreeSet::new(),
            color: None,
        }]);
        state.players = Arc::new(vec![Player {
            name: "Alice".into(),
            online: true,
            location: Some(Location { x: 50.0, z: 50.0 }),
            country: Some("Avalon".into()),
            is_president: true,
        }]);
        Arc::new(state)
    }

    fn view_state(phase: Phase, admin_mode: bool) -> ViewState {
        ViewState {
            server_id: "srv".into(),
            phase,
            state: Some(state()),
            last_update: None,
            banner: Some("Live updates interrupted: stream ended".into()),
            applied: Applied::Everything,
            preferences: Preferences {
                admin_mode,
                layers: Layers::default(),
            },
            counters: CounterSnapshot {
                deltas_applied_total: 7,
                ..CounterSnapshot::default()
            },
        }
    }

    #[test]
    fn ready_frame_lists_layers_and_banner() {
        let view = view_state(Phase::Ready, false);
        let map = MapView::build(view.state.as_deref(), None, Layers::default());
        let frame = render(&view, &map);

        assert!(frame.starts_with("srv [online]\n"));
        assert!(frame.contains("players online: 1  countries: 1"));
        assert!(frame.contains("! Live updates interrupted: stream ended"));
        assert!(frame.contains("territory Avalon #4caf50 x 0..200 z 0..100"));
        assert!(frame.contains("player Alice at 50, 50"));
        assert!(frame.contains('@'));
        assert!(frame.contains('A'));
        assert!(!frame.contains("[admin]"));
    }

    #[test]
    fn admin_mode_shows_counters() {
        let view = view_state(Phase::Ready, true);
        let map = MapView::build(view.state.as_deref(), None, Layers::default());
        assert!(render(&view, &map).contains("[admin] snapshots=0 deltas=7"));
    }

    #[test]
    fn terminal_phases_skip_the_map() {
        let view = view_state(Phase::NotFound, false);
        let map = MapView::default();
        let frame = render(&view, &map);
        assert!(frame.starts_with("Server srv not found"));
        assert!(!frame.contains("territory"));
    }

    #[test]
    fn overview_has_fixed_dimensions() {
        let view = view_state(Phase::Ready, false);
        let map = MapView::build(view.state.as_deref(), None, Layers::default());
        let grid = overview(&map).expect("grid");
        let lines: Vec<&str> = grid.lines().collect();
        assert_eq!(lines.len(), GRID_ROWS + 1);
        assert!(lines[1..].iter().all(|l| l.chars().count() == GRID_COLS + 2));
    }
}
