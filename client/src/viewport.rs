/// Axis-aligned world rectangle in block coordinates (X east, Z south).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorldBounds {
    pub min_x: f64,
    pub min_z: f64,
    pub max_x: f64,
    pub max_z: f64,
}

impl WorldBounds {
    /// Degenerate bounds at the world origin.
    pub const fn origin() -> Self {
        Self {
            min_x: 0.0,
            min_z: 0.0,
            max_x: 0.0,
            max_z: 0.0,
        }
    }

    pub fn include(&mut self, min_x: f64, min_z: f64, max_x: f64, max_z: f64) {
        self.min_x = self.min_x.min(min_x);
        self.min_z = self.min_z.min(min_z);
        self.max_x = self.max_x.max(max_x);
        self.max_z = self.max_z.max(max_z);
    }

    pub fn width(&self) -> f64 {
        self.max_x - self.min_x
    }

    pub fn depth(&self) -> f64 {
        self.max_z - self.min_z
    }

    pub fn center(&self) -> (f64, f64) {
        (
            (self.min_x + self.max_x) / 2.0,
            (self.min_z + self.max_z) / 2.0,
        )
    }
}

const MIN_ZOOM: f64 = 0.0001;
const MAX_ZOOM: f64 = 8.0;

/// Camera over the world: the block at `center` sits in the middle of a
/// `canvas_w` by `canvas_h` pixel canvas, drawn at `zoom` pixels per block.
#[derive(Debug, Clone, PartialEq)]
pub struct Viewport {
    pub center_x: f64,
    pub center_z: f64,
    pub zoom: f64,
    pub canvas_w: f64,
    pub canvas_h: f64,
}

impl Viewport {
    /// Frame `bounds` on the canvas with `padding_px` kept clear on every
    /// side. `None` when the padding leaves no room to draw.
    pub fn framing(
        bounds: &WorldBounds,
        canvas_w: f64,
        canvas_h: f64,
        padding_px: f64,
    ) -> Option<Self> {
        let room_w = canvas_w - 2.0 * padding_px;
        let room_h = canvas_h - 2.0 * padding_px;
        if room_w <= 0.0 || room_h <= 0.0 {
            return None;
        }
        // A single point is still centered; zoom needs a nonzero span.
        let zoom = (room_w / bounds.width().max(1.0))
            .min(room_h / bounds.depth().max(1.0))
            .clamp(MIN_ZOOM, MAX_ZOOM);
        let (center_x, center_z) = bounds.center();
        Some(Self {
            center_x,
            center_z,
            zoom,
            canvas_w,
            canvas_h,
        })
    }

    pub fn world_to_screen(&self, wx: f64, wz: f64) -> (f64, f64) {
        (
            self.canvas_w / 2.0 + (wx - self.center_x) * self.zoom,
            self.canvas_h / 2.0 + (wz - self.center_z) * self.zoom,
        )
    }

    pub fn screen_to_world(&self, sx: f64, sy: f64) -> (f64, f64) {
        (
            self.center_x + (sx - self.canvas_w / 2.0) / self.zoom,
            self.center_z + (sy - self.canvas_h / 2.0) / self.zoom,
        )
    }

    /// Block under a screen position, rounded like the coordinates readout.
    pub fn block_at(&self, sx: f64, sy: f64) -> (i64, i64) {
        let (wx, wz) = self.screen_to_world(sx, sy);
        (wx.round() as i64, wz.round() as i64)
    }
}
