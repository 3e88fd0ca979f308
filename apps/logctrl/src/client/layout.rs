use ratatui::layout::Rect;

/// How a pane dimension is derived from the space available to it.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum SizeSpec {
    /// Fraction of the available extent, between 0 and 1.
    Ratio(f32),
    /// Absolute extent, ignoring what is available.
    Fixed(u16),
    /// Available extent adjusted by a signed amount.
    Delta(i32),
}

impl SizeSpec {
    pub fn resolve(self, available: u16) -> u16 {
        match self {
            SizeSpec::Ratio(ratio) => {
                let scaled = ratio.clamp(0.0, 1.0) * f32::from(available);
                scaled as u16
            }
            SizeSpec::Fixed(extent) => extent,
            SizeSpec::Delta(delta) => {
                let adjusted = i64::from(available) + i64::from(delta);
                adjusted.clamp(0, i64::from(u16::MAX)) as u16
            }
        }
    }
}

/// Width and height rules for one pane.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PaneSize {
    pub width: SizeSpec,
    pub height: SizeSpec,
}

impl PaneSize {
    pub const fn new(width: SizeSpec, height: SizeSpec) -> Self {
        Self { width, height }
    }

    /// Resolves against `area`, anchored at its top-left corner and never
    /// exceeding it.
    pub fn place(self, area: Rect) -> Rect {
        Rect {
            x: area.x,
            y: area.y,
            width: self.width.resolve(area.width).min(area.width),
            height: self.height.resolve(area.height).min(area.height),
        }
    }
}
