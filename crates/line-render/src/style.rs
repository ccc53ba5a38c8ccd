//! Region colors and escape emission, degraded to the terminal's level.
//!
//! One built-in palette; the richer theme machinery lives outside the
//! editor. Emission keeps the last color in memory so runs of same-kind
//! text cost one escape.

use line_syntax::RegionKind;
use line_terminal::{escape, ColorLevel};

/// Palette entry: 16-color index, 256-color index, truecolor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ColorSpec {
    ansi16: u8,
    ansi256: u8,
    rgb: (u8, u8, u8),
}

fn color_for(kind: RegionKind) -> Option<ColorSpec> {
    let spec = match kind {
        RegionKind::Normal => return None,
        RegionKind::Keyword => ColorSpec {
            ansi16: 3,
            ansi256: 179,
            rgb: (0xd7, 0xaf, 0x5f),
        },
        RegionKind::Command => ColorSpec {
            ansi16: 2,
            ansi256: 114,
            rgb: (0x87, 0xd7, 0x87),
        },
        RegionKind::Str => ColorSpec {
            ansi16: 6,
            ansi256: 80,
            rgb: (0x5f, 0xd7, 0xd7),
        },
        RegionKind::Comment => ColorSpec {
            ansi16: 8,
            ansi256: 244,
            rgb: (0x80, 0x80, 0x80),
        },
        RegionKind::Number => ColorSpec {
            ansi16: 5,
            ansi256: 176,
            rgb: (0xd7, 0x87, 0xd7),
        },
        RegionKind::Operator => ColorSpec {
            ansi16: 4,
            ansi256: 75,
            rgb: (0x5f, 0xaf, 0xff),
        },
        RegionKind::Variable => ColorSpec {
            ansi16: 6,
            ansi256: 116,
            rgb: (0x87, 0xd7, 0xd7),
        },
        RegionKind::Path => ColorSpec {
            ansi16: 4,
            ansi256: 110,
            rgb: (0x87, 0xaf, 0xd7),
        },
        RegionKind::Error => ColorSpec {
            ansi16: 1,
            ansi256: 203,
            rgb: (0xff, 0x5f, 0x5f),
        },
    };
    Some(spec)
}

/// Tracks the color most recently written so repeats are suppressed.
#[derive(Debug, Default)]
pub struct ColorState {
    current: Option<RegionKind>,
}

impl ColorState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Emit whatever escape moves the terminal from the current color to
    /// the one for `kind`. No-op when nothing changes or color is off.
    pub fn set(&mut self, out: &mut Vec<u8>, kind: Option<RegionKind>, level: ColorLevel) {
        if level == ColorLevel::None {
            return;
        }
        let kind = kind.filter(|k| color_for(*k).is_some());
        if self.current == kind {
            return;
        }
        match kind.and_then(color_for) {
            None => out.extend_from_slice(escape::RESET),
            Some(spec) => match level {
                ColorLevel::None => {}
                ColorLevel::Ansi16 => escape::fg_16(out, spec.ansi16),
                ColorLevel::Ansi256 => escape::fg_256(out, spec.ansi256),
                ColorLevel::TrueColor => {
                    let (r, g, b) = spec.rgb;
                    escape::fg_rgb(out, r, g, b);
                }
            },
        }
        self.current = kind;
    }

    /// Emit a reset unless already at the default state.
    pub fn reset(&mut self, out: &mut Vec<u8>, level: ColorLevel) {
        if level == ColorLevel::None {
            return;
        }
        if self.current.is_some() {
            out.extend_from_slice(escape::RESET);
            self.current = None;
        }
    }

    /// Forget the remembered state (after a full clear the terminal is at
    /// defaults regardless).
    pub fn invalidate(&mut self) {
        self.current = None;
    }
}
