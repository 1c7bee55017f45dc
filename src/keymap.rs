//! Single-key bindings for the interactive dispatcher.

use crate::config::ScopeConfig;
use crate::producer::Command;
use crate::types::Axis;

const ESC: char = '\u{1b}';
const PAN_STEP: f64 = 0.2;

/// Key → command table. Holds the one config-derived step (windows per
/// second of audio) used by the large rewind/fast-forward keys.
#[derive(Debug, Clone, Copy)]
pub struct Keymap {
    big_step: u32,
}

impl Keymap {
    pub fn new(config: &ScopeConfig) -> Self {
        Self {
            big_step: config.windows_per_second() as u32,
        }
    }

    pub fn command_for_key(&self, key: char) -> Option<Command> {
        let cmd = match key {
            ' ' => Command::TogglePause,
            ',' => Command::Rewind(1),
            '.' => Command::FastForward(1),
            '<' => Command::Rewind(self.big_step),
            '>' => Command::FastForward(self.big_step),
            '[' => Command::AdjustColorRange(-1.0),
            ']' => Command::AdjustColorRange(1.0),
            '{' => Command::AdjustColorRange(-0.01),
            '}' => Command::AdjustColorRange(0.01),
            '-' => Command::AdjustColorRate(-1.0),
            '=' => Command::AdjustColorRate(1.0),
            '_' => Command::AdjustColorRate(-0.01),
            '+' => Command::AdjustColorRate(0.01),
            'a' => Command::ToggleAutoScale,
            'c' => Command::NextColorMode,
            'C' => Command::PrevColorMode,
            'd' => Command::NextDisplayMode,
            'D' => Command::PrevDisplayMode,
            'f' => Command::ToggleFullScreen,
            'r' => Command::Recenter,
            's' => Command::NextStatsGroup,
            'S' => Command::PrevStatsGroup,
            'w' => Command::AdjustLineWidth(1),
            'W' => Command::AdjustLineWidth(-1),
            'z' => Command::ZoomIn,
            'x' => Command::ZoomOut,
            // vi-style stand-ins for the arrow keys
            'k' => Command::Pan { axis: Axis::Vertical, fraction: PAN_STEP },
            'j' => Command::Pan { axis: Axis::Vertical, fraction: -PAN_STEP },
            'l' => Command::Pan { axis: Axis::Horizontal, fraction: PAN_STEP },
            'h' => Command::Pan { axis: Axis::Horizontal, fraction: -PAN_STEP },
            '0' => Command::SetZoom(512.0),
            '1'..='9' => {
                let k = key as u32 - '0' as u32;
                Command::SetZoom(2f64.powi(k as i32 - 1))
            }
            'q' | ESC => Command::Quit,
            _ => return None,
        };
        Some(cmd)
    }
}
