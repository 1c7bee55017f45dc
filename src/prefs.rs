//! User preferences as a small fixed-layout little-endian record.
//!
//! Read once at startup, written once at shutdown. Anything unreadable
//! (missing, short, foreign or from another version) falls back to defaults;
//! individual fields that decode to nonsense are replaced field by field.

use crate::dsp::wrap_hue;
use crate::types::{ColorMode, DisplayMode, ScopeError, ScopeResult, ViewBounds, MAX_LINE_WIDTH};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use log::{info, warn};
use std::io::{self, Cursor, Read};
use std::path::Path;

const MAGIC: &[u8; 4] = b"XYSP";
const VERSION: u16 = 1;

/// Encoded size in bytes.
pub const RECORD_LEN: usize = 4 + 2 // magic, version
    + 8 * 4                          // dim, normal_dim, old_dim, position
    + 4 * 8 + 8                      // sides, scale_factor
    + 3                              // scale_locked, full_screen, auto_scale
    + 1 + 8 + 8                      // color_mode, color_range, color_rate
    + 1 + 4 + 4                      // display_mode, line_width, show_stats
    + 8; // hue

const DEFAULT_DIM: [u32; 2] = [600, 600];

#[derive(Debug, Clone, PartialEq)]
pub struct Preferences {
    /// Viewport size in pixels
    pub dim: [u32; 2],
    /// Size to restore when leaving full screen
    pub normal_dim: [u32; 2],
    /// Size at the last resize
    pub old_dim: [u32; 2],
    pub position: [i32; 2],
    pub bounds: ViewBounds,
    pub scale_factor: f64,
    pub scale_locked: bool,
    pub full_screen: bool,
    pub auto_scale: bool,
    pub color_mode: ColorMode,
    pub color_range: f64,
    pub color_rate: f64,
    pub display_mode: DisplayMode,
    pub line_width: u32,
    pub show_stats: u32,
    pub hue: f64,
}

impl Default for Preferences {
    fn default() -> Self {
        Self {
            dim: DEFAULT_DIM,
            normal_dim: DEFAULT_DIM,
            old_dim: DEFAULT_DIM,
            position: [0, 0],
            bounds: ViewBounds::UNIT,
            scale_factor: 1.0,
            scale_locked: true,
            full_screen: false,
            auto_scale: false,
            color_mode: ColorMode::Standard,
            color_range: 1.0,
            color_rate: 1.0,
            display_mode: DisplayMode::Standard,
            line_width: 2,
            show_stats: 0,
            hue: 0.0,
        }
    }
}

impl Preferences {
    /// Load from `path`, falling back to defaults on any problem.
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read(path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                info!("No preferences at {:?}, using defaults", path);
                return Self::default();
            }
            Err(e) => {
                warn!("Cannot read preferences {:?}: {}", path, e);
                return Self::default();
            }
        };
        match Self::decode(&data) {
            Ok(p) => {
                info!("Loaded preferences from {:?}", path);
                p
            }
            Err(e) => {
                warn!("Ignoring preferences {:?}: {}", path, e);
                Self::default()
            }
        }
    }

    pub fn save(&self, path: &Path) -> ScopeResult<()> {
        std::fs::write(path, self.encode())?;
        info!("Preferences saved to {:?}", path);
        Ok(())
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RECORD_LEN);
        // Writes into a Vec cannot fail.
        let _ = self.write_to(&mut buf);
        buf
    }

    fn write_to(&self, w: &mut Vec<u8>) -> io::Result<()> {
        w.extend_from_slice(MAGIC);
        w.write_u16::<LittleEndian>(VERSION)?;
        for pair in [self.dim, self.normal_dim, self.old_dim] {
            for v in pair {
                w.write_i32::<LittleEndian>(v.min(i32::MAX as u32) as i32)?;
            }
        }
        for v in self.position {
            w.write_i32::<LittleEndian>(v)?;
        }
        for side in self.bounds.sides() {
            w.write_f64::<LittleEndian>(side)?;
        }
        w.write_f64::<LittleEndian>(self.scale_factor)?;
        w.write_u8(self.scale_locked as u8)?;
        w.write_u8(self.full_screen as u8)?;
        w.write_u8(self.auto_scale as u8)?;
        w.write_u8(self.color_mode.ordinal() as u8)?;
        w.write_f64::<LittleEndian>(self.color_range)?;
        w.write_f64::<LittleEndian>(self.color_rate)?;
        w.write_u8(self.display_mode.ordinal() as u8)?;
        w.write_u32::<LittleEndian>(self.line_width)?;
        w.write_u32::<LittleEndian>(self.show_stats)?;
        w.write_f64::<LittleEndian>(self.hue)?;
        Ok(())
    }

    /// Parse a record and repair out-of-range fields.
    pub fn decode(data: &[u8]) -> ScopeResult<Self> {
        if data.len() < RECORD_LEN {
            return Err(ScopeError::Config(format!(
                "record is {} bytes, expected {}",
                data.len(),
                RECORD_LEN
            )));
        }
        let mut cur = Cursor::new(data);
        let mut magic = [0u8; 4];
        cur.read_exact(&mut magic)?;
        if &magic != MAGIC {
            return Err(ScopeError::Config("bad magic".into()));
        }
        let version = cur.read_u16::<LittleEndian>()?;
        if version != VERSION {
            return Err(ScopeError::Config(format!("unsupported version {}", version)));
        }

        let mut dims = [[0u32; 2]; 3];
        for pair in dims.iter_mut() {
            for v in pair.iter_mut() {
                *v = dimension(cur.read_i32::<LittleEndian>()?);
            }
        }
        let mut position = [0i32; 2];
        for v in position.iter_mut() {
            *v = cur.read_i32::<LittleEndian>()?;
        }
        let mut sides = [0f64; 4];
        for s in sides.iter_mut() {
            *s = cur.read_f64::<LittleEndian>()?;
        }
        let scale_factor = cur.read_f64::<LittleEndian>()?;
        let scale_locked = cur.read_u8()? != 0;
        let full_screen = cur.read_u8()? != 0;
        let auto_scale = cur.read_u8()? != 0;
        let color_mode = ColorMode::from_ordinal(cur.read_u8()?);
        let color_range = cur.read_f64::<LittleEndian>()?;
        let color_rate = cur.read_f64::<LittleEndian>()?;
        let display_mode = DisplayMode::from_ordinal(cur.read_u8()?);
        let line_width = cur.read_u32::<LittleEndian>()?;
        let show_stats = cur.read_u32::<LittleEndian>()?;
        let hue = cur.read_f64::<LittleEndian>()?;

        let defaults = Self::default();
        let bounds = ViewBounds::from_sides(sides);
        let (bounds, scale_factor) = if bounds.is_valid() && scale_factor.is_finite() && scale_factor > 0.0 {
            (bounds, scale_factor)
        } else {
            warn!("Stored view bounds {:?} are unusable, resetting", sides);
            (defaults.bounds, defaults.scale_factor)
        };

        Ok(Self {
            dim: dims[0],
            normal_dim: dims[1],
            old_dim: dims[2],
            position,
            bounds,
            scale_factor,
            scale_locked,
            full_screen,
            auto_scale,
            color_mode,
            color_range: finite_or(color_range, defaults.color_range),
            color_rate: finite_or(color_rate, defaults.color_rate),
            display_mode,
            line_width: if (1..=MAX_LINE_WIDTH).contains(&line_width) {
                line_width
            } else {
                defaults.line_width
            },
            show_stats: show_stats % 4,
            hue: wrap_hue(hue),
        })
    }
}

fn dimension(v: i32) -> u32 {
    if v > 0 {
        v as u32
    } else {
        DEFAULT_DIM[0]
    }
}

fn finite_or(v: f64, fallback: f64) -> f64 {
    if v.is_finite() {
        v
    } else {
        fallback
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn customized() -> Preferences {
        Preferences {
            dim: [1024, 768],
            normal_dim: [800, 600],
            old_dim: [1000, 700],
            position: [-20, 40],
            bounds: ViewBounds::from_sides([0.5, -0.25, 2.0, -1.0]),
            scale_factor: 2.0 / 0.75,
            scale_locked: false,
            full_screen: true,
            auto_scale: true,
            color_mode: ColorMode::Delta,
            color_range: -12.5,
            color_rate: 90.25,
            display_mode: DisplayMode::Time,
            line_width: 5,
            show_stats: 3,
            hue: 271.5,
        }
    }

    #[test]
    fn test_record_length_is_fixed() {
        assert_eq!(Preferences::default().encode().len(), RECORD_LEN);
        assert_eq!(customized().encode().len(), RECORD_LEN);
        assert_eq!(&customized().encode()[..4], b"XYSP");
    }

    #[test]
    fn test_customized_record_survives_decode() {
        let p = customized();
        assert_eq!(Preferences::decode(&p.encode()).unwrap(), p);
    }

    #[test]
    fn test_short_record_rejected() {
        let bytes = customized().encode();
        assert!(Preferences::decode(&bytes[..RECORD_LEN - 1]).is_err());
        assert!(Preferences::decode(&[]).is_err());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let mut bytes = customized().encode();
        bytes[0] = b'Q';
        assert!(matches!(Preferences::decode(&bytes), Err(ScopeError::Config(_))));
    }

    #[test]
    fn test_degenerate_bounds_reset() {
        let mut p = customized();
        p.bounds = ViewBounds::from_sides([f64::NAN, -1.0, 1.0, -1.0]);
        let back = Preferences::decode(&p.encode()).unwrap();
        assert_eq!(back.bounds, ViewBounds::UNIT);
        assert_eq!(back.scale_factor, 1.0);
        // unrelated fields survive
        assert_eq!(back.display_mode, DisplayMode::Time);

        p.bounds = ViewBounds::from_sides([-1.0, 1.0, 1.0, -1.0]);
        assert_eq!(Preferences::decode(&p.encode()).unwrap().bounds, ViewBounds::UNIT);
    }

    #[test]
    fn test_out_of_range_fields_repaired() {
        let mut p = customized();
        p.line_width = 40;
        p.show_stats = 6;
        p.hue = -30.0;
        p.color_rate = f64::INFINITY;
        let mut bytes = p.encode();
        // display mode byte → unknown ordinal
        let display_at = RECORD_LEN - 8 - 4 - 4 - 1;
        bytes[display_at] = 42;
        let back = Preferences::decode(&bytes).unwrap();
        assert_eq!(back.line_width, 2);
        assert_eq!(back.show_stats, 2);
        assert!((back.hue - 330.0).abs() < 1e-9);
        assert_eq!(back.color_rate, 1.0);
        assert_eq!(back.display_mode, DisplayMode::Standard);
    }

    #[test]
    fn test_load_missing_and_garbage_files_give_defaults() {
        let dir = std::env::temp_dir();
        let missing = dir.join("xy_scope_no_prefs.bin");
        let _ = std::fs::remove_file(&missing);
        assert_eq!(Preferences::load(&missing), Preferences::default());

        let garbage = dir.join(format!("xy_scope_garbage_{}.bin", std::process::id()));
        std::fs::write(&garbage, b"XYSP\x01\x00").unwrap();
        assert_eq!(Preferences::load(&garbage), Preferences::default());
        let _ = std::fs::remove_file(&garbage);
    }

    #[test]
    fn test_save_then_load() {
        let path = std::env::temp_dir().join(format!("xy_scope_prefs_{}.bin", std::process::id()));
        let p = customized();
        p.save(&path).unwrap();
        let back = Preferences::load(&path);
        let _ = std::fs::remove_file(&path);
        assert_eq!(back, p);
    }
}
