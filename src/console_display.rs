use crate::types::*;
use crossbeam_channel::Receiver;
use std::fmt::Write as _;
use std::io::{self, Write};
use std::time::{Duration, Instant};

/// Renders the XY trace as colored characters in the terminal.
pub struct ConsoleDisplay {
    rx: Receiver<ScopeFrame>,
    update_hz: u32,
    cols: usize,
    rows: usize,
}

/// One character cell of the plot.
#[derive(Clone, Copy)]
struct Cell {
    hits: u32,
    rgb: [u8; 3],
}

const EMPTY: Cell = Cell { hits: 0, rgb: [0; 3] };

/// Denser glyphs for cells crossed by more samples.
const RAMP: [char; 4] = ['·', '•', '●', '█'];

impl ConsoleDisplay {
    pub fn new(rx: Receiver<ScopeFrame>, update_hz: u32, cols: usize, rows: usize) -> Self {
        Self {
            rx,
            update_hz,
            cols: cols.max(8),
            rows: rows.max(4),
        }
    }

    pub fn run(&self) {
        let period = if self.update_hz == 0 {
            Duration::from_millis(50)
        } else {
            Duration::from_secs_f64(1.0 / self.update_hz as f64)
        };
        let mut last: Option<Instant> = None;
        let mut stdout = io::stdout();

        for frame in self.rx.iter() {
            if last.is_some_and(|t| t.elapsed() < period) {
                continue;
            }
            last = Some(Instant::now());

            // Clear screen and move cursor home
            print!("\x1b[2J\x1b[H");
            print!("{}", self.render(&frame, true));
            let _ = stdout.flush();
        }
    }

    /// Draw one frame: boxed plot plus HUD lines. `ansi` adds 24-bit color.
    pub fn render(&self, frame: &ScopeFrame, ansi: bool) -> String {
        let grid = self.rasterize(frame);
        let b = frame.bounds;
        let mut out = String::new();

        let _ = writeln!(out, "╔{}╗", "═".repeat(self.cols));
        for (r, row) in grid.chunks(self.cols).enumerate() {
            out.push('║');
            for (c, cell) in row.iter().enumerate() {
                if cell.hits == 0 {
                    out.push(axis_glyph(b, r, c, self.rows, self.cols));
                    continue;
                }
                let glyph = RAMP[(cell.hits as usize - 1).min(RAMP.len() - 1)];
                if ansi {
                    let [cr, cg, cb] = cell.rgb;
                    let _ = write!(out, "\x1b[38;2;{};{};{}m{}\x1b[0m", cr, cg, cb, glyph);
                } else {
                    out.push(glyph);
                }
            }
            out.push_str("║\n");
        }
        let _ = writeln!(out, "╚{}╝", "═".repeat(self.cols));

        for line in hud_lines(frame) {
            let _ = writeln!(out, "  {}", line);
        }
        out
    }

    fn rasterize(&self, frame: &ScopeFrame) -> Vec<Cell> {
        let mut grid = vec![EMPTY; self.cols * self.rows];
        let b = frame.bounds;
        for v in &frame.vertices {
            let Some((r, c)) = cell_of(b, v.x as f64, v.y as f64, self.rows, self.cols) else {
                continue;
            };
            let cell = &mut grid[r * self.cols + c];
            cell.hits += 1;
            cell.rgb = [to_u8(v.r), to_u8(v.g), to_u8(v.b)];
        }
        grid
    }
}

/// Grid position of a world point, None when outside the view.
fn cell_of(b: ViewBounds, x: f64, y: f64, rows: usize, cols: usize) -> Option<(usize, usize)> {
    if !(x.is_finite() && y.is_finite()) || x < b.left || x > b.right || y < b.bottom || y > b.top {
        return None;
    }
    let c = ((x - b.left) / b.width() * (cols - 1) as f64).round() as usize;
    let r = ((b.top - y) / b.height() * (rows - 1) as f64).round() as usize;
    Some((r.min(rows - 1), c.min(cols - 1)))
}

fn axis_glyph(b: ViewBounds, r: usize, c: usize, rows: usize, cols: usize) -> char {
    let origin = cell_of(b, 0.0, 0.0, rows, cols);
    match origin {
        Some((or, oc)) if or == r && oc == c => '┼',
        Some((or, _)) if or == r => '─',
        Some((_, oc)) if oc == c => '│',
        _ => ' ',
    }
}

fn to_u8(v: f32) -> u8 {
    (v.clamp(0.0, 1.0) * 255.0).round() as u8
}

fn hud_lines(frame: &ScopeFrame) -> Vec<String> {
    let h = &frame.hud;
    let mut lines = vec![format!(
        "{:>5.1} fps   latency {:>6.1} ms   scale {:.4}{}",
        h.fps,
        h.latency_seconds * 1000.0,
        h.scale_factor,
        match h.paused_counter_seconds {
            Some(s) => format!("   PAUSED {:+.3}s", s),
            None => String::new(),
        }
    )];
    match h.stats_group {
        1 => lines.push(format!(
            "display {}   color {}   line width {}",
            h.display_mode, h.color_mode, h.line_width
        )),
        2 => lines.push(format!(
            "color range {:+.2}   color rate {:+.2}",
            h.color_range, h.color_rate
        )),
        3 => {
            let b = frame.bounds;
            lines.push(format!(
                "auto-scale {}   x [{:.4}, {:.4}]   y [{:.4}, {:.4}]",
                if h.auto_scale { "on" } else { "off" },
                b.left,
                b.right,
                b.bottom,
                b.top
            ));
        }
        _ => {}
    }
    lines
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(vertices: Vec<Vertex>) -> ScopeFrame {
        ScopeFrame {
            tick: 0,
            bounds: ViewBounds::UNIT,
            vertices,
            hud: Hud {
                fps: 60.0,
                latency_seconds: 0.012,
                scale_factor: 1.0,
                paused_counter_seconds: None,
                auto_scale: false,
                display_mode: DisplayMode::Standard,
                color_mode: ColorMode::Standard,
                color_range: 1.0,
                color_rate: 1.0,
                line_width: 2,
                full_screen: false,
                stats_group: 0,
            },
        }
    }

    fn red(x: f32, y: f32) -> Vertex {
        Vertex { x, y, r: 1.0, g: 0.0, b: 0.0 }
    }

    #[test]
    fn test_corners_map_to_grid_edges() {
        let b = ViewBounds::UNIT;
        assert_eq!(cell_of(b, -1.0, 1.0, 11, 21), Some((0, 0)));
        assert_eq!(cell_of(b, 1.0, -1.0, 11, 21), Some((10, 20)));
        assert_eq!(cell_of(b, 0.0, 0.0, 11, 21), Some((5, 10)));
        assert_eq!(cell_of(b, 1.5, 0.0, 11, 21), None);
        assert_eq!(cell_of(b, f64::NAN, 0.0, 11, 21), None);
    }

    #[test]
    fn test_render_plain_marks_samples() {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let d = ConsoleDisplay::new(rx, 20, 21, 11);
        let out = d.render(&frame(vec![red(-1.0, 1.0), red(0.5, 0.5)]), false);
        let rows: Vec<&str> = out.lines().collect();
        // top border, 11 plot rows, bottom border, HUD
        assert_eq!(rows.len(), 14);
        assert!(rows[1].starts_with("║·"));
        assert!(rows[6].contains('┼'));
        assert!(rows[13].contains("60.0 fps"));
    }

    #[test]
    fn test_repeated_hits_get_denser_glyph() {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let d = ConsoleDisplay::new(rx, 20, 21, 11);
        let out = d.render(&frame(vec![red(0.5, 0.5); 10]), false);
        assert!(out.contains('█'));
    }

    #[test]
    fn test_paused_hud_and_stats_groups() {
        let mut f = frame(Vec::new());
        f.hud.paused_counter_seconds = Some(-0.5);
        f.hud.stats_group = 2;
        let lines = hud_lines(&f);
        assert!(lines[0].contains("PAUSED -0.500s"));
        assert_eq!(lines.len(), 2);
        assert!(lines[1].contains("color range"));
    }

    #[test]
    fn test_ansi_render_colors_cells() {
        let (_tx, rx) = crossbeam_channel::bounded(1);
        let d = ConsoleDisplay::new(rx, 20, 21, 11);
        let out = d.render(&frame(vec![red(0.0, 0.5)]), true);
        assert!(out.contains("\x1b[38;2;255;0;0m"));
    }
}
