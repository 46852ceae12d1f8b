/// Color used when a rubric has a single performance level.
pub const SINGLE_LEVEL_COLOR: &str = "#4CAF50";

const WORST: (f64, f64, f64) = (255.0, 76.0, 76.0);
const BEST: (f64, f64, f64) = (76.0, 175.0, 80.0);

/// Red-to-green scale with one `#RRGGBB` entry per level, worst first.
pub fn level_colors(count: usize) -> Vec<String> {
    match count {
        0 => Vec::new(),
        1 => vec![SINGLE_LEVEL_COLOR.to_string()],
        _ => {
            let last = (count - 1) as f64;
            (0..count)
                .map(|i| {
                    let t = i as f64 / last;
                    format!(
                        "#{:02X}{:02X}{:02X}",
                        lerp(WORST.0, BEST.0, t),
                        lerp(WORST.1, BEST.1, t),
                        lerp(WORST.2, BEST.2, t)
                    )
                })
                .collect()
        }
    }
}

fn lerp(from: f64, to: f64, t: f64) -> u8 {
    (from + (to - from) * t).round().clamp(0.0, 255.0) as u8
}
