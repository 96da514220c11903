use crate::settings::PixelProbe;
use crate::types::Capture;

/// RGB of the pixel at window coordinates (x, y), if the capture covers it.
/// Capture is always BGRA byte order.
pub fn pixel_at(capture: &Capture, x: i32, y: i32) -> Option<[u8; 3]> {
    let px = x - capture.left;
    let py = y - capture.top;
    if px < 0 || py < 0 || px as u32 >= capture.width || py as u32 >= capture.height {
        return None;
    }
    let idx = (py as u32 * capture.bytes_per_row + px as u32 * 4) as usize;
    let bgr = capture.data.get(idx..idx + 3)?;
    Some([bgr[2], bgr[1], bgr[0]])
}

/// Parse "rrggbb" (optionally prefixed with '#').
pub fn parse_hex(s: &str) -> Option<[u8; 3]> {
    let s = s.trim().trim_start_matches('#');
    if s.len() != 6 {
        return None;
    }
    let v = u32::from_str_radix(s, 16).ok()?;
    Some([(v >> 16) as u8, (v >> 8) as u8, v as u8])
}

/// Euclidean distance in RGB space.
pub fn color_distance(a: [u8; 3], b: [u8; 3]) -> f64 {
    let d = |i: usize| a[i] as f64 - b[i] as f64;
    (d(0) * d(0) + d(1) * d(1) + d(2) * d(2)).sqrt()
}

pub fn probe_matches(capture: &Capture, probe: &PixelProbe) -> bool {
    let (Some(actual), Some(expected)) = (pixel_at(capture, probe.x, probe.y), parse_hex(&probe.color)) else {
        return false;
    };
    color_distance(actual, expected) <= probe.threshold
}

/// True when there is at least one probe and every probe matches.
pub fn all_match(capture: &Capture, probes: &[PixelProbe]) -> bool {
    !probes.is_empty() && probes.iter().all(|p| probe_matches(capture, p))
}

/// Solid-colour BGRA capture, handy for tests and the simulated console.
pub fn solid(width: u32, height: u32, rgb: [u8; 3]) -> Capture {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&[rgb[2], rgb[1], rgb[0], 255]);
    }
    Capture { data, width, height, bytes_per_row: width * 4, left: 0, top: 0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_at_respects_offset() {
        let mut cap = solid(4, 4, [10, 20, 30]);
        cap.left = 100;
        cap.top = 50;
        assert_eq!(pixel_at(&cap, 101, 52), Some([10, 20, 30]));
        assert_eq!(pixel_at(&cap, 99, 52), None);
        assert_eq!(pixel_at(&cap, 104, 52), None);
    }

    #[test]
    fn test_probe_threshold() {
        let cap = solid(500, 200, [240, 240, 240]);
        let near = PixelProbe { x: 427, y: 142, color: "ffffff".into(), threshold: 30.0 };
        let strict = PixelProbe { threshold: 10.0, ..near.clone() };
        assert!(probe_matches(&cap, &near));
        assert!(!probe_matches(&cap, &strict));
        assert!(!all_match(&cap, &[]));
        assert!(all_match(&cap, &[near]));
    }

    #[test]
    fn test_parse_hex() {
        assert_eq!(parse_hex("#FF8000"), Some([255, 128, 0]));
        assert_eq!(parse_hex("fff"), None);
    }
}
