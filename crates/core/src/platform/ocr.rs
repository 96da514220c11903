use std::io::Cursor;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::logger;
use crate::retry::Retry;
use crate::settings::OcrSettings;
use crate::sleep::SystemClock;
use crate::types::{Capture, CaptureRect, TextHit};
use super::{process, TextRecognizer};

/// Target text found.
const CODE_FOUND: i32 = 100;
/// Text recognised but no target match (or nothing at all).
const CODE_NO_MATCH: i32 = 200;

#[derive(Serialize)]
struct OcrRequest<'a> {
    base64: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    target_text: Option<&'a str>,
}

#[derive(Debug, Default, Deserialize)]
struct OcrPosition {
    left: i32,
    top: i32,
    right: i32,
    bottom: i32,
}

#[derive(Debug, Deserialize)]
struct OcrItem {
    text: String,
    #[serde(default, alias = "score")]
    confidence: f64,
    #[serde(default)]
    #[serde(rename = "box")]
    polygon: Vec<[f64; 2]>,
    #[serde(default)]
    position: Option<OcrPosition>,
}

impl From<OcrItem> for TextHit {
    fn from(item: OcrItem) -> Self {
        let mut hit = TextHit::new(item.text, item.confidence).with_polygon(item.polygon);
        if let Some(p) = item.position {
            if p.right > p.left && p.bottom > p.top {
                hit = hit.with_rect(CaptureRect::from_corners(p.left, p.top, p.right, p.bottom));
            }
        }
        hit
    }
}

/// The service answers with either a flattened string or a list of hits in
/// `data`, and newer versions add the list under `items`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OcrData {
    Flat(String),
    Hits(Vec<OcrItem>),
}

#[derive(Debug, Deserialize)]
struct OcrResponse {
    code: i32,
    #[serde(default)]
    data: Option<OcrData>,
    #[serde(default)]
    items: Vec<OcrItem>,
    #[serde(default)]
    message: String,
}

fn parse_response(resp: OcrResponse) -> Result<Vec<TextHit>> {
    if resp.code != CODE_FOUND && resp.code != CODE_NO_MATCH {
        return Err(Error::Platform(format!("ocr error {}: {}", resp.code, resp.message)));
    }
    if !resp.items.is_empty() {
        return Ok(resp.items.into_iter().map(TextHit::from).collect());
    }
    match resp.data {
        Some(OcrData::Hits(items)) => Ok(items.into_iter().map(TextHit::from).collect()),
        Some(OcrData::Flat(text)) => {
            let text = text.trim();
            if text.is_empty() {
                return Ok(Vec::new());
            }
            let confidence = if resp.code == CODE_FOUND { 1.0 } else { 0.5 };
            Ok(vec![TextHit::new(text, confidence)])
        }
        None => Ok(Vec::new()),
    }
}

/// BGRA capture -> PNG bytes.
pub fn encode_png(capture: &Capture) -> Result<Vec<u8>> {
    let mut rgba = Vec::with_capacity((capture.width * capture.height * 4) as usize);
    for y in 0..capture.height {
        let row = (y * capture.bytes_per_row) as usize;
        for x in 0..capture.width {
            let i = row + x as usize * 4;
            let px = capture
                .data
                .get(i..i + 4)
                .ok_or_else(|| Error::Platform("capture buffer too short".into()))?;
            rgba.extend_from_slice(&[px[2], px[1], px[0], px[3]]);
        }
    }
    let img = image::RgbaImage::from_raw(capture.width, capture.height, rgba)
        .ok_or_else(|| Error::Platform("capture size mismatch".into()))?;
    let mut buf = Vec::new();
    image::DynamicImage::ImageRgba8(img)
        .write_to(&mut Cursor::new(&mut buf), image::ImageOutputFormat::Png)
        .map_err(|e| Error::Platform(format!("png encode: {}", e)))?;
    Ok(buf)
}

fn client(timeout_ms: u64) -> reqwest::blocking::Client {
    reqwest::blocking::Client::builder()
        .timeout(Duration::from_millis(timeout_ms))
        .build()
        .unwrap_or_else(|_| reqwest::blocking::Client::new())
}

/// Client for a local HTTP recognition service.
pub struct OcrRecognizer {
    endpoint: String,
    client: reqwest::blocking::Client,
    health: String,
    health_client: reqwest::blocking::Client,
    launch: Vec<String>,
    start: Retry,
}

impl OcrRecognizer {
    pub fn new(settings: &OcrSettings) -> Self {
        Self {
            endpoint: settings.endpoint.clone(),
            client: client(settings.timeout_ms),
            health: settings.health.clone(),
            health_client: client(settings.health_timeout_ms),
            launch: settings.launch.clone(),
            start: Retry::fixed(settings.start_attempts, Duration::from_millis(settings.start_delay_ms)).with_backoff(1.5),
        }
    }

    fn healthy(&self) -> bool {
        self.health_client
            .get(&self.health)
            .send()
            .is_ok_and(|r| r.status().is_success())
    }
}

impl TextRecognizer for OcrRecognizer {
    /// Health-check the service and start it when it is down and a launch
    /// command is configured.
    fn ensure_ready(&self) -> Result<()> {
        if self.healthy() {
            return Ok(());
        }
        if self.launch.is_empty() {
            return Err(Error::Platform(format!("ocr service not reachable at {}", self.health)));
        }
        logger::warn_p("ocr", &format!("service down, starting {}", self.launch.join(" ")));
        process::spawn_detached(&self.launch).map_err(|e| Error::Platform(format!("cannot start ocr service: {}", e)))?;
        self.start
            .run(&SystemClock, |_| self.healthy().then_some(()))
            .ok_or_else(|| Error::Platform(format!("ocr service did not come up at {}", self.health)))?;
        logger::info_p("ocr", "service ready");
        Ok(())
    }

    fn recognize(&self, capture: &Capture, hint: Option<&str>) -> Result<Vec<TextHit>> {
        let png = encode_png(capture)?;
        let body = OcrRequest { base64: STANDARD.encode(png), target_text: hint };
        let resp: OcrResponse = self.client.post(&self.endpoint).json(&body).send()?.json()?;
        let hits = parse_response(resp)?;
        logger::info_p("ocr", &format!("{} hit(s) in {}x{}", hits.len(), capture.width, capture.height));
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pixel;

    fn parse(json: &str) -> Result<Vec<TextHit>> {
        parse_response(serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_flat_response() {
        let hits = parse(r#"{"code": 100, "data": " MUTE "}"#).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].text, "MUTE");
        assert_eq!(hits[0].bounds(), None);
        assert!(parse(r#"{"code": 200, "data": ""}"#).unwrap().is_empty());
    }

    #[test]
    fn test_multi_hit_response() {
        let hits = parse(
            r#"{"code": 100, "data": [
                {"text": "GLOBAL", "score": 0.9, "box": [[233,308],[267,308],[267,327],[233,327]]},
                {"text": "MUTE", "confidence": 0.8, "box": [], "position": {"left": 30, "top": 310, "right": 61, "bottom": 325}}
            ]}"#,
        )
        .unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].bounds(), Some(CaptureRect::from_corners(233, 308, 267, 327)));
        assert_eq!(hits[1].bounds(), Some(CaptureRect { l: 30, t: 310, w: 31, h: 15 }));
    }

    #[test]
    fn test_items_take_precedence_and_errors_surface() {
        let hits = parse(r#"{"code": 200, "data": "ignored", "items": [{"text": "HUD", "confidence": 0.7, "box": []}]}"#).unwrap();
        assert_eq!(hits[0].text, "HUD");
        assert!(matches!(parse(r#"{"code": 500, "message": "model not loaded"}"#), Err(Error::Platform(_))));
    }

    fn unreachable(launch: Vec<String>) -> OcrSettings {
        // nothing listens on the discard port
        OcrSettings {
            health: "http://127.0.0.1:9/health".into(),
            health_timeout_ms: 200,
            launch,
            start_attempts: 2,
            start_delay_ms: 10,
            ..OcrSettings::default()
        }
    }

    #[test]
    fn test_unreachable_service_without_launch_is_an_error() {
        let ocr = OcrRecognizer::new(&unreachable(Vec::new()));
        assert!(matches!(ocr.ensure_ready(), Err(Error::Platform(_))));
    }

    #[cfg(unix)]
    #[test]
    fn test_started_service_that_never_answers_is_an_error() {
        let ocr = OcrRecognizer::new(&unreachable(vec!["true".into()]));
        let err = ocr.ensure_ready().unwrap_err();
        assert!(err.to_string().contains("did not come up"));
    }

    #[test]
    fn test_encode_png_signature() {
        let png = encode_png(&pixel::solid(3, 2, [1, 2, 3])).unwrap();
        assert_eq!(&png[..4], &[0x89, b'P', b'N', b'G']);
    }
}
