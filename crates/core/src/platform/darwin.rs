use std::io::Write;
use std::process::{Command as ProcessCommand, Stdio};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use core_foundation::array::CFArray;
use core_foundation::base::TCFType;
use core_foundation::dictionary::CFDictionary;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_graphics::event::*;
use core_graphics::event_source::*;
use core_graphics::geometry::*;
use core_graphics::window::*;

use crate::error::{Error, Result};
use crate::logger;
use crate::types::*;
use super::{Actuator, FrameSource};

// AppleScript key codes for special keys
fn applescript_key_code(key: &str) -> Option<u16> {
    match key {
        "enter" | "return" => Some(36),
        "escape" | "esc" => Some(53),
        "delete" | "backspace" => Some(51),
        "tab" => Some(48),
        "space" => Some(49),
        "up" => Some(126),
        "down" => Some(125),
        "left" => Some(123),
        "right" => Some(124),
        _ => None,
    }
}

fn osascript(script: &str) -> Result<()> {
    let status = ProcessCommand::new("osascript")
        .arg("-e")
        .arg(script)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()?;
    if !status.success() {
        return Err(Error::Platform(format!("osascript exited with {}", status)));
    }
    Ok(())
}

struct Inner {
    pattern: String,
    key_delay: Duration,
    window_id: Option<CGWindowID>,
    pid: Option<i32>,
    region: Option<Region>,
}

impl Inner {
    /// Re-read the window list; picks the first layer-0 window matching the
    /// pattern when no window is bound yet.
    fn update(&mut self) {
        self.region = None;
        let re = match regex::Regex::new(&format!("(?i){}", self.pattern)) {
            Ok(r) => r,
            Err(e) => {
                logger::error_p("darwin", &format!("invalid pattern '{}': {}", self.pattern, e));
                return;
            }
        };

        unsafe {
            let option = kCGWindowListOptionOnScreenOnly | kCGWindowListExcludeDesktopElements;
            let window_list_ref = CGWindowListCopyWindowInfo(option, kCGNullWindowID);
            if window_list_ref.is_null() {
                return;
            }

            let list: CFArray = CFArray::wrap_under_create_rule(window_list_ref as _);
            let values = list.get_all_values();

            for dict_ptr in &values {
                let dict: CFDictionary<CFString, *const std::ffi::c_void> =
                    CFDictionary::wrap_under_get_rule(*dict_ptr as _);

                let Some(wid) = get_cf_number(&dict, "kCGWindowNumber") else { continue };
                let wid = wid as CGWindowID;
                match self.window_id {
                    Some(bound) if bound != wid => continue,
                    Some(_) => {}
                    None => {
                        let name = get_cf_string(&dict, "kCGWindowName").unwrap_or_default();
                        let owner = get_cf_string(&dict, "kCGWindowOwnerName").unwrap_or_default();
                        let layer = get_cf_number(&dict, "kCGWindowLayer");
                        let is_match = (!name.is_empty() && re.is_match(&name))
                            || (!owner.is_empty() && re.is_match(&owner));
                        if !is_match || layer != Some(0) {
                            continue;
                        }
                        logger::info_p("darwin", &format!("bound window \"{}\" (id: {})", owner, wid));
                        self.window_id = Some(wid);
                    }
                }

                self.pid = get_cf_number(&dict, "kCGWindowOwnerPID").map(|v| v as i32);
                if let Some(bounds) = get_cf_dict(&dict, "kCGWindowBounds") {
                    let x = get_cf_number(&bounds, "X").unwrap_or(0) as i32;
                    let y = get_cf_number(&bounds, "Y").unwrap_or(0) as i32;
                    let w = get_cf_number(&bounds, "Width").unwrap_or(0) as i32;
                    let h = get_cf_number(&bounds, "Height").unwrap_or(0) as i32;
                    self.region = Some(Region {
                        l: x, t: y, r: x + w, b: y + h,
                        w, h, cx: x + w / 2, cy: y + h / 2,
                    });
                }
                return;
            }

            // bound window is gone (process restarted)
            self.window_id = None;
            self.pid = None;
        }
    }

    fn pid(&mut self) -> Result<i32> {
        if self.pid.is_none() {
            self.update();
        }
        self.pid.ok_or_else(|| Error::Platform(format!("no window matching '{}'", self.pattern)))
    }
}

/// The game window, driven through System Events and Core Graphics.
/// Clones share the bound window.
#[derive(Clone)]
pub struct DarwinWindow {
    inner: Arc<Mutex<Inner>>,
}

impl DarwinWindow {
    pub fn new(pattern: &str, key_delay_ms: u64) -> Self {
        let mut inner = Inner {
            pattern: pattern.to_string(),
            key_delay: Duration::from_millis(key_delay_ms),
            window_id: None,
            pid: None,
            region: None,
        };
        inner.update();
        Self { inner: Arc::new(Mutex::new(inner)) }
    }
}

impl Actuator for DarwinWindow {
    fn press_key(&self, key: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let pid = inner.pid()?;

        // Parse modifiers (cmd+a, shift+up, etc)
        let parts: Vec<&str> = key.split('+').collect();
        let main_key = *parts.last().unwrap_or(&key);
        let mut modifiers = Vec::new();

        for part in &parts[..parts.len().saturating_sub(1)] {
            match part.to_lowercase().as_str() {
                "cmd" | "command" => modifiers.push("command down"),
                "shift" => modifiers.push("shift down"),
                "ctrl" | "control" => modifiers.push("control down"),
                "alt" | "option" => modifiers.push("option down"),
                _ => {}
            }
        }

        let main_key_lower = main_key.to_lowercase();
        let key_part = if let Some(code) = applescript_key_code(&main_key_lower) {
            format!("key code {}", code)
        } else if main_key_lower.chars().count() == 1 {
            format!("keystroke \"{}\"", main_key_lower.replace('"', "\\\""))
        } else {
            return Err(Error::Platform(format!("unknown key: {}", main_key)));
        };

        let modifier_str = if modifiers.is_empty() {
            String::new()
        } else {
            format!(" using {{{}}}", modifiers.join(", "))
        };

        osascript(&format!(
            "tell application \"System Events\" to tell process id {} to {}{}",
            pid, key_part, modifier_str
        ))?;
        thread::sleep(Duration::from_millis(50));
        Ok(())
    }

    fn type_text(&self, text: &str) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let pid = inner.pid()?;
        let delay = inner.key_delay;
        drop(inner);
        for ch in text.chars() {
            let escaped = ch.to_string().replace('\\', "\\\\").replace('"', "\\\"");
            osascript(&format!(
                "tell application \"System Events\" to tell process id {} to keystroke \"{}\"",
                pid, escaped
            ))?;
            thread::sleep(delay);
        }
        Ok(())
    }

    fn click(&self, x: i32, y: i32) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.update();
        let region = inner.region.ok_or_else(|| Error::Platform("window not found".into()))?;
        let pid = inner.pid()?;

        let point = CGPoint::new((region.l + x) as f64, (region.t + y) as f64);
        let source = CGEventSource::new(CGEventSourceStateID::HIDSystemState)
            .map_err(|_| Error::Platform("cannot create event source".into()))?;

        if let Ok(mouse_down) = CGEvent::new_mouse_event(
            source.clone(),
            CGEventType::LeftMouseDown,
            point,
            CGMouseButton::Left,
        ) {
            mouse_down.post_to_pid(pid);
        }

        thread::sleep(Duration::from_millis(15));

        if let Ok(mouse_up) = CGEvent::new_mouse_event(
            source,
            CGEventType::LeftMouseUp,
            point,
            CGMouseButton::Left,
        ) {
            mouse_up.post_to_pid(pid);
        }

        thread::sleep(Duration::from_millis(15));
        Ok(())
    }

    fn write_clipboard(&self, text: &str) -> Result<()> {
        let mut child = ProcessCommand::new("pbcopy").stdin(Stdio::piped()).spawn()?;
        if let Some(stdin) = child.stdin.as_mut() {
            stdin.write_all(text.as_bytes())?;
        }
        child.wait()?;
        Ok(())
    }

    fn read_clipboard(&self) -> Result<String> {
        let out = ProcessCommand::new("pbpaste").output()?;
        Ok(String::from_utf8_lossy(&out.stdout).into_owned())
    }
}

impl FrameSource for DarwinWindow {
    fn capture(&self, rect: Option<CaptureRect>) -> Result<Capture> {
        let mut inner = self.inner.lock().unwrap();
        inner.update();
        let region = inner.region.ok_or_else(|| Error::Platform("window not found".into()))?;
        let window_id = inner.window_id.ok_or_else(|| Error::Platform("window not found".into()))?;

        let (cg_rect, left, top) = match rect {
            Some(r) => (
                CGRect::new(
                    &CGPoint::new((region.l + r.l) as f64, (region.t + r.t) as f64),
                    &CGSize::new(r.w as f64, r.h as f64),
                ),
                r.l,
                r.t,
            ),
            // CGRectNull-like empty rect captures the whole window
            None => (CGRect::new(&CGPoint::new(0.0, 0.0), &CGSize::new(0.0, 0.0)), 0, 0),
        };

        let image_option = kCGWindowImageBoundsIgnoreFraming | kCGWindowImageNominalResolution;
        let image = create_image(cg_rect, kCGWindowListOptionIncludingWindow, window_id, image_option)
            .ok_or_else(|| Error::Platform("window capture failed".into()))?;

        let bpr = image.bytes_per_row() as u32;
        let width = bpr / 4; // real width from bytes per row
        let height = image.height() as u32;
        let cf_data = image.data();

        Ok(Capture {
            data: cf_data.bytes().to_vec(),
            width,
            height,
            bytes_per_row: bpr,
            left,
            top,
        })
    }
}

// --- CF Dictionary helpers ---

unsafe fn get_cf_string(
    dict: &CFDictionary<CFString, *const std::ffi::c_void>,
    key: &str,
) -> Option<String> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    let cf_str: CFString = CFString::wrap_under_get_rule(*value as _);
    Some(cf_str.to_string())
}

unsafe fn get_cf_number(
    dict: &CFDictionary<CFString, *const std::ffi::c_void>,
    key: &str,
) -> Option<i64> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    let cf_num: CFNumber = CFNumber::wrap_under_get_rule(*value as _);
    cf_num.to_i64()
}

unsafe fn get_cf_dict(
    dict: &CFDictionary<CFString, *const std::ffi::c_void>,
    key: &str,
) -> Option<CFDictionary<CFString, *const std::ffi::c_void>> {
    let cf_key = CFString::new(key);
    let value = dict.find(&cf_key)?;
    Some(CFDictionary::wrap_under_get_rule(*value as _))
}
