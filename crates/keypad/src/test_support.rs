//! Hand-written doubles for the browser and vision collaborators.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use finsync_core::{BrowserError, BrowserSession, Bounds, ClickStrategy, Point};
use finsync_vision::{VisionError, VisionProvider};

use crate::layout::{KeyboardKey, KeyboardLayout};

pub struct CannedVision {
    responses: Mutex<Vec<Result<String, VisionError>>>,
    pub prompts: Mutex<Vec<String>>,
}

impl CannedVision {
    pub fn new(responses: Vec<Result<String, VisionError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            prompts: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().unwrap().len()
    }
}

#[async_trait]
impl VisionProvider for CannedVision {
    async fn analyze(&self, _image: &[u8], prompt: &str) -> Result<String, VisionError> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        let mut responses = self.responses.lock().unwrap();
        if responses.is_empty() {
            return Err(VisionError::ParseError("no canned response left".into()));
        }
        responses.remove(0)
    }

    fn name(&self) -> &str {
        "canned"
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Move(Point),
    Click(Point),
    Key(char),
    Screenshot,
}

/// Records pointer and keyboard activity; fails on configured points/chars.
#[derive(Default)]
pub struct RecordingSession {
    pub events: Mutex<Vec<Event>>,
    pub fail_clicks_at: Vec<Point>,
    pub fail_keys: Vec<char>,
}

impl RecordingSession {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().unwrap().clone()
    }

    pub fn clicks(&self) -> Vec<Point> {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Click(p) => Some(p),
                _ => None,
            })
            .collect()
    }

    pub fn keys(&self) -> String {
        self.events()
            .into_iter()
            .filter_map(|e| match e {
                Event::Key(c) => Some(c),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl BrowserSession for RecordingSession {
    fn id(&self) -> &str {
        "recording"
    }
    async fn goto(&self, _url: &str) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn wait_for(&self, _s: &str, _t: Duration) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn click(&self, _s: &str, _strategy: ClickStrategy) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn fill(&self, _s: &str, _v: &str) -> Result<(), BrowserError> {
        Ok(())
    }
    async fn element_bounds(&self, _s: &str) -> Result<Bounds, BrowserError> {
        Ok(Bounds::new(0.0, 0.0, 100.0, 100.0))
    }
    async fn mouse_move(&self, to: Point) -> Result<(), BrowserError> {
        self.events.lock().unwrap().push(Event::Move(to));
        Ok(())
    }
    async fn mouse_click(&self, at: Point) -> Result<(), BrowserError> {
        if self.fail_clicks_at.contains(&at) {
            return Err(BrowserError::Interaction("click rejected".into()));
        }
        self.events.lock().unwrap().push(Event::Click(at));
        Ok(())
    }
    async fn press_key(&self, ch: char) -> Result<(), BrowserError> {
        if self.fail_keys.contains(&ch) {
            return Err(BrowserError::Interaction("key rejected".into()));
        }
        self.events.lock().unwrap().push(Event::Key(ch));
        Ok(())
    }
    async fn screenshot_region(&self, _r: Bounds) -> Result<Vec<u8>, BrowserError> {
        self.events.lock().unwrap().push(Event::Screenshot);
        Ok(b"png".to_vec())
    }
    async fn close(&self) -> Result<(), BrowserError> {
        Ok(())
    }
    fn kill(&self) -> Result<(), BrowserError> {
        Ok(())
    }
}

/// A key centred on `(x, y)` in a 10x10 box.
pub fn key(label: &str, x: f64, y: f64) -> KeyboardKey {
    let bounds = Bounds::new(x - 5.0, y - 5.0, 10.0, 10.0);
    KeyboardKey {
        label: label.to_string(),
        normalized_bounds: Bounds::new(0.0, 0.0, 0.1, 0.1),
        absolute_bounds: bounds,
        click_position: Point::new(x, y),
        raw_mask: None,
        centroid_from_mask: false,
    }
}

pub fn layout(keys: &[(&str, f64, f64)]) -> KeyboardLayout {
    KeyboardLayout::from_keys(keys.iter().map(|(l, x, y)| key(l, *x, *y)))
}
