// Test utilities: capture tracing events emitted by blocktimer
//
// Events are collected by a `Layer` installed as the thread's default
// subscriber for the duration of a closure, so tests running in parallel
// never see each other's records.

#![allow(dead_code)]

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::field::{Field, Visit};
use tracing::{Event, Level, Subscriber};
use tracing_subscriber::layer::{Context, Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;

/// A single captured event
#[derive(Debug, Clone)]
pub struct CapturedEvent {
    pub level: Level,
    pub target: String,
    pub message: String,
    pub fields: HashMap<String, String>,
}

impl CapturedEvent {
    /// Logical logging channel of the event
    pub fn channel(&self) -> &str {
        self.field("channel").unwrap_or("")
    }

    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }
}

#[derive(Debug, Clone, Default)]
struct CaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl<S: Subscriber> Layer<S> for CaptureLayer {
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let metadata = event.metadata();
        self.events.lock().unwrap().push(CapturedEvent {
            level: *metadata.level(),
            target: metadata.target().to_string(),
            message: visitor.message,
            fields: visitor.fields,
        });
    }
}

#[derive(Default)]
struct FieldVisitor {
    message: String,
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            self.fields.insert(field.name().to_string(), value.to_string());
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        let value = format!("{:?}", value);
        if field.name() == "message" {
            self.message = value;
        } else {
            self.fields.insert(field.name().to_string(), value);
        }
    }
}

/// Run `f` with a capturing subscriber and return its events in order
pub fn capture<T>(f: impl FnOnce() -> T) -> (T, Vec<CapturedEvent>) {
    let layer = CaptureLayer::default();
    let subscriber = Registry::default().with(layer.clone());
    let output = tracing::subscriber::with_default(subscriber, f);
    let events = layer.events.lock().unwrap().clone();
    (output, events)
}

/// Messages of the captured events, in order
pub fn messages(events: &[CapturedEvent]) -> Vec<&str> {
    events.iter().map(|event| event.message.as_str()).collect()
}

/// Assert that `text` matches `pattern`
pub fn assert_matches(text: &str, pattern: &str) {
    let re = regex::Regex::new(pattern).unwrap();
    assert!(re.is_match(text), "{:?} does not match {:?}", text, pattern);
}
