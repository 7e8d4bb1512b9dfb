//! Test capture mode for deterministic logging assertions
//!
//! Installs a layer that records every event in memory so tests can check
//! that a run logged exactly one outcome per unit.

use folio_core_types::schema::{FIELD_COMPONENT, FIELD_EVENT, FIELD_OP, FIELD_OUTCOME, FIELD_UNIT};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock};
use tracing::field::Visit;
use tracing::{Level, Subscriber};
use tracing_subscriber::layer::{Context, SubscriberExt};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::Layer;

/// A captured log event with all its fields
#[derive(Clone, Debug)]
pub struct CapturedEvent {
    pub level: Level,
    pub component: Option<String>,
    pub op: Option<String>,
    pub event: Option<String>,
    pub unit: Option<String>,
    pub outcome: Option<String>,
    pub fields: HashMap<String, String>,
}

#[derive(Default)]
struct FieldVisitor {
    fields: HashMap<String, String>,
}

impl Visit for FieldVisitor {
    fn record_debug(&mut self, field: &tracing::field::Field, value: &dyn std::fmt::Debug) {
        self.fields
            .insert(field.name().to_string(), format!("{:?}", value));
    }

    fn record_str(&mut self, field: &tracing::field::Field, value: &str) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_i64(&mut self, field: &tracing::field::Field, value: i64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_u64(&mut self, field: &tracing::field::Field, value: u64) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }

    fn record_bool(&mut self, field: &tracing::field::Field, value: bool) {
        self.fields
            .insert(field.name().to_string(), value.to_string());
    }
}

/// Layer that appends every event to a shared buffer
pub struct TestCaptureLayer {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl TestCaptureLayer {
    pub fn new() -> (Self, TestCapture) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let layer = Self {
            events: events.clone(),
        };
        (layer, TestCapture { events })
    }
}

impl<S> Layer<S> for TestCaptureLayer
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    fn on_event(&self, event: &tracing::Event<'_>, _ctx: Context<'_, S>) {
        let mut visitor = FieldVisitor::default();
        event.record(&mut visitor);

        let fields = visitor.fields;
        let captured = CapturedEvent {
            level: *event.metadata().level(),
            component: fields.get(FIELD_COMPONENT).cloned(),
            op: fields.get(FIELD_OP).cloned(),
            event: fields.get(FIELD_EVENT).cloned(),
            unit: fields.get(FIELD_UNIT).cloned(),
            outcome: fields.get(FIELD_OUTCOME).cloned(),
            fields,
        };

        self.events
            .lock()
            .map(|mut events| events.push(captured))
            .ok();
    }
}

/// Handle for accessing captured events in tests
#[derive(Clone)]
pub struct TestCapture {
    events: Arc<Mutex<Vec<CapturedEvent>>>,
}

impl TestCapture {
    /// Get all captured events
    pub fn events(&self) -> Vec<CapturedEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// All events tagged with the given unit name, in emission order
    pub fn events_for_unit(&self, unit: &str) -> Vec<CapturedEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.unit.as_deref() == Some(unit))
            .collect()
    }

    /// Outcomes (`applied`, `skipped`, `failed`) logged for a unit
    pub fn outcomes_for_unit(&self, unit: &str) -> Vec<String> {
        self.events_for_unit(unit)
            .into_iter()
            .filter_map(|e| e.outcome)
            .collect()
    }

    /// Assert that an event exists with the given operation and event type
    ///
    /// # Panics
    ///
    /// Panics if the event is not found
    pub fn assert_event_exists(&self, op: &str, event: &str) {
        let events = self.events();
        let found = events
            .iter()
            .any(|e| e.op.as_deref() == Some(op) && e.event.as_deref() == Some(event));
        assert!(
            found,
            "Expected event op={} event={} not found in {} captured events",
            op,
            event,
            events.len()
        );
    }

    /// Count events matching a predicate
    pub fn count_events<F>(&self, predicate: F) -> usize
    where
        F: Fn(&CapturedEvent) -> bool,
    {
        self.events().iter().filter(|e| predicate(e)).count()
    }
}

static GLOBAL_CAPTURE: OnceLock<TestCapture> = OnceLock::new();

/// Initialize test capture mode
///
/// Returns a handle to the process-wide capture buffer. Tests share the
/// buffer, so filter on unique unit or op names rather than counting all
/// events.
///
/// # Example
///
/// ```
/// use folio_core::logging_facility::test_capture::init_test_capture;
/// use folio_core::log_op_start;
///
/// let capture = init_test_capture();
/// log_op_start!("doc_example_op");
/// capture.assert_event_exists("doc_example_op", "start");
/// ```
pub fn init_test_capture() -> TestCapture {
    GLOBAL_CAPTURE
        .get_or_init(|| {
            let (layer, capture) = TestCaptureLayer::new();
            tracing_subscriber::registry().with(layer).try_init().ok();
            capture
        })
        .clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcomes_for_unit_filters_by_name() {
        let capture = init_test_capture();
        tracing::info!(unit = "capture_unit_a", outcome = "applied");
        tracing::info!(unit = "capture_unit_b", outcome = "skipped");

        assert_eq!(capture.outcomes_for_unit("capture_unit_a"), vec!["applied"]);
        assert_eq!(capture.outcomes_for_unit("capture_unit_b"), vec!["skipped"]);
    }

    #[test]
    fn test_op_and_event_fields_are_lifted() {
        let capture = init_test_capture();
        crate::log_op_start!("capture_lifted_op");

        capture.assert_event_exists("capture_lifted_op", "start");
        let lifted = capture.count_events(|e| {
            e.op.as_deref() == Some("capture_lifted_op")
                && e.component.as_deref() == Some(module_path!())
        });
        assert_eq!(lifted, 1);
    }
}
