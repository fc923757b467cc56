//! Event type resolution.
//!
//! The [`EventRegistry`] maps type names to constructors. Resolving a wire
//! type tries the type itself and then each shorter dot-separated prefix,
//! ending with the empty string:
//!
//! ```text
//!   "test2.foo.bar" -> "test2.foo.bar", "test2.foo", "test2", ""
//! ```
//!
//! The first registered name wins. When none is registered the event becomes
//! an [`UnknownEvent`] carrying the original type.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use super::{Event, EventData, GenericEvent, UnknownEvent};
use crate::error::{PipelineError, PipelineResult};
use crate::settings::Settings;

/// Constructor of a registered event variant.
pub type EventConstructor =
    Arc<dyn Fn(&Settings, EventData) -> PipelineResult<Arc<dyn Event>> + Send + Sync>;

/// Name -> event constructor table, built once at startup.
#[derive(Clone, Default)]
pub struct EventRegistry {
    constructors: HashMap<String, EventConstructor>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a constructor for `name`, replacing any previous entry.
    pub fn register<F>(mut self, name: impl Into<String>, constructor: F) -> Self
    where
        F: Fn(&Settings, EventData) -> PipelineResult<Arc<dyn Event>> + Send + Sync + 'static,
    {
        self.constructors.insert(name.into(), Arc::new(constructor));
        self
    }

    /// Registers `name` as a [`GenericEvent`].
    pub fn register_generic(self, name: impl Into<String>) -> Self {
        let name = name.into();
        let variant = name.clone();
        self.register(name, move |_settings: &Settings, data: EventData| {
            Ok(Arc::new(GenericEvent::new(variant.clone(), data)) as Arc<dyn Event>)
        })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.constructors.contains_key(name)
    }

    /// Finds the longest registered dot-prefix of `event_type`.
    pub fn resolve(&self, event_type: &str) -> Option<(&str, &EventConstructor)> {
        let mut candidate = event_type;
        loop {
            if let Some((name, constructor)) = self.constructors.get_key_value(candidate) {
                return Some((name.as_str(), constructor));
            }
            if candidate.is_empty() {
                return None;
            }
            candidate = candidate.rsplit_once('.').map_or("", |(prefix, _)| prefix);
        }
    }
}

impl fmt::Debug for EventRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&String> = self.constructors.keys().collect();
        names.sort();
        f.debug_struct("EventRegistry").field("names", &names).finish()
    }
}

/// Builds typed events from wire input.
///
/// # Example
///
/// ```
/// use testpipeline::event::{EventFactory, EventRegistry};
/// use testpipeline::settings::Settings;
///
/// let factory = EventFactory::new(EventRegistry::new().register_generic("koji.build"));
/// let settings = Settings::default();
///
/// let event = factory.make(&settings, r#"{"type": "koji.build.tag", "tag": "f40"}"#)?;
/// assert_eq!(event.variant(), "koji.build");
/// assert_eq!(event.event_type(), "koji.build.tag");
///
/// let other = factory.make(&settings, r#"{"type": "compose"}"#)?;
/// assert_eq!(other.variant(), "unknown");
/// # Ok::<(), testpipeline::error::PipelineError>(())
/// ```
#[derive(Debug, Clone, Default)]
pub struct EventFactory {
    registry: EventRegistry,
}

impl EventFactory {
    pub fn new(registry: EventRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &EventRegistry {
        &self.registry
    }

    /// Parses a JSON wire event and resolves its variant.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::MalformedEvent`] when `wire` is not a JSON
    /// object with a string `type`, or whatever the variant constructor
    /// returns.
    pub fn make(&self, settings: &Settings, wire: &str) -> PipelineResult<Arc<dyn Event>> {
        let value: Value = serde_json::from_str(wire)
            .map_err(|e| PipelineError::MalformedEvent(e.to_string()))?;
        self.make_value(settings, value)
    }

    /// Like [`make`](Self::make) for an already parsed value.
    ///
    /// # Errors
    ///
    /// See [`make`](Self::make).
    pub fn make_value(&self, settings: &Settings, value: Value) -> PipelineResult<Arc<dyn Event>> {
        let Value::Object(mut attributes) = value else {
            return Err(PipelineError::MalformedEvent(
                "event must be a JSON object".to_string(),
            ));
        };
        let event_type = match attributes.remove("type") {
            Some(Value::String(event_type)) => event_type,
            Some(other) => {
                return Err(PipelineError::MalformedEvent(format!(
                    "event type must be a string, got {}",
                    other
                )));
            }
            None => {
                return Err(PipelineError::MalformedEvent(
                    "event has no type".to_string(),
                ));
            }
        };
        let data = EventData::with_attributes(event_type, attributes);

        match self.registry.resolve(data.event_type()) {
            Some((name, constructor)) => {
                debug!("Event type {:?} resolved to {:?}", data.event_type(), name);
                (**constructor)(settings, data)
            }
            None => {
                debug!("Event type {:?} is not registered", data.event_type());
                Ok(Arc::new(UnknownEvent::new(data)))
            }
        }
    }
}
