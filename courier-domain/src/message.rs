use std::collections::BTreeMap;
use std::fmt;

// ---------------------------------------------------------------------------
// PropertyValue
// ---------------------------------------------------------------------------

/// Scalar value stored in a message's application properties.
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Bool(bool),
    Int(i64),
    String(String),
}

// ---

impl PropertyValue {
    // ---
    pub fn as_int(&self) -> Option<i64> {
        match self {
            PropertyValue::Int(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PropertyValue::String(v) => Some(v),
            _ => None,
        }
    }
}

// ---

impl From<i64> for PropertyValue {
    fn from(v: i64) -> Self {
        PropertyValue::Int(v)
    }
}

impl From<i32> for PropertyValue {
    fn from(v: i32) -> Self {
        PropertyValue::Int(v.into())
    }
}

impl From<bool> for PropertyValue {
    fn from(v: bool) -> Self {
        PropertyValue::Bool(v)
    }
}

impl From<&str> for PropertyValue {
    fn from(v: &str) -> Self {
        PropertyValue::String(v.to_string())
    }
}

impl From<String> for PropertyValue {
    fn from(v: String) -> Self {
        PropertyValue::String(v)
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

/// The slice of an AMQP message the forwarding core looks at.
///
/// The core never interprets `body`; it is forwarded verbatim.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Message {
    // ---
    pub message_id: Option<String>,
    pub correlation_id: Option<String>,
    pub address: Option<String>,
    pub content_type: Option<String>,
    pub application_properties: BTreeMap<String, PropertyValue>,
    pub body: Vec<u8>,
}

// ---

impl Message {
    // ---
    pub fn new(body: impl Into<Vec<u8>>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_message_id(mut self, id: impl Into<String>) -> Self {
        self.message_id = Some(id.into());
        self
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = Some(address.into());
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        self.application_properties.insert(key.into(), value.into());
        self
    }

    pub fn property(&self, key: &str) -> Option<&PropertyValue> {
        self.application_properties.get(key)
    }

    /// Body as UTF-8, lossy.
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

// ---------------------------------------------------------------------------
// ErrorCondition
// ---------------------------------------------------------------------------

/// Error condition attached to a link when it is closed with an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorCondition {
    // ---
    pub condition: String,
    pub description: String,
}

// ---

impl ErrorCondition {
    // ---
    pub fn new(condition: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            condition: condition.into(),
            description: description.into(),
        }
    }

    /// Sent to a client whose messages cannot be forwarded because no
    /// downstream link exists (or the one that exists is no longer open).
    pub fn no_downstream_consumer() -> Self {
        Self::new(
            "courier:no-downstream-consumer",
            "no downstream consumer available for data",
        )
    }
}

// ---

impl fmt::Display for ErrorCondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.condition, self.description)
    }
}

// ---------------------------------------------------------------------------
// DeliveryState / Disposition
// ---------------------------------------------------------------------------

/// Terminal outcome a receiver reports for a delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryState {
    Accepted,
    Rejected(Option<ErrorCondition>),
    Released,
    Modified {
        delivery_failed: bool,
        undeliverable_here: bool,
    },
}

// ---

/// Remote outcome of one delivery as observed by the sending side.
///
/// `state` is `None` for pre-settled (at-most-once) deliveries, where the
/// peer never reports an outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    // ---
    pub state: Option<DeliveryState>,
    pub settled: bool,
}

// ---

impl Disposition {
    // ---
    pub fn accepted() -> Self {
        Self {
            state: Some(DeliveryState::Accepted),
            settled: true,
        }
    }

    pub fn released() -> Self {
        Self {
            state: Some(DeliveryState::Released),
            settled: true,
        }
    }

    pub fn presettled() -> Self {
        Self {
            state: None,
            settled: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    // ---
    use super::{Message, PropertyValue};

    #[test]
    fn builders_fill_properties() {
        // ---
        let msg = Message::new("payload")
            .with_message_id("abc")
            .with_property("status", 202)
            .with_property("device_id", "dev-1");

        assert_eq!(msg.message_id.as_deref(), Some("abc"));
        assert_eq!(msg.property("status").and_then(PropertyValue::as_int), Some(202));
        assert_eq!(msg.property("device_id").and_then(PropertyValue::as_str), Some("dev-1"));
        assert!(msg.property("missing").is_none());
        assert_eq!(msg.body_text(), "payload");
    }
}
