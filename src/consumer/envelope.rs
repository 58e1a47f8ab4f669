use lapin::{
    message::Delivery,
    types::{AMQPValue, FieldTable, ShortString},
    BasicProperties,
};

pub const REQUEST_ID_HEADER: &str = "request_id";
pub const RETRY_COUNT_HEADER: &str = "x-retries";

/// Typed view of the headers this pipeline reads and writes
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EnvelopeHeaders {
    pub request_id: Option<String>,
    pub retry_count: u32,
}

impl EnvelopeHeaders {
    /// Parse the AMQP header table. Missing, negative or non-numeric retry
    /// counts read as 0; an empty request id reads as absent.
    pub fn from_field_table(table: Option<&FieldTable>) -> Self {
        let Some(table) = table else {
            return Self::default();
        };
        let headers = table.inner();

        let request_id = headers
            .get(&ShortString::from(REQUEST_ID_HEADER))
            .and_then(text_value)
            .filter(|id| !id.is_empty());

        let retry_count = headers
            .get(&ShortString::from(RETRY_COUNT_HEADER))
            .and_then(count_value)
            .unwrap_or(0);

        Self {
            request_id,
            retry_count,
        }
    }

    pub fn to_field_table(&self) -> FieldTable {
        let mut table = FieldTable::default();
        if let Some(request_id) = &self.request_id {
            table.insert(
                REQUEST_ID_HEADER.into(),
                AMQPValue::LongString(request_id.clone().into()),
            );
        }
        table.insert(
            RETRY_COUNT_HEADER.into(),
            AMQPValue::LongLongInt(i64::from(self.retry_count)),
        );
        table
    }
}

fn text_value(value: &AMQPValue) -> Option<String> {
    match value {
        AMQPValue::LongString(s) => Some(String::from_utf8_lossy(s.as_bytes()).into_owned()),
        AMQPValue::ShortString(s) => Some(s.as_str().to_string()),
        _ => None,
    }
}

fn count_value(value: &AMQPValue) -> Option<u32> {
    let count: i64 = match value {
        AMQPValue::ShortShortInt(v) => i64::from(*v),
        AMQPValue::ShortShortUInt(v) => i64::from(*v),
        AMQPValue::ShortInt(v) => i64::from(*v),
        AMQPValue::ShortUInt(v) => i64::from(*v),
        AMQPValue::LongInt(v) => i64::from(*v),
        AMQPValue::LongUInt(v) => i64::from(*v),
        AMQPValue::LongLongInt(v) => *v,
        AMQPValue::LongString(s) => String::from_utf8_lossy(s.as_bytes()).trim().parse().ok()?,
        _ => return None,
    };
    u32::try_from(count).ok()
}

/// One broker message: immutable body plus typed headers
///
/// Retries never modify an envelope; they derive a new one with
/// [`MessageEnvelope::next_retry`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageEnvelope {
    payload: Vec<u8>,
    headers: EnvelopeHeaders,
}

impl MessageEnvelope {
    pub fn new(payload: impl Into<Vec<u8>>, headers: EnvelopeHeaders) -> Self {
        Self {
            payload: payload.into(),
            headers,
        }
    }

    pub fn from_delivery(delivery: &Delivery) -> Self {
        Self::new(
            delivery.data.clone(),
            EnvelopeHeaders::from_field_table(delivery.properties.headers().as_ref()),
        )
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn headers(&self) -> &EnvelopeHeaders {
        &self.headers
    }

    pub fn request_id(&self) -> Option<&str> {
        self.headers.request_id.as_deref()
    }

    pub fn retry_count(&self) -> u32 {
        self.headers.retry_count
    }

    /// Same body and retry count, stamped with `request_id`
    pub fn with_request_id(&self, request_id: &str) -> Self {
        Self::new(
            self.payload.clone(),
            EnvelopeHeaders {
                request_id: Some(request_id.to_string()),
                retry_count: self.headers.retry_count,
            },
        )
    }

    /// Envelope for the next retry cycle: retry count + 1
    pub fn next_retry(&self, request_id: &str) -> Self {
        Self::new(
            self.payload.clone(),
            EnvelopeHeaders {
                request_id: Some(request_id.to_string()),
                retry_count: self.headers.retry_count.saturating_add(1),
            },
        )
    }

    /// Persistent JSON properties carrying this envelope's headers
    pub fn properties(&self) -> BasicProperties {
        BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2) // persistent
            .with_headers(self.headers.to_field_table())
    }
}
