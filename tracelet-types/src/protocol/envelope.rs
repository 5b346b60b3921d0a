//! The envelope wire format.
//!
//! An envelope is newline delimited JSON: one header line, then an item
//! header and a payload for every item.
//!
//! ```text
//! {"event_id":"22d00b3f-d1b1-4b5d-8d20-49d138cd8a9c"}
//! {"type":"event","length":91}
//! {"event_id":"22d00b3fd1b14b5d8d2049d138cd8a9c","message":"boom",...}
//! ```
//!
//! `length` is optional when reading. Without it the payload runs to the
//! next newline.

use std::io::Write;
use std::time::SystemTime;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::v1::{Event, Transaction};
use crate::utils::rfc3339_opt;

/// Why a byte buffer could not be read as an [`Envelope`].
#[derive(Debug, Error)]
pub enum EnvelopeError {
    /// An item header or payload is cut short.
    #[error("unexpected end of file")]
    UnexpectedEof,
    /// The input is empty.
    #[error("missing envelope header")]
    MissingHeader,
    /// A header or payload is followed by something other than `\n`.
    #[error("missing newline after header or payload")]
    MissingNewline,
    /// The first line is not an envelope header.
    #[error("invalid envelope header")]
    InvalidHeader(#[source] serde_json::Error),
    /// An item header is malformed or names an unknown item type.
    #[error("invalid item header")]
    InvalidItemHeader(#[source] serde_json::Error),
    /// An item payload does not match its declared type.
    #[error("invalid item payload")]
    InvalidItemPayload(#[source] serde_json::Error),
}

#[derive(Serialize, Deserialize)]
struct Header {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    event_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "rfc3339_opt")]
    sent_at: Option<SystemTime>,
}

#[derive(Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
enum ItemKind {
    Event,
    Transaction,
}

#[derive(Serialize, Deserialize)]
struct ItemHeader {
    #[serde(rename = "type")]
    kind: ItemKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    length: Option<usize>,
}

/// One payload inside an [`Envelope`].
#[derive(Clone, Debug, PartialEq)]
#[non_exhaustive]
#[allow(clippy::large_enum_variant)]
pub enum EnvelopeItem {
    /// An error or message event.
    Event(Event),
    /// A finished transaction with its spans.
    Transaction(Transaction),
}

impl EnvelopeItem {
    /// The `type` written into the item header.
    pub fn item_type(&self) -> &'static str {
        match self.kind() {
            ItemKind::Event => "event",
            ItemKind::Transaction => "transaction",
        }
    }

    fn kind(&self) -> ItemKind {
        match self {
            EnvelopeItem::Event(_) => ItemKind::Event,
            EnvelopeItem::Transaction(_) => ItemKind::Transaction,
        }
    }

    fn event_id(&self) -> Uuid {
        match self {
            EnvelopeItem::Event(event) => event.event_id,
            EnvelopeItem::Transaction(transaction) => transaction.event_id,
        }
    }

    fn to_json(&self) -> serde_json::Result<Vec<u8>> {
        match self {
            EnvelopeItem::Event(event) => serde_json::to_vec(event),
            EnvelopeItem::Transaction(transaction) => serde_json::to_vec(transaction),
        }
    }

    fn from_json(kind: ItemKind, payload: &[u8]) -> serde_json::Result<EnvelopeItem> {
        match kind {
            ItemKind::Event => serde_json::from_slice(payload).map(EnvelopeItem::Event),
            ItemKind::Transaction => serde_json::from_slice(payload).map(EnvelopeItem::Transaction),
        }
    }
}

impl From<Event> for EnvelopeItem {
    fn from(event: Event) -> Self {
        EnvelopeItem::Event(event)
    }
}

impl From<Transaction> for EnvelopeItem {
    fn from(transaction: Transaction) -> Self {
        EnvelopeItem::Transaction(transaction)
    }
}

/// Cursor over a serialized envelope. `pos` never exceeds `data.len()`.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8]) -> Self {
        Reader { data, pos: 0 }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.data.len()
    }

    fn rest(&self) -> &'a [u8] {
        self.data.get(self.pos..).unwrap_or_default()
    }

    /// Reads one JSON value and its line terminator. `None` at end of input.
    fn json_line<T: DeserializeOwned>(
        &mut self,
        invalid: fn(serde_json::Error) -> EnvelopeError,
    ) -> Result<Option<T>, EnvelopeError> {
        let mut stream = serde_json::Deserializer::from_slice(self.rest()).into_iter();
        let value = match stream.next() {
            Some(value) => value.map_err(invalid)?,
            None => return Ok(None),
        };
        self.skip_newline(self.pos + stream.byte_offset())?;
        Ok(Some(value))
    }

    fn payload(&mut self, length: Option<usize>) -> Result<&'a [u8], EnvelopeError> {
        let start = self.pos;
        let end = match length {
            Some(len) => start
                .checked_add(len)
                .filter(|&end| end <= self.data.len())
                .ok_or(EnvelopeError::UnexpectedEof)?,
            None => {
                let rest = self.rest();
                start + rest.iter().position(|&b| b == b'\n').unwrap_or(rest.len())
            }
        };
        let payload = self
            .data
            .get(start..end)
            .ok_or(EnvelopeError::UnexpectedEof)?;
        self.skip_newline(end)?;
        Ok(payload)
    }

    // The final line may omit its newline.
    fn skip_newline(&mut self, at: usize) -> Result<(), EnvelopeError> {
        match self.data.get(at) {
            Some(&b'\n') => self.pos = at + 1,
            Some(_) => return Err(EnvelopeError::MissingNewline),
            None => self.pos = self.data.len(),
        }
        Ok(())
    }
}

/// A batch of items delivered in one request.
///
/// The client fills envelopes from its batcher, the transport serializes
/// them with [`Envelope::to_vec`] and the offline queue stores exactly those
/// bytes. The id of the first item becomes the envelope id.
#[derive(Clone, Default, Debug, PartialEq)]
pub struct Envelope {
    event_id: Option<Uuid>,
    sent_at: Option<SystemTime>,
    items: Vec<EnvelopeItem>,
}

impl Envelope {
    /// An envelope without items.
    pub fn new() -> Envelope {
        Envelope::default()
    }

    /// Appends an item.
    pub fn add_item<I: Into<EnvelopeItem>>(&mut self, item: I) {
        let item = item.into();
        self.event_id.get_or_insert_with(|| item.event_id());
        self.items.push(item);
    }

    /// The items in insertion order.
    pub fn items(&self) -> std::slice::Iter<'_, EnvelopeItem> {
        self.items.iter()
    }

    /// Number of items.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// `true` without items.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// The envelope id, taken from the first item.
    pub fn uuid(&self) -> Option<&Uuid> {
        self.event_id.as_ref()
    }

    /// Records when the envelope went out, rendered into the header.
    pub fn set_sent_at(&mut self, sent_at: SystemTime) {
        self.sent_at = Some(sent_at);
    }

    /// See [`Envelope::set_sent_at`].
    pub fn sent_at(&self) -> Option<SystemTime> {
        self.sent_at
    }

    /// The first event item.
    pub fn event(&self) -> Option<&Event> {
        self.items.iter().find_map(|item| match item {
            EnvelopeItem::Event(event) => Some(event),
            EnvelopeItem::Transaction(_) => None,
        })
    }

    /// The first transaction item.
    pub fn transaction(&self) -> Option<&Transaction> {
        self.items.iter().find_map(|item| match item {
            EnvelopeItem::Transaction(transaction) => Some(transaction),
            EnvelopeItem::Event(_) => None,
        })
    }

    /// Keeps the items matching `keep`. `None` when nothing is left.
    ///
    /// The envelope id is re-derived from the first remaining item.
    pub fn filter<P>(self, keep: P) -> Option<Envelope>
    where
        P: FnMut(&EnvelopeItem) -> bool,
    {
        let mut filtered = Envelope {
            sent_at: self.sent_at,
            ..Envelope::default()
        };
        self.items
            .into_iter()
            .filter(keep)
            .for_each(|item| filtered.add_item(item));
        (!filtered.is_empty()).then_some(filtered)
    }

    /// Writes the wire form, every item with an explicit `length`.
    pub fn to_writer<W: Write>(&self, mut writer: W) -> std::io::Result<()> {
        let header = Header {
            event_id: self.event_id,
            sent_at: self.sent_at,
        };
        serde_json::to_writer(&mut writer, &header)?;
        writer.write_all(b"\n")?;

        for item in &self.items {
            let payload = item.to_json()?;
            let header = ItemHeader {
                kind: item.kind(),
                length: Some(payload.len()),
            };
            serde_json::to_writer(&mut writer, &header)?;
            writer.write_all(b"\n")?;
            writer.write_all(&payload)?;
            writer.write_all(b"\n")?;
        }
        Ok(())
    }

    /// The wire form as a byte vector.
    pub fn to_vec(&self) -> std::io::Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.to_writer(&mut buf)?;
        Ok(buf)
    }

    /// Reads the wire form.
    pub fn from_slice(bytes: &[u8]) -> Result<Envelope, EnvelopeError> {
        let mut reader = Reader::new(bytes);
        let header: Header = reader
            .json_line(EnvelopeError::InvalidHeader)?
            .ok_or(EnvelopeError::MissingHeader)?;

        let mut envelope = Envelope {
            event_id: header.event_id,
            sent_at: header.sent_at,
            items: Vec::new(),
        };
        while !reader.at_end() {
            let item_header: ItemHeader = reader
                .json_line(EnvelopeError::InvalidItemHeader)?
                .ok_or(EnvelopeError::UnexpectedEof)?;
            let payload = reader.payload(item_header.length)?;
            let item = EnvelopeItem::from_json(item_header.kind, payload)
                .map_err(EnvelopeError::InvalidItemPayload)?;
            envelope.add_item(item);
        }
        Ok(envelope)
    }
}

impl<T: Into<EnvelopeItem>> From<T> for Envelope {
    fn from(item: T) -> Self {
        let mut envelope = Envelope::new();
        envelope.add_item(item);
        envelope
    }
}
