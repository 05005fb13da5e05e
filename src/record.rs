//! Record codecs.
//!
//! All inter-stage transport uses raw byte records ([`RawRecord`]); typing is
//! reapplied at each handler boundary through the [`Record`] trait. A codec is
//! a `(serialize, parse)` pair keyed by the record type. Parse failure is a
//! value, not an error: the executor counts it and drops the record.
//!
//! Built-in codecs:
//! - `String` / `Vec<u8>` - identity (text lines, opaque bytes)
//! - `serde_json::Value` - JSON documents, one per record
//! - [`Pb<M>`] - protobuf messages via `prost` (feature `proto`)

/// An opaque byte record as it travels between pipeline stages.
pub type RawRecord = Vec<u8>;

/// Typed view over raw records.
///
/// `binary` reflects the wire format of the stream the record travels on:
/// `false` for newline-delimited text, `true` for the framed list format.
/// Implementations may ignore it when both forms coincide.
pub trait Record: Sized + Send + 'static {
    /// Encode the value into its raw byte form.
    fn serialize(self, binary: bool) -> RawRecord;

    /// Decode a value from its raw byte form.
    ///
    /// Returns `None` on malformed input; the caller increments the
    /// parse-error counter and skips the record.
    fn parse(binary: bool, raw: RawRecord) -> Option<Self>;
}

impl Record for String {
    fn serialize(self, _binary: bool) -> RawRecord {
        self.into_bytes()
    }

    fn parse(_binary: bool, raw: RawRecord) -> Option<Self> {
        String::from_utf8(raw).ok()
    }
}

impl Record for Vec<u8> {
    fn serialize(self, _binary: bool) -> RawRecord {
        self
    }

    fn parse(_binary: bool, raw: RawRecord) -> Option<Self> {
        Some(raw)
    }
}

impl Record for serde_json::Value {
    fn serialize(self, _binary: bool) -> RawRecord {
        // Serializing an in-memory JSON value cannot fail.
        serde_json::to_vec(&self).expect("serialize json value")
    }

    fn parse(_binary: bool, raw: RawRecord) -> Option<Self> {
        serde_json::from_slice(&raw).ok()
    }
}

/// Protobuf record codec.
///
/// Wraps any `prost::Message` so it can ride the pipeline. The encoding is
/// the protobuf wire format in both modes, so the framed list format is the
/// natural carrier; message schemas themselves are opaque to the engine.
#[cfg(feature = "proto")]
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Pb<M>(pub M);

#[cfg(feature = "proto")]
impl<M: prost::Message + Default + 'static> Record for Pb<M> {
    fn serialize(self, _binary: bool) -> RawRecord {
        self.0.encode_to_vec()
    }

    fn parse(_binary: bool, raw: RawRecord) -> Option<Self> {
        M::decode(raw.as_slice()).ok().map(Pb)
    }
}
