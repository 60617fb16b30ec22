//! Canonical text encoding of records.
//!
//! Every record becomes a JSON object holding its fields plus a `_type`
//! discriminator. Nested records are encoded in place, byte fields are hex
//! strings, and keys are always emitted in sorted order with no whitespace,
//! so equal records encode to byte-identical text. Non-ASCII characters are
//! written as `\uXXXX` escapes, the text itself is always ASCII.
//!
//! Decoding is driven by a [`TypeRegistry`] passed in by the caller: the
//! discriminator of each object selects the constructor that rebuilds it.

use std::collections::{BTreeMap, HashMap};
use std::io;

use serde::Serialize;
use serde_json::ser::Formatter;
use serde_json::{Map, Number, Value as Json};

use crate::error::{DecodingError, EncodingError};
use crate::record::AnyRecord;

/// Field holding the concrete type of an encoded record.
pub const TYPE_FIELD: &str = "_type";

/// A structured value with a canonical text form.
pub trait Record: Sized {
    /// Discriminator written into [`TYPE_FIELD`].
    const TYPE_NAME: &'static str;

    fn write_fields(&self, fields: &mut FieldWriter) -> Result<(), EncodingError>;

    fn read_fields(fields: &mut FieldReader<'_>) -> Result<Self, DecodingError>;

    fn into_any(self) -> AnyRecord;

    /// Hands the record back unchanged when it is of another type.
    fn from_any(record: AnyRecord) -> Result<Self, AnyRecord>;
}

#[derive(Debug, Default)]
pub struct FieldWriter {
    fields: BTreeMap<String, Json>,
}

impl FieldWriter {
    pub fn str(&mut self, name: &str, value: &str) {
        self.fields.insert(name.to_string(), Json::String(value.to_string()));
    }

    pub fn int(&mut self, name: &str, value: impl Into<Number>) {
        self.fields.insert(name.to_string(), Json::Number(value.into()));
    }

    pub fn number(&mut self, name: &str, value: Number) {
        self.fields.insert(name.to_string(), Json::Number(value));
    }

    /// Finite floats only, the canonical text has no NaN or infinity.
    pub fn float(&mut self, name: &str, value: f64) -> Result<(), EncodingError> {
        let number = Number::from_f64(value).ok_or_else(|| EncodingError::NonFiniteFloat {
            field: name.to_string(),
            value,
        })?;

        self.number(name, number);

        Ok(())
    }

    pub fn bytes(&mut self, name: &str, value: &[u8]) {
        self.fields.insert(name.to_string(), Json::String(hex::encode(value)));
    }

    pub fn record<T: Record>(&mut self, name: &str, value: &T) -> Result<(), EncodingError> {
        self.fields.insert(name.to_string(), to_value(value)?);

        Ok(())
    }

    pub fn optional_record<T: Record>(&mut self, name: &str, value: Option<&T>) -> Result<(), EncodingError> {
        let value = match value {
            Some(value) => to_value(value)?,
            None => Json::Null,
        };

        self.fields.insert(name.to_string(), value);

        Ok(())
    }

    pub fn records<T: Record>(&mut self, name: &str, values: &[T]) -> Result<(), EncodingError> {
        self.fields.insert(name.to_string(), to_array(values)?);

        Ok(())
    }

    /// Stores an already encoded value.
    pub fn value(&mut self, name: &str, value: Json) {
        self.fields.insert(name.to_string(), value);
    }

    fn finish(mut self, type_name: &str) -> Json {
        self.fields.insert(TYPE_FIELD.to_string(), Json::String(type_name.to_string()));

        // Built from the sorted map so the order holds even when serde_json
        // keeps insertion order.
        Json::Object(self.fields.into_iter().collect::<Map<String, Json>>())
    }
}

pub struct FieldReader<'r> {
    record: &'static str,
    fields: Map<String, Json>,
    registry: &'r TypeRegistry,
}

impl<'r> FieldReader<'r> {
    pub fn registry(&self) -> &'r TypeRegistry {
        self.registry
    }

    /// Removes a raw field value. Missing fields are an error, `null` is not.
    pub fn value(&mut self, name: &'static str) -> Result<Json, DecodingError> {
        self.fields.remove(name).ok_or(DecodingError::MissingField {
            record: self.record,
            field: name,
        })
    }

    pub fn invalid(&self, name: &'static str, reason: impl Into<String>) -> DecodingError {
        DecodingError::InvalidField {
            record: self.record,
            field: name,
            reason: reason.into(),
        }
    }

    pub fn str(&mut self, name: &'static str) -> Result<String, DecodingError> {
        match self.value(name)? {
            Json::String(value) => Ok(value),
            other => Err(self.invalid(name, format!("expected string, got {other}"))),
        }
    }

    pub fn int(&mut self, name: &'static str) -> Result<i64, DecodingError> {
        let value = self.value(name)?;

        value.as_i64()
            .ok_or_else(|| self.invalid(name, format!("expected integer, got {value}")))
    }

    pub fn uint<N: TryFrom<u64>>(&mut self, name: &'static str) -> Result<N, DecodingError> {
        let value = self.value(name)?;

        let Some(number) = value.as_u64() else {
            return Err(self.invalid(name, format!("expected unsigned integer, got {value}")));
        };

        N::try_from(number)
            .map_err(|_| self.invalid(name, format!("{number} is out of range")))
    }

    /// Any number, integral or not, in the form it was written.
    pub fn number(&mut self, name: &'static str) -> Result<Number, DecodingError> {
        match self.value(name)? {
            Json::Number(value) => Ok(value),
            other => Err(self.invalid(name, format!("expected number, got {other}"))),
        }
    }

    /// Any number, widened to a float.
    pub fn float(&mut self, name: &'static str) -> Result<f64, DecodingError> {
        let value = self.number(name)?;

        value.as_f64()
            .ok_or_else(|| self.invalid(name, format!("{value} is not representable as a float")))
    }

    /// Hex-decodes a byte field. The empty string is empty bytes.
    pub fn bytes(&mut self, name: &'static str) -> Result<Vec<u8>, DecodingError> {
        let value = self.str(name)?;

        hex::decode(&value).map_err(|err| self.invalid(name, err.to_string()))
    }

    pub fn record<T: Record>(&mut self, name: &'static str) -> Result<T, DecodingError> {
        let value = self.value(name)?;

        self.registry.decode_value_as(value)
    }

    pub fn optional_record<T: Record>(&mut self, name: &'static str) -> Result<Option<T>, DecodingError> {
        match self.value(name)? {
            Json::Null => Ok(None),
            value => self.registry.decode_value_as(value).map(Some),
        }
    }

    pub fn records<T: Record>(&mut self, name: &'static str) -> Result<Vec<T>, DecodingError> {
        match self.value(name)? {
            Json::Array(values) => values.into_iter()
                .map(|value| self.registry.decode_value_as(value))
                .collect(),

            other => Err(self.invalid(name, format!("expected list, got {other}"))),
        }
    }
}

type Constructor = fn(FieldReader<'_>) -> Result<AnyRecord, DecodingError>;

fn construct<T: Record>(mut fields: FieldReader<'_>) -> Result<AnyRecord, DecodingError> {
    T::read_fields(&mut fields).map(T::into_any)
}

/// Maps discriminator names to record constructors.
///
/// Read-only once built, so it can be shared between readers freely.
#[derive(Default, Clone)]
pub struct TypeRegistry {
    constructors: HashMap<&'static str, Constructor>,
}

impl TypeRegistry {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Record>(&mut self) -> &mut Self {
        self.constructors.insert(T::TYPE_NAME, construct::<T>);

        self
    }

    #[inline]
    pub fn with<T: Record>(mut self) -> Self {
        self.register::<T>();

        self
    }

    #[inline]
    pub fn contains(&self, type_name: &str) -> bool {
        self.constructors.contains_key(type_name)
    }

    pub fn decode_value(&self, value: Json) -> Result<AnyRecord, DecodingError> {
        let Json::Object(mut fields) = value else {
            return Err(DecodingError::NotARecord);
        };

        let Some(Json::String(tag)) = fields.remove(TYPE_FIELD) else {
            return Err(DecodingError::MissingTag);
        };

        let Some((name, constructor)) = self.constructors.get_key_value(tag.as_str()) else {
            return Err(DecodingError::UnknownType(tag));
        };

        constructor(FieldReader {
            record: *name,
            fields,
            registry: self,
        })
    }

    pub fn decode_value_as<T: Record>(&self, value: Json) -> Result<T, DecodingError> {
        T::from_any(self.decode_value(value)?)
            .map_err(|other| DecodingError::UnexpectedType {
                expected: T::TYPE_NAME,
                found: other.type_name(),
            })
    }
}

pub fn to_value<T: Record>(record: &T) -> Result<Json, EncodingError> {
    let mut fields = FieldWriter::default();

    record.write_fields(&mut fields)?;

    Ok(fields.finish(T::TYPE_NAME))
}

pub fn to_array<T: Record>(records: &[T]) -> Result<Json, EncodingError> {
    records.iter()
        .map(to_value)
        .collect::<Result<Vec<_>, _>>()
        .map(Json::Array)
}

/// Compact output with every non-ASCII character escaped as UTF-16 units.
struct AsciiFormatter;

impl Formatter for AsciiFormatter {
    fn write_string_fragment<W>(&mut self, writer: &mut W, fragment: &str) -> io::Result<()>
    where
        W: ?Sized + io::Write,
    {
        for part in fragment.split_inclusive(|c: char| !c.is_ascii()) {
            let mut chars = part.chars();

            match chars.next_back() {
                Some(last) if !last.is_ascii() => {
                    writer.write_all(chars.as_str().as_bytes())?;

                    for unit in last.encode_utf16(&mut [0; 2]) {
                        write!(writer, "\\u{unit:04x}")?;
                    }
                }

                _ => writer.write_all(part.as_bytes())?,
            }
        }

        Ok(())
    }
}

fn to_text(value: &Json) -> Result<String, EncodingError> {
    let mut text = Vec::new();

    value.serialize(&mut serde_json::Serializer::with_formatter(&mut text, AsciiFormatter))?;

    // Only ASCII bytes are ever written.
    Ok(text.into_iter().map(char::from).collect())
}

/// Canonical text of a single record.
pub fn encode<T: Record>(record: &T) -> Result<String, EncodingError> {
    to_text(&to_value(record)?)
}

/// Canonical text of an ordered sequence of records.
pub fn encode_seq<T: Record>(records: &[T]) -> Result<String, EncodingError> {
    to_text(&to_array(records)?)
}

pub fn decode(text: &str, registry: &TypeRegistry) -> Result<AnyRecord, DecodingError> {
    registry.decode_value(serde_json::from_str(text)?)
}

pub fn decode_as<T: Record>(text: &str, registry: &TypeRegistry) -> Result<T, DecodingError> {
    registry.decode_value_as(serde_json::from_str(text)?)
}

pub fn decode_seq(text: &str, registry: &TypeRegistry) -> Result<Vec<AnyRecord>, DecodingError> {
    match serde_json::from_str::<Json>(text)? {
        Json::Array(values) => values.into_iter()
            .map(|value| registry.decode_value(value))
            .collect(),

        _ => Err(DecodingError::NotARecord),
    }
}
