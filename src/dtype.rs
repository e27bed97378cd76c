//! Data types for variables.
//!
//! A variable's data type is either a **scalar type** drawn from a fixed set
//! or a **structured type**: an ordered sequence of named scalar fields.
//! The permitted set is small and closed, so it is represented as a tagged
//! union of concrete variants rather than a runtime registry.
//!
//! Scalar types map to Zarr v2 dtype codes (little-endian for multi-byte
//! types, endian-less for single-byte types), e.g. `int32` ⇔ `"<i4"` and
//! `bool` ⇔ `"|b1"`. A structured type maps to a list of
//! `[field_name, code]` pairs.

use base64::Engine;
use serde_json::Value;

use crate::error::{Error, Result};

/// An index into an array domain.
pub type Index = u64;

/// A scalar element type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScalarType {
    /// `bool` ⇔ `|b1`
    Bool,
    /// `int8` ⇔ `|i1`
    Int8,
    /// `int16` ⇔ `<i2`
    Int16,
    /// `int32` ⇔ `<i4`
    Int32,
    /// `int64` ⇔ `<i8`
    Int64,
    /// `uint8` ⇔ `|u1`
    UInt8,
    /// `uint16` ⇔ `<u2`
    UInt16,
    /// `uint32` ⇔ `<u4`
    UInt32,
    /// `uint64` ⇔ `<u8`
    UInt64,
    /// `float16` ⇔ `<f2`
    Float16,
    /// `float32` ⇔ `<f4`
    Float32,
    /// `float64` ⇔ `<f8`
    Float64,
    /// `complex64` ⇔ `<c8`
    Complex64,
    /// `complex128` ⇔ `<c16`
    Complex128,
}

impl ScalarType {
    /// All permitted scalar types.
    pub const ALL: [ScalarType; 14] = [
        Self::Bool,
        Self::Int8,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::UInt8,
        Self::UInt16,
        Self::UInt32,
        Self::UInt64,
        Self::Float16,
        Self::Float32,
        Self::Float64,
        Self::Complex64,
        Self::Complex128,
    ];

    /// The schema name, e.g. `"float32"`.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Int8 => "int8",
            Self::Int16 => "int16",
            Self::Int32 => "int32",
            Self::Int64 => "int64",
            Self::UInt8 => "uint8",
            Self::UInt16 => "uint16",
            Self::UInt32 => "uint32",
            Self::UInt64 => "uint64",
            Self::Float16 => "float16",
            Self::Float32 => "float32",
            Self::Float64 => "float64",
            Self::Complex64 => "complex64",
            Self::Complex128 => "complex128",
        }
    }

    /// The Zarr v2 dtype code, e.g. `"<f4"`.
    #[must_use]
    pub const fn zarr_code(&self) -> &'static str {
        match self {
            Self::Bool => "|b1",
            Self::Int8 => "|i1",
            Self::Int16 => "<i2",
            Self::Int32 => "<i4",
            Self::Int64 => "<i8",
            Self::UInt8 => "|u1",
            Self::UInt16 => "<u2",
            Self::UInt32 => "<u4",
            Self::UInt64 => "<u8",
            Self::Float16 => "<f2",
            Self::Float32 => "<f4",
            Self::Float64 => "<f8",
            Self::Complex64 => "<c8",
            Self::Complex128 => "<c16",
        }
    }

    /// The element width in bytes.
    #[must_use]
    pub const fn size(&self) -> usize {
        match self {
            Self::Bool | Self::Int8 | Self::UInt8 => 1,
            Self::Int16 | Self::UInt16 | Self::Float16 => 2,
            Self::Int32 | Self::UInt32 | Self::Float32 => 4,
            Self::Int64 | Self::UInt64 | Self::Float64 | Self::Complex64 => 8,
            Self::Complex128 => 16,
        }
    }

    /// Parse a schema name.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDtype`] for any name outside the
    /// permitted set.
    pub fn from_name(name: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|dtype| dtype.name() == name)
            .ok_or_else(|| Error::UnsupportedDtype(name.to_string()))
    }

    /// Parse a Zarr v2 dtype code. Single-byte codes are accepted with
    /// either the `|` or `<` byte-order marker.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDtype`] for codes outside the permitted
    /// set (including any big-endian code).
    pub fn from_zarr_code(code: &str) -> Result<Self> {
        let canonical = match code {
            "<b1" => "|b1",
            "<i1" => "|i1",
            "<u1" => "|u1",
            other => other,
        };
        Self::ALL
            .into_iter()
            .find(|dtype| dtype.zarr_code() == canonical)
            .ok_or_else(|| Error::UnsupportedDtype(code.to_string()))
    }

    /// The fill value for a new array of this type: `null` for integer and
    /// boolean scalars, NaN for floats, base64 zero bytes for complex.
    #[must_use]
    pub fn default_fill_value(&self) -> FillValue {
        match self {
            Self::Float16 | Self::Float32 | Self::Float64 => FillValue::NaN,
            Self::Complex64 | Self::Complex128 => {
                FillValue::Base64(encode_zero_bytes(self.size()))
            }
            _ => FillValue::Null,
        }
    }
}

impl std::fmt::Display for ScalarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A named field of a structured data type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StructuredField {
    /// The field name, unique within the structured type.
    pub name: String,
    /// The field's scalar type. Nesting is not permitted.
    pub dtype: ScalarType,
}

/// A variable data type: a scalar, or an ordered sequence of named scalar
/// fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataType {
    /// A single scalar element type.
    Scalar(ScalarType),
    /// A record of named scalar fields.
    Structured(Vec<StructuredField>),
}

impl DataType {
    /// The element width in bytes; for structured types, the record width.
    #[must_use]
    pub fn size(&self) -> usize {
        match self {
            Self::Scalar(scalar) => scalar.size(),
            Self::Structured(fields) => fields.iter().map(|field| field.dtype.size()).sum(),
        }
    }

    /// The structured fields, or [`None`] for a scalar type.
    #[must_use]
    pub fn fields(&self) -> Option<&[StructuredField]> {
        match self {
            Self::Scalar(_) => None,
            Self::Structured(fields) => Some(fields),
        }
    }

    /// The index and byte offset of a named field.
    #[must_use]
    pub fn field_offset(&self, name: &str) -> Option<(usize, usize)> {
        let fields = self.fields()?;
        let mut offset = 0;
        for (index, field) in fields.iter().enumerate() {
            if field.name == name {
                return Some((index, offset));
            }
            offset += field.dtype.size();
        }
        None
    }

    /// The fill value for a new array: scalar rules for scalars, base64
    /// zero bytes of the record width for structured types.
    #[must_use]
    pub fn default_fill_value(&self) -> FillValue {
        match self {
            Self::Scalar(scalar) => scalar.default_fill_value(),
            Self::Structured(_) => FillValue::Base64(encode_zero_bytes(self.size())),
        }
    }

    /// The Zarr v2 dtype document: a code string, or a list of
    /// `[name, code]` pairs.
    #[must_use]
    pub fn to_zarr_json(&self) -> Value {
        match self {
            Self::Scalar(scalar) => Value::String(scalar.zarr_code().to_string()),
            Self::Structured(fields) => Value::Array(
                fields
                    .iter()
                    .map(|field| {
                        Value::Array(vec![
                            Value::String(field.name.clone()),
                            Value::String(field.dtype.zarr_code().to_string()),
                        ])
                    })
                    .collect(),
            ),
        }
    }

    /// Parse a Zarr v2 dtype document.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDtype`] if the document is neither a
    /// permitted code string nor a list of `[name, code]` pairs with unique
    /// names.
    pub fn from_zarr_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(code) => Ok(Self::Scalar(ScalarType::from_zarr_code(code)?)),
            Value::Array(entries) => {
                let mut fields = Vec::with_capacity(entries.len());
                for entry in entries {
                    let pair = entry
                        .as_array()
                        .filter(|pair| pair.len() == 2)
                        .ok_or_else(|| Error::UnsupportedDtype(value.to_string()))?;
                    let name = pair[0]
                        .as_str()
                        .ok_or_else(|| Error::UnsupportedDtype(value.to_string()))?;
                    let code = pair[1]
                        .as_str()
                        .ok_or_else(|| Error::UnsupportedDtype(value.to_string()))?;
                    fields.push(StructuredField {
                        name: name.to_string(),
                        dtype: ScalarType::from_zarr_code(code)?,
                    });
                }
                Self::structured(fields)
            }
            _ => Err(Error::UnsupportedDtype(value.to_string())),
        }
    }

    /// Parse a dataset-schema `dataType` document: a scalar name string, or
    /// `{"fields": [{"name", "format"}, …]}`.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDtype`] for malformed documents or types
    /// outside the permitted set.
    pub fn from_schema_json(value: &Value) -> Result<Self> {
        match value {
            Value::String(name) => Ok(Self::Scalar(ScalarType::from_name(name)?)),
            Value::Object(object) => {
                let entries = object
                    .get("fields")
                    .and_then(Value::as_array)
                    .ok_or_else(|| Error::UnsupportedDtype(value.to_string()))?;
                let mut fields = Vec::with_capacity(entries.len());
                for entry in entries {
                    let name = entry
                        .get("name")
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::UnsupportedDtype(entry.to_string()))?;
                    let format = entry
                        .get("format")
                        .and_then(Value::as_str)
                        .ok_or_else(|| Error::UnsupportedDtype(entry.to_string()))?;
                    fields.push(StructuredField {
                        name: name.to_string(),
                        dtype: ScalarType::from_name(format)?,
                    });
                }
                Self::structured(fields)
            }
            _ => Err(Error::UnsupportedDtype(value.to_string())),
        }
    }

    fn structured(fields: Vec<StructuredField>) -> Result<Self> {
        if fields.is_empty() {
            return Err(Error::UnsupportedDtype(
                "structured dtype with no fields".to_string(),
            ));
        }
        for (index, field) in fields.iter().enumerate() {
            if fields[..index].iter().any(|other| other.name == field.name) {
                return Err(Error::UnsupportedDtype(format!(
                    "duplicate field name {}",
                    field.name
                )));
            }
        }
        Ok(Self::Structured(fields))
    }
}

impl std::fmt::Display for DataType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Scalar(scalar) => scalar.fmt(f),
            Self::Structured(fields) => {
                f.write_str("{")?;
                for (index, field) in fields.iter().enumerate() {
                    if index > 0 {
                        f.write_str(", ")?;
                    }
                    write!(f, "{}: {}", field.name, field.dtype)?;
                }
                f.write_str("}")
            }
        }
    }
}

/// A `.zarray` fill value.
///
/// Serialised as `null` for [`FillValue::Null`], the string `"NaN"` for
/// [`FillValue::NaN`] (the Zarr v2 convention for non-finite floats), a
/// base64 string for raw byte patterns, and plain JSON values otherwise.
#[derive(Debug, Clone, PartialEq)]
pub enum FillValue {
    /// No fill value recorded; uninitialised regions read as zero.
    Null,
    /// IEEE 754 NaN (float arrays).
    NaN,
    /// A base64-encoded byte pattern of exactly the element width.
    Base64(String),
    /// An integer fill value.
    Int(i64),
    /// A floating-point fill value.
    Float(f64),
    /// A boolean fill value.
    Bool(bool),
}

impl FillValue {
    /// The JSON form stored in `.zarray`.
    #[must_use]
    pub fn to_json(&self) -> Value {
        match self {
            Self::Null => Value::Null,
            Self::NaN => Value::String("NaN".to_string()),
            Self::Base64(encoded) => Value::String(encoded.clone()),
            Self::Int(value) => Value::from(*value),
            Self::Float(value) => Value::from(*value),
            Self::Bool(value) => Value::from(*value),
        }
    }

    /// Parse the JSON form stored in `.zarray`.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDtype`] for JSON values that cannot be a
    /// fill value (arrays, objects).
    pub fn from_json(value: &Value) -> Result<Self> {
        match value {
            Value::Null => Ok(Self::Null),
            Value::String(text) if text == "NaN" => Ok(Self::NaN),
            Value::String(text) => Ok(Self::Base64(text.clone())),
            Value::Bool(flag) => Ok(Self::Bool(*flag)),
            Value::Number(number) => number.as_i64().map_or_else(
                || {
                    number
                        .as_f64()
                        .map(Self::Float)
                        .ok_or_else(|| Error::UnsupportedDtype(value.to_string()))
                },
                |int| Ok(Self::Int(int)),
            ),
            _ => Err(Error::UnsupportedDtype(format!(
                "unsupported fill value {value}"
            ))),
        }
    }

    /// The byte pattern of one element for the given data type.
    ///
    /// # Errors
    /// Returns [`Error::UnsupportedDtype`] when a base64 pattern does not
    /// decode to the element width.
    pub fn element_bytes(&self, dtype: &DataType) -> Result<Vec<u8>> {
        let width = dtype.size();
        let bytes = match self {
            Self::Null => vec![0u8; width],
            Self::NaN => match dtype {
                DataType::Scalar(ScalarType::Float16) => {
                    half::f16::NAN.to_le_bytes().to_vec()
                }
                DataType::Scalar(ScalarType::Float32) => f32::NAN.to_le_bytes().to_vec(),
                DataType::Scalar(ScalarType::Float64) => f64::NAN.to_le_bytes().to_vec(),
                _ => {
                    return Err(Error::UnsupportedDtype(format!(
                        "NaN fill value for non-float dtype {dtype}"
                    )))
                }
            },
            Self::Base64(encoded) => base64::engine::general_purpose::STANDARD
                .decode(encoded)
                .map_err(|err| Error::UnsupportedDtype(format!("bad base64 fill value: {err}")))?,
            Self::Int(value) => int_fill_bytes(*value, dtype)?,
            Self::Float(value) => match dtype {
                DataType::Scalar(ScalarType::Float16) => {
                    half::f16::from_f64(*value).to_le_bytes().to_vec()
                }
                DataType::Scalar(ScalarType::Float32) => {
                    (*value as f32).to_le_bytes().to_vec()
                }
                DataType::Scalar(ScalarType::Float64) => value.to_le_bytes().to_vec(),
                _ => {
                    return Err(Error::UnsupportedDtype(format!(
                        "float fill value for dtype {dtype}"
                    )))
                }
            },
            Self::Bool(flag) => vec![u8::from(*flag)],
        };
        if bytes.len() != width {
            return Err(Error::UnsupportedDtype(format!(
                "fill value width {} does not match element width {width}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}

fn int_fill_bytes(value: i64, dtype: &DataType) -> Result<Vec<u8>> {
    let DataType::Scalar(scalar) = dtype else {
        return Err(Error::UnsupportedDtype(format!(
            "integer fill value for structured dtype {dtype}"
        )));
    };
    let bytes = value.to_le_bytes();
    Ok(bytes[..scalar.size()].to_vec())
}

/// Base64 of `width` zero bytes, used for complex and structured fill
/// values.
#[must_use]
pub fn encode_zero_bytes(width: usize) -> String {
    base64::engine::general_purpose::STANDARD.encode(vec![0u8; width])
}

/// A typed array element.
///
/// Implemented for every permitted scalar type except `bool`, whose arrays
/// are accessed through `u8` (one byte per element, nonzero ⇔ true).
pub trait Element: bytemuck::Pod + PartialEq + std::fmt::Debug + Send + Sync + 'static {
    /// The scalar type this Rust type corresponds to.
    const SCALAR: ScalarType;
}

macro_rules! impl_element {
    ($rust:ty, $scalar:expr) => {
        impl Element for $rust {
            const SCALAR: ScalarType = $scalar;
        }
    };
}

impl_element!(i8, ScalarType::Int8);
impl_element!(i16, ScalarType::Int16);
impl_element!(i32, ScalarType::Int32);
impl_element!(i64, ScalarType::Int64);
impl_element!(u8, ScalarType::UInt8);
impl_element!(u16, ScalarType::UInt16);
impl_element!(u32, ScalarType::UInt32);
impl_element!(u64, ScalarType::UInt64);
impl_element!(half::f16, ScalarType::Float16);
impl_element!(f32, ScalarType::Float32);
impl_element!(f64, ScalarType::Float64);
impl_element!(num_complex::Complex<f32>, ScalarType::Complex64);
impl_element!(num_complex::Complex<f64>, ScalarType::Complex128);

/// A byte buffer with 8-byte alignment, sufficient for every permitted
/// element type, so typed views never fail on alignment.
#[derive(Debug, Clone)]
pub struct AlignedBytes {
    words: Vec<u64>,
    len: usize,
}

impl AlignedBytes {
    pub(crate) fn zeroed(len: usize) -> Self {
        Self {
            words: vec![0u64; len.div_ceil(8)],
            len,
        }
    }

    /// A buffer of `len` bytes filled with a repeating element pattern.
    pub(crate) fn filled(len: usize, pattern: &[u8]) -> Self {
        let mut buffer = Self::zeroed(len);
        if pattern.iter().any(|&byte| byte != 0) {
            fill_pattern(buffer.as_bytes_mut(), pattern);
        }
        buffer
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Self {
        let mut buffer = Self::zeroed(bytes.len());
        buffer.as_bytes_mut().copy_from_slice(bytes);
        buffer
    }

    /// The buffer length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True when the buffer holds no bytes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The buffer contents.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &bytemuck::cast_slice(&self.words)[..self.len]
    }

    pub(crate) fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut bytemuck::cast_slice_mut(&mut self.words)[..self.len]
    }
}

/// Fill `buffer` with repetitions of `pattern`.
pub(crate) fn fill_pattern(buffer: &mut [u8], pattern: &[u8]) {
    if pattern.is_empty() {
        return;
    }
    for chunk in buffer.chunks_mut(pattern.len()) {
        chunk.copy_from_slice(&pattern[..chunk.len()]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scalar_zarr_codes() {
        assert_eq!(ScalarType::Bool.zarr_code(), "|b1");
        assert_eq!(ScalarType::Int8.zarr_code(), "|i1");
        assert_eq!(ScalarType::UInt32.zarr_code(), "<u4");
        assert_eq!(ScalarType::Float16.zarr_code(), "<f2");
        assert_eq!(ScalarType::Complex128.zarr_code(), "<c16");
        for scalar in ScalarType::ALL {
            assert_eq!(
                ScalarType::from_zarr_code(scalar.zarr_code()).unwrap(),
                scalar
            );
            assert_eq!(ScalarType::from_name(scalar.name()).unwrap(), scalar);
        }
    }

    #[test]
    fn one_byte_codes_accept_both_markers() {
        assert_eq!(
            ScalarType::from_zarr_code("<i1").unwrap(),
            ScalarType::Int8
        );
        assert_eq!(
            ScalarType::from_zarr_code("|i1").unwrap(),
            ScalarType::Int8
        );
    }

    #[test]
    fn big_endian_rejected() {
        assert!(ScalarType::from_zarr_code(">i4").is_err());
    }

    #[test]
    fn default_fill_values() {
        assert_eq!(ScalarType::Int32.default_fill_value(), FillValue::Null);
        assert_eq!(ScalarType::Bool.default_fill_value(), FillValue::Null);
        assert_eq!(ScalarType::Float32.default_fill_value(), FillValue::NaN);
        assert_eq!(
            ScalarType::Complex64.default_fill_value(),
            FillValue::Base64(encode_zero_bytes(8))
        );
        assert_eq!(
            ScalarType::Complex128.default_fill_value(),
            FillValue::Base64(encode_zero_bytes(16))
        );
    }

    #[test]
    fn structured_record_width_and_fill() {
        let dtype = DataType::from_schema_json(&serde_json::json!({
            "fields": [
                {"name": "cdp-x", "format": "int32"},
                {"name": "cdp-y", "format": "int32"},
                {"name": "elevation", "format": "float16"},
                {"name": "some_scalar", "format": "float16"},
            ]
        }))
        .unwrap();
        assert_eq!(dtype.size(), 12);
        assert_eq!(
            dtype.default_fill_value(),
            FillValue::Base64(encode_zero_bytes(12))
        );
        assert_eq!(dtype.field_offset("elevation"), Some((2, 8)));
        assert_eq!(dtype.field_offset("missing"), None);
    }

    #[test]
    fn structured_duplicate_field_rejected() {
        let result = DataType::from_schema_json(&serde_json::json!({
            "fields": [
                {"name": "x", "format": "int32"},
                {"name": "x", "format": "int16"},
            ]
        }));
        assert!(matches!(result, Err(Error::UnsupportedDtype(_))));
    }

    #[test]
    fn zarr_json_round_trip() {
        let dtype = DataType::Structured(vec![
            StructuredField {
                name: "a".to_string(),
                dtype: ScalarType::Int16,
            },
            StructuredField {
                name: "b".to_string(),
                dtype: ScalarType::Complex64,
            },
        ]);
        let json = dtype.to_zarr_json();
        assert_eq!(DataType::from_zarr_json(&json).unwrap(), dtype);
        assert_eq!(dtype.size(), 10);
    }

    #[test]
    fn nan_fill_bytes() {
        let bytes = FillValue::NaN
            .element_bytes(&DataType::Scalar(ScalarType::Float32))
            .unwrap();
        assert!(f32::from_le_bytes(bytes.try_into().unwrap()).is_nan());
    }

    #[test]
    fn fill_value_json_round_trip() {
        for fill in [
            FillValue::Null,
            FillValue::NaN,
            FillValue::Base64(encode_zero_bytes(8)),
            FillValue::Int(-3),
            FillValue::Bool(true),
        ] {
            assert_eq!(FillValue::from_json(&fill.to_json()).unwrap(), fill);
        }
    }

    #[test]
    fn aligned_bytes_pattern_fill() {
        let pattern = 7.5f32.to_le_bytes();
        let buffer = AlignedBytes::filled(12, &pattern);
        let values: &[f32] = bytemuck::cast_slice(buffer.as_bytes());
        assert_eq!(values, &[7.5, 7.5, 7.5]);
    }
}
