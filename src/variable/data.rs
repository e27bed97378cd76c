//! In-memory labeled arrays.
//!
//! A [`VariableData`] owns a reference-counted contiguous buffer covering a
//! labeled domain. Slicing is the same half-open, clamped, label-based
//! operation as on variables, minus the I/O: a may-allocate slice shares
//! the buffer and narrows the view, a must-allocate slice copies the view
//! into a tight buffer. Tight-loop code can take the flat typed slice over
//! the whole buffer plus [`VariableData::flattened_offset`] to find where
//! the (possibly sliced) view begins.

use std::sync::Arc;

use serde_json::Value;

use crate::array::{copy_region, BufferLayout, Domain, Interval};
use crate::dtype::{AlignedBytes, DataType, Element, Index, ScalarType};
use crate::error::{Error, Result};

use super::{RangeDescriptor, INERT_SLICE_LABEL, MAX_SLICE_DESCRIPTORS};

/// Whether an in-memory slice may share the backing buffer or must copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocateConstraint {
    /// Share the buffer and narrow the view.
    MayAllocate,
    /// Copy the view into a tight buffer.
    MustAllocate,
}

/// The in-memory representation of a variable's data.
///
/// Constructed by `Variable::read` (or [`VariableData::filled`]); written
/// back with `Variable::write`.
#[derive(Debug, Clone)]
pub struct VariableData {
    name: String,
    long_name: String,
    metadata: Value,
    dtype: DataType,
    /// The domain the buffer is laid out over, in C order.
    buffer_domain: Domain,
    /// The current view; always contained in `buffer_domain`.
    domain: Domain,
    buffer: Arc<AlignedBytes>,
}

impl VariableData {
    pub(crate) fn from_parts(
        name: String,
        long_name: String,
        metadata: Value,
        dtype: DataType,
        domain: Domain,
        buffer: AlignedBytes,
    ) -> Self {
        Self {
            name,
            long_name,
            metadata,
            dtype,
            buffer_domain: domain.clone(),
            domain,
            buffer: Arc::new(buffer),
        }
    }

    /// An allocated buffer covering `domain`, value-initialised to zero —
    /// and to NaN for `float32`/`float64` elements.
    #[must_use]
    pub fn filled(
        name: String,
        long_name: String,
        metadata: Value,
        dtype: DataType,
        domain: Domain,
    ) -> Self {
        let samples = domain.num_elements() as usize;
        let buffer = match &dtype {
            DataType::Scalar(ScalarType::Float32) => {
                AlignedBytes::filled(samples * 4, &f32::NAN.to_le_bytes())
            }
            DataType::Scalar(ScalarType::Float64) => {
                AlignedBytes::filled(samples * 8, &f64::NAN.to_le_bytes())
            }
            DataType::Scalar(scalar) => AlignedBytes::zeroed(samples * scalar.size()),
            // Raw structured domains already carry the byte axis.
            DataType::Structured(_) => AlignedBytes::zeroed(samples),
        };
        Self::from_parts(name, long_name, metadata, dtype, domain, buffer)
    }

    /// An allocated buffer shaped like a variable's current domain, ready
    /// to populate and write back. Writing it unmodified overwrites the
    /// covered region with the initial values.
    #[must_use]
    pub fn from_variable(variable: &super::Variable) -> Self {
        Self::filled(
            variable.name().to_string(),
            variable.long_name().to_string(),
            variable.metadata_json(),
            variable.dtype(),
            variable.dimensions().clone(),
        )
    }

    /// The variable name this buffer was read from.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The optional human-readable label; empty when absent.
    #[must_use]
    pub fn long_name(&self) -> &str {
        &self.long_name
    }

    /// The metadata document carried along from the variable.
    #[must_use]
    pub fn metadata(&self) -> &Value {
        &self.metadata
    }

    /// The element data type.
    #[must_use]
    pub fn dtype(&self) -> DataType {
        self.dtype.clone()
    }

    /// The current view's domain.
    #[must_use]
    pub fn dimensions(&self) -> &Domain {
        &self.domain
    }

    /// The number of axes.
    #[must_use]
    pub fn rank(&self) -> usize {
        self.domain.rank()
    }

    /// The total number of samples in the view.
    #[must_use]
    pub fn num_samples(&self) -> Index {
        self.domain.num_elements()
    }

    /// The half-open intervals of the view's axes.
    #[must_use]
    pub fn intervals(&self) -> Vec<Interval> {
        self.domain.intervals()
    }

    /// Bytes per sample: the scalar width, or one for raw structured
    /// buffers (whose domains carry the byte axis).
    fn sample_width(&self) -> usize {
        match &self.dtype {
            DataType::Scalar(scalar) => scalar.size(),
            DataType::Structured(_) => 1,
        }
    }

    fn check_element<T: Element>(&self) -> Result<()> {
        let matches = match &self.dtype {
            DataType::Scalar(scalar) => {
                *scalar == T::SCALAR
                    || (*scalar == ScalarType::Bool && T::SCALAR == ScalarType::UInt8)
            }
            DataType::Structured(_) => T::SCALAR == ScalarType::UInt8,
        };
        if matches {
            Ok(())
        } else {
            Err(Error::TypeMismatch {
                variable: self.name.clone(),
                actual: self.dtype.clone(),
            })
        }
    }

    /// The whole backing buffer as typed elements.
    ///
    /// The buffer covers the *buffer domain*; a sliced view starts at
    /// [`VariableData::flattened_offset`] elements in and is generally not
    /// contiguous.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] when `T` does not match the dtype
    /// (structured buffers are viewed through `u8`).
    pub fn as_slice<T: Element>(&self) -> Result<&[T]> {
        self.check_element::<T>()?;
        bytemuck::try_cast_slice(self.buffer.as_bytes())
            .map_err(|err| Error::InvalidSlice(err.to_string()))
    }

    /// The whole backing buffer as mutable typed elements; clones the
    /// buffer first if it is shared.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] when `T` does not match the dtype.
    pub fn as_mut_slice<T: Element>(&mut self) -> Result<&mut [T]> {
        self.check_element::<T>()?;
        let buffer = Arc::make_mut(&mut self.buffer);
        bytemuck::try_cast_slice_mut(buffer.as_bytes_mut())
            .map_err(|err| Error::InvalidSlice(err.to_string()))
    }

    /// The element at a multi-index given in global (domain) coordinates.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] on a dtype conflict or
    /// [`Error::InvalidSlice`] when the index is outside the view.
    pub fn get<T: Element>(&self, indices: &[Index]) -> Result<T> {
        let offset = self.sample_offset(indices)?;
        Ok(self.as_slice::<T>()?[offset])
    }

    /// Store an element at a multi-index in global (domain) coordinates.
    ///
    /// # Errors
    /// Returns [`Error::TypeMismatch`] on a dtype conflict or
    /// [`Error::InvalidSlice`] when the index is outside the view.
    pub fn set<T: Element>(&mut self, indices: &[Index], value: T) -> Result<()> {
        let offset = self.sample_offset(indices)?;
        self.as_mut_slice::<T>()?[offset] = value;
        Ok(())
    }

    fn sample_offset(&self, indices: &[Index]) -> Result<usize> {
        if indices.len() != self.domain.rank() {
            return Err(Error::InvalidSlice(format!(
                "index rank {} does not match domain rank {}",
                indices.len(),
                self.domain.rank()
            )));
        }
        for (index, dim) in indices.iter().zip(self.domain.dims()) {
            if *index < dim.origin || *index >= dim.end() {
                return Err(Error::InvalidSlice(format!(
                    "index {index} outside [{}, {}) of {}",
                    dim.origin,
                    dim.end(),
                    dim.label
                )));
            }
        }
        let shape = self.buffer_domain.shape();
        let mut offset = 0;
        let mut stride = 1;
        for axis in (0..shape.len()).rev() {
            offset += (indices[axis] - self.buffer_domain.dims()[axis].origin) * stride;
            stride *= shape[axis];
        }
        Ok(offset as usize)
    }

    /// The difference, in samples, between the buffer origin and the
    /// view's origin: add it to a flat pointer over
    /// [`VariableData::as_slice`] to land on the view's first sample.
    #[must_use]
    pub fn flattened_offset(&self) -> usize {
        let shape = self.buffer_domain.shape();
        let mut offset = 0;
        let mut stride = 1;
        for axis in (0..shape.len()).rev() {
            let delta =
                self.domain.dims()[axis].origin - self.buffer_domain.dims()[axis].origin;
            offset += delta * stride;
            stride *= shape[axis];
        }
        offset as usize
    }

    /// Slice the view along labeled axes (half-open, clamped; unknown
    /// labels ignored; no I/O).
    ///
    /// Repeated labels are not supported in memory.
    ///
    /// # Errors
    /// Returns [`Error::InvalidSlice`] under the same rules as
    /// `Variable::slice`, plus for repeated labels.
    pub fn slice(
        &self,
        descriptors: &[RangeDescriptor],
        constraint: AllocateConstraint,
    ) -> Result<Self> {
        if descriptors.is_empty() {
            return Err(Error::InvalidSlice(
                "no slice descriptors provided".to_string(),
            ));
        }
        if descriptors.len() > MAX_SLICE_DESCRIPTORS {
            return Err(Error::InvalidSlice(format!(
                "too many slice descriptors: the maximum is {MAX_SLICE_DESCRIPTORS}"
            )));
        }
        let mut domain = self.domain.clone();
        let mut seen: Vec<&str> = Vec::new();
        for descriptor in descriptors {
            if descriptor.step != 1 {
                return Err(Error::InvalidSlice(format!(
                    "slice step must be 1, got {}",
                    descriptor.step
                )));
            }
            if descriptor.start > descriptor.stop {
                return Err(Error::InvalidSlice(format!(
                    "slice descriptor for {} is invalid: start={} > stop={}",
                    descriptor.label, descriptor.start, descriptor.stop
                )));
            }
            if descriptor.label == INERT_SLICE_LABEL {
                continue;
            }
            let Some(axis) = domain.axis(&descriptor.label) else {
                continue;
            };
            if seen.contains(&descriptor.label.as_str()) {
                return Err(Error::InvalidSlice(format!(
                    "repeated label {} is not supported for in-memory slicing",
                    descriptor.label
                )));
            }
            seen.push(descriptor.label.as_str());
            let dim = &domain.dims()[axis];
            let start = descriptor.start.max(dim.origin);
            let stop = descriptor.stop.min(dim.end());
            if start > stop {
                return Err(Error::InvalidSlice(format!(
                    "slice [{}, {}) lies outside the domain of {}",
                    descriptor.start, descriptor.stop, descriptor.label
                )));
            }
            domain = domain.with_axis_range(axis, start, stop);
        }

        match constraint {
            AllocateConstraint::MayAllocate => Ok(Self {
                domain,
                ..self.clone()
            }),
            AllocateConstraint::MustAllocate => Ok(self.materialize(domain)),
        }
    }

    /// A contiguous copy of the current view, in C order.
    #[must_use]
    pub fn contiguous_bytes(&self) -> Vec<u8> {
        if self.domain == self.buffer_domain {
            return self.buffer.as_bytes().to_vec();
        }
        self.copy_view(&self.domain)
    }

    fn materialize(&self, domain: Domain) -> Self {
        let bytes = self.copy_view(&domain);
        Self {
            name: self.name.clone(),
            long_name: self.long_name.clone(),
            metadata: self.metadata.clone(),
            dtype: self.dtype.clone(),
            buffer_domain: domain.clone(),
            domain,
            buffer: Arc::new(AlignedBytes::from_bytes(&bytes)),
        }
    }

    fn copy_view(&self, view: &Domain) -> Vec<u8> {
        let width = self.sample_width();
        let src_shape = self.buffer_domain.shape();
        let src_origin = self.buffer_domain.origin();
        let dst_shape = view.shape();
        let dst_origin = view.origin();
        let mut bytes = vec![0u8; view.num_elements() as usize * width];
        copy_region(
            self.buffer.as_bytes(),
            &BufferLayout {
                shape: &src_shape,
                origin: &src_origin,
                element: width,
                record: width,
                offset_in_record: 0,
            },
            &mut bytes,
            &BufferLayout {
                shape: &dst_shape,
                origin: &dst_origin,
                element: width,
                record: width,
                offset_in_record: 0,
            },
        );
        bytes
    }
}

impl std::fmt::Display for VariableData {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "{}\t{}", self.name, self.domain)?;
        write!(f, "{}\trank {}", self.dtype, self.rank())
    }
}
