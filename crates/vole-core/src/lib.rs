//! # vole-core
//!
//! Core tensor primitives and distribution types for Vole.
//!
//! This crate provides:
//! - [`Tensor`] — n-dimensional array handle with zero-copy view semantics
//! - [`Shape`] / [`Layout`] — shape, strides, and memory layout
//! - [`DType`] — element data types (F16, BF16, F32, F64, U8, U32, I64)
//! - [`Backend`] trait — abstraction over compute devices and kernels
//! - [`SbpParallel`] / [`NdSbp`] — per-mesh-axis distribution signatures
//! - [`DeviceMesh`] — the fixed device set a global tensor is defined over
//! - [`GlobalTensor`] — a logical tensor sharded/replicated across a mesh

pub mod backend;
pub mod dtype;
pub mod error;
pub mod global;
pub mod layout;
pub mod mesh;
pub mod sbp;
pub mod shape;
pub mod tensor;

pub use backend::{Backend, BackendDevice, BackendStorage, BinaryOp, ReduceOp, UnaryOp};
pub use dtype::{DType, WithDType};
pub use error::{Error, ErrorKind, Result};
pub use global::{GlobalId, GlobalTensor};
pub use layout::Layout;
pub use mesh::DeviceMesh;
pub use sbp::{NdSbp, SbpParallel, SbpSignature};
pub use shape::Shape;
pub use tensor::{Tensor, TensorId};
