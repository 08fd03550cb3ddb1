//! # Pulse Core
//!
//! Core access layer for pulse files.
//!
//! This crate provides:
//! - The path codec mapping field paths to short node names
//! - The slice engine storing time-sampled fields as keyed segments
//! - The object model for arrays of structures and its segment packing
//! - Sessions sharing open pulse files, with an optional info cache
//! - Generational handle tables for integer-handle callers
//!
//! ## Example
//!
//! ```rust
//! use pulse_codec::Value;
//! use pulse_core::{PulseAccess, PutKind, SlicePolicy, TargetRegistry};
//!
//! let registry = TargetRegistry::in_memory();
//! let session = registry.create("test", 1, 0, 0, 0).unwrap();
//!
//! session.begin_put("magnetics", PutKind::Slice { time: 0.0 }).unwrap();
//! session.put_slice("magnetics", "ip", "time", Value::Double(1.0), 0.0).unwrap();
//! session.end_put("magnetics").unwrap();
//! session.put_slice("magnetics", "ip", "time", Value::Double(3.0), 2.0).unwrap();
//!
//! let sample = session
//!     .get_slice("magnetics", "ip", "time", 1.0, SlicePolicy::Interpolation)
//!     .unwrap();
//! assert_eq!(sample.value, Value::Double(2.0));
//! session.close().unwrap();
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
mod config;
mod error;
mod handle;
mod layer;
pub mod object;
pub mod path;
pub mod reader;
mod sample;
mod segment;
pub mod session;
mod slice;
mod types;

pub use cache::{CacheLevel, CacheScope, FieldInfo, InfoCache, MemoryInfoCache};
pub use config::Config;
pub use error::{CoreError, CoreResult};
pub use handle::{Handle, HandleTable};
pub use layer::AccessLayer;
pub use object::{ObjectEngine, ObjectNode, Placement};
pub use path::{FieldPath, NodePath};
pub use reader::{FieldContent, FieldSource};
pub use sample::{bracket, interpolate, resolve, Pick, Sample, Series, SlicePolicy};
pub use segment::{ItemLayout, SegmentDescriptor, SegmentForm, KEY_SIZE};
pub use session::{
    field_node, is_shape_field, record_node, FileStoreProvider, LocalSession,
    MemoryStoreProvider, PulseAccess, StoreProvider, TargetRegistry,
};
pub use slice::{is_sliced, read_series, SliceEngine};
pub use types::{GetKind, PulseTarget, PutKind, SessionId, MAX_RUN, SHOT_LIMIT};
