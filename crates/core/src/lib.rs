//! `firewatch-core` — data model shared by every pipeline stage.
//!
//! This crate contains **pure** values (no IO beyond reading a zone layout file).

pub mod error;
pub mod event;
pub mod id;
pub mod inference;
pub mod trace;
pub mod zones;

pub use error::{DecodeError, DecodeResult};
pub use event::FireEvent;
pub use id::TraceId;
pub use inference::InferenceResult;
pub use trace::{now_nanos, stage, Trace};
pub use zones::{Coordinate, ZoneCoordinateMap};
