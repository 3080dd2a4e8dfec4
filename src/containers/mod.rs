//! Typed columns, encodings and data frames
//!
//! The column store keeps each column as a reference-counted typed sequence;
//! data frames bundle role-tagged columns and maintain hash indices over the
//! join keys. Frames are mutable during staging and frozen before feature
//! generation.

mod column;
mod data_frame;
mod encoding;
mod index;
mod schema;

pub use column::{Column, FloatColumn, IntColumn, StringColumn, NULL_INT};
pub use data_frame::{DataFrame, Match};
pub use encoding::{Encoding, TRIMMED};
pub use index::Index;
pub use schema::Schema;
