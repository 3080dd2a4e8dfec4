//! Declared shape of the relational data model
//!
//! A data model is a tree of [`Placeholder`] nodes: one population table at
//! the root, peripheral tables as children. The placeholder carries the join
//! keys, time stamps and windowing parameters per child; it never holds data.

pub mod macros;
mod placeholder;
mod roles;

pub use placeholder::{JoinSpec, Placeholder, Relationship};
pub use roles::{Role, Subrole};
