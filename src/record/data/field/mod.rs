//! A single tag's key and value types.

pub mod tag;
pub mod value;

pub use self::{
    tag::Tag,
    value::{ArrayView, Element, SetValue, Subtype, Value},
};
