//! Builders for output containers that do not map one-to-one onto a scalar path.

pub mod phones;
pub mod photos;

use super::document::Element;
use crate::record::Field;

/// A built container (absent when nothing survived) and the attributes it consumed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Block {
    pub element: Option<Element>,
    pub consumed: Vec<Field>,
}
