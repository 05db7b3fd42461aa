pub mod attributes;
pub mod direction;

pub use attributes::{derive_attributes, AttributeSet, Role};
pub use direction::Direction;
