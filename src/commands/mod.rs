pub mod list;
pub mod retrieve;

pub use list::{list_attributes, list_tags};
pub use retrieve::retrieve;
