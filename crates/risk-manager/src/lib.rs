mod models;
mod sizer;

#[cfg(test)]
mod tests;

pub use models::{SizedOrder, SizingConfig, SizingError, VolumePolicy};
pub use sizer::OrderSizer;
