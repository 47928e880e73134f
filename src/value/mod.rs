//! Boundary value representation and marshalling

pub mod convert;
pub mod image;
pub mod variant;

pub use convert::{from_variant, to_variant, FromVariant, IntoVariant};
pub use image::ImageBlob;
pub use variant::VariantValue;
