//! Image references and identity

#[cfg(test)]
mod tests;

mod digest;
mod name;
mod platform;
mod reference;
mod registry;
mod repository;
mod tag;

pub use digest::ContentDigest;
pub use name::ImageName;
pub use platform::Platform;
pub use reference::{ImageReference, ImageVersion};
pub use registry::Registry;
pub use repository::Repository;
pub use tag::Tag;
