//! Pull container images from a registry into `docker load` archives
//!
//! ```no_run
//! # async fn example() -> Result<(), tarpull::PullError> {
//! use std::sync::Arc;
//! use tarpull::{CancellationToken, NoopObserver, Platform, Puller};
//!
//! let puller = Puller::new()?;
//! let pulled = puller
//!     .pull(
//!         &"alpine:3.19".parse()?,
//!         &Platform::linux("arm64"),
//!         Arc::new(NoopObserver),
//!         &CancellationToken::new(),
//!     )
//!     .await?;
//! println!("wrote {:?}", pulled.archive);
//! # Ok(())
//! # }
//! ```

#[macro_use]
extern crate lazy_static;

pub mod archive;
pub mod errors;
pub mod image;
pub mod manifest;
pub mod registry;

mod builder;
mod pull;

pub use crate::{
    builder::PullerBuilder,
    errors::PullError,
    image::{ContentDigest, ImageName, ImageReference, Platform, Registry},
    pull::{NoopObserver, PullObserver, PullState, PulledImage, Puller},
    registry::DefaultRegistry,
};
pub use tokio_util::sync::CancellationToken;
