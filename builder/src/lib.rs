// Licensed under the Apache-2.0 license

//! Turns linked firmware binaries into signed, encrypted release artifacts.
//!
//! Per binary: [`stamp`] the header with the payload length and HMAC,
//! [`pad`] to the flash block size, emit Intel HEX through [`ihex`] and an
//! AES-256-CTR image through [`encrypt`], then [`publish`] both under the
//! firmware [`version`]. [`pipeline::run`] drives the whole batch.

pub mod config;
pub mod encrypt;
mod error;
pub mod ihex;
pub mod pad;
pub mod pipeline;
pub mod publish;
pub mod stamp;
pub mod verify;
pub mod version;

pub use config::{KeyConfig, KeyMaterial, ReleaseConfig};
pub use error::{ReleaseError, Result};
pub use ihex::AddressedImage;
pub use pipeline::{run, ReleaseReport};
pub use publish::ReleasePublisher;
pub use version::{FirmwareVersion, VersionRegistry, UNKNOWN_VERSION};
