//! Core types and traits for StrataBackup
//!
//! This crate defines the foundational types used by the archive format:
//! - ClassId / AssetKey: asset identity and its key inside an archive
//! - AssetRecord: the fixed-size manifest record codec
//! - Asset: the asset capability and its in-process variants
//! - AssetError: error type for asset operations

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod asset;
pub mod error;
pub mod manifest;
pub mod types;

pub use asset::{Asset, AssetSource, FileAsset, LazyAsset, MemoryAsset};
pub use error::{AssetError, AssetResult};
pub use manifest::{AssetRecord, ASSET_RECORD_LEN, CLASS_ID_LEN, NAME_FIELD_LEN};
pub use types::{AssetKey, ClassId};
