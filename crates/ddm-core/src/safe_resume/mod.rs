//! Safe resume: verify on-disk parts still match a resumed item's manifest
//! before an `Engine` is allowed to pick its progress back up.

pub mod integrity;

pub use integrity::verify_resumable;
