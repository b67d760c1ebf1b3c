//! Electra Manifest
//!
//! A manifest is the asset-reference-only form of a dispatch: a versioned
//! tree of dispatch, lattice, task graph and nodes in which every payload is
//! replaced by an [`Asset`](electra_asset::Asset) descriptor.
//!
//! Registration works in four steps:
//!
//! 1. The client [`serialize`]s its dispatch locally (assets get `file://` URIs).
//! 2. It sends [`strip_local_uris`] of that manifest to the server.
//! 3. The server answers with `remote_uri` filled in for every asset.
//! 4. The client calls [`merge_response_manifest`] and uploads each asset.
//!
//! The [`wire`] module holds the other JSON bodies of the HTTP protocol.

mod dispatch;
mod error;
mod keys;
mod manifest;
mod metadata;
mod protocol;
pub mod wire;

pub use dispatch::{Dispatch, Lattice, deserialize, serialize};
pub use error::ManifestError;
pub use keys::{AssetLocator, DispatchAssetKey, LatticeAssetKey};
pub use manifest::{
  LatticeManifest, NodeManifest, ResultManifest, SCHEMA_VERSION, TransportGraphManifest,
};
pub use metadata::{DispatchMetadata, LatticeMetadata, NodeMetadata};
pub use protocol::{merge_response_manifest, reset, strip_lattice_uris, strip_local_uris};
