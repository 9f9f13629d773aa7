//! Decoding the mesh daemon's `status --json` output into a [`Snapshot`](shared::types::Snapshot).

pub mod hash;
mod json;
mod parse;
mod subnet;

pub use parse::StatusParser;

#[cfg(test)]
pub(crate) use parse::fixtures;
