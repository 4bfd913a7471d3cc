//! Water balance tree service.
//!
//! Flat `(id, pid)` measurement rows are fetched per group and date, then
//! assembled into a forest where every node carries its `/`-joined path.

pub mod config;
pub mod error;
pub mod gateway;
pub mod source;
pub mod supabase;
pub mod tree;

pub use error::AppError;
pub use tree::{assemble, assemble_with_stats, AssemblyStats, FlatRecord, TreeNode};
