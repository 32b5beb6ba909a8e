//! Persistent and wire types.
//!
//! Election, assignment and ballot types are stored as-is in MongoDB, so IDs
//! and datetimes use MongoDB's own representations.

pub mod auth;
pub mod ballot;
pub mod election;
pub mod mongodb;
pub mod voter;
