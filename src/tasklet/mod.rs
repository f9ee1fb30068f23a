//! # Tasklet Module
//!
//! Single-shot operations run around the record pipeline: backing up a
//! consumed import file and removing entities an import did not touch.

pub mod backup;

pub mod cleanup;
