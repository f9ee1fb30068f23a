use rand::distr::{Alphanumeric, SampleString};

pub mod convert;

pub mod coordinator;

pub mod entity;

pub mod facet;

pub mod hierarchy;

pub mod item;

pub mod job;

pub mod mapping;

pub mod prefetch;

pub mod step;

pub mod tasklet;

/// Generates a random name consisting of alphanumeric characters.
///
/// # Returns
///
/// A `String` containing the generated random name.
fn build_name() -> String {
    Alphanumeric.sample_string(&mut rand::rng(), 8)
}
