pub mod auth;
pub mod election_driver;
pub mod floating_impl;
pub mod ipmi;
pub mod registry;
pub mod rest;

pub use election_driver::ElectionDriver;
pub use registry::ClusterRegistry;
