pub mod app;
pub mod broadcast;
pub mod config;
pub mod domain;
pub mod platform;
pub mod repository;
pub mod routes;
pub mod services;
pub mod utils;

#[cfg(test)]
pub(crate) mod test_support;
