pub mod analysis;
pub mod db;
pub mod migrate;
pub mod models;
pub mod seed;
pub mod service;
