pub mod audit;
pub mod classifier;
pub mod db;
pub mod error;
pub mod fmt;
pub mod logging;
pub mod matcher;
pub mod models;
pub mod ranker;
pub mod settings;
pub mod store;
