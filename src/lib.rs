pub mod compactor;
pub mod config;
pub mod directory;
pub mod engine;
pub mod lifecycle;
pub mod limits;
pub mod model;
pub mod observability;
pub mod suite;
pub mod tenant;
pub mod wal;
pub mod wire;
