pub mod canonical;
pub mod mapping;
pub mod payload;
pub mod wire;
