pub mod gbfs;
pub mod memory;
pub mod postgres;
