pub mod magnet;
pub mod value;
