pub mod classification;
pub mod point;
pub mod store;
