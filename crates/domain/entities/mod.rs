pub mod recordings;
pub mod streams;
