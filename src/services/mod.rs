pub mod embedding;
pub mod fetch;
pub mod generation;
