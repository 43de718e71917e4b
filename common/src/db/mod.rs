pub mod core;
pub mod indices;
pub mod parser;
pub mod tree;
