pub mod nets;
pub mod system;
