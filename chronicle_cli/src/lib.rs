pub mod cli;
pub mod dev_backends;
