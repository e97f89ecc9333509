pub mod cli;
pub mod colors;
pub mod config;
pub mod errors;
pub mod fetcher;
pub mod fsutil;
pub mod gitutil;
pub mod hash;
pub mod integrity;
pub mod linker;
pub mod lockfile;
pub mod manifest;
pub mod network;
pub mod queue;
pub mod reporter;
pub mod resolver;
#[cfg(test)]
pub mod tests;
