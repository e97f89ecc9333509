pub mod common;

mod hash;
mod install_command;
mod resolver;
