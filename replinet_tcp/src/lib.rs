#![doc = include_str!("../README.md")]

mod backend;
mod frame;

pub use backend::*;
