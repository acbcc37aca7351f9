#![doc = include_str!("../README.md")]

mod backend;
mod group;

pub use {backend::*, group::set_primary};
