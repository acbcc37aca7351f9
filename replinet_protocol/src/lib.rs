#![doc = include_str!("../README.md")]

mod act;
mod backend;
pub mod bytes;
mod conf;
mod frag;
mod seqno;

pub use {act::*, backend::*, conf::*, frag::*, seqno::*};
