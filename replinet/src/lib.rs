#![doc = include_str!("../README.md")]

mod backend;
mod config;
mod conn;
mod error;
mod sequencer;
pub mod to;

pub use replinet_protocol::{
    ActKind, Action, Backend, BackendError, BackendEvent, ConfDesc, FragHeader, MEMBER_NAME_MAX,
    MemberId, Seqno, ViewDesc,
};
pub use {config::*, conn::*, error::*};
