pub mod actor;
pub mod client;
pub mod inbox;

pub use crate::core::*;

pub use actor::{
    ConnectionSnapshot, GetConnectionSnapshot, NotificationActor, NotificationActorArgs,
    NotificationCommand,
};
pub use client::*;
pub use inbox::*;
