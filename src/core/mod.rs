pub mod dispatcher;
pub mod frame;
pub mod health;
pub mod ping;
pub mod protocol;
pub mod reconnect;
pub mod types;

pub use dispatcher::*;
pub use frame::*;
pub use health::*;
pub use ping::*;
pub use protocol::*;
pub use reconnect::*;
pub use types::*;
