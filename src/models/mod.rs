// src/models/mod.rs
pub mod driver;
pub mod events;
pub mod notification;
pub mod push;
pub mod ride;

pub use driver::*;
pub use events::*;
pub use notification::*;
pub use push::*;
pub use ride::*;
