pub mod chrome;
pub mod config;
pub mod driver;
pub mod error;
pub mod selector;
pub mod session;
pub mod wait;

pub use chrome::ChromeDriver;
pub use config::{SessionBuilder, SessionConfig};
pub use driver::{Driver, Scope};
pub use error::{Error, Result};
pub use selector::Selector;
pub use session::Session;
pub use wait::{poll, Attempt, Deadline, PollOutcome};
