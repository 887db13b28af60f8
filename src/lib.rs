pub mod commands;
pub mod config;
pub mod coordinator;
pub mod deferred;
pub mod detector;
pub mod enforcement;
pub mod messaging;
pub mod script;
pub mod stemmer;
pub mod store;

pub use commands::{AdminCommand, CommandOutcome};
pub use config::{Config, ConfigError, Credentials};
pub use coordinator::{Handled, ModerationCoordinator};
pub use detector::Violation;
pub use enforcement::{Decision, EnforcementPolicy};
pub use messaging::{InboundEvent, IncomingMessage, MessagingClient, MessagingError};
pub use stemmer::{SnowballStemmer, Stemmer};
pub use store::{PolicyState, PolicyStore, SharedPolicy, StoreError};
