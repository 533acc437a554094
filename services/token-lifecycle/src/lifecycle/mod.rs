//! Lifecycle engine: issuance, authentication and single-use refresh rotation.

pub mod collaborators;
pub mod engine;
pub mod pair;

pub use collaborators::{
    AddressChangeNotifier, NotificationError, PassthroughResolver, SubjectResolver,
    TracingNotifier,
};
pub use engine::{EngineSettings, LifecycleEngine};
pub use pair::TokenPair;
