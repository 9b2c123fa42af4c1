//! Device-code sign-in and the identity-federation chain.

pub mod chain;
pub mod device_code;
pub mod error;
pub mod profile;
pub mod provider;
pub mod providers;
pub mod token;

pub use chain::{AuthChainRunner, AuthConfig, AuthStage, ChainFailure, ExchangeOutcome};
pub use device_code::{DeviceCodeGrant, DeviceCodePoll, DeviceCodeSession};
pub use error::{AuthError, AuthErrorKind, PolicyBlock};
pub use profile::{Cape, Profile, Skin};
pub use provider::IdentityProvider;
pub use token::{GameToken, MicrosoftToken, XboxLiveToken, XboxSecurityToken};
