//! nolauncher: launcher backend core.
//!
//! Signs a player in through the device-code chain (Microsoft, Xbox Live,
//! XSTS, game services, profile), keeps the accounts and instances on disk,
//! tracks instance status and fans changes out over a typed event bus. The
//! [`gateway::CommandGateway`] is the surface a UI calls.
//!
//! # Quick Start
//!
//! ```no_run
//! use nolauncher::config::LauncherConfig;
//! use nolauncher::gateway::CommandGateway;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = LauncherConfig::from_env()?;
//! let gateway = CommandGateway::from_config(&config)?;
//! let code = gateway.devicecode().await?;
//! println!("Visit {} and enter {}", code.url, code.code);
//! let profile = gateway.sign_in().await?;
//! println!("Signed in as {}", profile.name);
//! # Ok(())
//! # }
//! ```

pub mod accounts;
pub mod auth;
pub mod config;
pub mod error;
pub mod events;
pub mod gateway;
pub mod instance;
pub mod util;

#[cfg(feature = "cli")]
pub mod cli;
