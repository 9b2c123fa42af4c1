//! Command-line front end over the command gateway.

pub mod handlers;
pub mod logging;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::instance::PlatformType;

/// nolauncher CLI
#[derive(Parser, Debug)]
#[command(name = "nolauncher", version, about = "nolauncher: sign in and launch game instances")]
pub struct Cli {
    /// Override the data directory
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Override the OAuth client id
    #[arg(long, global = true)]
    pub client_id: Option<String>,

    /// Emit JSON log lines
    #[arg(long, global = true)]
    pub log_json: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Sign-in
    Auth(AuthArgs),
    /// Stored accounts
    Users(UsersArgs),
    /// Game instances
    Instance(InstanceArgs),
}

#[derive(Parser, Debug)]
pub struct AuthArgs {
    #[command(subcommand)]
    pub command: AuthCommands,
}

#[derive(Subcommand, Debug)]
pub enum AuthCommands {
    /// Sign in with a device code
    Login,
    /// Sign an account in again from its refresh token
    Refresh(UserIdArgs),
}

#[derive(Parser, Debug)]
pub struct UsersArgs {
    #[command(subcommand)]
    pub command: UsersCommands,
}

#[derive(Subcommand, Debug)]
pub enum UsersCommands {
    /// List stored accounts
    List,
    /// Print the current user's id
    Current,
    /// Select the current user
    Switch(UserIdArgs),
    /// Forget an account
    Logout(UserIdArgs),
}

#[derive(Parser, Debug)]
pub struct UserIdArgs {
    /// Profile id
    pub id: String,
}

#[derive(Parser, Debug)]
pub struct InstanceArgs {
    #[command(subcommand)]
    pub command: InstanceCommands,
}

#[derive(Subcommand, Debug)]
pub enum InstanceCommands {
    /// List instances
    List,
    /// Create an instance
    Create(CreateArgs),
    /// Launch an instance and wait for it to exit
    Launch(InstanceIdArgs),
    /// Show an instance's status
    Status(InstanceIdArgs),
}

#[derive(Parser, Debug)]
pub struct CreateArgs {
    /// Instance name
    pub name: String,

    /// Game version
    #[arg(short, long)]
    pub version: String,

    /// Platform (minecraft, fabric, forge, liteloader, neoforge, quilt)
    #[arg(short, long, default_value = "minecraft")]
    pub platform: PlatformType,

    /// Loader version, required for every platform but minecraft
    #[arg(short, long)]
    pub mod_version: Option<String>,
}

#[derive(Parser, Debug)]
pub struct InstanceIdArgs {
    /// Instance id
    pub id: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn parse_auth_login() {
        let cli = Cli::try_parse_from(["nolauncher", "auth", "login"]).unwrap();
        match cli.command {
            Commands::Auth(auth) => assert!(matches!(auth.command, AuthCommands::Login)),
            other => panic!("expected Auth, got {other:?}"),
        }
    }

    #[test]
    fn parse_users_switch() {
        let cli = Cli::try_parse_from(["nolauncher", "users", "switch", "abc"]).unwrap();
        match cli.command {
            Commands::Users(users) => match users.command {
                UsersCommands::Switch(args) => assert_eq!(args.id, "abc"),
                other => panic!("expected Switch, got {other:?}"),
            },
            other => panic!("expected Users, got {other:?}"),
        }
    }

    #[test]
    fn parse_instance_create_with_loader() {
        let cli = Cli::try_parse_from([
            "nolauncher",
            "--data-dir",
            "/tmp/nl",
            "instance",
            "create",
            "Modded",
            "-v",
            "1.20.1",
            "-p",
            "fabric",
            "-m",
            "0.15.6",
        ])
        .unwrap();
        assert_eq!(cli.data_dir, Some(PathBuf::from("/tmp/nl")));
        match cli.command {
            Commands::Instance(instance) => match instance.command {
                InstanceCommands::Create(args) => {
                    assert_eq!(args.name, "Modded");
                    assert_eq!(args.platform, PlatformType::Fabric);
                    assert_eq!(args.mod_version.as_deref(), Some("0.15.6"));
                }
                other => panic!("expected Create, got {other:?}"),
            },
            other => panic!("expected Instance, got {other:?}"),
        }
    }

    #[test]
    fn parse_create_defaults_to_vanilla() {
        let cli =
            Cli::try_parse_from(["nolauncher", "instance", "create", "Plain", "-v", "1.21"]).unwrap();
        match cli.command {
            Commands::Instance(instance) => match instance.command {
                InstanceCommands::Create(args) => {
                    assert_eq!(args.platform, PlatformType::Minecraft);
                    assert!(args.mod_version.is_none());
                }
                other => panic!("expected Create, got {other:?}"),
            },
            other => panic!("expected Instance, got {other:?}"),
        }
    }

    #[test]
    fn parse_missing_subcommand_is_error() {
        assert!(Cli::try_parse_from(["nolauncher"]).is_err());
    }

    #[test]
    fn parse_instance_launch_missing_id_is_error() {
        assert!(Cli::try_parse_from(["nolauncher", "instance", "launch"]).is_err());
    }
}
