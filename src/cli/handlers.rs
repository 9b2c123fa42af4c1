//! CLI command handlers.

use std::error::Error;

use crate::events::LauncherEvent;
use crate::gateway::CommandGateway;
use crate::instance::{CreateInstanceRequest, InstanceStatus, LaunchOutcome};

use super::{AuthCommands, CreateArgs, InstanceCommands, UsersCommands};

type HandlerResult = Result<(), Box<dyn Error>>;

/// Handle `nolauncher auth <command>`.
pub async fn handle_auth(gateway: &CommandGateway, command: AuthCommands) -> HandlerResult {
    match command {
        AuthCommands::Login => login(gateway).await,
        AuthCommands::Refresh(args) => {
            let profile = gateway.refresh_account(&args.id).await?;
            println!("Refreshed {} ({})", profile.name, profile.id);
            Ok(())
        }
    }
}

async fn login(gateway: &CommandGateway) -> HandlerResult {
    let info = gateway.devicecode().await?;
    let runner = gateway.attempt().ok_or("sign-in attempt was not started")?;
    let mut codes = runner.subscribe_device_codes();
    let mut progress = runner.subscribe_progress();

    println!("Visit: {}", info.url);
    println!("Enter code: {}", info.code);
    println!("Code expires in {}s. Waiting for authorization...", info.expiring_in.as_secs());

    let printer = tokio::spawn(async move {
        loop {
            tokio::select! {
                Some(event) = codes.recv() => {
                    if let LauncherEvent::DeviceCodeIssued { url, code, .. } = event {
                        println!("Code expired. New code: {code} (visit {url})");
                    }
                }
                Some(event) = progress.recv() => {
                    if let LauncherEvent::AuthProgress { message, failure: None, .. } = event {
                        eprintln!("  {message}");
                    }
                }
                else => break,
            }
        }
    });

    let result = gateway.sign_in().await;
    printer.abort();
    let profile = result?;
    println!("Signed in as {} ({})", profile.name, profile.id);
    Ok(())
}

/// Handle `nolauncher users <command>`.
pub fn handle_users(gateway: &CommandGateway, command: UsersCommands) -> HandlerResult {
    match command {
        UsersCommands::List => {
            let current = gateway.get_current_user().ok();
            let users = gateway.get_users();
            if users.is_empty() {
                println!("No accounts. Run `nolauncher auth login`.");
            }
            for profile in users {
                let marker = if current.as_deref() == Some(profile.id.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!("{marker} {:<16} {}", profile.name, profile.id);
            }
        }
        UsersCommands::Current => println!("{}", gateway.get_current_user()?),
        UsersCommands::Switch(args) => {
            gateway.set_current_user(&args.id)?;
            println!("Current user: {}", args.id);
        }
        UsersCommands::Logout(args) => {
            gateway.logout_user(&args.id)?;
            println!("Logged out {}", args.id);
        }
    }
    Ok(())
}

/// Handle `nolauncher instance <command>`.
pub async fn handle_instance(gateway: &CommandGateway, command: InstanceCommands) -> HandlerResult {
    match command {
        InstanceCommands::List => {
            for instance in gateway.list_instance()? {
                println!("{}  {}", instance.id, instance.name);
            }
        }
        InstanceCommands::Create(args) => {
            let created = gateway.create_instance(create_request(args))?;
            println!("Created {} ({})", created.name, created.id);
        }
        InstanceCommands::Launch(args) => {
            let mut statuses = gateway.registry().subscribe(&args.id);
            if gateway.launch_game(&args.id).await? == LaunchOutcome::AlreadyActive {
                println!("{} is already running", args.id);
                return Ok(());
            }
            let watcher = tokio::spawn(async move {
                while let Some(status) = statuses.next().await {
                    match status {
                        InstanceStatus::Downloading { now, total } => {
                            eprintln!("  Downloading {now}/{total}")
                        }
                        other => eprintln!("  {}", other.name()),
                    }
                }
            });
            gateway.launcher().wait(&args.id).await;
            watcher.abort();
            match gateway.get_instance_status(&args.id) {
                InstanceStatus::Failed { details } => return Err(details.into()),
                status => println!("{} finished: {}", args.id, status.name()),
            }
        }
        InstanceCommands::Status(args) => {
            println!("{}", gateway.get_instance_status(&args.id).name());
        }
    }
    Ok(())
}

fn create_request(args: CreateArgs) -> CreateInstanceRequest {
    CreateInstanceRequest {
        name: args.name,
        ptype: args.platform,
        version: args.version,
        mod_version: args.mod_version,
    }
}
