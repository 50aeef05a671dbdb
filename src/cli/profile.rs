use super::print_warnings;
use anyhow::{Context, Result};
use clap::Subcommand;
use devbao::{DevbaoClient, Profile};

#[derive(Subcommand, Debug)]
pub enum ProfileCommand {
    /// List known profiles.
    #[command(visible_alias = "ls")]
    List,
    /// Apply a profile to a running node.
    Apply { node: String, profile: Profile },
    /// Undo a profile on a running node.
    Remove { node: String, profile: Profile },
}

pub async fn run(client: &DevbaoClient, command: ProfileCommand) -> Result<()> {
    match command {
        ProfileCommand::List => {
            for profile in Profile::all() {
                println!(" - {profile}: {}", profile.description());
            }
        }
        ProfileCommand::Apply { node, profile } => {
            let node = client.nodes().load(&node).await?;
            let warnings = client
                .apply_profile(&node, profile)
                .await
                .with_context(|| format!("failed to apply profile {profile} to {}", node.name))?;
            print_warnings(&warnings);
        }
        ProfileCommand::Remove { node, profile } => {
            let node = client.nodes().load(&node).await?;
            let warnings = client
                .remove_profile(&node, profile)
                .await
                .with_context(|| format!("failed to remove profile {profile} from {}", node.name))?;
            print_warnings(&warnings);
        }
    }
    Ok(())
}
