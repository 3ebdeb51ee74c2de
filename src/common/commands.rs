use log::{debug, info, warn};
use tokio::process::Command;

fn shell(command: &str) -> Command {
    #[cfg(windows)]
    {
        let mut cmd = Command::new("cmd");
        cmd.arg("/C").arg(command);
        cmd
    }
    #[cfg(not(windows))]
    {
        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(command);
        cmd
    }
}

/// Run the configured pre-start commands in order.
///
/// Failures are logged and never abort startup. Returns how many commands
/// failed to spawn or exited unsuccessfully.
pub async fn run_commands(commands: &[String]) -> usize {
    let mut failures = 0;
    for command in commands {
        info!("Running pre-start command: {}", command);
        match shell(command).status().await {
            Ok(status) if status.success() => debug!("Command '{}' finished", command),
            Ok(status) => {
                warn!("Command '{}' exited with {}", command, status);
                failures += 1;
            }
            Err(e) => {
                warn!("Command '{}' could not be started: {}", command, e);
                failures += 1;
            }
        }
    }
    failures
}
