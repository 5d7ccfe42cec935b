use preinstall_diagnostics::resources::ResourcePlan;
use tracing::info;

use super::{connect, teardown};

pub async fn run() -> anyhow::Result<()> {
    println!("Cleaning up diagnostics resources...\n");

    let client = connect().await?;
    teardown(&client, &ResourcePlan::teardown(), "Resource deletion").await?;
    info!("clean_completed");

    println!("\nAll resources were successfully deleted.");
    Ok(())
}
