pub fn run() -> anyhow::Result<()> {
    println!("preinstall-diagnostics v{}", env!("CARGO_PKG_VERSION"));
    println!("  default image: {}", preinstall_diagnostics::config::DEFAULT_IMAGE);
    Ok(())
}
