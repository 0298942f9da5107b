//! Version command - show version information

/// Print version information
///
/// If verbose is false, prints a single line with name and version.
/// If verbose is true, prints build details as well.
pub fn print_version(verbose: bool) {
    println!("{} {}", crate::NAME, crate::VERSION);

    if verbose {
        println!();
        println!("Features:");
        println!("  - Filtering SSH agent proxy (comment and SHA256 fingerprint allow-lists)");
        println!("  - Unix socket and TCP transports");
        println!("  - JSONL audit logging");
        println!();
        println!("Build info:");
        println!("  Target:    {}", std::env::consts::ARCH);
        println!("  OS:        {}", std::env::consts::OS);
        println!("  Rust:      {}", env!("RUSTC_VERSION"));
        if let Ok(exe) = std::env::current_exe() {
            println!("  Executable: {}", exe.display());
        }
        println!();
        println!("License:    MIT");
    }
}
