//! List commands implementation

/// List all transports compiled into this binary
pub fn list_transports() {
    let transports = rmicro_connect::available_transports();
    if transports.is_empty() {
        println!("No transports available (recompile with features)");
        return;
    }

    println!("Available transports:");
    println!();
    for info in transports {
        let aliases = if info.aliases.is_empty() {
            String::new()
        } else {
            format!(" ({})", info.aliases.join(", "))
        };
        println!("  {:<24} - {}", format!("{}{}", info.name, aliases), info.description);
    }
    println!();
    println!("Every transport also takes retry=, start= and established= (seconds).");
}
