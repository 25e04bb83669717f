use colored::*;
use terminal_size::{Width, Height, terminal_size};

pub fn print_header(model: &str, mode: &str) {
    let (width, _) = terminal_size().unwrap_or((Width(80), Height(24)));
    let width = width.0 as usize;

    let line = "─".repeat(width);
    println!("{}", line.black().bold());

    let name = "Parley".yellow().bold();
    let version = format!("v{}", env!("CARGO_PKG_VERSION")).black().bold();
    println!("  {} {}", name, version);

    let info = format!("  {}  •  {}", model, mode).cyan();
    println!("{}", info);

    println!("{}", line.black().bold());
}

pub fn print_step(msg: &str) {
    println!("  {} {}", "•".green(), msg);
}

pub fn print_success(msg: &str) {
    println!("  {} {}", "✓".green().bold(), msg.green());
}

pub fn print_warning(msg: &str) {
    println!("  {} {}", "⚠️ ".yellow().bold(), msg.yellow());
}

pub fn print_error(msg: &str) {
    println!("\n{} {}\n", "[ERROR]".red().bold(), msg.red());
}

pub fn print_thinking(msg: &str) {
    println!("  {} {}...", "∴".magenta(), msg);
}

/// Model output, framed by blank lines.
pub fn print_reply(text: &str) {
    println!("\n\n{}\n", text);
}

pub fn print_prompt() {
    println!("\n{}\n", "Enter your message (or type \"exit\" to quit)".blue().bold());
}

pub fn print_voice_controls() {
    println!();
    println!("{}", "Voice Input Controls:".bold());
    println!("  Type \"r\" + Enter to start/stop recording");
    println!("  Type \"q\" + Enter to quit the application");
    println!("--------------------------------");
}
