use crate::ui::{theme, Icons};
use owo_colors::OwoColorize;

pub fn header(icon: &str, text: &str) {
    println!("{} {}", icon, text.style(theme().header.clone()));
}

pub fn banner(title: &str, subtitle: &str) {
    println!();
    println!("{} {}", Icons::ROCKET, title.style(theme().header.clone()));
    println!("   {}", subtitle.style(theme().dim.clone()));
    println!();
}

pub fn status(icon: &str, label: &str, value: &str) {
    println!(
        "{} {}: {}",
        icon,
        label.style(theme().dim.clone()),
        value.style(theme().accent.clone())
    );
}

pub fn success(label: &str) {
    println!("{} {}", Icons::CHECK, label.style(theme().success.clone()));
}

pub fn error(label: &str) {
    eprintln!("{} {}", Icons::CROSS, label.style(theme().error.clone()));
}

pub fn warn(label: &str) {
    eprintln!("{} {}", Icons::WARN, label.style(theme().warn.clone()));
}

pub fn empty(what: &str) {
    println!("∅ {}", format!("No {} found.", what).style(theme().muted.clone()));
}

pub fn timing(elapsed: &str) {
    println!("{} {}", Icons::CLOCK.style(theme().dim.clone()), elapsed);
}

pub fn summary_row(label: &str, value: &str) {
    println!("  {} {}", label.style(theme().dim.clone()), value);
}
