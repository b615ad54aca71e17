//! Operator-facing progress lines.
//!
//! These are for the human watching the terminal; diagnostics go through
//! `tracing` instead.

use chrono::Local;
use crossterm::style::Stylize;
use std::fmt::Display;
use std::time::Duration;

/// Wrap `url` in an OSC 8 hyperlink so terminals render it clickable.
pub fn terminal_link(name: &str, url: &str) -> String {
    format!("\u{1b}]8;;{url}\u{7}{name}\u{1b}]8;;\u{7}")
}

fn timestamp() -> String {
    Local::now().format("%H:%M:%S").to_string()
}

pub fn listening(receive_url: &str, local_url: &str, view_url: Option<&str>) {
    println!();
    println!("Webhook relay is now listening at");
    println!("{}", terminal_link(receive_url, receive_url).bold());
    println!();
    println!("All requests on this endpoint will be forwarded to your local URL:");
    println!("{}", local_url);

    if let Some(view_url) = view_url {
        println!();
        println!("View logs and debug information at");
        println!("{}", terminal_link(view_url, view_url));
        println!("To disable logging run \"webhook-relay listen --no-logging\"");
    }
    println!();
}

pub fn forwarding(local_url: &str) {
    println!(
        "{} {}",
        timestamp().dark_grey(),
        format!("<- Forwarding message to: {}", local_url).blue()
    );
}

pub fn response_received(status: impl Display) {
    println!(
        "{} {}",
        timestamp().dark_grey(),
        format!(
            "-> Received \"{}\" response, forwarding to webhook sender",
            status
        )
        .green()
    );
}

pub fn invalid_message() {
    eprintln!(
        "{} {}",
        timestamp().dark_grey(),
        "Received invalid webhook message... skipping".red()
    );
}

pub fn local_request_failed(error: impl Display) {
    eprintln!(
        "{} {}",
        timestamp().dark_grey(),
        format!("Failed to make request to local server:\n{}", error).red()
    );
}

pub fn connection_failed(error: impl Display) {
    eprintln!(
        "{}",
        format!("Failed to connect to webhook relay:\n{}", error).red()
    );
}

pub fn connection_lost(error: impl Display) {
    eprintln!("{}", format!("Lost connection to webhook relay: {}", error).yellow());
}

pub fn retrying(delay: Duration) {
    if delay.is_zero() {
        eprintln!("{}", "Reconnecting...".yellow());
    } else {
        eprintln!(
            "{}",
            format!("Reattempting connection in {:?}", delay).yellow()
        );
    }
}
