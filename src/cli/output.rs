use colored::Colorize;

use crate::error::TokenError;
use crate::oauth::{ManagerState, TokenStatus};

fn state_label(state: ManagerState, is_tty: bool) -> String {
    let label = state.to_string();
    if !is_tty {
        return label;
    }
    match state {
        ManagerState::Fresh => label.green().bold().to_string(),
        ManagerState::ExpiringSoon | ManagerState::RefreshInFlight => {
            label.yellow().bold().to_string()
        }
        ManagerState::NoCredentials => label.red().bold().to_string(),
    }
}

/// Human-readable status block.
pub fn format_status(status: &TokenStatus, location: &str, is_tty: bool) -> String {
    let fmt_time = |t: Option<chrono::DateTime<chrono::Utc>>| {
        t.map(|at| at.to_rfc3339())
            .unwrap_or_else(|| "-".to_string())
    };
    let mut out = String::new();
    out.push_str(&format!("State:       {}\n", state_label(status.state, is_tty)));
    out.push_str(&format!("Credentials: {}\n", location));
    out.push_str(&format!("Obtained at: {}\n", fmt_time(status.obtained_at)));
    out.push_str(&format!("Expires at:  {}\n", fmt_time(status.expires_at)));
    out
}

pub fn print_status(status: &TokenStatus, location: &str, json: bool, is_tty: bool) {
    if json {
        println!(
            "{}",
            serde_json::to_string_pretty(status).unwrap_or_default()
        );
    } else {
        print!("{}", format_status(status, location, is_tty));
    }
}

pub fn print_error(err: &TokenError, json_mode: bool) {
    if json_mode {
        println!(
            "{}",
            serde_json::to_string_pretty(&err.to_json()).unwrap_or_default()
        );
    } else {
        eprintln!("Error: {err}");
    }
}
