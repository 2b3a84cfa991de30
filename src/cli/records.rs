// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 reconflow contributors

//! Records command - manage completion records

use colored::Colorize;
use miette::Result;
use std::io::{self, Write};

use super::RecordsAction;
use crate::artifacts::{FilesystemRecords, RecordStore};
use crate::utils::print_header;

/// Run the records command
pub async fn run(action: RecordsAction, _verbose: bool) -> Result<()> {
    match action {
        RecordsAction::Stats { output_root } => {
            let records = FilesystemRecords::for_output_root(&output_root);
            let stats = records.stats().await?;

            print_header("Completion Records");
            println!("  Location: {}", records.dir().display());
            println!("  Entries:  {}", stats.entries);
            println!("  Size:     {}", stats.formatted_size());

            if let Some(oldest) = stats.oldest_entry {
                if let Ok(duration) = oldest.elapsed() {
                    println!("  Oldest:   {} ago", format_duration(duration));
                }
            }

            if let Some(newest) = stats.newest_entry {
                if let Ok(duration) = newest.elapsed() {
                    println!("  Newest:   {} ago", format_duration(duration));
                }
            }

            Ok(())
        }

        RecordsAction::Clear { output_root, yes } => {
            let records = FilesystemRecords::for_output_root(&output_root);
            let stats = records.stats().await?;

            if stats.entries == 0 {
                println!("{}", "No completion records.".dimmed());
                return Ok(());
            }

            if !yes {
                print!(
                    "Clear {} completion records ({})? [y/N] ",
                    stats.entries,
                    stats.formatted_size()
                );
                io::stdout().flush().ok();

                let mut input = String::new();
                io::stdin().read_line(&mut input).ok();

                if !input.trim().eq_ignore_ascii_case("y") {
                    println!("{}", "Cancelled.".dimmed());
                    return Ok(());
                }
            }

            records.clear().await?;
            println!("{}", "Completion records cleared.".green());
            println!(
                "{}",
                "Outputs already on disk are still reused until they are removed.".dimmed()
            );

            Ok(())
        }
    }
}

fn format_duration(duration: std::time::Duration) -> String {
    let secs = duration.as_secs();

    if secs < 60 {
        format!("{}s", secs)
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86400 {
        format!("{}h", secs / 3600)
    } else {
        format!("{}d", secs / 86400)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_duration() {
        use std::time::Duration;
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(600)), "10m");
        assert_eq!(format_duration(Duration::from_secs(7200)), "2h");
        assert_eq!(format_duration(Duration::from_secs(3 * 86400)), "3d");
    }
}
