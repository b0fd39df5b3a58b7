//! Administrative subcommands. Each one builds the shared state, does its work,
//! and prints a plain-text report to stdout.

pub mod audit;
pub mod identity;
pub mod service;
pub mod stats;

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}
