pub mod approval;
pub mod command;
pub mod error;
pub mod nomination;
pub mod objection;
pub mod ranking;
pub mod state_machine;
pub mod wikitext;

pub use error::LifecycleError;
pub use nomination::*;

mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

fn short_hash(hash: &str) -> String {
    hash.chars().take(8).collect()
}

/// Revision the binary was built from, shortened to eight characters.
pub fn get_bot_version() -> String {
    // Packagers building outside a checkout pin the hash explicitly
    if let Some(git_hash) = option_env!("HOLOCRON_GIT_HASH") {
        short_hash(git_hash)
    } else if let Some(git_hash) = built_info::GIT_COMMIT_HASH {
        short_hash(git_hash)
    } else {
        "unknown".to_string()
    }
}
